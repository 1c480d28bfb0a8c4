use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use futures::stream::TryStreamExt;
use mongodb::{
    ClientSession,
    bson::{Document, doc, oid::ObjectId, to_bson},
};
use serde::Deserialize;
use slug::slugify;
use tracing::{info, warn};

use crate::error::DomainError;
use crate::models::{Company, DateFormat, TradeType};

use super::{
    AppState, COMPANY_COLLECTIONS, fiscal_years::create_initial_fiscal_year, seed,
    users::add_company_to_user,
};

#[derive(Debug, Clone, Deserialize)]
pub struct CompanyInput {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub pan: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub trade_type: TradeType,
    #[serde(default)]
    pub date_format: DateFormat,
    #[serde(default)]
    pub vat_enabled: bool,
    /// First day of the first fiscal year; defaults to January 1st of the current year.
    #[serde(default)]
    pub fiscal_year_start: Option<NaiveDate>,
}

impl CompanyInput {
    fn validated_name(&self) -> Result<String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("company name is required"));
        }
        Ok(name.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CreatedCompany {
    pub company_id: ObjectId,
    pub fiscal_year_id: ObjectId,
    pub default_accounts: usize,
}

pub async fn list_companies(state: &AppState) -> Result<Vec<Company>> {
    let mut cursor = state.companies.find(doc! {}).await?;
    let mut companies = Vec::new();
    while let Some(company) = cursor.try_next().await? {
        companies.push(company);
    }
    Ok(companies)
}

pub async fn list_companies_for_user(
    state: &AppState,
    company_ids: &[ObjectId],
) -> Result<Vec<Company>> {
    let companies: Vec<Company> = state
        .companies
        .find(doc! { "_id": { "$in": company_ids.to_vec() } })
        .sort(doc! { "name": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(companies)
}

pub async fn get_company_by_id(state: &AppState, id: &ObjectId) -> Result<Option<Company>> {
    state
        .companies
        .find_one(doc! { "_id": id })
        .await
        .map_err(Into::into)
}

/// Names are unique per installation, compared through their slug so case and
/// punctuation differences do not slip through.
pub async fn company_name_taken(
    state: &AppState,
    name: &str,
    except: Option<&ObjectId>,
) -> Result<bool> {
    let mut filter = doc! { "slug": slugify(name) };
    if let Some(id) = except {
        filter.insert("_id", doc! { "$ne": id });
    }
    Ok(state.companies.find_one(filter).await?.is_some())
}

pub async fn create_company(
    state: &AppState,
    owner_id: &ObjectId,
    input: &CompanyInput,
) -> Result<CreatedCompany> {
    let name = input.validated_name()?;
    if company_name_taken(state, &name, None).await? {
        return Err(DomainError::conflict(format!(
            "a company named {name} already exists"
        )));
    }

    let res = state
        .companies
        .insert_one(Company {
            id: None,
            slug: slugify(&name),
            name: name.clone(),
            address: input.address.clone(),
            country: input.country.clone(),
            pan: input.pan.clone(),
            phone: input.phone.clone(),
            email: input.email.clone(),
            trade_type: input.trade_type,
            date_format: input.date_format,
            vat_enabled: input.vat_enabled,
            owner_id: *owner_id,
            users: vec![*owner_id],
            created_at: Some(Utc::now()),
            updated_at: None,
        })
        .await?;
    let company_id = res
        .inserted_id
        .as_object_id()
        .context("company insert missing _id")?;

    let fiscal_year_id =
        create_initial_fiscal_year(state, &company_id, input.fiscal_year_start).await?;
    let default_accounts = seed::seed_company_defaults(state, &company_id).await?;
    add_company_to_user(state, owner_id, &company_id).await?;

    info!(company_id = %company_id, name = %name, "company created");
    Ok(CreatedCompany {
        company_id,
        fiscal_year_id,
        default_accounts,
    })
}

pub async fn update_company(state: &AppState, id: &ObjectId, input: &CompanyInput) -> Result<()> {
    let name = input.validated_name()?;
    if company_name_taken(state, &name, Some(id)).await? {
        return Err(DomainError::conflict(format!(
            "a company named {name} already exists"
        )));
    }

    let res = state
        .companies
        .update_one(
            doc! { "_id": id },
            doc! { "$set": {
                "name": &name,
                "slug": slugify(&name),
                "address": &input.address,
                "country": &input.country,
                "pan": &input.pan,
                "phone": &input.phone,
                "email": &input.email,
                "trade_type": to_bson(&input.trade_type)?,
                "date_format": to_bson(&input.date_format)?,
                "vat_enabled": input.vat_enabled,
                "updated_at": to_bson(&Utc::now())?,
            } },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(DomainError::not_found("company"));
    }
    Ok(())
}

/// Removes the company and every document that belongs to it. Runs inside a
/// multi-document transaction when the deployment supports one, so a failure
/// leaves nothing half-deleted. Returns the number of documents removed.
pub async fn delete_company(state: &AppState, id: &ObjectId) -> Result<u64> {
    if get_company_by_id(state, id).await?.is_none() {
        return Err(DomainError::not_found("company"));
    }

    let removed = if state.supports_transactions {
        let mut session = state.client.start_session().await?;
        session.start_transaction().await?;
        match cascade_delete(state, id, Some(&mut session)).await {
            Ok(removed) => {
                session.commit_transaction().await?;
                removed
            }
            Err(err) => {
                let _ = session.abort_transaction().await;
                return Err(err.context("company delete rolled back"));
            }
        }
    } else {
        warn!(company_id = %id, "deployment has no transactions, deleting company sequentially");
        cascade_delete(state, id, None).await?
    };

    info!(company_id = %id, removed, "company deleted");
    Ok(removed)
}

async fn cascade_delete(
    state: &AppState,
    id: &ObjectId,
    mut session: Option<&mut ClientSession>,
) -> Result<u64> {
    let mut removed = 0;
    for name in COMPANY_COLLECTIONS {
        let coll = state.db.collection::<Document>(name);
        let filter = doc! { "company_id": id };
        let res = match session.as_deref_mut() {
            Some(s) => coll.delete_many(filter).session(s).await?,
            None => coll.delete_many(filter).await?,
        };
        removed += res.deleted_count;
    }

    let company_filter = doc! { "_id": id };
    let res = match session.as_deref_mut() {
        Some(s) => state.companies.delete_one(company_filter).session(s).await?,
        None => state.companies.delete_one(company_filter).await?,
    };
    removed += res.deleted_count;

    let users_filter = doc! { "companies": id };
    let users_update = doc! { "$pull": { "companies": id } };
    match session.as_deref_mut() {
        Some(s) => {
            state
                .users
                .update_many(users_filter, users_update)
                .session(s)
                .await?
        }
        None => state.users.update_many(users_filter, users_update).await?,
    };

    let sessions_filter = doc! { "company_id": id };
    let sessions_update = doc! { "$set": { "company_id": null, "fiscal_year_id": null } };
    match session.as_deref_mut() {
        Some(s) => {
            state
                .sessions
                .update_many(sessions_filter, sessions_update)
                .session(s)
                .await?
        }
        None => {
            state
                .sessions
                .update_many(sessions_filter, sessions_update)
                .await?
        }
    };

    Ok(removed)
}
