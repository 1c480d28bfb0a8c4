use anyhow::{Context, Result};
use data_encoding::BASE32_NOPAD;
use futures::stream::TryStreamExt;
use mongodb::bson::{DateTime, doc, oid::ObjectId};
use rand::RngCore;
use std::time::{Duration, SystemTime};
use tracing::info;

use crate::error::DomainError;
use crate::models::{Session, User, UserRole};

use super::AppState;

/// A user resolved from a session, together with the company and fiscal year the
/// session currently works in.
#[derive(Clone, Debug)]
pub struct ActiveUser {
    pub id: ObjectId,
    pub email: String,
    pub name: String,
    pub secret: String,
    pub role: UserRole,
    pub companies: Vec<ObjectId>,
    pub company_id: Option<ObjectId>,
    pub fiscal_year_id: Option<ObjectId>,
}

impl ActiveUser {
    fn from_user(user: User, session: Option<&Session>) -> Result<Self> {
        Ok(ActiveUser {
            id: user.id.context("user missing _id")?,
            email: user.email,
            name: user.name,
            secret: user.secret,
            role: user.role,
            companies: user.companies,
            company_id: session.and_then(|s| s.company_id),
            fiscal_year_id: session.and_then(|s| s.fiscal_year_id),
        })
    }

    /// Admins reach every company; everyone else only the companies they belong to.
    pub fn can_access(&self, company_id: &ObjectId) -> bool {
        self.role.is_admin() || self.companies.contains(company_id)
    }
}

pub async fn find_user(state: &AppState, email: &str) -> Result<Option<ActiveUser>> {
    match state.users.find_one(doc! { "email": email }).await? {
        Some(user) => ActiveUser::from_user(user, None).map(Some),
        None => Ok(None),
    }
}

pub async fn list_users(state: &AppState) -> Result<Vec<ActiveUser>> {
    let mut cursor = state.users.find(doc! {}).await?;
    let mut users = Vec::new();
    while let Some(user) = cursor.try_next().await? {
        users.push(ActiveUser::from_user(user, None)?);
    }
    Ok(users)
}

pub async fn get_user_by_id(state: &AppState, id: &ObjectId) -> Result<Option<ActiveUser>> {
    match state.users.find_one(doc! { "_id": id }).await? {
        Some(user) => ActiveUser::from_user(user, None).map(Some),
        None => Ok(None),
    }
}

pub async fn create_user(
    state: &AppState,
    email: &str,
    name: &str,
    secret: &str,
    role: UserRole,
) -> Result<ObjectId> {
    if state.users.find_one(doc! { "email": email }).await?.is_some() {
        return Err(DomainError::conflict(format!("user {email} already exists")));
    }
    let res = state
        .users
        .insert_one(User {
            id: None,
            email: email.to_string(),
            name: name.to_string(),
            secret: secret.to_string(),
            role,
            companies: Vec::new(),
        })
        .await?;
    let id = res
        .inserted_id
        .as_object_id()
        .context("user insert missing _id")?;
    info!(user_id = %id, email, "user created");
    Ok(id)
}

pub async fn add_company_to_user(
    state: &AppState,
    user_id: &ObjectId,
    company_id: &ObjectId,
) -> Result<()> {
    state
        .users
        .update_one(
            doc! { "_id": user_id },
            doc! { "$addToSet": { "companies": company_id } },
        )
        .await?;
    Ok(())
}

pub async fn create_session(
    state: &AppState,
    email: &str,
    company_id: Option<ObjectId>,
    fiscal_year_id: Option<ObjectId>,
) -> Result<String> {
    let _ = state
        .sessions
        .delete_many(doc! { "user_email": email.to_string() })
        .await;

    let mut token_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut token_bytes);
    let token = BASE32_NOPAD.encode(&token_bytes);

    let expires_at = DateTime::from_system_time(
        SystemTime::now() + Duration::from_secs(state.session_ttl_seconds),
    );

    state
        .sessions
        .insert_one(Session {
            id: None,
            token: token.clone(),
            user_email: email.to_string(),
            company_id,
            fiscal_year_id,
            expires_at,
        })
        .await?;

    Ok(token)
}

pub async fn find_user_by_session(state: &AppState, token: &str) -> Result<Option<ActiveUser>> {
    let Some(session) = state.sessions.find_one(doc! { "token": token }).await? else {
        return Ok(None);
    };
    if session.expires_at.to_system_time() <= SystemTime::now() {
        // Remove expired session, ignore result
        let _ = state.sessions.delete_one(doc! { "token": token }).await;
        return Ok(None);
    }
    match state
        .users
        .find_one(doc! { "email": &session.user_email })
        .await?
    {
        Some(user) => ActiveUser::from_user(user, Some(&session)).map(Some),
        None => Ok(None),
    }
}

/// Points the session at another company and the fiscal year to work in.
pub async fn set_session_company(
    state: &AppState,
    token: &str,
    company_id: &ObjectId,
    fiscal_year_id: Option<ObjectId>,
) -> Result<()> {
    state
        .sessions
        .update_one(
            doc! { "token": token },
            doc! { "$set": { "company_id": company_id, "fiscal_year_id": fiscal_year_id } },
        )
        .await?;
    Ok(())
}

pub async fn set_session_fiscal_year(
    state: &AppState,
    token: &str,
    fiscal_year_id: &ObjectId,
) -> Result<()> {
    state
        .sessions
        .update_one(
            doc! { "token": token },
            doc! { "$set": { "fiscal_year_id": fiscal_year_id } },
        )
        .await?;
    Ok(())
}

pub async fn delete_session(state: &AppState, token: &str) -> Result<()> {
    state.sessions.delete_one(doc! { "token": token }).await?;
    Ok(())
}
