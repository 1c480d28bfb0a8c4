use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson};
use serde::Deserialize;
use tracing::info;

use crate::error::DomainError;
use crate::ids;
use crate::ledger::{self, Balance, Statement};
use crate::models::{
    Account, AccountGroup, BalanceType, FiscalOpening, GroupNature, GroupType, LedgerEntry,
};

use super::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct AccountGroupInput {
    pub name: String,
    #[serde(default)]
    pub group_type: GroupType,
    pub nature: GroupNature,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInput {
    pub name: String,
    #[serde(deserialize_with = "ids::object_id")]
    pub group_id: ObjectId,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub pan: Option<String>,
    /// Opening balance for the session's fiscal year.
    #[serde(default)]
    pub opening_balance: f64,
    #[serde(default)]
    pub opening_balance_type: BalanceType,
    #[serde(default)]
    pub is_active: Option<bool>,
}

fn required_name(name: &str, what: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation(format!("{what} name is required")));
    }
    Ok(name.to_string())
}

// ---------------------------------------------------------------------------
// Account groups
// ---------------------------------------------------------------------------

pub async fn list_account_groups(
    state: &AppState,
    company_id: &ObjectId,
) -> Result<Vec<AccountGroup>> {
    let groups: Vec<AccountGroup> = state
        .account_groups
        .find(doc! { "company_id": company_id })
        .sort(doc! { "name": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(groups)
}

pub async fn get_account_group(
    state: &AppState,
    company_id: &ObjectId,
    id: &ObjectId,
) -> Result<Option<AccountGroup>> {
    state
        .account_groups
        .find_one(doc! { "_id": id, "company_id": company_id })
        .await
        .map_err(Into::into)
}

pub async fn create_account_group(
    state: &AppState,
    company_id: &ObjectId,
    input: &AccountGroupInput,
) -> Result<ObjectId> {
    let name = required_name(&input.name, "account group")?;
    if state
        .account_groups
        .find_one(doc! { "company_id": company_id, "name": &name })
        .await?
        .is_some()
    {
        return Err(DomainError::conflict(format!("account group {name} already exists")));
    }
    let res = state
        .account_groups
        .insert_one(AccountGroup {
            id: None,
            company_id: *company_id,
            name,
            group_type: input.group_type,
            nature: input.nature,
            is_default: false,
        })
        .await?;
    res.inserted_id
        .as_object_id()
        .context("account group insert missing _id")
}

pub async fn update_account_group(
    state: &AppState,
    company_id: &ObjectId,
    id: &ObjectId,
    input: &AccountGroupInput,
) -> Result<()> {
    let name = required_name(&input.name, "account group")?;
    let group = get_account_group(state, company_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("account group"))?;
    if group.is_default && group.nature != input.nature {
        return Err(DomainError::validation(
            "the nature of a default account group cannot change",
        ));
    }
    state
        .account_groups
        .update_one(
            doc! { "_id": id, "company_id": company_id },
            doc! { "$set": {
                "name": name,
                "group_type": to_bson(&input.group_type)?,
                "nature": to_bson(&input.nature)?,
            } },
        )
        .await?;
    Ok(())
}

pub async fn delete_account_group(
    state: &AppState,
    company_id: &ObjectId,
    id: &ObjectId,
) -> Result<()> {
    let group = get_account_group(state, company_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("account group"))?;
    if group.is_default {
        return Err(DomainError::validation("default account groups cannot be deleted"));
    }
    if state
        .accounts
        .find_one(doc! { "group_id": id })
        .await?
        .is_some()
    {
        return Err(DomainError::conflict("account group still has accounts"));
    }
    state.account_groups.delete_one(doc! { "_id": id }).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

pub async fn list_accounts(state: &AppState, company_id: &ObjectId) -> Result<Vec<Account>> {
    let accounts: Vec<Account> = state
        .accounts
        .find(doc! { "company_id": company_id })
        .sort(doc! { "name": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(accounts)
}

pub async fn get_account(
    state: &AppState,
    company_id: &ObjectId,
    id: &ObjectId,
) -> Result<Option<Account>> {
    state
        .accounts
        .find_one(doc! { "_id": id, "company_id": company_id })
        .await
        .map_err(Into::into)
}

/// Loads an account that vouchers may post to: it must exist in the company and be active.
pub async fn require_active_account(
    state: &AppState,
    company_id: &ObjectId,
    id: &ObjectId,
) -> Result<Account> {
    let account = get_account(state, company_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("account"))?;
    if !account.is_active {
        return Err(DomainError::validation(format!(
            "account {} is inactive",
            account.name
        )));
    }
    Ok(account)
}

/// One of the seeded accounts (Cash in Hand, Sales, VAT, ...) looked up by name.
pub async fn default_account(state: &AppState, company_id: &ObjectId, name: &str) -> Result<ObjectId> {
    state
        .accounts
        .find_one(doc! { "company_id": company_id, "name": name, "is_default": true })
        .await?
        .and_then(|a| a.id)
        .with_context(|| format!("default account {name} missing for company {company_id}"))
}

async fn ensure_group_in_company(
    state: &AppState,
    company_id: &ObjectId,
    group_id: &ObjectId,
) -> Result<()> {
    if get_account_group(state, company_id, group_id).await?.is_none() {
        return Err(DomainError::validation("account group does not belong to this company"));
    }
    Ok(())
}

fn opening_entry(fiscal_year_id: &ObjectId, input: &AccountInput) -> Result<Option<FiscalOpening>> {
    if input.opening_balance < 0.0 || !input.opening_balance.is_finite() {
        return Err(DomainError::validation("opening balance must be a positive amount"));
    }
    Ok((input.opening_balance > 0.0).then(|| FiscalOpening {
        fiscal_year_id: *fiscal_year_id,
        amount: ledger::round2(input.opening_balance),
        balance_type: input.opening_balance_type,
    }))
}

pub async fn create_account(
    state: &AppState,
    company_id: &ObjectId,
    fiscal_year_id: &ObjectId,
    input: &AccountInput,
) -> Result<ObjectId> {
    let name = required_name(&input.name, "account")?;
    ensure_group_in_company(state, company_id, &input.group_id).await?;
    if state
        .accounts
        .find_one(doc! { "company_id": company_id, "name": &name })
        .await?
        .is_some()
    {
        return Err(DomainError::conflict(format!("account {name} already exists")));
    }

    let opening_balances = opening_entry(fiscal_year_id, input)?.into_iter().collect();
    let res = state
        .accounts
        .insert_one(Account {
            id: None,
            company_id: *company_id,
            name,
            group_id: input.group_id,
            code: input.code.clone(),
            address: input.address.clone(),
            phone: input.phone.clone(),
            pan: input.pan.clone(),
            opening_balances,
            is_default: false,
            is_active: input.is_active.unwrap_or(true),
            created_at: Some(Utc::now()),
            updated_at: None,
        })
        .await?;
    let id = res
        .inserted_id
        .as_object_id()
        .context("account insert missing _id")?;
    info!(account_id = %id, company_id = %company_id, "account created");
    Ok(id)
}

/// Updates account details and replaces the opening balance of the given fiscal year.
pub async fn update_account(
    state: &AppState,
    company_id: &ObjectId,
    fiscal_year_id: &ObjectId,
    id: &ObjectId,
    input: &AccountInput,
) -> Result<()> {
    let name = required_name(&input.name, "account")?;
    let existing = get_account(state, company_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("account"))?;
    ensure_group_in_company(state, company_id, &input.group_id).await?;
    if existing.is_default && existing.name != name {
        return Err(DomainError::validation("default accounts cannot be renamed"));
    }
    if state
        .accounts
        .find_one(doc! { "company_id": company_id, "name": &name, "_id": { "$ne": id } })
        .await?
        .is_some()
    {
        return Err(DomainError::conflict(format!("account {name} already exists")));
    }

    let mut opening_balances: Vec<FiscalOpening> = existing
        .opening_balances
        .into_iter()
        .filter(|o| &o.fiscal_year_id != fiscal_year_id)
        .collect();
    opening_balances.extend(opening_entry(fiscal_year_id, input)?);

    state
        .accounts
        .update_one(
            doc! { "_id": id, "company_id": company_id },
            doc! { "$set": {
                "name": name,
                "group_id": input.group_id,
                "code": &input.code,
                "address": &input.address,
                "phone": &input.phone,
                "pan": &input.pan,
                "opening_balances": to_bson(&opening_balances)?,
                "is_active": input.is_active.unwrap_or(existing.is_active),
                "updated_at": to_bson(&Utc::now())?,
            } },
        )
        .await?;
    Ok(())
}

pub async fn delete_account(state: &AppState, company_id: &ObjectId, id: &ObjectId) -> Result<()> {
    let account = get_account(state, company_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("account"))?;
    if account.is_default {
        return Err(DomainError::validation("default accounts cannot be deleted"));
    }
    if state
        .ledger_entries
        .find_one(doc! { "account_id": id })
        .await?
        .is_some()
    {
        return Err(DomainError::conflict("account has transactions and cannot be deleted"));
    }
    state.accounts.delete_one(doc! { "_id": id }).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

async fn entries_for(
    state: &AppState,
    account_id: &ObjectId,
    fiscal_year_id: &ObjectId,
) -> Result<Vec<LedgerEntry>> {
    let entries: Vec<LedgerEntry> = state
        .ledger_entries
        .find(doc! { "account_id": account_id, "fiscal_year_id": fiscal_year_id })
        .sort(doc! { "date": 1, "_id": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(entries)
}

fn opening_of(account: &Account, fiscal_year_id: &ObjectId) -> Balance {
    account
        .opening_for(fiscal_year_id)
        .map(Balance::from)
        .unwrap_or(Balance::ZERO)
}

/// Opening balance of the period plus every posting made in it.
pub async fn account_balance(
    state: &AppState,
    account: &Account,
    fiscal_year_id: &ObjectId,
) -> Result<Balance> {
    let account_id = account.id.context("account missing _id")?;
    let entries = entries_for(state, &account_id, fiscal_year_id).await?;
    Ok(ledger::closing_balance(
        opening_of(account, fiscal_year_id),
        entries.iter(),
    ))
}

pub async fn account_statement(
    state: &AppState,
    account: &Account,
    fiscal_year_id: &ObjectId,
) -> Result<Statement> {
    let account_id = account.id.context("account missing _id")?;
    let entries = entries_for(state, &account_id, fiscal_year_id).await?;
    Ok(ledger::running_balance(
        opening_of(account, fiscal_year_id),
        entries,
    ))
}
