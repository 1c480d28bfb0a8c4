use anyhow::{Context, Result};
use chrono::Utc;
use mongodb::{
    Database, IndexModel,
    bson::{Document, doc, oid::ObjectId},
    options::IndexOptions,
};
use std::{collections::HashMap, fs};
use tracing::{info, warn};

use crate::models::{Account, AccountGroup, GroupNature, GroupType, NamedEntry, SeedUser, User};

use super::{AppState, COMPANY_COLLECTIONS};

/// Account groups every new company starts with.
pub const DEFAULT_ACCOUNT_GROUPS: &[(&str, GroupNature)] = &[
    ("Capital Account", GroupNature::Equity),
    ("Reserves & Surplus", GroupNature::Equity),
    ("Current Assets", GroupNature::Asset),
    ("Fixed Assets", GroupNature::Asset),
    ("Investments", GroupNature::Asset),
    ("Cash in Hand", GroupNature::Asset),
    ("Bank Accounts", GroupNature::Asset),
    ("Sundry Debtors", GroupNature::Asset),
    ("Stock in Hand", GroupNature::Asset),
    ("Loans & Advances (Asset)", GroupNature::Asset),
    ("Current Liabilities", GroupNature::Liability),
    ("Sundry Creditors", GroupNature::Liability),
    ("Duties & Taxes", GroupNature::Liability),
    ("Loans (Liability)", GroupNature::Liability),
    ("Provisions", GroupNature::Liability),
    ("Sales Accounts", GroupNature::Income),
    ("Direct Income", GroupNature::Income),
    ("Indirect Income", GroupNature::Income),
    ("Purchase Accounts", GroupNature::Expense),
    ("Direct Expenses", GroupNature::Expense),
    ("Indirect Expenses", GroupNature::Expense),
];

/// Accounts every new company starts with, as (account, group).
/// Voucher postings resolve these by name.
pub const DEFAULT_ACCOUNTS: &[(&str, &str)] = &[
    (CASH_ACCOUNT, "Cash in Hand"),
    (SALES_ACCOUNT, "Sales Accounts"),
    (SALES_RETURN_ACCOUNT, "Sales Accounts"),
    (PURCHASE_ACCOUNT, "Purchase Accounts"),
    (PURCHASE_RETURN_ACCOUNT, "Purchase Accounts"),
    (VAT_ACCOUNT, "Duties & Taxes"),
    ("Capital", "Capital Account"),
];

pub const CASH_ACCOUNT: &str = "Cash in Hand";
pub const SALES_ACCOUNT: &str = "Sales";
pub const SALES_RETURN_ACCOUNT: &str = "Sales Return";
pub const PURCHASE_ACCOUNT: &str = "Purchase";
pub const PURCHASE_RETURN_ACCOUNT: &str = "Purchase Return";
pub const VAT_ACCOUNT: &str = "VAT";

pub const DEFAULT_UNITS: &[&str] = &["Pcs", "Strip", "Tab", "Cap", "Bottle", "Tube", "Vial", "Box"];

pub(super) async fn is_database_empty(db: &Database) -> Result<bool> {
    let users_coll = db.collection::<User>("users");
    let count = users_coll.estimated_document_count().await?;
    Ok(count == 0)
}

pub(super) fn load_default_users(users_file: &str) -> Result<Vec<SeedUser>> {
    let Ok(users_json) = fs::read_to_string(users_file) else {
        warn!(users_file, "seed users file not found, starting without users");
        return Ok(Vec::new());
    };
    let users = serde_json::from_str::<Vec<SeedUser>>(&users_json)
        .with_context(|| format!("invalid seed users file {users_file}"))?;
    Ok(users)
}

pub(super) async fn ensure_collections(db: &Database) -> Result<()> {
    let existing = db.list_collection_names().await?;
    let wanted = ["users", "sessions", "company"]
        .into_iter()
        .chain(COMPANY_COLLECTIONS.iter().copied());
    for name in wanted {
        if !existing.iter().any(|e| e == name) {
            db.create_collection(name).await?;
        }
    }
    Ok(())
}

fn index(keys: Document, unique: bool, name: &str) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .unique(unique)
                .name(Some(name.to_string()))
                .build(),
        )
        .build()
}

pub(super) async fn ensure_indexes(db: &Database) -> Result<()> {
    db.collection::<Document>("users")
        .create_index(index(doc! { "email": 1 }, true, "uniq_users_email"))
        .await?;
    db.collection::<Document>("sessions")
        .create_index(index(doc! { "token": 1 }, true, "uniq_sessions_token"))
        .await?;
    db.collection::<Document>("opening_stocks")
        .create_index(index(
            doc! { "item_id": 1, "fiscal_year_id": 1 },
            true,
            "uniq_opening_stock_item_fiscal_year",
        ))
        .await?;
    db.collection::<Document>("stores")
        .create_index(index(
            doc! { "name": 1, "company_id": 1 },
            true,
            "uniq_store_name_company",
        ))
        .await?;
    db.collection::<Document>("racks")
        .create_index(index(
            doc! { "name": 1, "store_id": 1, "company_id": 1 },
            true,
            "uniq_rack_name_store_company",
        ))
        .await?;
    db.collection::<Document>("counters")
        .create_index(index(
            doc! { "company_id": 1, "fiscal_year_id": 1, "kind": 1 },
            true,
            "uniq_counter_scope",
        ))
        .await?;
    db.collection::<Document>("ledger_entries")
        .create_index(index(
            doc! { "account_id": 1, "fiscal_year_id": 1, "date": 1 },
            false,
            "idx_ledger_account_period",
        ))
        .await?;
    db.collection::<Document>("ledger_entries")
        .create_index(index(
            doc! { "voucher_id": 1 },
            false,
            "idx_ledger_voucher",
        ))
        .await?;
    db.collection::<Document>("items")
        .create_index(index(
            doc! { "company_id": 1, "name": 1 },
            false,
            "idx_items_company_name",
        ))
        .await?;
    Ok(())
}

pub(super) async fn seed_default_users(db: &Database, users: &[SeedUser]) -> Result<()> {
    let users_coll = db.collection::<User>("users");
    for user in users {
        // Upsert user
        let res = users_coll
            .update_one(
                doc! { "email": &user.email },
                doc! { "$set": {
                    "name": &user.name,
                    "secret": &user.secret,
                    "role": user.role.as_str(),
                } },
            )
            .await?;
        if res.matched_count == 0 {
            users_coll
                .insert_one(User {
                    id: None,
                    email: user.email.clone(),
                    name: user.name.clone(),
                    secret: user.secret.clone(),
                    role: user.role.clone(),
                    companies: Vec::new(),
                })
                .await?;
        }
    }
    info!(count = users.len(), "seeded users");
    Ok(())
}

/// Inserts the default chart of accounts and units for a freshly created company.
/// Returns the number of accounts inserted.
pub(super) async fn seed_company_defaults(
    state: &AppState,
    company_id: &ObjectId,
) -> Result<usize> {
    let now = Utc::now();

    let groups: Vec<AccountGroup> = DEFAULT_ACCOUNT_GROUPS
        .iter()
        .map(|(name, nature)| AccountGroup {
            id: None,
            company_id: *company_id,
            name: name.to_string(),
            group_type: GroupType::Primary,
            nature: *nature,
            is_default: true,
        })
        .collect();
    let inserted = state.account_groups.insert_many(groups).await?;

    let mut group_ids: HashMap<&str, ObjectId> = HashMap::new();
    for (idx, (name, _)) in DEFAULT_ACCOUNT_GROUPS.iter().enumerate() {
        let id = inserted
            .inserted_ids
            .get(&idx)
            .and_then(|id| id.as_object_id())
            .context("account group insert missing _id")?;
        group_ids.insert(*name, id);
    }

    let mut accounts = Vec::with_capacity(DEFAULT_ACCOUNTS.len());
    for (name, group) in DEFAULT_ACCOUNTS {
        let group_id = group_ids
            .get(group)
            .copied()
            .with_context(|| format!("default group {group} missing"))?;
        accounts.push(Account {
            id: None,
            company_id: *company_id,
            name: name.to_string(),
            group_id,
            code: None,
            address: None,
            phone: None,
            pan: None,
            opening_balances: Vec::new(),
            is_default: true,
            is_active: true,
            created_at: Some(now),
            updated_at: None,
        });
    }
    let count = accounts.len();
    state.accounts.insert_many(accounts).await?;

    let units: Vec<NamedEntry> = DEFAULT_UNITS
        .iter()
        .map(|name| NamedEntry {
            id: None,
            company_id: *company_id,
            name: name.to_string(),
        })
        .collect();
    state.units.insert_many(units).await?;

    info!(
        company_id = %company_id,
        groups = DEFAULT_ACCOUNT_GROUPS.len(),
        accounts = count,
        "seeded company defaults"
    );
    Ok(count)
}
