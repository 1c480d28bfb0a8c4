// state module: AppState, initialization, and re-exports of submodules.

use anyhow::{Result, bail};
use mongodb::{Client, Collection, Database, bson::doc};
use tracing::info;

use crate::config::AppConfig;
use crate::models::{
    Account, AccountGroup, Bill, CashVoucher, Company, Counter, FiscalYear, Item, ItemsCompany,
    JournalDocument, LedgerEntry, MainUnit, NamedEntry, OpeningStock, Rack, Session,
    StockAdjustment, Store, Unit, User, VoucherKind,
};

mod accounts;
mod companies;
mod fiscal_years;
mod inventory;
mod numbering;
mod postings;
mod seed;
mod stock;
mod users;
mod vouchers;

pub use accounts::*;
pub use companies::*;
pub use fiscal_years::*;
pub use inventory::*;
pub use numbering::*;
pub use seed::{DEFAULT_ACCOUNTS, DEFAULT_ACCOUNT_GROUPS, DEFAULT_UNITS};
pub use stock::*;
pub use users::*;
pub use vouchers::*;

/// Collections whose documents belong to a single company (keyed by `company_id`).
pub const COMPANY_COLLECTIONS: &[&str] = &[
    "fiscal_years",
    "account_groups",
    "accounts",
    "units",
    "main_units",
    "categories",
    "items_companies",
    "stores",
    "racks",
    "items",
    "opening_stocks",
    "ledger_entries",
    "counters",
    "sales_bills",
    "sales_returns",
    "purchase_bills",
    "purchase_returns",
    "sales_quotations",
    "payments",
    "receipts",
    "journal_vouchers",
    "credit_notes",
    "debit_notes",
    "stock_adjustments",
];

#[derive(Clone)]
pub struct AppState {
    pub client: Client,
    pub db: Database,
    /// Multi-document transactions need a replica set or sharded cluster.
    pub supports_transactions: bool,
    pub session_ttl_seconds: u64,
    pub users: Collection<User>,
    pub sessions: Collection<Session>,
    pub companies: Collection<Company>,
    pub fiscal_years: Collection<FiscalYear>,
    pub account_groups: Collection<AccountGroup>,
    pub accounts: Collection<Account>,
    pub units: Collection<Unit>,
    pub main_units: Collection<MainUnit>,
    pub categories: Collection<NamedEntry>,
    pub items_companies: Collection<ItemsCompany>,
    pub stores: Collection<Store>,
    pub racks: Collection<Rack>,
    pub items: Collection<Item>,
    pub opening_stocks: Collection<OpeningStock>,
    pub ledger_entries: Collection<LedgerEntry>,
    pub counters: Collection<Counter>,
    pub sales_bills: Collection<Bill>,
    pub sales_returns: Collection<Bill>,
    pub purchase_bills: Collection<Bill>,
    pub purchase_returns: Collection<Bill>,
    pub sales_quotations: Collection<Bill>,
    pub payments: Collection<CashVoucher>,
    pub receipts: Collection<CashVoucher>,
    pub journal_vouchers: Collection<JournalDocument>,
    pub credit_notes: Collection<JournalDocument>,
    pub debit_notes: Collection<JournalDocument>,
    pub stock_adjustments: Collection<StockAdjustment>,
}

impl AppState {
    pub fn bills(&self, kind: VoucherKind) -> Result<&Collection<Bill>> {
        Ok(match kind {
            VoucherKind::Sales => &self.sales_bills,
            VoucherKind::SalesReturn => &self.sales_returns,
            VoucherKind::Purchase => &self.purchase_bills,
            VoucherKind::PurchaseReturn => &self.purchase_returns,
            VoucherKind::SalesQuotation => &self.sales_quotations,
            other => bail!("{} is not a bill", other.as_str()),
        })
    }

    pub fn cash_vouchers(&self, kind: VoucherKind) -> Result<&Collection<CashVoucher>> {
        Ok(match kind {
            VoucherKind::Payment => &self.payments,
            VoucherKind::Receipt => &self.receipts,
            other => bail!("{} is not a payment or receipt", other.as_str()),
        })
    }

    pub fn journals(&self, kind: VoucherKind) -> Result<&Collection<JournalDocument>> {
        Ok(match kind {
            VoucherKind::Journal => &self.journal_vouchers,
            VoucherKind::CreditNote => &self.credit_notes,
            VoucherKind::DebitNote => &self.debit_notes,
            other => bail!("{} is not a journal voucher", other.as_str()),
        })
    }
}

pub async fn init_state() -> Result<AppState> {
    init_state_with(&AppConfig::from_env()).await
}

pub async fn init_state_with(config: &AppConfig) -> Result<AppState> {
    let client = Client::with_uri_str(&config.mongodb_uri).await?;
    let db = client.database(&config.mongodb_db);

    seed::ensure_collections(&db).await?;
    seed::ensure_indexes(&db).await?;

    // Only seed when the database is effectively empty (no users).
    if seed::is_database_empty(&db).await? {
        let default_users = seed::load_default_users(&config.users_file)?;
        seed::seed_default_users(&db, &default_users).await?;
    }

    let supports_transactions = detect_transaction_support(&db).await;
    info!(
        db = %config.mongodb_db,
        supports_transactions,
        "database ready"
    );

    Ok(AppState {
        supports_transactions,
        session_ttl_seconds: config.session_ttl_seconds,
        users: db.collection::<User>("users"),
        sessions: db.collection::<Session>("sessions"),
        companies: db.collection::<Company>("company"),
        fiscal_years: db.collection::<FiscalYear>("fiscal_years"),
        account_groups: db.collection::<AccountGroup>("account_groups"),
        accounts: db.collection::<Account>("accounts"),
        units: db.collection::<Unit>("units"),
        main_units: db.collection::<MainUnit>("main_units"),
        categories: db.collection::<NamedEntry>("categories"),
        items_companies: db.collection::<ItemsCompany>("items_companies"),
        stores: db.collection::<Store>("stores"),
        racks: db.collection::<Rack>("racks"),
        items: db.collection::<Item>("items"),
        opening_stocks: db.collection::<OpeningStock>("opening_stocks"),
        ledger_entries: db.collection::<LedgerEntry>("ledger_entries"),
        counters: db.collection::<Counter>("counters"),
        sales_bills: db.collection::<Bill>("sales_bills"),
        sales_returns: db.collection::<Bill>("sales_returns"),
        purchase_bills: db.collection::<Bill>("purchase_bills"),
        purchase_returns: db.collection::<Bill>("purchase_returns"),
        sales_quotations: db.collection::<Bill>("sales_quotations"),
        payments: db.collection::<CashVoucher>("payments"),
        receipts: db.collection::<CashVoucher>("receipts"),
        journal_vouchers: db.collection::<JournalDocument>("journal_vouchers"),
        credit_notes: db.collection::<JournalDocument>("credit_notes"),
        debit_notes: db.collection::<JournalDocument>("debit_notes"),
        stock_adjustments: db.collection::<StockAdjustment>("stock_adjustments"),
        client,
        db,
    })
}

/// A deployment accepts transactions when `hello` reports a replica set name or a mongos router.
async fn detect_transaction_support(db: &Database) -> bool {
    match db.run_command(doc! { "hello": 1 }).await {
        Ok(reply) => {
            reply.get_str("setName").is_ok() || reply.get_str("msg").is_ok_and(|m| m == "isdbgrid")
        }
        Err(_) => false,
    }
}
