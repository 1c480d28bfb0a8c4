// models.rs
// Domain models for seed data (users.json) and MongoDB collections.

use chrono::{DateTime as ChronoDateTime, NaiveDate, Utc};
use mongodb::bson::{DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

pub type Timestamp = ChronoDateTime<Utc>;

/// User roles for authorization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    #[default]
    Staff,
}

impl UserRole {
    pub fn default_admin() -> Self {
        UserRole::Admin
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Staff => "staff",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

/// User definition as stored in users.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedUser {
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub secret: String,
    #[serde(default = "UserRole::default_admin")]
    pub role: UserRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub secret: String,
    #[serde(default)]
    pub role: UserRole,
    /// Companies the user may switch into.
    #[serde(default)]
    pub companies: Vec<ObjectId>,
}

/// Session document linking a token to a user plus the selected company and period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub token: String,
    pub user_email: String,
    #[serde(default)]
    pub company_id: Option<ObjectId>,
    #[serde(default)]
    pub fiscal_year_id: Option<ObjectId>,
    pub expires_at: DateTime,
}

// ---------------------------------------------------------------------------
// Company and periods
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    #[default]
    Pharmacy,
    Retail,
    Wholesale,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DateFormat {
    #[default]
    English,
    Nepali,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub slug: String,
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
    pub owner_id: ObjectId,
    #[serde(default)]
    pub users: Vec<ObjectId>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalYear {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub company_id: ObjectId,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

impl FiscalYear {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }
}

// ---------------------------------------------------------------------------
// Chart of accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupNature {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl GroupNature {
    /// Balances of real accounts carry into the next fiscal year; nominal ones restart at zero.
    pub fn carries_forward(&self) -> bool {
        matches!(
            self,
            GroupNature::Asset | GroupNature::Liability | GroupNature::Equity
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    #[default]
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountGroup {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub company_id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub group_type: GroupType,
    pub nature: GroupNature,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum BalanceType {
    #[default]
    Dr,
    Cr,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FiscalOpening {
    pub fiscal_year_id: ObjectId,
    pub amount: f64,
    pub balance_type: BalanceType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub company_id: ObjectId,
    pub name: String,
    pub group_id: ObjectId,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub pan: Option<String>,
    #[serde(default)]
    pub opening_balances: Vec<FiscalOpening>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Account {
    pub fn opening_for(&self, fiscal_year_id: &ObjectId) -> Option<&FiscalOpening> {
        self.opening_balances
            .iter()
            .find(|o| &o.fiscal_year_id == fiscal_year_id)
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Inventory master data
// ---------------------------------------------------------------------------

/// Shape shared by the small lookup collections (units, main units, categories, manufacturers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub company_id: ObjectId,
    pub name: String,
}

pub type Unit = NamedEntry;
pub type MainUnit = NamedEntry;
pub type Category = NamedEntry;
pub type ItemsCompany = NamedEntry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub company_id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rack {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub company_id: ObjectId,
    pub store_id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VatStatus {
    #[default]
    Vatable,
    VatExempt,
}

/// One batch of an item. A batch is identified within its item by number and expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockEntry {
    pub batch_number: String,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    pub quantity: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub pu_price: f64,
    #[serde(default)]
    pub mrp: f64,
    #[serde(default)]
    pub store_id: Option<ObjectId>,
    #[serde(default)]
    pub rack_id: Option<ObjectId>,
    #[serde(default)]
    pub purchase_bill_id: Option<ObjectId>,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub company_id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub hscode: Option<String>,
    #[serde(default)]
    pub category_id: Option<ObjectId>,
    #[serde(default)]
    pub items_company_id: Option<ObjectId>,
    #[serde(default)]
    pub unit_id: Option<ObjectId>,
    #[serde(default)]
    pub main_unit_id: Option<ObjectId>,
    /// Units contained in one main unit (e.g. strips per box).
    #[serde(default)]
    pub ws_unit: Option<f64>,
    #[serde(default)]
    pub vat_status: VatStatus,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub pu_price: f64,
    #[serde(default)]
    pub reorder_level: f64,
    #[serde(default)]
    pub store_id: Option<ObjectId>,
    #[serde(default)]
    pub rack_id: Option<ObjectId>,
    #[serde(default)]
    pub stock_entries: Vec<StockEntry>,
    pub fiscal_year_id: ObjectId,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Item {
    pub fn total_stock(&self) -> f64 {
        self.stock_entries.iter().map(|e| e.quantity).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpeningStock {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub company_id: ObjectId,
    pub item_id: ObjectId,
    pub fiscal_year_id: ObjectId,
    #[serde(default)]
    pub batch_number: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    pub quantity: f64,
    #[serde(default)]
    pub pu_price: f64,
    #[serde(default)]
    pub price: f64,
    /// Rows written by the fiscal-year rollover only record the carried quantity.
    #[serde(default)]
    pub carried_forward: bool,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Vouchers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VoucherKind {
    Sales,
    SalesReturn,
    Purchase,
    PurchaseReturn,
    SalesQuotation,
    Payment,
    Receipt,
    Journal,
    CreditNote,
    DebitNote,
    StockAdjustment,
}

/// How a document moves inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDirection {
    In,
    Out,
}

impl VoucherKind {
    pub const ALL: [VoucherKind; 11] = [
        VoucherKind::Sales,
        VoucherKind::SalesReturn,
        VoucherKind::Purchase,
        VoucherKind::PurchaseReturn,
        VoucherKind::SalesQuotation,
        VoucherKind::Payment,
        VoucherKind::Receipt,
        VoucherKind::Journal,
        VoucherKind::CreditNote,
        VoucherKind::DebitNote,
        VoucherKind::StockAdjustment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VoucherKind::Sales => "sales",
            VoucherKind::SalesReturn => "sales_return",
            VoucherKind::Purchase => "purchase",
            VoucherKind::PurchaseReturn => "purchase_return",
            VoucherKind::SalesQuotation => "sales_quotation",
            VoucherKind::Payment => "payment",
            VoucherKind::Receipt => "receipt",
            VoucherKind::Journal => "journal",
            VoucherKind::CreditNote => "credit_note",
            VoucherKind::DebitNote => "debit_note",
            VoucherKind::StockAdjustment => "stock_adjustment",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            VoucherKind::Sales => "SB",
            VoucherKind::SalesReturn => "SR",
            VoucherKind::Purchase => "PB",
            VoucherKind::PurchaseReturn => "PR",
            VoucherKind::SalesQuotation => "SQ",
            VoucherKind::Payment => "PV",
            VoucherKind::Receipt => "RV",
            VoucherKind::Journal => "JV",
            VoucherKind::CreditNote => "CN",
            VoucherKind::DebitNote => "DN",
            VoucherKind::StockAdjustment => "SA",
        }
    }

    pub fn collection_name(&self) -> &'static str {
        match self {
            VoucherKind::Sales => "sales_bills",
            VoucherKind::SalesReturn => "sales_returns",
            VoucherKind::Purchase => "purchase_bills",
            VoucherKind::PurchaseReturn => "purchase_returns",
            VoucherKind::SalesQuotation => "sales_quotations",
            VoucherKind::Payment => "payments",
            VoucherKind::Receipt => "receipts",
            VoucherKind::Journal => "journal_vouchers",
            VoucherKind::CreditNote => "credit_notes",
            VoucherKind::DebitNote => "debit_notes",
            VoucherKind::StockAdjustment => "stock_adjustments",
        }
    }

    pub fn is_bill(&self) -> bool {
        matches!(
            self,
            VoucherKind::Sales
                | VoucherKind::SalesReturn
                | VoucherKind::Purchase
                | VoucherKind::PurchaseReturn
                | VoucherKind::SalesQuotation
        )
    }

    pub fn is_cash_voucher(&self) -> bool {
        matches!(self, VoucherKind::Payment | VoucherKind::Receipt)
    }

    pub fn is_journal(&self) -> bool {
        matches!(
            self,
            VoucherKind::Journal | VoucherKind::CreditNote | VoucherKind::DebitNote
        )
    }

    /// Purchase-side bills are priced at purchase price, sales-side at selling price.
    pub fn is_purchase_side(&self) -> bool {
        matches!(self, VoucherKind::Purchase | VoucherKind::PurchaseReturn)
    }

    pub fn stock_direction(&self) -> Option<StockDirection> {
        match self {
            VoucherKind::Sales | VoucherKind::PurchaseReturn => Some(StockDirection::Out),
            VoucherKind::SalesReturn | VoucherKind::Purchase => Some(StockDirection::In),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    #[default]
    Cash,
    Credit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillLine {
    pub item_id: ObjectId,
    pub batch_number: String,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    pub quantity: f64,
    /// Free quantity received or given along with the billed quantity.
    #[serde(default)]
    pub bonus: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub pu_price: f64,
    #[serde(default)]
    pub mrp: f64,
    #[serde(default)]
    pub discount_percentage: f64,
    #[serde(default)]
    pub vat_status: VatStatus,
    #[serde(default)]
    pub line_total: f64,
}

/// Sales bills, purchase bills, their returns and quotations share this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bill {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub company_id: ObjectId,
    pub fiscal_year_id: ObjectId,
    pub kind: VoucherKind,
    pub bill_number: String,
    pub sequence: i64,
    pub date: NaiveDate,
    #[serde(default)]
    pub payment_mode: PaymentMode,
    #[serde(default)]
    pub party_account_id: Option<ObjectId>,
    #[serde(default)]
    pub cash_account_id: Option<ObjectId>,
    /// Walk-in customer name for cash sales without a party account.
    #[serde(default)]
    pub party_name: Option<String>,
    pub lines: Vec<BillLine>,
    pub subtotal: f64,
    pub discount_percentage: f64,
    pub discount_amount: f64,
    pub taxable_amount: f64,
    pub non_taxable_amount: f64,
    pub vat_percentage: f64,
    pub vat_amount: f64,
    pub round_off: f64,
    pub total_amount: f64,
    #[serde(default)]
    pub original_bill_id: Option<ObjectId>,
    #[serde(default)]
    pub supplier_invoice_number: Option<String>,
    #[serde(default)]
    pub narration: Option<String>,
    #[serde(default)]
    pub created_by: Option<ObjectId>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

pub type SalesBill = Bill;
pub type SalesReturn = Bill;
pub type PurchaseBill = Bill;
pub type PurchaseReturn = Bill;
pub type SalesQuotation = Bill;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Instrument {
    #[default]
    Cash,
    Cheque,
    Transfer,
}

/// Payments and receipts: one party account settled against a cash or bank account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashVoucher {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub company_id: ObjectId,
    pub fiscal_year_id: ObjectId,
    pub kind: VoucherKind,
    pub bill_number: String,
    pub sequence: i64,
    pub date: NaiveDate,
    pub account_id: ObjectId,
    pub cash_account_id: ObjectId,
    pub amount: f64,
    #[serde(default)]
    pub instrument: Instrument,
    #[serde(default)]
    pub cheque_number: Option<String>,
    #[serde(default)]
    pub narration: Option<String>,
    #[serde(default)]
    pub created_by: Option<ObjectId>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

pub type Payment = CashVoucher;
pub type Receipt = CashVoucher;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmountLine {
    pub account_id: ObjectId,
    pub amount: f64,
}

/// Journal vouchers and credit/debit notes: explicit debit and credit lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub company_id: ObjectId,
    pub fiscal_year_id: ObjectId,
    pub kind: VoucherKind,
    pub bill_number: String,
    pub sequence: i64,
    pub date: NaiveDate,
    pub debit_lines: Vec<AmountLine>,
    pub credit_lines: Vec<AmountLine>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_by: Option<ObjectId>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

pub type JournalVoucher = JournalDocument;
pub type CreditNote = JournalDocument;
pub type DebitNote = JournalDocument;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    Excess,
    Short,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdjustmentLine {
    pub item_id: ObjectId,
    pub batch_number: String,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    pub quantity: f64,
    #[serde(default)]
    pub pu_price: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockAdjustment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub company_id: ObjectId,
    pub fiscal_year_id: ObjectId,
    pub bill_number: String,
    pub sequence: i64,
    pub date: NaiveDate,
    pub adjustment_type: AdjustmentType,
    pub lines: Vec<AdjustmentLine>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub created_by: Option<ObjectId>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

/// One side of a double-entry posting generated by a voucher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub company_id: ObjectId,
    pub fiscal_year_id: ObjectId,
    pub account_id: ObjectId,
    pub voucher_kind: VoucherKind,
    pub voucher_id: ObjectId,
    pub bill_number: String,
    pub date: NaiveDate,
    pub debit: f64,
    pub credit: f64,
    #[serde(default)]
    pub narration: Option<String>,
}

/// Per company/fiscal-year/kind sequence used for bill numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub company_id: ObjectId,
    pub fiscal_year_id: ObjectId,
    pub kind: VoucherKind,
    pub seq: i64,
}
