use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use futures::stream::TryStreamExt;
use mongodb::{
    Collection,
    bson::{doc, oid::ObjectId},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{error, info};

use crate::batches::BatchKey;
use crate::billing;
use crate::error::DomainError;
use crate::ids;
use crate::ledger;
use crate::models::{
    AdjustmentLine, AdjustmentType, AmountLine, Bill, BillLine, CashVoucher, Company, FiscalYear,
    Instrument, Item, JournalDocument, LedgerEntry, PaymentMode, StockAdjustment, StockDirection,
    StockEntry, VatStatus, VoucherKind,
};

use super::{
    AppState,
    accounts::{default_account, require_active_account},
    numbering::allocate_bill_number,
    postings, seed,
    stock::{StockMovement, apply_movements},
};

/// Company, period and user a voucher is written under.
#[derive(Debug, Clone)]
pub struct VoucherContext {
    pub company_id: ObjectId,
    pub fiscal_year_id: ObjectId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub vat_enabled: bool,
    pub user_id: ObjectId,
}

impl VoucherContext {
    pub fn new(company: &Company, fiscal_year: &FiscalYear, user_id: ObjectId) -> Result<Self> {
        Ok(VoucherContext {
            company_id: company.id.context("company missing _id")?,
            fiscal_year_id: fiscal_year.id.context("fiscal year missing _id")?,
            period_start: fiscal_year.start_date,
            period_end: fiscal_year.end_date,
            vat_enabled: company.vat_enabled,
            user_id,
        })
    }

    fn check_date(&self, date: NaiveDate) -> Result<()> {
        if date < self.period_start || date > self.period_end {
            return Err(DomainError::validation(format!(
                "date {date} is outside the fiscal year ({} to {})",
                self.period_start, self.period_end
            )));
        }
        Ok(())
    }

    fn check_period(&self, fiscal_year_id: &ObjectId) -> Result<()> {
        if fiscal_year_id != &self.fiscal_year_id {
            return Err(DomainError::validation(
                "document belongs to another fiscal year; switch to it first",
            ));
        }
        Ok(())
    }
}

fn ensure_kind(ok: bool, kind: VoucherKind) -> Result<()> {
    if !ok {
        anyhow::bail!("{} vouchers are not handled here", kind.as_str());
    }
    Ok(())
}

fn positive(value: f64, what: &str) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(DomainError::validation(format!("{what} must be greater than zero")));
    }
    Ok(())
}

fn non_negative(value: f64, what: &str) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(DomainError::validation(format!("{what} cannot be negative")));
    }
    Ok(())
}

fn percentage(value: f64, what: &str) -> Result<()> {
    if !(0.0..=100.0).contains(&value) {
        return Err(DomainError::validation(format!("{what} must be between 0 and 100")));
    }
    Ok(())
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn list_in_period<T>(
    coll: &Collection<T>,
    company_id: &ObjectId,
    fiscal_year_id: &ObjectId,
) -> Result<Vec<T>>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    let docs: Vec<T> = coll
        .find(doc! { "company_id": company_id, "fiscal_year_id": fiscal_year_id })
        .sort(doc! { "date": -1, "sequence": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(docs)
}

async fn find_scoped<T>(coll: &Collection<T>, company_id: &ObjectId, id: &ObjectId) -> Result<Option<T>>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    coll.find_one(doc! { "_id": id, "company_id": company_id })
        .await
        .map_err(Into::into)
}

/// Puts stock back after a later step of a voucher write failed.
async fn revert_stock(state: &AppState, company_id: &ObjectId, movements: &[StockMovement]) {
    let inverse: Vec<StockMovement> = movements.iter().map(StockMovement::inverse).collect();
    if let Err(err) = apply_movements(state, company_id, &inverse).await {
        error!(company_id = %company_id, error = ?err, "failed to revert stock after voucher error");
    }
}

/// Removes a voucher and its postings after a failed write.
async fn discard_voucher<T>(state: &AppState, coll: &Collection<T>, id: &ObjectId)
where
    T: Send + Sync,
{
    if let Err(err) = postings::delete_postings(state, id).await {
        error!(voucher_id = %id, error = ?err, "failed to discard postings");
    }
    if let Err(err) = coll.delete_one(doc! { "_id": id }).await {
        error!(voucher_id = %id, error = ?err, "failed to discard voucher");
    }
}

/// Replaces a stored voucher, then its postings. The stored document is put back when
/// the postings cannot be written, leaving the voucher as it was.
async fn rewrite_voucher<T>(
    state: &AppState,
    coll: &Collection<T>,
    existing: &T,
    updated: &T,
    id: &ObjectId,
    entries: Vec<LedgerEntry>,
) -> Result<()>
where
    T: Serialize + Send + Sync,
{
    coll.replace_one(doc! { "_id": id }, updated).await?;
    if let Err(err) = postings::replace_postings(state, id, entries).await {
        if let Err(restore_err) = coll.replace_one(doc! { "_id": id }, existing).await {
            error!(voucher_id = %id, error = ?restore_err, "failed to restore voucher");
        }
        return Err(err);
    }
    Ok(())
}

/// Deletes a voucher, then its postings. The document is put back when the postings
/// cannot be removed so the delete can be retried.
async fn remove_voucher<T>(
    state: &AppState,
    coll: &Collection<T>,
    existing: &T,
    id: &ObjectId,
) -> Result<()>
where
    T: Serialize + Send + Sync,
{
    coll.delete_one(doc! { "_id": id }).await?;
    if let Err(err) = postings::delete_postings(state, id).await {
        if let Err(restore_err) = coll.insert_one(existing).await {
            error!(voucher_id = %id, error = ?restore_err, "failed to restore voucher");
        }
        return Err(err);
    }
    Ok(())
}

async fn load_items(
    state: &AppState,
    company_id: &ObjectId,
    item_ids: impl Iterator<Item = ObjectId>,
) -> Result<HashMap<ObjectId, Item>> {
    let mut ids: Vec<ObjectId> = item_ids.collect();
    ids.sort();
    ids.dedup();
    let items: Vec<Item> = state
        .items
        .find(doc! { "_id": { "$in": &ids }, "company_id": company_id })
        .await?
        .try_collect()
        .await?;
    if items.len() != ids.len() {
        return Err(DomainError::validation("item does not belong to this company"));
    }
    Ok(items
        .into_iter()
        .filter_map(|i| i.id.map(|id| (id, i)))
        .collect())
}

/// Cash account named on the voucher, or the company's default cash account.
async fn cash_account(
    state: &AppState,
    company_id: &ObjectId,
    requested: Option<ObjectId>,
) -> Result<ObjectId> {
    let id = match requested {
        Some(id) => id,
        None => default_account(state, company_id, seed::CASH_ACCOUNT).await?,
    };
    require_active_account(state, company_id, &id).await?;
    Ok(id)
}

// ---------------------------------------------------------------------------
// Bills: sales, purchases, their returns, quotations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BillLineInput {
    #[serde(deserialize_with = "ids::object_id")]
    pub item_id: ObjectId,
    pub batch_number: String,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    pub quantity: f64,
    #[serde(default)]
    pub bonus: f64,
    /// Falls back to the item's selling price when zero.
    #[serde(default)]
    pub price: f64,
    /// Falls back to the item's purchase price when zero.
    #[serde(default)]
    pub pu_price: f64,
    #[serde(default)]
    pub mrp: f64,
    #[serde(default)]
    pub discount_percentage: f64,
    /// Defaults to the item's VAT status.
    #[serde(default)]
    pub vat_status: Option<VatStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillInput {
    pub date: NaiveDate,
    #[serde(default)]
    pub payment_mode: PaymentMode,
    #[serde(default, deserialize_with = "ids::option_object_id")]
    pub party_account_id: Option<ObjectId>,
    #[serde(default, deserialize_with = "ids::option_object_id")]
    pub cash_account_id: Option<ObjectId>,
    #[serde(default)]
    pub party_name: Option<String>,
    pub lines: Vec<BillLineInput>,
    #[serde(default)]
    pub discount_percentage: f64,
    #[serde(default)]
    pub vat_percentage: f64,
    #[serde(default)]
    pub round_off: f64,
    #[serde(default, deserialize_with = "ids::option_object_id")]
    pub original_bill_id: Option<ObjectId>,
    #[serde(default)]
    pub supplier_invoice_number: Option<String>,
    #[serde(default)]
    pub narration: Option<String>,
}

/// The bill kind a return refers back to.
fn returned_kind(kind: VoucherKind) -> Option<VoucherKind> {
    match kind {
        VoucherKind::SalesReturn => Some(VoucherKind::Sales),
        VoucherKind::PurchaseReturn => Some(VoucherKind::Purchase),
        _ => None,
    }
}

fn return_kind_of(kind: VoucherKind) -> Option<VoucherKind> {
    match kind {
        VoucherKind::Sales => Some(VoucherKind::SalesReturn),
        VoucherKind::Purchase => Some(VoucherKind::PurchaseReturn),
        _ => None,
    }
}

fn bill_line(input: &BillLineInput, item: &Item) -> Result<BillLine> {
    positive(input.quantity, "quantity")?;
    non_negative(input.bonus, "bonus")?;
    non_negative(input.price, "price")?;
    non_negative(input.pu_price, "purchase price")?;
    non_negative(input.mrp, "MRP")?;
    percentage(input.discount_percentage, "line discount")?;
    let batch_number = input.batch_number.trim();
    if batch_number.is_empty() {
        return Err(DomainError::validation(format!(
            "batch number is required for {}",
            item.name
        )));
    }
    let price = if input.price > 0.0 { input.price } else { item.price };
    let pu_price = if input.pu_price > 0.0 {
        input.pu_price
    } else {
        item.pu_price
    };
    Ok(BillLine {
        item_id: input.item_id,
        batch_number: batch_number.to_string(),
        expiry_date: input.expiry_date,
        quantity: input.quantity,
        bonus: input.bonus,
        price,
        pu_price,
        mrp: if input.mrp > 0.0 { input.mrp } else { price },
        discount_percentage: input.discount_percentage,
        vat_status: input.vat_status.unwrap_or(item.vat_status),
        line_total: 0.0,
    })
}

async fn build_bill(
    state: &AppState,
    ctx: &VoucherContext,
    kind: VoucherKind,
    input: &BillInput,
    existing: Option<&Bill>,
) -> Result<Bill> {
    ctx.check_date(input.date)?;
    if input.lines.is_empty() {
        return Err(DomainError::validation("a bill needs at least one line"));
    }
    percentage(input.discount_percentage, "discount")?;
    percentage(input.vat_percentage, "VAT")?;
    if !ctx.vat_enabled && input.vat_percentage > 0.0 {
        return Err(DomainError::validation("VAT is not enabled for this company"));
    }
    if !input.round_off.is_finite() {
        return Err(DomainError::validation("round-off must be a number"));
    }

    let company_id = &ctx.company_id;
    let party_account_id = match input.party_account_id {
        Some(id) => {
            require_active_account(state, company_id, &id).await?;
            Some(id)
        }
        None => None,
    };
    let cash_account_id = match input.payment_mode {
        PaymentMode::Credit => {
            if party_account_id.is_none() {
                return Err(DomainError::validation("credit bills need a party account"));
            }
            None
        }
        PaymentMode::Cash => Some(cash_account(state, company_id, input.cash_account_id).await?),
    };

    let original_bill_id = match (returned_kind(kind), input.original_bill_id) {
        (Some(original_kind), Some(id)) => {
            if find_scoped(state.bills(original_kind)?, company_id, &id)
                .await?
                .is_none()
            {
                return Err(DomainError::validation("original bill not found in this company"));
            }
            Some(id)
        }
        (None, Some(_)) => {
            return Err(DomainError::validation("only returns can reference an original bill"));
        }
        (_, None) => None,
    };

    let items = load_items(state, company_id, input.lines.iter().map(|l| l.item_id)).await?;
    let mut lines = input
        .lines
        .iter()
        .map(|l| {
            let item = items.get(&l.item_id).context("item missing after load")?;
            bill_line(l, item)
        })
        .collect::<Result<Vec<_>>>()?;
    let totals = billing::compute_totals(
        &mut lines,
        kind.is_purchase_side(),
        input.discount_percentage,
        input.vat_percentage,
        input.round_off,
    );
    // Round-off may trim the amount before VAT but never below zero.
    if totals.net_of_vat() < 0.0 {
        return Err(DomainError::validation(
            "round off cannot exceed the bill amount before VAT",
        ));
    }

    let now = Utc::now();
    Ok(Bill {
        id: Some(existing.and_then(|b| b.id).unwrap_or_else(ObjectId::new)),
        company_id: *company_id,
        fiscal_year_id: ctx.fiscal_year_id,
        kind,
        bill_number: existing.map(|b| b.bill_number.clone()).unwrap_or_default(),
        sequence: existing.map_or(0, |b| b.sequence),
        date: input.date,
        payment_mode: input.payment_mode,
        party_account_id,
        cash_account_id,
        party_name: trimmed(&input.party_name),
        lines,
        subtotal: totals.subtotal,
        discount_percentage: input.discount_percentage,
        discount_amount: totals.discount_amount,
        taxable_amount: totals.taxable_amount,
        non_taxable_amount: totals.non_taxable_amount,
        vat_percentage: input.vat_percentage,
        vat_amount: totals.vat_amount,
        round_off: ledger::round2(input.round_off),
        total_amount: totals.total_amount,
        original_bill_id,
        supplier_invoice_number: trimmed(&input.supplier_invoice_number),
        narration: trimmed(&input.narration),
        created_by: existing.map_or(Some(ctx.user_id), |b| b.created_by),
        created_at: existing.map_or(Some(now), |b| b.created_at),
        updated_at: existing.map(|_| now),
    })
}

/// Stock moved by a bill, or the moves that undo it when `reverse` is set.
fn bill_movements(bill: &Bill, reverse: bool) -> Vec<StockMovement> {
    let Some(direction) = bill.kind.stock_direction() else {
        return Vec::new();
    };
    let inbound = (direction == StockDirection::In) != reverse;
    let purchase_bill_id = if bill.kind == VoucherKind::Purchase {
        bill.id
    } else {
        None
    };
    bill.lines
        .iter()
        .map(|line| {
            let key = BatchKey::new(line.item_id, &line.batch_number, line.expiry_date);
            let quantity = line.quantity + line.bonus;
            if inbound {
                let seed = StockEntry {
                    batch_number: key.batch_number.clone(),
                    expiry_date: key.expiry_date,
                    quantity,
                    price: line.price,
                    pu_price: line.pu_price,
                    mrp: line.mrp,
                    store_id: None,
                    rack_id: None,
                    purchase_bill_id,
                    date: bill.date,
                };
                StockMovement::inbound(key, quantity, seed)
            } else {
                StockMovement::outbound(key, quantity)
            }
        })
        .collect()
}

pub async fn list_bills(
    state: &AppState,
    kind: VoucherKind,
    company_id: &ObjectId,
    fiscal_year_id: &ObjectId,
) -> Result<Vec<Bill>> {
    list_in_period(state.bills(kind)?, company_id, fiscal_year_id).await
}

pub async fn get_bill(
    state: &AppState,
    kind: VoucherKind,
    company_id: &ObjectId,
    id: &ObjectId,
) -> Result<Option<Bill>> {
    find_scoped(state.bills(kind)?, company_id, id).await
}

/// Validates the bill, moves its stock, then numbers, stores and posts it.
/// Stock is put back if anything after the stock step fails.
pub async fn create_bill(
    state: &AppState,
    ctx: &VoucherContext,
    kind: VoucherKind,
    input: &BillInput,
) -> Result<Bill> {
    ensure_kind(kind.is_bill(), kind)?;
    let mut bill = build_bill(state, ctx, kind, input, None).await?;
    let movements = bill_movements(&bill, false);
    apply_movements(state, &ctx.company_id, &movements).await?;

    if let Err(err) = insert_bill(state, ctx, &mut bill).await {
        revert_stock(state, &ctx.company_id, &movements).await;
        return Err(err);
    }
    info!(
        kind = kind.as_str(),
        bill_number = %bill.bill_number,
        total = bill.total_amount,
        "bill created"
    );
    Ok(bill)
}

async fn insert_bill(state: &AppState, ctx: &VoucherContext, bill: &mut Bill) -> Result<()> {
    let id = bill.id.context("bill missing _id")?;
    let (bill_number, sequence) =
        allocate_bill_number(state, &ctx.company_id, &ctx.fiscal_year_id, bill.kind).await?;
    bill.bill_number = bill_number;
    bill.sequence = sequence;

    let coll = state.bills(bill.kind)?;
    coll.insert_one(&*bill).await?;
    let entries = match postings::bill_postings(state, bill).await {
        Ok(entries) => entries,
        Err(err) => {
            discard_voucher(state, coll, &id).await;
            return Err(err);
        }
    };
    if let Err(err) = postings::replace_postings(state, &id, entries).await {
        discard_voucher(state, coll, &id).await;
        return Err(err);
    }
    Ok(())
}

/// Reverses the stock of the stored bill and applies the edited one in a single
/// checked set of movements, then rewrites the document and its postings.
pub async fn update_bill(
    state: &AppState,
    ctx: &VoucherContext,
    kind: VoucherKind,
    id: &ObjectId,
    input: &BillInput,
) -> Result<Bill> {
    ensure_kind(kind.is_bill(), kind)?;
    let existing = get_bill(state, kind, &ctx.company_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("bill"))?;
    ctx.check_period(&existing.fiscal_year_id)?;
    let bill = build_bill(state, ctx, kind, input, Some(&existing)).await?;

    let mut movements = bill_movements(&existing, true);
    movements.extend(bill_movements(&bill, false));
    apply_movements(state, &ctx.company_id, &movements).await?;

    if let Err(err) = rewrite_bill(state, &existing, &bill).await {
        revert_stock(state, &ctx.company_id, &movements).await;
        return Err(err);
    }
    info!(kind = kind.as_str(), bill_number = %bill.bill_number, "bill updated");
    Ok(bill)
}

async fn rewrite_bill(state: &AppState, existing: &Bill, bill: &Bill) -> Result<()> {
    let id = bill.id.context("bill missing _id")?;
    let entries = postings::bill_postings(state, bill).await?;
    rewrite_voucher(state, state.bills(bill.kind)?, existing, bill, &id, entries).await
}

/// Deletes a bill, giving back (or taking back) its stock. A bill that a return
/// refers to stays until the return is deleted.
pub async fn delete_bill(
    state: &AppState,
    ctx: &VoucherContext,
    kind: VoucherKind,
    id: &ObjectId,
) -> Result<()> {
    ensure_kind(kind.is_bill(), kind)?;
    let existing = get_bill(state, kind, &ctx.company_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("bill"))?;
    ctx.check_period(&existing.fiscal_year_id)?;
    if let Some(return_kind) = return_kind_of(kind) {
        if state
            .bills(return_kind)?
            .find_one(doc! { "company_id": ctx.company_id, "original_bill_id": id })
            .await?
            .is_some()
        {
            return Err(DomainError::conflict(format!(
                "bill {} has returns recorded against it",
                existing.bill_number
            )));
        }
    }

    // Stock goes back first: it is the step that can be refused.
    let movements = bill_movements(&existing, true);
    apply_movements(state, &ctx.company_id, &movements).await?;
    if let Err(err) = remove_voucher(state, state.bills(kind)?, &existing, id).await {
        revert_stock(state, &ctx.company_id, &movements).await;
        return Err(err);
    }
    info!(kind = kind.as_str(), bill_number = %existing.bill_number, "bill deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Payments and receipts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CashVoucherInput {
    pub date: NaiveDate,
    #[serde(deserialize_with = "ids::object_id")]
    pub account_id: ObjectId,
    #[serde(default, deserialize_with = "ids::option_object_id")]
    pub cash_account_id: Option<ObjectId>,
    pub amount: f64,
    #[serde(default)]
    pub instrument: Instrument,
    #[serde(default)]
    pub cheque_number: Option<String>,
    #[serde(default)]
    pub narration: Option<String>,
}

async fn build_cash_voucher(
    state: &AppState,
    ctx: &VoucherContext,
    kind: VoucherKind,
    input: &CashVoucherInput,
    existing: Option<&CashVoucher>,
) -> Result<CashVoucher> {
    ctx.check_date(input.date)?;
    positive(input.amount, "amount")?;
    require_active_account(state, &ctx.company_id, &input.account_id).await?;
    let cash_account_id = cash_account(state, &ctx.company_id, input.cash_account_id).await?;
    if cash_account_id == input.account_id {
        return Err(DomainError::validation("account and cash account must differ"));
    }
    let cheque_number = trimmed(&input.cheque_number);
    if input.instrument == Instrument::Cheque && cheque_number.is_none() {
        return Err(DomainError::validation("cheque number is required"));
    }

    let now = Utc::now();
    Ok(CashVoucher {
        id: Some(existing.and_then(|v| v.id).unwrap_or_else(ObjectId::new)),
        company_id: ctx.company_id,
        fiscal_year_id: ctx.fiscal_year_id,
        kind,
        bill_number: existing.map(|v| v.bill_number.clone()).unwrap_or_default(),
        sequence: existing.map_or(0, |v| v.sequence),
        date: input.date,
        account_id: input.account_id,
        cash_account_id,
        amount: ledger::round2(input.amount),
        instrument: input.instrument,
        cheque_number,
        narration: trimmed(&input.narration),
        created_by: existing.map_or(Some(ctx.user_id), |v| v.created_by),
        created_at: existing.map_or(Some(now), |v| v.created_at),
        updated_at: existing.map(|_| now),
    })
}

pub async fn list_cash_vouchers(
    state: &AppState,
    kind: VoucherKind,
    company_id: &ObjectId,
    fiscal_year_id: &ObjectId,
) -> Result<Vec<CashVoucher>> {
    list_in_period(state.cash_vouchers(kind)?, company_id, fiscal_year_id).await
}

pub async fn get_cash_voucher(
    state: &AppState,
    kind: VoucherKind,
    company_id: &ObjectId,
    id: &ObjectId,
) -> Result<Option<CashVoucher>> {
    find_scoped(state.cash_vouchers(kind)?, company_id, id).await
}

pub async fn create_cash_voucher(
    state: &AppState,
    ctx: &VoucherContext,
    kind: VoucherKind,
    input: &CashVoucherInput,
) -> Result<CashVoucher> {
    ensure_kind(kind.is_cash_voucher(), kind)?;
    let mut voucher = build_cash_voucher(state, ctx, kind, input, None).await?;
    let id = voucher.id.context("voucher missing _id")?;
    let (bill_number, sequence) =
        allocate_bill_number(state, &ctx.company_id, &ctx.fiscal_year_id, kind).await?;
    voucher.bill_number = bill_number;
    voucher.sequence = sequence;

    let coll = state.cash_vouchers(kind)?;
    coll.insert_one(&voucher).await?;
    let posted = match postings::cash_voucher_postings(&voucher) {
        Ok(entries) => postings::replace_postings(state, &id, entries).await,
        Err(err) => Err(err),
    };
    if let Err(err) = posted {
        discard_voucher(state, coll, &id).await;
        return Err(err);
    }
    info!(kind = kind.as_str(), bill_number = %voucher.bill_number, amount = voucher.amount, "voucher created");
    Ok(voucher)
}

pub async fn update_cash_voucher(
    state: &AppState,
    ctx: &VoucherContext,
    kind: VoucherKind,
    id: &ObjectId,
    input: &CashVoucherInput,
) -> Result<CashVoucher> {
    ensure_kind(kind.is_cash_voucher(), kind)?;
    let existing = get_cash_voucher(state, kind, &ctx.company_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("voucher"))?;
    ctx.check_period(&existing.fiscal_year_id)?;
    let voucher = build_cash_voucher(state, ctx, kind, input, Some(&existing)).await?;
    let entries = postings::cash_voucher_postings(&voucher)?;
    rewrite_voucher(state, state.cash_vouchers(kind)?, &existing, &voucher, id, entries).await?;
    Ok(voucher)
}

pub async fn delete_cash_voucher(
    state: &AppState,
    ctx: &VoucherContext,
    kind: VoucherKind,
    id: &ObjectId,
) -> Result<()> {
    ensure_kind(kind.is_cash_voucher(), kind)?;
    let existing = get_cash_voucher(state, kind, &ctx.company_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("voucher"))?;
    ctx.check_period(&existing.fiscal_year_id)?;
    remove_voucher(state, state.cash_vouchers(kind)?, &existing, id).await?;
    info!(kind = kind.as_str(), bill_number = %existing.bill_number, "voucher deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Journal vouchers, credit notes, debit notes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AmountLineInput {
    #[serde(deserialize_with = "ids::object_id")]
    pub account_id: ObjectId,
    pub amount: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalInput {
    pub date: NaiveDate,
    pub debit_lines: Vec<AmountLineInput>,
    pub credit_lines: Vec<AmountLineInput>,
    #[serde(default)]
    pub description: Option<String>,
}

async fn build_journal(
    state: &AppState,
    ctx: &VoucherContext,
    kind: VoucherKind,
    input: &JournalInput,
    existing: Option<&JournalDocument>,
) -> Result<JournalDocument> {
    ctx.check_date(input.date)?;
    let debits: Vec<f64> = input.debit_lines.iter().map(|l| l.amount).collect();
    let credits: Vec<f64> = input.credit_lines.iter().map(|l| l.amount).collect();
    ledger::ensure_balanced(&debits, &credits).map_err(DomainError::validation)?;

    let mut accounts: Vec<ObjectId> = input
        .debit_lines
        .iter()
        .chain(&input.credit_lines)
        .map(|l| l.account_id)
        .collect();
    accounts.sort();
    accounts.dedup();
    for account_id in &accounts {
        require_active_account(state, &ctx.company_id, account_id).await?;
    }

    let to_lines = |lines: &[AmountLineInput]| -> Vec<AmountLine> {
        lines
            .iter()
            .map(|l| AmountLine {
                account_id: l.account_id,
                amount: ledger::round2(l.amount),
            })
            .collect()
    };
    let now = Utc::now();
    Ok(JournalDocument {
        id: Some(existing.and_then(|j| j.id).unwrap_or_else(ObjectId::new)),
        company_id: ctx.company_id,
        fiscal_year_id: ctx.fiscal_year_id,
        kind,
        bill_number: existing.map(|j| j.bill_number.clone()).unwrap_or_default(),
        sequence: existing.map_or(0, |j| j.sequence),
        date: input.date,
        debit_lines: to_lines(&input.debit_lines),
        credit_lines: to_lines(&input.credit_lines),
        description: trimmed(&input.description),
        created_by: existing.map_or(Some(ctx.user_id), |j| j.created_by),
        created_at: existing.map_or(Some(now), |j| j.created_at),
        updated_at: existing.map(|_| now),
    })
}

pub async fn list_journals(
    state: &AppState,
    kind: VoucherKind,
    company_id: &ObjectId,
    fiscal_year_id: &ObjectId,
) -> Result<Vec<JournalDocument>> {
    list_in_period(state.journals(kind)?, company_id, fiscal_year_id).await
}

pub async fn get_journal(
    state: &AppState,
    kind: VoucherKind,
    company_id: &ObjectId,
    id: &ObjectId,
) -> Result<Option<JournalDocument>> {
    find_scoped(state.journals(kind)?, company_id, id).await
}

pub async fn create_journal(
    state: &AppState,
    ctx: &VoucherContext,
    kind: VoucherKind,
    input: &JournalInput,
) -> Result<JournalDocument> {
    ensure_kind(kind.is_journal(), kind)?;
    let mut journal = build_journal(state, ctx, kind, input, None).await?;
    let id = journal.id.context("journal missing _id")?;
    let (bill_number, sequence) =
        allocate_bill_number(state, &ctx.company_id, &ctx.fiscal_year_id, kind).await?;
    journal.bill_number = bill_number;
    journal.sequence = sequence;

    let coll = state.journals(kind)?;
    coll.insert_one(&journal).await?;
    let posted = match postings::journal_postings(&journal) {
        Ok(entries) => postings::replace_postings(state, &id, entries).await,
        Err(err) => Err(err),
    };
    if let Err(err) = posted {
        discard_voucher(state, coll, &id).await;
        return Err(err);
    }
    info!(kind = kind.as_str(), bill_number = %journal.bill_number, "journal created");
    Ok(journal)
}

pub async fn update_journal(
    state: &AppState,
    ctx: &VoucherContext,
    kind: VoucherKind,
    id: &ObjectId,
    input: &JournalInput,
) -> Result<JournalDocument> {
    ensure_kind(kind.is_journal(), kind)?;
    let existing = get_journal(state, kind, &ctx.company_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("journal"))?;
    ctx.check_period(&existing.fiscal_year_id)?;
    let journal = build_journal(state, ctx, kind, input, Some(&existing)).await?;
    let entries = postings::journal_postings(&journal)?;
    rewrite_voucher(state, state.journals(kind)?, &existing, &journal, id, entries).await?;
    Ok(journal)
}

pub async fn delete_journal(
    state: &AppState,
    ctx: &VoucherContext,
    kind: VoucherKind,
    id: &ObjectId,
) -> Result<()> {
    ensure_kind(kind.is_journal(), kind)?;
    let existing = get_journal(state, kind, &ctx.company_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("journal"))?;
    ctx.check_period(&existing.fiscal_year_id)?;
    remove_voucher(state, state.journals(kind)?, &existing, id).await?;
    info!(kind = kind.as_str(), bill_number = %existing.bill_number, "journal deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Stock adjustments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AdjustmentLineInput {
    #[serde(deserialize_with = "ids::object_id")]
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

#[derive(Debug, Clone, Deserialize)]
pub struct StockAdjustmentInput {
    pub date: NaiveDate,
    pub adjustment_type: AdjustmentType,
    pub lines: Vec<AdjustmentLineInput>,
    #[serde(default)]
    pub note: Option<String>,
}

async fn build_adjustment(
    state: &AppState,
    ctx: &VoucherContext,
    input: &StockAdjustmentInput,
    existing: Option<&StockAdjustment>,
) -> Result<StockAdjustment> {
    ctx.check_date(input.date)?;
    if input.lines.is_empty() {
        return Err(DomainError::validation("an adjustment needs at least one line"));
    }
    let items = load_items(state, &ctx.company_id, input.lines.iter().map(|l| l.item_id)).await?;
    let mut lines = Vec::with_capacity(input.lines.len());
    for line in &input.lines {
        positive(line.quantity, "quantity")?;
        non_negative(line.pu_price, "purchase price")?;
        let item = items.get(&line.item_id).context("item missing after load")?;
        let batch_number = line.batch_number.trim();
        if batch_number.is_empty() {
            return Err(DomainError::validation(format!(
                "batch number is required for {}",
                item.name
            )));
        }
        lines.push(AdjustmentLine {
            item_id: line.item_id,
            batch_number: batch_number.to_string(),
            expiry_date: line.expiry_date,
            quantity: line.quantity,
            pu_price: if line.pu_price > 0.0 {
                line.pu_price
            } else {
                item.pu_price
            },
            reason: trimmed(&line.reason),
        });
    }

    let now = Utc::now();
    Ok(StockAdjustment {
        id: Some(existing.and_then(|a| a.id).unwrap_or_else(ObjectId::new)),
        company_id: ctx.company_id,
        fiscal_year_id: ctx.fiscal_year_id,
        bill_number: existing.map(|a| a.bill_number.clone()).unwrap_or_default(),
        sequence: existing.map_or(0, |a| a.sequence),
        date: input.date,
        adjustment_type: input.adjustment_type,
        lines,
        note: trimmed(&input.note),
        created_by: existing.map_or(Some(ctx.user_id), |a| a.created_by),
        created_at: existing.map_or(Some(now), |a| a.created_at),
        updated_at: existing.map(|_| now),
    })
}

/// Excess adds to the batch, short takes from it.
fn adjustment_movements(adjustment: &StockAdjustment, reverse: bool) -> Vec<StockMovement> {
    let inbound = (adjustment.adjustment_type == AdjustmentType::Excess) != reverse;
    adjustment
        .lines
        .iter()
        .map(|line| {
            let key = BatchKey::new(line.item_id, &line.batch_number, line.expiry_date);
            if inbound {
                let seed = StockEntry {
                    batch_number: key.batch_number.clone(),
                    expiry_date: key.expiry_date,
                    quantity: line.quantity,
                    price: line.pu_price,
                    pu_price: line.pu_price,
                    mrp: line.pu_price,
                    store_id: None,
                    rack_id: None,
                    purchase_bill_id: None,
                    date: adjustment.date,
                };
                StockMovement::inbound(key, line.quantity, seed)
            } else {
                StockMovement::outbound(key, line.quantity)
            }
        })
        .collect()
}

pub async fn list_stock_adjustments(
    state: &AppState,
    company_id: &ObjectId,
    fiscal_year_id: &ObjectId,
) -> Result<Vec<StockAdjustment>> {
    list_in_period(&state.stock_adjustments, company_id, fiscal_year_id).await
}

pub async fn get_stock_adjustment(
    state: &AppState,
    company_id: &ObjectId,
    id: &ObjectId,
) -> Result<Option<StockAdjustment>> {
    find_scoped(&state.stock_adjustments, company_id, id).await
}

pub async fn create_stock_adjustment(
    state: &AppState,
    ctx: &VoucherContext,
    input: &StockAdjustmentInput,
) -> Result<StockAdjustment> {
    let mut adjustment = build_adjustment(state, ctx, input, None).await?;
    let movements = adjustment_movements(&adjustment, false);
    apply_movements(state, &ctx.company_id, &movements).await?;

    let stored = async {
        let (bill_number, sequence) = allocate_bill_number(
            state,
            &ctx.company_id,
            &ctx.fiscal_year_id,
            VoucherKind::StockAdjustment,
        )
        .await?;
        adjustment.bill_number = bill_number;
        adjustment.sequence = sequence;
        state.stock_adjustments.insert_one(&adjustment).await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;
    if let Err(err) = stored {
        revert_stock(state, &ctx.company_id, &movements).await;
        return Err(err);
    }
    info!(bill_number = %adjustment.bill_number, lines = adjustment.lines.len(), "stock adjusted");
    Ok(adjustment)
}

pub async fn update_stock_adjustment(
    state: &AppState,
    ctx: &VoucherContext,
    id: &ObjectId,
    input: &StockAdjustmentInput,
) -> Result<StockAdjustment> {
    let existing = get_stock_adjustment(state, &ctx.company_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("stock adjustment"))?;
    ctx.check_period(&existing.fiscal_year_id)?;
    let adjustment = build_adjustment(state, ctx, input, Some(&existing)).await?;

    let mut movements = adjustment_movements(&existing, true);
    movements.extend(adjustment_movements(&adjustment, false));
    apply_movements(state, &ctx.company_id, &movements).await?;

    if let Err(err) = state
        .stock_adjustments
        .replace_one(doc! { "_id": id, "company_id": ctx.company_id }, &adjustment)
        .await
    {
        revert_stock(state, &ctx.company_id, &movements).await;
        return Err(err.into());
    }
    Ok(adjustment)
}

pub async fn delete_stock_adjustment(
    state: &AppState,
    ctx: &VoucherContext,
    id: &ObjectId,
) -> Result<()> {
    let existing = get_stock_adjustment(state, &ctx.company_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("stock adjustment"))?;
    ctx.check_period(&existing.fiscal_year_id)?;
    let movements = adjustment_movements(&existing, true);
    apply_movements(state, &ctx.company_id, &movements).await?;
    if let Err(err) = state.stock_adjustments.delete_one(doc! { "_id": id }).await {
        revert_stock(state, &ctx.company_id, &movements).await;
        return Err(err.into());
    }
    info!(bill_number = %existing.bill_number, "stock adjustment deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bill(kind: VoucherKind) -> Bill {
        Bill {
            id: Some(ObjectId::new()),
            company_id: ObjectId::new(),
            fiscal_year_id: ObjectId::new(),
            kind,
            bill_number: String::new(),
            sequence: 0,
            date: "2025-04-01".parse().unwrap(),
            payment_mode: PaymentMode::Cash,
            party_account_id: None,
            cash_account_id: None,
            party_name: None,
            lines: vec![BillLine {
                item_id: ObjectId::new(),
                batch_number: "B1".into(),
                expiry_date: None,
                quantity: 10.0,
                bonus: 2.0,
                price: 15.0,
                pu_price: 10.0,
                mrp: 16.0,
                discount_percentage: 0.0,
                vat_status: VatStatus::Vatable,
                line_total: 0.0,
            }],
            subtotal: 0.0,
            discount_percentage: 0.0,
            discount_amount: 0.0,
            taxable_amount: 0.0,
            non_taxable_amount: 0.0,
            vat_percentage: 0.0,
            vat_amount: 0.0,
            round_off: 0.0,
            total_amount: 0.0,
            original_bill_id: None,
            supplier_invoice_number: None,
            narration: None,
            created_by: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn sales_take_stock_including_bonus() {
        let moves = bill_movements(&bill(VoucherKind::Sales), false);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].delta, -12.0);
        assert!(moves[0].seed.is_none());
    }

    #[test]
    fn purchases_add_stock_tagged_with_the_bill() {
        let purchase = bill(VoucherKind::Purchase);
        let moves = bill_movements(&purchase, false);
        assert_eq!(moves[0].delta, 12.0);
        let seed = moves[0].seed.as_ref().unwrap();
        assert_eq!(seed.purchase_bill_id, purchase.id);
        assert_eq!(seed.pu_price, 10.0);

        let undo = bill_movements(&purchase, true);
        assert_eq!(undo[0].delta, -12.0);
    }

    #[test]
    fn quotations_leave_stock_alone() {
        assert!(bill_movements(&bill(VoucherKind::SalesQuotation), false).is_empty());
    }

    #[test]
    fn returns_point_back_at_their_bill_kind() {
        assert_eq!(returned_kind(VoucherKind::SalesReturn), Some(VoucherKind::Sales));
        assert_eq!(return_kind_of(VoucherKind::Purchase), Some(VoucherKind::PurchaseReturn));
        assert_eq!(returned_kind(VoucherKind::Sales), None);
    }

    #[test]
    fn dates_must_fall_inside_the_period() {
        let ctx = VoucherContext {
            company_id: ObjectId::new(),
            fiscal_year_id: ObjectId::new(),
            period_start: "2025-01-01".parse().unwrap(),
            period_end: "2025-12-31".parse().unwrap(),
            vat_enabled: true,
            user_id: ObjectId::new(),
        };
        assert!(ctx.check_date("2025-06-30".parse().unwrap()).is_ok());
        assert!(ctx.check_date("2026-01-01".parse().unwrap()).is_err());
    }
}
