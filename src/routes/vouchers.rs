// routes/vouchers.rs
// Bills, payments/receipts, journals and stock adjustments. One router per family;
// the voucher kind rides along as a request extension.

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::{ApiError, ApiJson, ApiPath, ApiResult};
use crate::ids::parse_id;
use crate::models::VoucherKind;
use crate::session::CompanyContext;
use crate::state::{
    AppState, BillInput, CashVoucherInput, JournalInput, StockAdjustmentInput, create_bill,
    create_cash_voucher, create_journal, create_stock_adjustment, delete_bill,
    delete_cash_voucher, delete_journal, delete_stock_adjustment, get_bill, get_cash_voucher,
    get_journal, get_stock_adjustment, list_bills, list_cash_vouchers, list_journals,
    list_stock_adjustments, next_bill_number, update_bill, update_cash_voucher, update_journal,
    update_stock_adjustment,
};

use super::success;

fn created_document<T: serde::Serialize>(data: T) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, Json(json!({ "success": true, "data": data })))
}

fn deleted() -> Json<Value> {
    Json(json!({ "success": true }))
}

/// Preview of the number the next document of this kind will get.
async fn next_number(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
) -> ApiResult<Json<Value>> {
    let (bill_number, sequence) =
        next_bill_number(&st, &ctx.company_id()?, &ctx.fiscal_year_id()?, kind).await?;
    Ok(Json(json!({
        "success": true,
        "data": { "kind": kind, "bill_number": bill_number, "sequence": sequence },
    })))
}

// ---------------------------------------------------------------------------
// Sales, returns, purchases, quotations
// ---------------------------------------------------------------------------

pub fn bill_routes(kind: VoucherKind) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(bills_index).post(bills_create))
        .route("/next-number", get(next_number))
        .route(
            "/{id}",
            get(bills_show).put(bills_update).delete(bills_delete),
        )
        .layer(Extension(kind))
}

async fn bills_index(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
) -> ApiResult<Json<Value>> {
    Ok(success(
        list_bills(&st, kind, &ctx.company_id()?, &ctx.fiscal_year_id()?).await?,
    ))
}

async fn bills_create(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
    ApiJson(input): ApiJson<BillInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let bill = create_bill(&st, &ctx.voucher_context()?, kind, &input).await?;
    Ok(created_document(bill))
}

async fn bills_show(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let bill = get_bill(&st, kind, &ctx.company_id()?, &parse_id(&id)?)
        .await?
        .ok_or_else(|| ApiError::not_found("bill"))?;
    Ok(success(bill))
}

async fn bills_update(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<BillInput>,
) -> ApiResult<Json<Value>> {
    let bill = update_bill(&st, &ctx.voucher_context()?, kind, &parse_id(&id)?, &input).await?;
    Ok(success(bill))
}

async fn bills_delete(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    delete_bill(&st, &ctx.voucher_context()?, kind, &parse_id(&id)?).await?;
    Ok(deleted())
}

// ---------------------------------------------------------------------------
// Payments and receipts
// ---------------------------------------------------------------------------

pub fn cash_routes(kind: VoucherKind) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(cash_index).post(cash_create))
        .route("/next-number", get(next_number))
        .route("/{id}", get(cash_show).put(cash_update).delete(cash_delete))
        .layer(Extension(kind))
}

async fn cash_index(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
) -> ApiResult<Json<Value>> {
    Ok(success(
        list_cash_vouchers(&st, kind, &ctx.company_id()?, &ctx.fiscal_year_id()?).await?,
    ))
}

async fn cash_create(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
    ApiJson(input): ApiJson<CashVoucherInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let voucher = create_cash_voucher(&st, &ctx.voucher_context()?, kind, &input).await?;
    Ok(created_document(voucher))
}

async fn cash_show(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let voucher = get_cash_voucher(&st, kind, &ctx.company_id()?, &parse_id(&id)?)
        .await?
        .ok_or_else(|| ApiError::not_found("voucher"))?;
    Ok(success(voucher))
}

async fn cash_update(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<CashVoucherInput>,
) -> ApiResult<Json<Value>> {
    let voucher =
        update_cash_voucher(&st, &ctx.voucher_context()?, kind, &parse_id(&id)?, &input).await?;
    Ok(success(voucher))
}

async fn cash_delete(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    delete_cash_voucher(&st, &ctx.voucher_context()?, kind, &parse_id(&id)?).await?;
    Ok(deleted())
}

// ---------------------------------------------------------------------------
// Journal vouchers, credit notes, debit notes
// ---------------------------------------------------------------------------

pub fn journal_routes(kind: VoucherKind) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(journals_index).post(journals_create))
        .route("/next-number", get(next_number))
        .route(
            "/{id}",
            get(journals_show)
                .put(journals_update)
                .delete(journals_delete),
        )
        .layer(Extension(kind))
}

async fn journals_index(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
) -> ApiResult<Json<Value>> {
    Ok(success(
        list_journals(&st, kind, &ctx.company_id()?, &ctx.fiscal_year_id()?).await?,
    ))
}

async fn journals_create(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
    ApiJson(input): ApiJson<JournalInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let journal = create_journal(&st, &ctx.voucher_context()?, kind, &input).await?;
    Ok(created_document(journal))
}

async fn journals_show(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let journal = get_journal(&st, kind, &ctx.company_id()?, &parse_id(&id)?)
        .await?
        .ok_or_else(|| ApiError::not_found("voucher"))?;
    Ok(success(journal))
}

async fn journals_update(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<JournalInput>,
) -> ApiResult<Json<Value>> {
    let journal =
        update_journal(&st, &ctx.voucher_context()?, kind, &parse_id(&id)?, &input).await?;
    Ok(success(journal))
}

async fn journals_delete(
    State(st): State<Arc<AppState>>,
    Extension(kind): Extension<VoucherKind>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    delete_journal(&st, &ctx.voucher_context()?, kind, &parse_id(&id)?).await?;
    Ok(deleted())
}

// ---------------------------------------------------------------------------
// Stock adjustments
// ---------------------------------------------------------------------------

pub fn adjustment_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(adjustments_index).post(adjustments_create))
        .route("/next-number", get(next_number))
        .route(
            "/{id}",
            get(adjustments_show)
                .put(adjustments_update)
                .delete(adjustments_delete),
        )
        .layer(Extension(VoucherKind::StockAdjustment))
}

async fn adjustments_index(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
) -> ApiResult<Json<Value>> {
    Ok(success(
        list_stock_adjustments(&st, &ctx.company_id()?, &ctx.fiscal_year_id()?).await?,
    ))
}

async fn adjustments_create(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiJson(input): ApiJson<StockAdjustmentInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let adjustment = create_stock_adjustment(&st, &ctx.voucher_context()?, &input).await?;
    Ok(created_document(adjustment))
}

async fn adjustments_show(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let adjustment = get_stock_adjustment(&st, &ctx.company_id()?, &parse_id(&id)?)
        .await?
        .ok_or_else(|| ApiError::not_found("stock adjustment"))?;
    Ok(success(adjustment))
}

async fn adjustments_update(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<StockAdjustmentInput>,
) -> ApiResult<Json<Value>> {
    let adjustment =
        update_stock_adjustment(&st, &ctx.voucher_context()?, &parse_id(&id)?, &input).await?;
    Ok(success(adjustment))
}

async fn adjustments_delete(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    delete_stock_adjustment(&st, &ctx.voucher_context()?, &parse_id(&id)?).await?;
    Ok(deleted())
}
