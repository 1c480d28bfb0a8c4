// routes/inventory.rs
// Inventory master data, batches, expiring stock and opening stock.

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use chrono::{Days, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::{ApiError, ApiJson, ApiPath, ApiQuery, ApiResult};
use crate::ids::{self, parse_id};
use crate::session::CompanyContext;
use crate::state::{
    AppState, ItemInput, Lookup, NameInput, OpeningStockInput, RackInput, StoreInput,
    create_item, create_lookup, create_opening_stock, create_rack, create_store, delete_item,
    delete_lookup, delete_opening_stock, delete_rack, delete_store, expiring_batches, get_item,
    get_lookup, get_rack, get_store, item_batches, list_items, list_lookup, list_opening_stocks,
    list_racks, list_stores, update_item, update_lookup, update_rack, update_store,
};

use super::{created, success};

const DEFAULT_EXPIRY_WINDOW_DAYS: u64 = 90;

fn ok() -> Json<Value> {
    Json(json!({ "success": true }))
}

// ---------------------------------------------------------------------------
// Units, main units, categories, items companies
// ---------------------------------------------------------------------------

/// CRUD router for one lookup collection; the lookup travels as an extension.
pub fn lookup_routes(lookup: Lookup) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(lookup_index).post(lookup_create))
        .route(
            "/{id}",
            get(lookup_show).put(lookup_update).delete(lookup_delete),
        )
        .layer(Extension(lookup))
}

async fn lookup_index(
    State(st): State<Arc<AppState>>,
    Extension(lookup): Extension<Lookup>,
    ctx: CompanyContext,
) -> ApiResult<Json<Value>> {
    Ok(success(list_lookup(&st, lookup, &ctx.company_id()?).await?))
}

async fn lookup_create(
    State(st): State<Arc<AppState>>,
    Extension(lookup): Extension<Lookup>,
    ctx: CompanyContext,
    ApiJson(input): ApiJson<NameInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = create_lookup(&st, lookup, &ctx.company_id()?, &input).await?;
    Ok(created(id))
}

async fn lookup_show(
    State(st): State<Arc<AppState>>,
    Extension(lookup): Extension<Lookup>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let entry = get_lookup(&st, lookup, &ctx.company_id()?, &parse_id(&id)?)
        .await?
        .ok_or_else(|| ApiError::not_found(lookup.label()))?;
    Ok(success(entry))
}

async fn lookup_update(
    State(st): State<Arc<AppState>>,
    Extension(lookup): Extension<Lookup>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<NameInput>,
) -> ApiResult<Json<Value>> {
    update_lookup(&st, lookup, &ctx.company_id()?, &parse_id(&id)?, &input).await?;
    Ok(ok())
}

async fn lookup_delete(
    State(st): State<Arc<AppState>>,
    Extension(lookup): Extension<Lookup>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    delete_lookup(&st, lookup, &ctx.company_id()?, &parse_id(&id)?).await?;
    Ok(ok())
}

// ---------------------------------------------------------------------------
// Stores and racks
// ---------------------------------------------------------------------------

pub async fn stores_index(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
) -> ApiResult<Json<Value>> {
    Ok(success(list_stores(&st, &ctx.company_id()?).await?))
}

pub async fn stores_create(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiJson(input): ApiJson<StoreInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    Ok(created(create_store(&st, &ctx.company_id()?, &input).await?))
}

pub async fn stores_show(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let store = get_store(&st, &ctx.company_id()?, &parse_id(&id)?)
        .await?
        .ok_or_else(|| ApiError::not_found("store"))?;
    Ok(success(store))
}

pub async fn stores_update(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<StoreInput>,
) -> ApiResult<Json<Value>> {
    update_store(&st, &ctx.company_id()?, &parse_id(&id)?, &input).await?;
    Ok(ok())
}

pub async fn stores_delete(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    delete_store(&st, &ctx.company_id()?, &parse_id(&id)?).await?;
    Ok(ok())
}

#[derive(Deserialize)]
pub struct RackQuery {
    #[serde(default, deserialize_with = "ids::option_object_id")]
    pub store_id: Option<mongodb::bson::oid::ObjectId>,
}

pub async fn racks_index(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiQuery(q): ApiQuery<RackQuery>,
) -> ApiResult<Json<Value>> {
    Ok(success(
        list_racks(&st, &ctx.company_id()?, q.store_id.as_ref()).await?,
    ))
}

pub async fn racks_create(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiJson(input): ApiJson<RackInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    Ok(created(create_rack(&st, &ctx.company_id()?, &input).await?))
}

pub async fn racks_show(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let rack = get_rack(&st, &ctx.company_id()?, &parse_id(&id)?)
        .await?
        .ok_or_else(|| ApiError::not_found("rack"))?;
    Ok(success(rack))
}

pub async fn racks_update(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<RackInput>,
) -> ApiResult<Json<Value>> {
    update_rack(&st, &ctx.company_id()?, &parse_id(&id)?, &input).await?;
    Ok(ok())
}

pub async fn racks_delete(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    delete_rack(&st, &ctx.company_id()?, &parse_id(&id)?).await?;
    Ok(ok())
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ItemQuery {
    #[serde(default)]
    pub search: Option<String>,
}

pub async fn items_index(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiQuery(q): ApiQuery<ItemQuery>,
) -> ApiResult<Json<Value>> {
    let items = list_items(&st, &ctx.company_id()?, q.search.as_deref()).await?;
    let data: Vec<Value> = items
        .into_iter()
        .map(|item| {
            let stock = item.total_stock();
            json!({ "item": item, "stock": stock })
        })
        .collect();
    Ok(success(data))
}

pub async fn items_create(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiJson(input): ApiJson<ItemInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = create_item(&st, &ctx.company_id()?, &ctx.fiscal_year_id()?, &input).await?;
    Ok(created(id))
}

pub async fn items_show(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let item = get_item(&st, &ctx.company_id()?, &parse_id(&id)?)
        .await?
        .ok_or_else(|| ApiError::not_found("item"))?;
    Ok(success(item))
}

pub async fn items_update(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<ItemInput>,
) -> ApiResult<Json<Value>> {
    update_item(&st, &ctx.company_id()?, &parse_id(&id)?, &input).await?;
    Ok(ok())
}

pub async fn items_delete(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    delete_item(&st, &ctx.company_id()?, &parse_id(&id)?).await?;
    Ok(ok())
}

pub async fn items_batches(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let item = get_item(&st, &ctx.company_id()?, &parse_id(&id)?)
        .await?
        .ok_or_else(|| ApiError::not_found("item"))?;
    Ok(Json(json!({
        "success": true,
        "data": { "item_id": item.id, "name": item.name, "batches": item_batches(&item) },
    })))
}

#[derive(Deserialize)]
pub struct ExpiringQuery {
    #[serde(default)]
    pub days: Option<u64>,
}

pub async fn stock_expiring(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiQuery(q): ApiQuery<ExpiringQuery>,
) -> ApiResult<Json<Value>> {
    let days = q.days.unwrap_or(DEFAULT_EXPIRY_WINDOW_DAYS);
    let until = Utc::now()
        .date_naive()
        .checked_add_days(Days::new(days))
        .ok_or_else(|| ApiError::bad_request("days is out of range"))?;
    let batches = expiring_batches(&st, &ctx.company_id()?, until).await?;
    Ok(Json(json!({ "success": true, "until": until, "data": batches })))
}

// ---------------------------------------------------------------------------
// Opening stock
// ---------------------------------------------------------------------------

pub async fn opening_stock_index(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
) -> ApiResult<Json<Value>> {
    Ok(success(
        list_opening_stocks(&st, &ctx.company_id()?, &ctx.fiscal_year_id()?).await?,
    ))
}

pub async fn opening_stock_create(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiJson(input): ApiJson<OpeningStockInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = create_opening_stock(
        &st,
        &ctx.company_id()?,
        &ctx.fiscal_year_id()?,
        ctx.fiscal_year.start_date,
        &input,
    )
    .await?;
    Ok(created(id))
}

pub async fn opening_stock_delete(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    delete_opening_stock(&st, &ctx.company_id()?, &parse_id(&id)?).await?;
    Ok(ok())
}
