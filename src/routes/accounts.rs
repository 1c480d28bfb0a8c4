// routes/accounts.rs
// Chart of accounts: groups, accounts, balances, projections and statements.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::{ApiError, ApiJson, ApiPath, ApiQuery, ApiResult};
use crate::ids::parse_id;
use crate::ledger::{PostingSide, project_balance};
use crate::models::Account;
use crate::session::CompanyContext;
use crate::state::{
    AccountGroupInput, AccountInput, AppState, account_balance, account_statement, create_account,
    create_account_group, delete_account, delete_account_group, get_account, get_account_group,
    list_account_groups, list_accounts, update_account, update_account_group,
};

use super::{created, success};

// ---------------------------------------------------------------------------
// Account groups
// ---------------------------------------------------------------------------

pub async fn groups_index(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
) -> ApiResult<Json<Value>> {
    Ok(success(list_account_groups(&st, &ctx.company_id()?).await?))
}

pub async fn groups_create(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiJson(input): ApiJson<AccountGroupInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = create_account_group(&st, &ctx.company_id()?, &input).await?;
    Ok(created(id))
}

pub async fn groups_show(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let group = get_account_group(&st, &ctx.company_id()?, &parse_id(&id)?)
        .await?
        .ok_or_else(|| ApiError::not_found("account group"))?;
    Ok(success(group))
}

pub async fn groups_update(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<AccountGroupInput>,
) -> ApiResult<Json<Value>> {
    update_account_group(&st, &ctx.company_id()?, &parse_id(&id)?, &input).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn groups_delete(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    delete_account_group(&st, &ctx.company_id()?, &parse_id(&id)?).await?;
    Ok(Json(json!({ "success": true })))
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

async fn load_account(st: &AppState, ctx: &CompanyContext, raw_id: &str) -> ApiResult<Account> {
    get_account(st, &ctx.company_id()?, &parse_id(raw_id)?)
        .await?
        .ok_or_else(|| ApiError::not_found("account"))
}

pub async fn accounts_index(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
) -> ApiResult<Json<Value>> {
    Ok(success(list_accounts(&st, &ctx.company_id()?).await?))
}

pub async fn accounts_create(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiJson(input): ApiJson<AccountInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = create_account(&st, &ctx.company_id()?, &ctx.fiscal_year_id()?, &input).await?;
    Ok(created(id))
}

pub async fn accounts_show(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    Ok(success(load_account(&st, &ctx, &id).await?))
}

pub async fn accounts_update(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<AccountInput>,
) -> ApiResult<Json<Value>> {
    update_account(
        &st,
        &ctx.company_id()?,
        &ctx.fiscal_year_id()?,
        &parse_id(&id)?,
        &input,
    )
    .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn accounts_delete(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    delete_account(&st, &ctx.company_id()?, &parse_id(&id)?).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn accounts_balance(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let account = load_account(&st, &ctx, &id).await?;
    let balance = account_balance(&st, &account, &ctx.fiscal_year_id()?).await?;
    Ok(Json(json!({
        "success": true,
        "data": { "account_id": account.id, "name": account.name, "balance": balance },
    })))
}

#[derive(Deserialize)]
pub struct ProjectionQuery {
    pub amount: f64,
    pub side: PostingSide,
}

/// Balance the account would show once `amount` is posted on `side`.
pub async fn accounts_projection(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
    ApiQuery(q): ApiQuery<ProjectionQuery>,
) -> ApiResult<Json<Value>> {
    if !q.amount.is_finite() || q.amount < 0.0 {
        return Err(ApiError::bad_request("amount must be a positive number"));
    }
    let account = load_account(&st, &ctx, &id).await?;
    let current = account_balance(&st, &account, &ctx.fiscal_year_id()?).await?;
    let projected = project_balance(current, q.amount, q.side);
    Ok(Json(json!({
        "success": true,
        "data": { "account_id": account.id, "current": current, "projected": projected },
    })))
}

pub async fn accounts_statement(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let account = load_account(&st, &ctx, &id).await?;
    let statement = account_statement(&st, &account, &ctx.fiscal_year_id()?).await?;
    Ok(Json(json!({
        "success": true,
        "data": { "account_id": account.id, "name": account.name, "statement": statement },
    })))
}
