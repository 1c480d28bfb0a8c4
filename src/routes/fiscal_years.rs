// routes/fiscal_years.rs
// Periods of the active company: list, open the next one, switch between them.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::{ApiError, ApiPath, ApiResult};
use crate::ids::parse_id;
use crate::session::CompanyContext;
use crate::state::{
    AppState, create_next_fiscal_year, get_fiscal_year, list_fiscal_years, set_session_fiscal_year,
};

pub async fn fiscal_years_index(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
) -> ApiResult<Json<Value>> {
    let years = list_fiscal_years(&st, &ctx.company_id()?).await?;
    Ok(Json(json!({
        "success": true,
        "data": years,
        "active_id": ctx.fiscal_year.id,
    })))
}

/// Opens the period after the latest one, carrying balances and stock, and works in it.
pub async fn fiscal_years_next(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let next = create_next_fiscal_year(&st, &ctx.company_id()?).await?;
    if let Some(id) = &next.id {
        set_session_fiscal_year(&st, &ctx.session.token, id).await?;
    }
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "data": next }))))
}

pub async fn fiscal_years_switch(
    State(st): State<Arc<AppState>>,
    ctx: CompanyContext,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_id(&id)?;
    let fiscal_year = get_fiscal_year(&st, &ctx.company_id()?, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("fiscal year"))?;
    set_session_fiscal_year(&st, &ctx.session.token, &id).await?;
    Ok(Json(json!({ "success": true, "data": fiscal_year })))
}
