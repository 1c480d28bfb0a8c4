// routes/company.rs
// Company CRUD and switching the session's active company.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::{ApiError, ApiJson, ApiPath, ApiResult};
use crate::ids::parse_id;
use crate::models::Company;
use crate::session::SessionUser;
use crate::state::{
    AppState, CompanyInput, create_company, delete_company, get_company_by_id, latest_fiscal_year,
    list_companies, list_companies_for_user, set_session_company, update_company,
};

use super::success;

async fn accessible_company(st: &AppState, session: &SessionUser, raw_id: &str) -> ApiResult<Company> {
    let id = parse_id(raw_id)?;
    if !session.user().can_access(&id) {
        return Err(ApiError::Forbidden);
    }
    get_company_by_id(st, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("company"))
}

pub async fn companies_index(
    State(st): State<Arc<AppState>>,
    session: SessionUser,
) -> ApiResult<Json<Value>> {
    let companies = if session.is_admin() {
        list_companies(&st).await?
    } else {
        list_companies_for_user(&st, &session.user().companies).await?
    };
    Ok(success(companies))
}

/// Creates the company with its first fiscal year and default chart of accounts,
/// then makes it the session's active company.
pub async fn companies_create(
    State(st): State<Arc<AppState>>,
    session: SessionUser,
    ApiJson(input): ApiJson<CompanyInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let created = create_company(&st, session.user_id(), &input).await?;
    set_session_company(
        &st,
        session.token(),
        &created.company_id,
        Some(created.fiscal_year_id),
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": {
                "company_id": created.company_id,
                "fiscal_year_id": created.fiscal_year_id,
                "default_accounts": created.default_accounts,
            },
        })),
    ))
}

pub async fn companies_show(
    State(st): State<Arc<AppState>>,
    session: SessionUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    Ok(success(accessible_company(&st, &session, &id).await?))
}

pub async fn companies_update(
    State(st): State<Arc<AppState>>,
    session: SessionUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<CompanyInput>,
) -> ApiResult<Json<Value>> {
    let company = accessible_company(&st, &session, &id).await?;
    let company_id = company.id.ok_or_else(|| ApiError::not_found("company"))?;
    update_company(&st, &company_id, &input).await?;
    let updated = get_company_by_id(&st, &company_id)
        .await?
        .ok_or_else(|| ApiError::not_found("company"))?;
    Ok(success(updated))
}

/// Only the owner or an admin may delete; every document of the company goes with it.
pub async fn companies_delete(
    State(st): State<Arc<AppState>>,
    session: SessionUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let company = accessible_company(&st, &session, &id).await?;
    if company.owner_id != *session.user_id() && !session.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let company_id = company.id.ok_or_else(|| ApiError::not_found("company"))?;
    let removed = delete_company(&st, &company_id).await?;
    Ok(Json(json!({ "success": true, "removed": removed })))
}

pub async fn switch_company(
    State(st): State<Arc<AppState>>,
    session: SessionUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Value>> {
    let company = accessible_company(&st, &session, &id).await?;
    let company_id = company.id.ok_or_else(|| ApiError::not_found("company"))?;
    let fiscal_year = latest_fiscal_year(&st, &company_id).await?;
    let fiscal_year_id = fiscal_year.as_ref().and_then(|fy| fy.id);
    set_session_company(&st, session.token(), &company_id, fiscal_year_id).await?;
    Ok(Json(json!({
        "success": true,
        "data": { "company": company, "fiscal_year": fiscal_year },
    })))
}
