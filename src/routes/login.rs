// routes/login.rs
// POST /api/login { "email": "...", "code": "123456" } -> session cookie.

use axum::{
    Json,
    extract::State,
    http::{HeaderValue, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::session::SESSION_COOKIE_NAME;
use crate::state::{AppState, create_session, find_user, latest_fiscal_year};
use crate::totp::build_totp;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub code: String,
}

/// Checks the current TOTP code (one step of skew either way). The new session starts
/// in the user's first company and that company's latest fiscal year.
pub async fn login(
    State(st): State<Arc<AppState>>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> ApiResult<Response> {
    let email = body.email.trim().to_lowercase();
    let email = email.as_str();
    let Some(user) = find_user(&st, email).await? else {
        warn!(email, "login for unknown user");
        return Err(ApiError::Unauthorized);
    };
    let totp = build_totp(&user.email, &user.secret)?;
    if !totp.check_current(body.code.trim()).unwrap_or(false) {
        warn!(email, "login with wrong code");
        return Err(ApiError::Unauthorized);
    }

    let company_id = user.companies.first().copied();
    let fiscal_year_id = match company_id {
        Some(id) => latest_fiscal_year(&st, &id).await?.and_then(|fy| fy.id),
        None => None,
    };
    let token = create_session(&st, &user.email, company_id, fiscal_year_id).await?;
    info!(email, "user logged in");

    let mut response = Json(serde_json::json!({
        "success": true,
        "user": { "email": user.email, "name": user.name, "role": user.role.as_str() },
        "company_id": company_id,
        "fiscal_year_id": fiscal_year_id,
    }))
    .into_response();
    set_session_cookie(&mut response, &token, st.session_ttl_seconds);
    Ok(response)
}

pub fn set_session_cookie(response: &mut Response, token: &str, max_age: u64) {
    if let Ok(header_value) = HeaderValue::from_str(&format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}"
    )) {
        response.headers_mut().append(SET_COOKIE, header_value);
    }
}
