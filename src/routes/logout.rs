// routes/logout.rs
// POST /api/logout -> removes the session and expires the cookie.

use axum::{
    Json,
    extract::State,
    http::{HeaderValue, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::error::ApiResult;
use crate::session::{SESSION_COOKIE_NAME, SessionUser};
use crate::state::{AppState, delete_session};

pub async fn logout(State(st): State<Arc<AppState>>, session: SessionUser) -> ApiResult<Response> {
    delete_session(&st, session.token()).await?;

    let mut response = Json(serde_json::json!({ "success": true })).into_response();
    if let Ok(header_value) = HeaderValue::from_str(&format!(
        "{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
    )) {
        response.headers_mut().append(SET_COOKIE, header_value);
    }
    Ok(response)
}
