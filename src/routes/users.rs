// routes/users.rs
// Admin-only user management: list users and enroll new ones with a fresh TOTP secret.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::models::UserRole;
use crate::session::SessionUser;
use crate::state::{AppState, create_user, list_users};
use crate::totp::{DEFAULT_SECRET_BYTES, build_totp, generate_base32_secret_n};

#[derive(Deserialize)]
pub struct NewUser {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: UserRole,
}

fn require_admin(session: &SessionUser) -> ApiResult<()> {
    if session.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

pub async fn users_index(
    State(st): State<Arc<AppState>>,
    session: SessionUser,
) -> ApiResult<Json<Value>> {
    require_admin(&session)?;
    let users: Vec<Value> = list_users(&st)
        .await?
        .into_iter()
        .map(|u| {
            serde_json::json!({
                "id": u.id,
                "email": u.email,
                "name": u.name,
                "role": u.role.as_str(),
                "companies": u.companies,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "success": true, "data": users })))
}

/// The secret is only ever returned here, as an otpauth URL to scan.
pub async fn users_create(
    State(st): State<Arc<AppState>>,
    session: SessionUser,
    ApiJson(body): ApiJson<NewUser>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    require_admin(&session)?;
    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::bad_request("a valid email is required"));
    }
    let secret = generate_base32_secret_n(DEFAULT_SECRET_BYTES);
    let id = create_user(&st, &email, body.name.trim(), &secret, body.role).await?;
    let otpauth_url = build_totp(&email, &secret)?.get_url();
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "data": { "id": id, "email": email, "otpauth_url": otpauth_url },
        })),
    ))
}
