// routes/setup.rs
// GET /api/setup -> otpauth:// URL of the signed-in user, for authenticator enrollment.
// GET /api/me    -> who is signed in and where they are working.

use axum::Json;
use serde_json::Value;

use crate::error::ApiResult;
use crate::session::SessionUser;
use crate::totp::build_totp;

pub async fn setup(session: SessionUser) -> ApiResult<Json<Value>> {
    let user = session.user();
    let totp = build_totp(&user.email, &user.secret)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "email": user.email,
        "otpauth_url": totp.get_url(),
    })))
}

pub async fn me(session: SessionUser) -> Json<Value> {
    let user = session.user();
    Json(serde_json::json!({
        "success": true,
        "user": {
            "id": user.id,
            "email": user.email,
            "name": user.name,
            "role": user.role.as_str(),
            "companies": user.companies,
        },
        "company_id": user.company_id,
        "fiscal_year_id": user.fiscal_year_id,
    }))
}
