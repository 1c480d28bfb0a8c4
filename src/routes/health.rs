// routes/health.rs
// GET /api/health -> database ping, no session needed.

use axum::{Json, extract::State, http::StatusCode};
use mongodb::bson::doc;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

use crate::state::AppState;

pub async fn health(State(st): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    match st.db.run_command(doc! { "ping": 1 }).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "success": true, "database": "up" })),
        ),
        Err(err) => {
            warn!(error = %err, "database ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "success": false, "error": "database unavailable" })),
            )
        }
    }
}
