//! Health check endpoint

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let devices = state.dispatcher.status_summary().await;
    let available = devices.iter().filter(|d| d.available).count();
    Json(json!({
        "status": if available > 0 { "ok" } else { "degraded" },
        "devices": devices.len(),
        "devices_available": available,
        "active_sessions": state.dispatcher.active_sessions(),
    }))
}
