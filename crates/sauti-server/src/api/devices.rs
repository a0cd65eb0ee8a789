//! Device pool endpoints

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::ApiError;
use crate::state::AppState;
use sauti_core::{DeviceId, DeviceStatusSnapshot};

pub async fn list_devices(State(state): State<AppState>) -> Json<Vec<DeviceStatusSnapshot>> {
    Json(state.dispatcher.status_summary().await)
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<DeviceId>,
) -> Result<Json<DeviceStatusSnapshot>, ApiError> {
    state
        .dispatcher
        .status_summary()
        .await
        .into_iter()
        .find(|device| device.id == id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown device {id}")))
}

/// Plain-text pool summary with usage bars
pub async fn summary(State(state): State<AppState>) -> String {
    state.dispatcher.status_text().await
}
