//! Streaming generation endpoints

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;
use sauti_core::GenerationRequest;

/// Streaming generation request
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Dialogue script to synthesize
    pub script: String,

    /// Voice name per speaker slot, in speaker order
    pub speakers: Vec<String>,

    /// Classifier-free guidance strength
    #[serde(default)]
    pub guidance_scale: Option<f32>,
}

/// Start a generation session and stream progress events back over SSE.
/// The stream ends when the session reaches a terminal state.
pub async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if req.speakers.is_empty() {
        return Err(ApiError::bad_request("at least one speaker voice is required"));
    }
    info!(
        chars = req.script.len(),
        speakers = req.speakers.len(),
        "generation request"
    );

    let mut request = GenerationRequest::new(req.script, req.speakers);
    if let Some(scale) = req.guidance_scale {
        request = request.with_guidance_scale(scale);
    }
    let session = request.id.clone();

    let rx = state.dispatcher.generate(request);
    let stream = ReceiverStream::new(rx).map(move |progress| {
        let event = match Event::default().json_data(&progress) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "failed to encode progress event");
                Event::default().event("error").data("encoding failure")
            }
        };
        Ok(event)
    });

    // Announce the session id first so callers can correlate a later stop.
    let opening = futures::stream::once(async move {
        Ok(Event::default()
            .event("session")
            .data(session))
    });

    Ok(Sse::new(opening.chain(stream)).keep_alive(KeepAlive::default()))
}

/// Stop every active session. Idempotent.
pub async fn stop(State(state): State<AppState>) -> Json<Value> {
    let active = state.dispatcher.active_sessions();
    state.dispatcher.stop();
    Json(json!({
        "status": "ok",
        "sessions_signalled": active,
    }))
}
