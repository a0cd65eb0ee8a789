//! Sauti Server - HTTP API for multi-device streaming audio generation

use std::sync::Arc;

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;
mod sim;
mod state;

use sauti_core::{
    DeviceId, DeviceSetup, DispatchConfig, Dispatcher, ServerConfig, StaticVoiceResolver,
};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sauti_server=debug,sauti_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Sauti Server");

    let config = DispatchConfig::default();
    let device_count = match std::env::var("SAUTI_DEVICES") {
        Ok(raw) => match raw.parse::<usize>() {
            Ok(parsed) if parsed > 0 => parsed,
            _ => {
                warn!("Invalid SAUTI_DEVICES='{}', falling back to 2", raw);
                2
            }
        },
        Err(_) => 2,
    };

    // Simulated devices; a real deployment wires hardware-backed
    // implementations of DeviceBackend and GenerationEngine here.
    let devices = (0..device_count)
        .map(|index| DeviceSetup {
            id: index as DeviceId,
            name: format!("sim-{index}"),
            backend: Arc::new(sim::SimBackend::new(
                24.0,
                2.0 + index as f64,
                10.0 * index as f64,
            )),
            engine: Arc::new(sim::SimEngine::new(config.sample_rate)),
        })
        .collect();
    let voices = Arc::new(StaticVoiceResolver::new(sim::builtin_voices(
        config.sample_rate,
    )));

    let dispatcher = Dispatcher::new(config, devices, voices)?;
    let state = AppState::new(dispatcher);
    info!(devices = device_count, "dispatcher initialized");

    // Build router
    let app = api::create_router(state.clone());

    // Start server
    let defaults = ServerConfig::default();
    let host = std::env::var("SAUTI_HOST").unwrap_or(defaults.host);
    let port = match std::env::var("SAUTI_PORT") {
        Ok(raw) => match raw.parse::<u16>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid SAUTI_PORT='{}', falling back to {}", raw, defaults.port);
                defaults.port
            }
        },
        Err(_) => defaults.port,
    };
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    let shutdown_state = state.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown_state));

    info!("Server ready. Press Ctrl+C to stop.");
    server.await?;

    Ok(())
}

/// Wait for shutdown signal and stop all sessions
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }
    state.dispatcher.shutdown();
}
