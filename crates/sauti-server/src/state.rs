//! Application state management

use std::sync::Arc;

use sauti_core::Dispatcher;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Dispatcher reference - using Arc for cheap clones
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }
}
