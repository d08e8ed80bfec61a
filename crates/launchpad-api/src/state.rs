//! Application state.

use launchpad_config::Settings;
use launchpad_engine::RunDispatcher;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub dispatcher: Arc<RunDispatcher>,
    /// Resolved webhook secret; signatures are only checked when set.
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, dispatcher: Arc<RunDispatcher>) -> Self {
        Self {
            settings,
            dispatcher,
            webhook_secret: None,
        }
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<Arc<str>>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }
}
