//! Shared state for HTTP handlers.

use std::sync::Arc;

use crate::gateway::Gateway;

/// State handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    /// CORS origins allowed to call the API.
    pub allowed_origins: Arc<Vec<String>>,
    /// Relaxes CORS when no origins are configured.
    pub dev_mode: bool,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            allowed_origins: Arc::new(Vec::new()),
            dev_mode: false,
        }
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = Arc::new(origins);
        self
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }
}
