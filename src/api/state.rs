use std::sync::Arc;

use crate::config::AnalyticsConfig;
use crate::storage::LogStore;

#[derive(Clone)]
pub struct AppState {
    pub store: LogStore,
    pub config: Arc<AnalyticsConfig>,
}

impl AppState {
    pub fn new(store: LogStore, config: AnalyticsConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }
}
