use std::sync::Arc;

use crate::service::TransferApi;

/// Shared gateway state
#[derive(Clone)]
pub struct AppState {
    /// Transfer service over whichever store was configured
    pub transfers: Arc<dyn TransferApi>,
    /// Backend name reported by `/health`
    pub store_name: &'static str,
}

impl AppState {
    pub fn new(transfers: Arc<dyn TransferApi>, store_name: &'static str) -> Self {
        Self {
            transfers,
            store_name,
        }
    }
}
