use std::sync::Arc;

use crate::services::dispatcher::Dispatcher;
use crate::services::storage::BlobStore;
use crate::store::JobStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub dispatcher: Arc<Dispatcher>,
    /// Lifetime of presigned upload/download URLs in seconds.
    pub presign_expires_secs: u32,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        dispatcher: Arc<Dispatcher>,
        presign_expires_secs: u32,
    ) -> Self {
        Self {
            store,
            blobs,
            dispatcher,
            presign_expires_secs,
        }
    }
}
