//! Server state

use std::sync::Arc;

use chrono::Duration;

use crate::blob::BlobStore;
use crate::store::Store;

/// State shared across handlers
pub struct ServerState {
    pub store: Arc<Store>,
    pub blobs: Arc<dyn BlobStore>,
    pub stale_after: Duration,
    pub heartbeat_retention: usize,
}

impl ServerState {
    pub fn new(store: Arc<Store>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            blobs,
            stale_after: Duration::hours(1),
            heartbeat_retention: 10_000,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_heartbeat_retention(mut self, retention: usize) -> Self {
        self.heartbeat_retention = retention;
        self
    }
}
