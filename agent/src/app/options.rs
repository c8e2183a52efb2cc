//! Application configuration options

use std::time::Duration;

use crate::app::runtime::RuntimeConfig;
use crate::storage::layout::StorageLayout;
use crate::workers::poller;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Control plane API base URL
    pub control_plane_url: String,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Poller worker options
    pub poller: poller::Options,

    /// Starting runtime configuration
    pub runtime: RuntimeConfig,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            control_plane_url: "http://localhost:8000/api/v1".to_string(),
            layout: StorageLayout::default(),
            poller: poller::Options::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown. A command in flight is allowed
    /// to finish within this window.
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
