//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::logs::LoggingHandle;
use crate::storage::device::Device;
use crate::update::executor::UpdateExecutor;
use crate::workers::poller::{self, Poller};

/// Run the Kernex agent until `shutdown_signal` resolves
pub async fn run(
    agent_version: String,
    device: Device,
    options: AppOptions,
    logging: Option<Arc<LoggingHandle>>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!(
        "Initializing Kernex Agent {} for device {}...",
        agent_version, device.device_id
    );

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let started = init(
        agent_version,
        device,
        &options,
        logging,
        &shutdown_tx,
        &mut shutdown_manager,
    )
    .await;
    if let Err(e) = started {
        error!("Failed to start agent: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    agent_version: String,
    device: Device,
    options: &AppOptions,
    logging: Option<Arc<LoggingHandle>>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AgentError> {
    options.layout.setup().await?;

    let client = HttpClient::with_device_id(&options.control_plane_url, device.device_id.clone())?;
    let executor = UpdateExecutor::new(
        client.clone(),
        options.layout.clone(),
        device.device_id.clone(),
    );
    let mut poller = Poller::new(
        client,
        executor,
        device.device_id,
        agent_version,
        options.runtime.clone(),
    );
    if let Some(logging) = logging {
        poller = poller.with_logging(logging);
    }

    init_poller_worker(
        options.poller.clone(),
        poller,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
}

fn init_poller_worker(
    options: poller::Options,
    mut poller: Poller,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing poller worker...");

    let poller_handle = tokio::spawn(async move {
        poller::run(
            &options,
            &mut poller,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_poller_worker_handle(poller_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    poller_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            poller_worker_handle: None,
        }
    }

    pub fn with_poller_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.poller_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("poller_handle already set".to_string()));
        }
        self.poller_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, abandoning in-flight work",
                    self.lifecycle_options.max_shutdown_delay
                );
                Err(AgentError::ShutdownError("shutdown timed out".to_string()))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down Kernex Agent...");

        if let Some(handle) = self.poller_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
