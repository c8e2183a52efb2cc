//! Heartbeat loop: poll, execute commands in order, sleep

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use openapi_client::HeartbeatRequest;
use tracing::{debug, error, info, warn};

use crate::app::runtime::RuntimeConfig;
use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::logs::LoggingHandle;
use crate::telemetry::collect_health;
use crate::update::executor::{CommandOutcome, UpdateExecutor};
use crate::utils::{Backoff, CooldownOptions};

/// Poller worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Initial delay before first poll
    pub initial_delay: Duration,

    /// Retry schedule after failed heartbeats
    pub cooldown: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            cooldown: CooldownOptions::default(),
        }
    }
}

/// Everything one poll cycle needs; owns the runtime configuration
pub struct Poller {
    client: HttpClient,
    executor: UpdateExecutor,
    device_id: String,
    agent_version: String,
    config: RuntimeConfig,
    logging: Option<Arc<LoggingHandle>>,
}

impl Poller {
    pub fn new(
        client: HttpClient,
        executor: UpdateExecutor,
        device_id: String,
        agent_version: String,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            client,
            executor,
            device_id,
            agent_version,
            config,
            logging: None,
        }
    }

    /// Let `configure` commands change the active log level
    pub fn with_logging(mut self, logging: Arc<LoggingHandle>) -> Self {
        self.logging = Some(logging);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Send one heartbeat and execute the returned commands sequentially
    pub async fn poll_once(&mut self) -> Result<Vec<CommandOutcome>, AgentError> {
        let health = tokio::task::spawn_blocking(collect_health).await?;
        let request = HeartbeatRequest {
            agent_version: Some(self.agent_version.clone()),
            memory_mb: Some(health.memory_mb),
            cpu_pct: Some(health.cpu_pct),
            status: Some(health.status.to_string()),
        };

        let response = self
            .client
            .heartbeat(&self.device_id, &request, self.config.heartbeat_timeout)
            .await?;
        debug!("Heartbeat returned {} command(s)", response.commands.len());

        let mut outcomes = Vec::with_capacity(response.commands.len());
        for raw in &response.commands {
            let log_level = self.config.log_level.clone();
            let outcome = self.executor.handle(raw, &mut self.config).await;
            if self.config.log_level != log_level {
                self.reload_log_level();
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn reload_log_level(&self) {
        if let Some(logging) = &self.logging {
            if let Err(e) = logging.set_level(&self.config.log_level) {
                warn!("Failed to change log level: {}", e);
            }
        }
    }
}

/// Run the poller worker
pub async fn run<S, F>(
    options: &Options,
    poller: &mut Poller,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Poller worker starting...");
    let mut backoff = Backoff::new(options.cooldown.clone());

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Poller worker shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        let wait = match poller.poll_once().await {
            Ok(outcomes) => {
                backoff.reset();
                if !outcomes.is_empty() {
                    info!("Processed {} command(s)", outcomes.len());
                }
                poller.config().polling_interval
            }
            Err(e) => {
                let wait = backoff.next_delay();
                error!(
                    "Heartbeat failed ({} in a row): {}; retrying in {:?}",
                    backoff.failures(),
                    e,
                    wait
                );
                wait
            }
        };

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Poller worker shutting down...");
                return;
            }
            _ = sleep_fn(wait) => {}
        }
    }
}
