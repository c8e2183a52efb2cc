//! Applies commands received in heartbeat responses

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use openapi_client::{
    Command, DeployCommand, DeploymentOutcome, DeploymentResultRequest, UpdateKind,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::app::runtime::RuntimeConfig;
use crate::errors::AgentError;
use crate::filesys::dir::{begin_replace_dir, Dir};
use crate::http::bundles::sanitize_filename;
use crate::http::client::HttpClient;
use crate::storage::layout::StorageLayout;
use crate::update::bundle::{extract, load_manifest, Manifest};
use crate::update::fsm::{UpdateEvent, UpdateFsm, UpdatePhase};
use crate::update::integrity::verify_checksum;
use crate::update::launcher::run_script;

/// What happened to a single command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Bundle installed and reported as success
    Applied { version: String },

    /// Bundle command failed and was reported as failed
    Failed { phase: UpdatePhase, message: String },

    /// Runtime configuration replaced
    Configured,

    /// Unknown kind, malformed payload or bad configuration; nothing reported
    Ignored { reason: String },
}

/// Contents of `current.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledBundle {
    pub bundle_version: String,
    pub bundle_id: String,
    pub deployment_id: String,
    pub path: PathBuf,
    pub installed_at: DateTime<Utc>,
}

/// Executes commands one at a time against the local bundle store
pub struct UpdateExecutor {
    client: HttpClient,
    layout: StorageLayout,
    device_id: String,
}

impl UpdateExecutor {
    pub fn new(client: HttpClient, layout: StorageLayout, device_id: String) -> Self {
        Self {
            client,
            layout,
            device_id,
        }
    }

    /// Decode one command from a heartbeat response and execute it
    pub async fn handle(&self, raw: &Value, config: &mut RuntimeConfig) -> CommandOutcome {
        match serde_json::from_value::<Command>(raw.clone()) {
            Ok(command) => self.execute(command, config).await,
            Err(e) => {
                let kind = raw.get("type").and_then(Value::as_str).unwrap_or("<missing>");
                warn!("Ignoring malformed '{}' command: {}", kind, e);
                CommandOutcome::Ignored {
                    reason: format!("malformed {} command: {}", kind, e),
                }
            }
        }
    }

    /// Execute a decoded command
    pub async fn execute(&self, command: Command, config: &mut RuntimeConfig) -> CommandOutcome {
        match command {
            Command::Deploy(cmd) => self.run_update(&cmd, config).await,
            Command::Configure(cmd) => match config.apply(&cmd) {
                Ok(_) => CommandOutcome::Configured,
                Err(e) => {
                    error!("Failed to apply configuration: {}", e);
                    CommandOutcome::Ignored {
                        reason: e.to_string(),
                    }
                }
            },
            Command::Unknown => {
                warn!("Ignoring unknown command type");
                CommandOutcome::Ignored {
                    reason: "unknown command type".to_string(),
                }
            }
        }
    }

    async fn run_update(&self, cmd: &DeployCommand, config: &RuntimeConfig) -> CommandOutcome {
        let kind = cmd.kind;
        info!(
            "{} bundle {} (deployment {})",
            kind, cmd.bundle_version, cmd.deployment_id
        );

        let mut fsm = UpdateFsm::new();
        let work = WorkDirs::new(&self.layout, &cmd.deployment_id);
        let result = self.apply(cmd, config, &work, &mut fsm).await;
        work.cleanup().await;

        match result {
            Ok(installed) => {
                info!(
                    "Bundle {} installed at {:?}",
                    installed.bundle_version, installed.path
                );
                self.report(cmd, DeploymentOutcome::Success, None).await;
                CommandOutcome::Applied {
                    version: installed.bundle_version,
                }
            }
            Err(e) => {
                let phase = fsm.phase();
                let message = e.to_string();
                if let Err(fsm_err) = fsm.process(UpdateEvent::Fail(message.clone())) {
                    debug!("{}", fsm_err);
                }
                error!(
                    "{} of {} failed while {:?}: {}",
                    kind, cmd.bundle_version, phase, message
                );
                self.report(cmd, DeploymentOutcome::Failed, Some(message.clone()))
                    .await;
                CommandOutcome::Failed { phase, message }
            }
        }
    }

    async fn apply(
        &self,
        cmd: &DeployCommand,
        config: &RuntimeConfig,
        work: &WorkDirs,
        fsm: &mut UpdateFsm,
    ) -> Result<InstalledBundle, AgentError> {
        let target = self.install_path(&cmd.bundle_version)?;

        step(fsm, UpdateEvent::StartDownload)?;
        let bundle_path = self
            .client
            .download_bundle(&cmd.bundle_id, work.download.path(), config.download_timeout)
            .await?;

        step(fsm, UpdateEvent::Downloaded)?;
        match &cmd.checksum {
            Some(expected) => verify_checksum(&bundle_path, expected).await?,
            None => debug!("No checksum supplied for bundle {}", cmd.bundle_id),
        }

        step(fsm, UpdateEvent::Verified)?;
        work.staging.delete().await?;
        let root = extract(&bundle_path, work.staging.path()).await?;

        step(fsm, UpdateEvent::Extracted)?;
        let manifest = Manifest::from_value(load_manifest(&root).await?)?;
        if manifest.version() != cmd.bundle_version {
            warn!(
                "Manifest version {} differs from bundle version {}",
                manifest.version(),
                cmd.bundle_version
            );
        }
        let script = script_for(cmd.kind, &manifest).map(str::to_string);

        step(
            fsm,
            UpdateEvent::Validated {
                has_script: script.is_some(),
            },
        )?;
        let swap = begin_replace_dir(&root, &target).await?;

        step(fsm, UpdateEvent::Installed)?;
        match self.finish(cmd, script.as_deref(), config, &target, fsm).await {
            Ok(installed) => {
                swap.commit().await?;
                Ok(installed)
            }
            Err(e) => {
                if let Err(revert_err) = swap.revert().await {
                    warn!("Failed to restore previous {:?}: {}", target, revert_err);
                }
                Err(e)
            }
        }
    }

    /// Run the bundle script inside the swapped-in tree, then record it as
    /// current. Nothing is recorded unless the script succeeds.
    async fn finish(
        &self,
        cmd: &DeployCommand,
        script: Option<&str>,
        config: &RuntimeConfig,
        target: &Path,
        fsm: &mut UpdateFsm,
    ) -> Result<InstalledBundle, AgentError> {
        if let Some(script) = script {
            let env = script_env(cmd, target);
            let result = run_script(script, target, config.deploy_timeout, &env).await?;
            debug!("Script stdout: {}", result.stdout.trim_end());
            if !result.success() {
                return Err(AgentError::ExecutionError {
                    code: result.code,
                    stderr: result.stderr.trim().to_string(),
                });
            }
            info!("Script finished in {:?}", result.duration);
            step(fsm, UpdateEvent::ScriptFinished)?;
        }

        let installed = InstalledBundle {
            bundle_version: cmd.bundle_version.clone(),
            bundle_id: cmd.bundle_id.clone(),
            deployment_id: cmd.deployment_id.clone(),
            path: target.to_path_buf(),
            installed_at: Utc::now(),
        };
        self.layout.current_file().write_json(&installed).await?;
        Ok(installed)
    }

    fn install_path(&self, version: &str) -> Result<PathBuf, AgentError> {
        match sanitize_filename(version) {
            Some(name) if name == version => Ok(self.layout.bundles_dir().path().join(name)),
            _ => Err(AgentError::InvalidRequest(format!(
                "bundle version is not a valid directory name: '{}'",
                version
            ))),
        }
    }

    async fn report(&self, cmd: &DeployCommand, outcome: DeploymentOutcome, error: Option<String>) {
        let request =
            DeploymentResultRequest::new(&cmd.deployment_id, &self.device_id, outcome, error);
        if let Err(e) = self.client.report_result(&cmd.deployment_id, &request).await {
            error!(
                "Failed to report {} for deployment {}: {}",
                outcome, cmd.deployment_id, e
            );
        }
    }
}

fn script_for(kind: UpdateKind, manifest: &Manifest) -> Option<&str> {
    match kind {
        UpdateKind::Deploy => manifest.deploy_script(),
        UpdateKind::Rollback => manifest.rollback_script(),
    }
}

fn step(fsm: &mut UpdateFsm, event: UpdateEvent) -> Result<(), AgentError> {
    fsm.process(event).map_err(AgentError::StateError)
}

fn script_env(cmd: &DeployCommand, bundle_dir: &Path) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("KERNEX_DEPLOYMENT_ID".to_string(), cmd.deployment_id.clone());
    env.insert("KERNEX_BUNDLE_ID".to_string(), cmd.bundle_id.clone());
    env.insert("KERNEX_BUNDLE_VERSION".to_string(), cmd.bundle_version.clone());
    env.insert(
        "KERNEX_BUNDLE_DIR".to_string(),
        bundle_dir.to_string_lossy().into_owned(),
    );
    env
}

/// Per-command scratch directories, removed once the command finishes
struct WorkDirs {
    download: Dir,
    staging: Dir,
}

impl WorkDirs {
    fn new(layout: &StorageLayout, deployment_id: &str) -> Self {
        let name = sanitize_filename(deployment_id).unwrap_or_else(|| "current".to_string());
        Self {
            download: layout.downloads_dir().subdir(&name),
            staging: layout.staging_dir().subdir(&name),
        }
    }

    async fn cleanup(&self) {
        for dir in [&self.download, &self.staging] {
            if let Err(e) = dir.delete().await {
                warn!("Failed to clean up {:?}: {}", dir.path(), e);
            }
        }
    }
}
