//! Live runtime configuration owned by the poller loop

use std::time::Duration;

use openapi_client::ConfigureCommand;
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::logs::LogLevel;
use crate::storage::settings::Settings;

/// Settings the control plane may change through `configure` commands
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub polling_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub deploy_timeout: Duration,
    pub download_timeout: Duration,
    pub log_level: LogLevel,

    /// Version of the last applied control plane config
    pub config_version: Option<String>,
}

impl RuntimeConfig {
    /// Seed from the local settings file
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            polling_interval: Duration::from_secs(settings.polling_interval_secs),
            heartbeat_timeout: Duration::from_secs(settings.heartbeat_timeout_secs),
            deploy_timeout: Duration::from_secs(settings.deploy_timeout_secs),
            download_timeout: Duration::from_secs(settings.download_timeout_secs),
            log_level: settings.log_level.clone(),
            config_version: None,
        }
    }

    /// Apply a `configure` command and report whether anything changed.
    ///
    /// Every field is parsed before anything changes, so a bad value leaves
    /// the current configuration untouched. The control plane resends the
    /// same configuration on every heartbeat.
    pub fn apply(&mut self, command: &ConfigureCommand) -> Result<bool, AgentError> {
        let polling_interval = parse_secs("polling_interval", &command.polling_interval)?;
        let heartbeat_timeout = parse_secs("heartbeat_timeout", &command.heartbeat_timeout)?;
        let deploy_timeout = parse_secs("deploy_timeout", &command.deploy_timeout)?;
        let log_level: LogLevel = command
            .log_level
            .parse()
            .map_err(AgentError::ConfigError)?;

        let next = Self {
            polling_interval,
            heartbeat_timeout,
            deploy_timeout,
            download_timeout: self.download_timeout,
            log_level,
            config_version: command.config_version.clone(),
        };
        if next == *self {
            debug!(
                "Config version {} unchanged",
                self.config_version.as_deref().unwrap_or("-")
            );
            return Ok(false);
        }

        *self = next;
        info!(
            "Applied config version {}: polling={:?} heartbeat_timeout={:?} deploy_timeout={:?} log_level={}",
            self.config_version.as_deref().unwrap_or("-"),
            self.polling_interval,
            self.heartbeat_timeout,
            self.deploy_timeout,
            self.log_level.to_filter_string()
        );
        Ok(true)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

fn parse_secs(field: &str, value: &str) -> Result<Duration, AgentError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(AgentError::ConfigError(format!(
            "{} must be a positive integer, got '{}'",
            field, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configure(polling: &str, log_level: &str) -> ConfigureCommand {
        ConfigureCommand {
            config_version: Some("3".to_string()),
            polling_interval: polling.to_string(),
            heartbeat_timeout: "15".to_string(),
            deploy_timeout: "600".to_string(),
            log_level: log_level.to_string(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_apply_configure() {
        let mut config = RuntimeConfig::default();
        assert!(config.apply(&configure("30", "DEBUG")).unwrap());

        assert_eq!(config.polling_interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(15));
        assert_eq!(config.deploy_timeout, Duration::from_secs(600));
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.config_version.as_deref(), Some("3"));
    }

    #[test]
    fn test_repeated_configure_reports_no_change() {
        let mut config = RuntimeConfig::default();
        assert!(config.apply(&configure("30", "INFO")).unwrap());
        assert!(!config.apply(&configure("30", "INFO")).unwrap());
        assert!(config.apply(&configure("45", "INFO")).unwrap());

        let mut bumped = configure("45", "INFO");
        bumped.config_version = Some("4".to_string());
        assert!(config.apply(&bumped).unwrap());
        assert_eq!(config.config_version.as_deref(), Some("4"));
    }

    #[test]
    fn test_invalid_configure_changes_nothing() {
        let mut config = RuntimeConfig::default();
        let before = config.clone();

        assert!(config.apply(&configure("soon", "INFO")).is_err());
        assert!(config.apply(&configure("0", "INFO")).is_err());
        assert!(config.apply(&configure("30", "LOUD")).is_err());
        assert_eq!(config, before);
    }
}
