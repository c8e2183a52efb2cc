//! Error types for the Kernex agent

use thiserror::Error;

/// Main error type for the Kernex agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    TransportError(#[from] reqwest::Error),

    #[error("Control plane rejected request: {status} - {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    IntegrityError { expected: String, actual: String },

    #[error("Timed out after {secs}s: {command}")]
    TimeoutError { command: String, secs: u64 },

    #[error("Script exited with code {code}: {stderr}")]
    ExecutionError { code: i32, stderr: String },

    #[error("Invalid state transition: {0}")]
    StateError(String),

    #[error("Device not registered: {0}")]
    DeviceNotRegistered(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AgentError {
    fn from(err: tokio::task::JoinError) -> Self {
        AgentError::Internal(format!("blocking task failed: {}", err))
    }
}
