//! Shell script execution with a hard timeout

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::AgentError;

/// Outcome of a finished script
#[derive(Debug, Clone)]
pub struct LaunchResult {
    /// Exit code; -1 when the process was killed by a signal
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl LaunchResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run `script` through `sh -c` inside `cwd`.
///
/// The child is killed if it outlives `timeout`, which yields
/// [`AgentError::TimeoutError`]. A non-zero exit code is not an error here.
pub async fn run_script(
    script: &str,
    cwd: &Path,
    timeout: Duration,
    env: &HashMap<String, String>,
) -> Result<LaunchResult, AgentError> {
    debug!("Running script in {:?}: {}", cwd, script);
    let started = Instant::now();

    let child = Command::new("sh")
        .arg("-c")
        .arg(script)
        .current_dir(cwd)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    // Dropping the wait future drops the child, which kills it
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            warn!("Script timed out after {:?}: {}", timeout, script);
            return Err(AgentError::TimeoutError {
                command: script.to_string(),
                secs: timeout.as_secs(),
            });
        }
    };

    Ok(LaunchResult {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration: started.elapsed(),
    })
}
