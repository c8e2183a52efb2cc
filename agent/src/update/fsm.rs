//! Finite state machine tracking a single deploy or rollback command

use serde::{Deserialize, Serialize};

/// Phase of an update command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    /// Command accepted, nothing done yet
    Received,

    /// Fetching the bundle from the control plane
    Downloading,

    /// Comparing the bundle checksum
    Verifying,

    /// Unpacking into the staging directory
    Extracting,

    /// Loading and checking the manifest
    Validating,

    /// Swapping the bundle into place
    Installing,

    /// Running the manifest script
    RunningScript,

    /// Applied successfully
    Succeeded,

    /// Gave up
    Failed,
}

impl UpdatePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdatePhase::Succeeded | UpdatePhase::Failed)
    }
}

/// Update event
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    StartDownload,
    Downloaded,
    Verified,
    Extracted,
    /// Manifest is valid; the flag tells whether a script must run
    Validated { has_script: bool },
    Installed,
    ScriptFinished,
    Fail(String),
}

/// Update FSM
#[derive(Debug, Clone)]
pub struct UpdateFsm {
    phase: UpdatePhase,
    has_script: bool,
    error: Option<String>,
}

impl UpdateFsm {
    /// Create a new FSM in the received phase
    pub fn new() -> Self {
        Self {
            phase: UpdatePhase::Received,
            has_script: false,
            error: None,
        }
    }

    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    /// Failure reason, once failed
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition phase
    pub fn process(&mut self, event: UpdateEvent) -> Result<(), String> {
        let next = match (self.phase, &event) {
            (phase, UpdateEvent::Fail(reason)) if !phase.is_terminal() => {
                self.error = Some(reason.clone());
                UpdatePhase::Failed
            }

            (UpdatePhase::Received, UpdateEvent::StartDownload) => UpdatePhase::Downloading,
            (UpdatePhase::Downloading, UpdateEvent::Downloaded) => UpdatePhase::Verifying,
            (UpdatePhase::Verifying, UpdateEvent::Verified) => UpdatePhase::Extracting,
            (UpdatePhase::Extracting, UpdateEvent::Extracted) => UpdatePhase::Validating,
            (UpdatePhase::Validating, UpdateEvent::Validated { has_script }) => {
                self.has_script = *has_script;
                UpdatePhase::Installing
            }
            (UpdatePhase::Installing, UpdateEvent::Installed) if self.has_script => {
                UpdatePhase::RunningScript
            }
            (UpdatePhase::Installing, UpdateEvent::Installed) => UpdatePhase::Succeeded,
            (UpdatePhase::RunningScript, UpdateEvent::ScriptFinished) => UpdatePhase::Succeeded,

            (phase, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", phase, event));
            }
        };

        self.phase = next;
        Ok(())
    }
}

impl Default for UpdateFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance_to_installing(fsm: &mut UpdateFsm, has_script: bool) {
        fsm.process(UpdateEvent::StartDownload).unwrap();
        fsm.process(UpdateEvent::Downloaded).unwrap();
        fsm.process(UpdateEvent::Verified).unwrap();
        fsm.process(UpdateEvent::Extracted).unwrap();
        fsm.process(UpdateEvent::Validated { has_script }).unwrap();
    }

    #[test]
    fn test_fsm_with_script() {
        let mut fsm = UpdateFsm::new();
        assert_eq!(fsm.phase(), UpdatePhase::Received);

        advance_to_installing(&mut fsm, true);
        assert_eq!(fsm.phase(), UpdatePhase::Installing);

        fsm.process(UpdateEvent::Installed).unwrap();
        assert_eq!(fsm.phase(), UpdatePhase::RunningScript);

        fsm.process(UpdateEvent::ScriptFinished).unwrap();
        assert_eq!(fsm.phase(), UpdatePhase::Succeeded);
        assert!(fsm.error().is_none());
    }

    #[test]
    fn test_fsm_without_script_skips_running() {
        let mut fsm = UpdateFsm::new();
        advance_to_installing(&mut fsm, false);

        fsm.process(UpdateEvent::Installed).unwrap();
        assert_eq!(fsm.phase(), UpdatePhase::Succeeded);
    }

    #[test]
    fn test_fsm_fail_from_any_active_phase() {
        let mut fsm = UpdateFsm::new();
        fsm.process(UpdateEvent::StartDownload).unwrap();
        fsm.process(UpdateEvent::Downloaded).unwrap();

        fsm.process(UpdateEvent::Fail("checksum mismatch".to_string())).unwrap();
        assert_eq!(fsm.phase(), UpdatePhase::Failed);
        assert_eq!(fsm.error(), Some("checksum mismatch"));
    }

    #[test]
    fn test_fsm_rejects_invalid_transitions() {
        let mut fsm = UpdateFsm::new();
        assert!(fsm.process(UpdateEvent::Installed).is_err());
        assert_eq!(fsm.phase(), UpdatePhase::Received);

        advance_to_installing(&mut fsm, false);
        fsm.process(UpdateEvent::Installed).unwrap();

        // Terminal phases accept nothing, not even a failure
        assert!(fsm.process(UpdateEvent::Fail("late".to_string())).is_err());
        assert!(fsm.process(UpdateEvent::StartDownload).is_err());
        assert_eq!(fsm.phase(), UpdatePhase::Succeeded);
    }
}
