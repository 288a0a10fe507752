//! Container lifecycle states and valid transitions.
//!
//! ```text
//! create() → Created (persisted, no process)
//! start()  → Running (child exec'd)
//! reap     → Exited  (child collected, exit code recorded)
//! recovery → Unknown (record could not be correlated with a live process)
//! ```
//!
//! Each container's state sequence is a prefix of
//! `Created → Running → (Exited | Unknown)`; there are no backward
//! transitions. `Removed` is not a state: removal unregisters the record.

use serde::{Deserialize, Serialize};
use vessel_shared::cri;
use vessel_shared::{VesselError, VesselResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Record persisted; no process was ever exec'd.
    Created,

    /// Entrypoint exec'd and not yet reaped.
    Running,

    /// Child reaped; exit code and signal recorded.
    Exited,

    /// Crash recovery could not correlate the record with a live process.
    Unknown,
}

impl ContainerState {
    /// Terminal for removal purposes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContainerState::Exited | ContainerState::Unknown)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }

    /// `start()` is only valid here.
    pub fn can_start(&self) -> bool {
        matches!(self, ContainerState::Created)
    }

    /// Removal is valid for never-started and terminal containers.
    pub fn can_remove(&self) -> bool {
        matches!(self, ContainerState::Created) || self.is_terminal()
    }

    pub fn can_transition_to(&self, target: ContainerState) -> bool {
        use ContainerState::*;
        matches!(
            (self, target),
            (Created, Running)
                | (Running, Exited)
                | (Running, Unknown)
                // Recovery resolves Unknown once liveness is re-established.
                | (Unknown, Exited)
                | (Unknown, Running)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Exited => "exited",
            ContainerState::Unknown => "unknown",
        }
    }

    /// Projection to the CRI wire state.
    pub fn to_cri(&self) -> cri::ContainerState {
        match self {
            ContainerState::Created => cri::ContainerState::ContainerCreated,
            ContainerState::Running => cri::ContainerState::ContainerRunning,
            ContainerState::Exited => cri::ContainerState::ContainerExited,
            ContainerState::Unknown => cri::ContainerState::ContainerUnknown,
        }
    }

    /// Validated transition; errors keep the current state.
    pub fn transition_to(&mut self, target: ContainerState) -> VesselResult<()> {
        if !self.can_transition_to(target) {
            return Err(VesselError::Internal(format!(
                "invalid container state transition {} -> {}",
                self,
                target.as_str()
            )));
        }
        *self = target;
        Ok(())
    }
}

impl std::str::FromStr for ContainerState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ContainerState::Created),
            "running" => Ok(ContainerState::Running),
            "exited" => Ok(ContainerState::Exited),
            "unknown" => Ok(ContainerState::Unknown),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
