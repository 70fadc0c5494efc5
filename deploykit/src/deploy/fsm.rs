//! Finite State Machine for a deployment attempt

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// No attempt running; the host token is free
    Idle,

    /// Producing the artifact
    Building,

    /// Artifact exists, digest being checked
    Packaged,

    /// Moving the artifact to the host
    Transferring,

    /// Snapshotting the live deployment
    BackingUp,

    /// Replacing live content and reloading workers
    Deploying,

    /// Probing the reloaded service
    Verifying,

    /// Terminal: new release is live
    Committed,

    /// Restoring the latest backup, reloading, re-verifying
    RollingBack,

    /// Terminal: previous release restored and healthy
    RolledBack,

    /// Terminal: failed before any live change
    Aborted,

    /// Terminal: rollback failed, needs manual intervention
    Incident,
}

impl DeploymentState {
    /// States that end an attempt
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Committed
                | DeploymentState::RolledBack
                | DeploymentState::Aborted
                | DeploymentState::Incident
        )
    }

    /// States that may be cancelled without touching the live deployment
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            DeploymentState::Building | DeploymentState::Packaged | DeploymentState::Transferring
        )
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeploymentState::Idle => "idle",
            DeploymentState::Building => "building",
            DeploymentState::Packaged => "packaged",
            DeploymentState::Transferring => "transferring",
            DeploymentState::BackingUp => "backing_up",
            DeploymentState::Deploying => "deploying",
            DeploymentState::Verifying => "verifying",
            DeploymentState::Committed => "committed",
            DeploymentState::RollingBack => "rolling_back",
            DeploymentState::RolledBack => "rolled_back",
            DeploymentState::Aborted => "aborted",
            DeploymentState::Incident => "incident",
        };
        f.write_str(label)
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Start a deploy
    Deploy,

    /// Operator-requested restore of a backup
    ManualRestore,

    /// Artifact produced
    Built,

    /// Artifact digest verified, transfer begins
    Packaged,

    /// Artifact delivered and verified on the host
    Transferred,

    /// Snapshot durably stored
    BackedUp,

    /// Workers reloaded on the new release
    Reloaded,

    /// Probe reported healthy
    Healthy,

    /// Probe reported unhealthy
    Unhealthy(String),

    /// Install or reload failed after the live deployment changed
    DeployFailed(String),

    /// Build, transfer or backup failed before any live change
    Failed(String),

    /// Cancelled before any live change
    Cancel,

    /// Restore, reload and re-verification succeeded
    Restored,

    /// Any step of the rollback failed
    RollbackFailed(String),

    /// Return a finished attempt's token to idle
    Reset,
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentState,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self {
            state: DeploymentState::Idle,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_idle(&self) -> bool {
        self.state == DeploymentState::Idle
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentState, DeployError> {
        use DeploymentEvent as E;
        use DeploymentState as S;

        let new_state = match (self.state, &event) {
            // From Idle
            (S::Idle, E::Deploy) => {
                self.error = None;
                S::Building
            }
            (S::Idle, E::ManualRestore) => {
                self.error = None;
                S::RollingBack
            }

            // Pre-live stages
            (S::Building, E::Built) => S::Packaged,
            (S::Packaged, E::Packaged) => S::Transferring,
            (S::Transferring, E::Transferred) => S::BackingUp,
            (S::Building | S::Packaged | S::Transferring | S::BackingUp, E::Failed(err)) => {
                self.error = Some(err.clone());
                S::Aborted
            }
            (S::Building | S::Packaged | S::Transferring, E::Cancel) => {
                self.error = Some(format!("cancelled during {}", self.state));
                S::Aborted
            }

            // Live stages
            (S::BackingUp, E::BackedUp) => S::Deploying,
            (S::Deploying, E::Reloaded) => S::Verifying,
            (S::Deploying, E::DeployFailed(err)) => {
                self.error = Some(err.clone());
                S::RollingBack
            }
            (S::Verifying, E::Healthy) => S::Committed,
            (S::Verifying, E::Unhealthy(err)) => {
                self.error = Some(err.clone());
                S::RollingBack
            }

            // Rollback
            (S::RollingBack, E::Restored) => S::RolledBack,
            (S::RollingBack, E::RollbackFailed(err)) => {
                self.error = Some(err.clone());
                S::Incident
            }

            // Release the token
            (S::Committed | S::RolledBack | S::Aborted | S::Incident, E::Reset) => S::Idle,

            // Invalid transitions
            (state, event) => {
                return Err(DeployError::InvalidTransition(format!(
                    "{:?} -> {:?}",
                    state, event
                )));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }

    /// Force the machine back to idle, whatever state it is in
    pub(crate) fn force_idle(&mut self) {
        self.state = DeploymentState::Idle;
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fsm_happy_path() {
        let mut fsm = DeploymentFsm::new();
        assert!(fsm.is_idle());

        fsm.process(DeploymentEvent::Deploy).unwrap();
        fsm.process(DeploymentEvent::Built).unwrap();
        fsm.process(DeploymentEvent::Packaged).unwrap();
        fsm.process(DeploymentEvent::Transferred).unwrap();
        fsm.process(DeploymentEvent::BackedUp).unwrap();
        fsm.process(DeploymentEvent::Reloaded).unwrap();
        assert_eq!(
            fsm.process(DeploymentEvent::Healthy).unwrap(),
            DeploymentState::Committed
        );

        fsm.process(DeploymentEvent::Reset).unwrap();
        assert!(fsm.is_idle());
    }

    #[test]
    fn test_cannot_skip_backup() {
        let mut fsm = DeploymentFsm::new();
        fsm.process(DeploymentEvent::Deploy).unwrap();
        fsm.process(DeploymentEvent::Built).unwrap();
        fsm.process(DeploymentEvent::Packaged).unwrap();
        fsm.process(DeploymentEvent::Transferred).unwrap();

        let result = fsm.process(DeploymentEvent::Reloaded);
        assert!(matches!(result, Err(DeployError::InvalidTransition(_))));
        assert_eq!(fsm.state(), DeploymentState::BackingUp);
    }
}
