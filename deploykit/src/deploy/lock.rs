//! Per-host deployment token

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};

use fs2::FileExt;
use tracing::warn;

use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};
use crate::errors::DeployError;

/// Exclusive right to drive the host's FSM out of `Idle`
///
/// Acquiring checks `Idle` and applies the first transition under one lock,
/// and also takes an advisory lock on `deploy.lock` so a second process on the
/// same host is refused too. Dropping the token returns the FSM to `Idle`.
pub struct HostToken {
    fsm: Arc<Mutex<DeploymentFsm>>,
    lock_file: Option<std::fs::File>,
}

impl HostToken {
    pub(crate) fn acquire(
        host: &str,
        fsm: &Arc<Mutex<DeploymentFsm>>,
        lock_path: &Path,
        event: DeploymentEvent,
    ) -> Result<Self, DeployError> {
        let mut guard = fsm.lock().unwrap_or_else(|e| e.into_inner());
        if !guard.is_idle() {
            return Err(DeployError::ConcurrentDeployment(format!(
                "{} (state: {})",
                host,
                guard.state()
            )));
        }

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)?;
        FileExt::try_lock_exclusive(&lock_file).map_err(|_| {
            DeployError::ConcurrentDeployment(format!("{} (locked by another process)", host))
        })?;

        guard.process(event)?;

        Ok(Self {
            fsm: fsm.clone(),
            lock_file: Some(lock_file),
        })
    }

    /// Apply a transition to the host FSM
    pub fn transition(&self, event: DeploymentEvent) -> Result<DeploymentState, DeployError> {
        let mut guard = self.fsm.lock().unwrap_or_else(|e| e.into_inner());
        guard.process(event)
    }

    pub fn state(&self) -> DeploymentState {
        self.fsm.lock().unwrap_or_else(|e| e.into_inner()).state()
    }
}

impl Drop for HostToken {
    fn drop(&mut self) {
        let mut guard = self.fsm.lock().unwrap_or_else(|e| e.into_inner());
        let state = guard.state();
        if state != DeploymentState::Idle {
            if !state.is_terminal() {
                warn!("Deployment token released while {}", state);
            }
            guard.force_idle();
        }
        drop(guard);

        if let Some(file) = self.lock_file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!("Failed to release deploy lock: {}", e);
            }
        }
    }
}
