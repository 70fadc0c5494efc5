//! Process supervisor adapter
//!
//! `reload()` replaces workers one at a time: each old worker keeps serving
//! until its replacement accepts connections, so capacity never drops below
//! N-1 and no in-flight request is dropped. `restart()` stops then starts all
//! workers and is reserved for manual recovery.

pub mod pm2;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::DeployError;

pub use pm2::Pm2Supervisor;

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Starting,
    Online,
    Errored,
    Stopped,
}

/// One worker process of the supervised application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub id: u32,
    pub name: String,
    pub pid: Option<u32>,
    pub state: WorkerState,
}

/// Supervisor trait
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Zero-downtime rolling reload onto the current live release
    async fn reload(&self) -> Result<(), DeployError>;

    /// Stop then start every worker
    async fn restart(&self) -> Result<(), DeployError>;

    /// Stop every worker
    async fn stop(&self) -> Result<(), DeployError>;

    /// Per-worker state
    async fn status(&self) -> Result<Vec<WorkerStatus>, DeployError>;
}

/// Poll `status()` until at least `expected` workers exist and all are online
pub async fn wait_until_online<S: Supervisor + ?Sized>(
    supervisor: &S,
    expected: usize,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Vec<WorkerStatus>, DeployError> {
    let poll = async {
        loop {
            let workers = supervisor.status().await?;
            let online = workers
                .iter()
                .filter(|w| w.state == WorkerState::Online)
                .count();
            debug!("{}/{} workers online", online, workers.len());

            if !workers.is_empty() && online == workers.len() && online >= expected {
                return Ok::<_, DeployError>(workers);
            }
            tokio::time::sleep(poll_interval).await;
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(result) => result,
        Err(_) => {
            let last = supervisor.status().await.unwrap_or_default();
            let pending: Vec<String> = last
                .iter()
                .filter(|w| w.state != WorkerState::Online)
                .map(|w| format!("{}#{}={:?}", w.name, w.id, w.state))
                .collect();
            Err(DeployError::Supervisor(format!(
                "Workers not online within {:?}: [{}]",
                timeout,
                pending.join(", ")
            )))
        }
    }
}
