//! Deployment attempt models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentState;
use crate::models::artifact::Release;
use crate::models::health::HealthReport;

/// User-visible terminal outcome of an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// New release is live and healthy
    Committed,

    /// Failed before the live deployment changed; nothing to roll back
    Aborted,

    /// Reverted to the last known-good backup, which verified healthy
    RolledBack,

    /// Rollback itself failed; an operator has to step in
    ManualInterventionRequired,
}

/// Exit code for a request that never started an attempt
pub const EXIT_REFUSED: i32 = 4;

impl Outcome {
    /// Process exit code reported by the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Committed => 0,
            Outcome::Aborted => 1,
            Outcome::RolledBack => 2,
            Outcome::ManualInterventionRequired => 3,
        }
    }

    /// Inverse of `exit_code`
    pub fn from_exit_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Outcome::Committed),
            1 => Some(Outcome::Aborted),
            2 => Some(Outcome::RolledBack),
            3 => Some(Outcome::ManualInterventionRequired),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Outcome::Committed => "committed",
            Outcome::Aborted => "aborted",
            Outcome::RolledBack => "rolled back",
            Outcome::ManualInterventionRequired => "failed, manual intervention required",
        };
        f.write_str(label)
    }
}

/// Timing and result of one pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: DeploymentState,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub ok: bool,
    /// `DeployError::kind` of the failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One deploy (or manual restore) on a host, from start to terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    /// Unique attempt ID
    pub id: String,

    /// Host label the attempt ran against
    pub host: String,

    /// Requested version
    pub version: String,

    /// Artifact reference, once built
    pub artifact: Option<Release>,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Last state reached
    pub state: DeploymentState,

    /// Terminal outcome, once finished
    pub outcome: Option<Outcome>,

    /// Backup taken (deploy) or restored (rollback)
    pub backup_seq: Option<u64>,

    /// First error that diverted the attempt from the happy path
    pub error: Option<String>,

    /// Per-stage timing log
    pub stages: Vec<StageRecord>,

    /// Health probe runs, in order (deploy verification, then re-verification)
    #[serde(default)]
    pub health: Vec<HealthReport>,
}

impl DeploymentAttempt {
    pub fn new(id: String, host: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            version: version.into(),
            artifact: None,
            started_at: Utc::now(),
            finished_at: None,
            state: DeploymentState::Idle,
            outcome: None,
            backup_seq: None,
            error: None,
            stages: Vec::new(),
            health: Vec::new(),
        }
    }

    /// Outcome, treating an unfinished attempt as needing attention
    pub fn final_outcome(&self) -> Outcome {
        self.outcome.unwrap_or(Outcome::ManualInterventionRequired)
    }

    /// Total wall time across all recorded stages
    pub fn total_duration_ms(&self) -> u64 {
        self.stages.iter().map(|s| s.duration_ms).sum()
    }
}
