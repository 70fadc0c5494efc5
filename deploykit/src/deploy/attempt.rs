//! Bookkeeping for a running attempt

use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::deploy::fsm::{DeploymentEvent, DeploymentState};
use crate::deploy::lock::HostToken;
use crate::errors::DeployError;
use crate::models::deployment::{DeploymentAttempt, StageRecord};

/// Start time of a stage
pub(crate) struct StageTimer {
    started_at: DateTime<Utc>,
    start: Instant,
}

impl StageTimer {
    pub(crate) fn start() -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }
}

/// A running attempt: the host token plus its record
pub(crate) struct AttemptRecorder {
    pub(crate) token: HostToken,
    pub(crate) attempt: DeploymentAttempt,
}

impl AttemptRecorder {
    pub(crate) fn new(token: HostToken, attempt: DeploymentAttempt) -> Self {
        let mut recorder = Self { token, attempt };
        recorder.attempt.state = recorder.token.state();
        recorder
    }

    /// Apply a transition and mirror the new state into the record
    pub(crate) fn advance(&mut self, event: DeploymentEvent) -> Result<(), DeployError> {
        self.attempt.state = self.token.transition(event)?;
        Ok(())
    }

    /// Keep the first error that diverted the attempt
    pub(crate) fn fail(&mut self, err: &DeployError) {
        if self.attempt.error.is_none() {
            self.attempt.error = Some(err.to_string());
        }
    }

    pub(crate) fn record(
        &mut self,
        stage: DeploymentState,
        timer: StageTimer,
        error: Option<&DeployError>,
    ) {
        self.attempt.stages.push(StageRecord {
            stage,
            started_at: timer.started_at,
            duration_ms: timer.start.elapsed().as_millis() as u64,
            ok: error.is_none(),
            kind: error.map(|e| e.kind().to_string()),
            error: error.map(|e| e.to_string()),
        });
    }

    /// Run `fut` as `stage`, appending its timing to the stage log
    pub(crate) async fn timed<T, F>(&mut self, stage: DeploymentState, fut: F) -> Result<T, DeployError>
    where
        F: Future<Output = Result<T, DeployError>>,
    {
        let timer = StageTimer::start();
        let result = fut.await;
        self.record(stage, timer, result.as_ref().err());
        result
    }
}
