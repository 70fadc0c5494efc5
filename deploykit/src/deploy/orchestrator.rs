//! Deployment orchestrator
//!
//! Drives one host through build, transfer, backup, deploy and verification,
//! and decides between commit and rollback from the health verdict alone.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::backup::BackupManager;
use crate::deploy::attempt::{AttemptRecorder, StageTimer};
use crate::deploy::build::{Builder, PrebuiltBuilder};
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};
use crate::deploy::lock::HostToken;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::health::HealthCheck;
use crate::models::artifact::Artifact;
use crate::models::deployment::{DeploymentAttempt, Outcome};
use crate::models::health::{HealthReport, HealthVerdict};
use crate::storage::history::AttemptHistory;
use crate::storage::settings::{HostSettings, Settings};
use crate::storage::tree::DeployTree;
use crate::supervisor::Supervisor;
use crate::transport::Transport;
use crate::utils::generate_uuid;

/// Per-call knobs of the pipeline
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub health_endpoint: String,
    pub health_timeout: Duration,
    pub health_attempts: u32,
    pub transport_timeout: Duration,
    pub attempt_history: usize,
}

impl OrchestratorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            health_endpoint: settings.health.endpoint.clone(),
            health_timeout: settings.health.timeout(),
            health_attempts: settings.health.attempts,
            transport_timeout: settings.transport.timeout(),
            attempt_history: settings.backups.attempt_history,
        }
    }
}

/// Deployment orchestrator for one host
///
/// Clones share the same FSM, so at most one attempt runs per host no matter
/// how many handles exist.
#[derive(Clone)]
pub struct Orchestrator {
    host: HostSettings,
    options: OrchestratorOptions,
    tree: Arc<DeployTree>,
    backups: Arc<BackupManager>,
    transport: Arc<dyn Transport>,
    supervisor: Arc<dyn Supervisor>,
    health: Arc<dyn HealthCheck>,
    history: Arc<AttemptHistory>,
    fsm: Arc<Mutex<DeploymentFsm>>,
}

impl Orchestrator {
    pub fn new(
        host: HostSettings,
        options: OrchestratorOptions,
        tree: Arc<DeployTree>,
        backups: Arc<BackupManager>,
        transport: Arc<dyn Transport>,
        supervisor: Arc<dyn Supervisor>,
        health: Arc<dyn HealthCheck>,
    ) -> Self {
        let history = AttemptHistory::new(tree.layout().attempts_dir(), options.attempt_history);
        Self {
            host,
            options,
            tree,
            backups,
            transport,
            supervisor,
            health,
            history: Arc::new(history),
            fsm: Arc::new(Mutex::new(DeploymentFsm::new())),
        }
    }

    /// Current FSM state of the host
    pub fn state(&self) -> DeploymentState {
        self.fsm.lock().unwrap_or_else(|e| e.into_inner()).state()
    }

    pub fn host(&self) -> &HostSettings {
        &self.host
    }

    pub fn tree(&self) -> &Arc<DeployTree> {
        &self.tree
    }

    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    pub fn supervisor(&self) -> &Arc<dyn Supervisor> {
        &self.supervisor
    }

    /// Finished attempts kept on disk
    pub fn history(&self) -> &Arc<AttemptHistory> {
        &self.history
    }

    /// Deploy an already-built artifact
    pub async fn deploy(&self, artifact: Artifact) -> Result<DeploymentAttempt, DeployError> {
        self.deploy_build(&PrebuiltBuilder::new(artifact)).await
    }

    /// Build with `builder`, then deploy the result
    pub async fn deploy_build(&self, builder: &dyn Builder) -> Result<DeploymentAttempt, DeployError> {
        self.deploy_with_cancel(builder, std::future::pending()).await
    }

    /// Deploy, aborting if `cancel` resolves before the backup stage starts
    ///
    /// Returns `Err` only when the attempt could not start (another attempt
    /// holds the host). Every started attempt returns its record with a
    /// terminal outcome.
    pub async fn deploy_with_cancel<C>(
        &self,
        builder: &dyn Builder,
        cancel: C,
    ) -> Result<DeploymentAttempt, DeployError>
    where
        C: Future<Output = ()> + Send,
    {
        let token = self.acquire(DeploymentEvent::Deploy)?;
        let attempt = DeploymentAttempt::new(generate_uuid(), self.host.address.clone(), builder.version());
        let mut run = AttemptRecorder::new(token, attempt);
        info!(
            "Deployment {} started: {} -> {}",
            run.attempt.id, run.attempt.version, self.host.address
        );

        tokio::pin!(cancel);
        let (artifact, staged) = match self.stage(&mut run, builder, cancel.as_mut()).await {
            Ok(prepared) => prepared,
            Err(e) => return Ok(self.abort(run, e).await),
        };

        // From BackingUp on the attempt runs to a terminal state even if the
        // caller goes away
        let this = self.clone();
        tokio::spawn(async move { this.apply(run, artifact, staged).await })
            .await
            .map_err(|e| DeployError::Internal(format!("Deployment task failed: {}", e)))
    }

    /// Restore backup `seq` into live, reload and verify
    pub async fn manual_restore(&self, seq: u64) -> Result<DeploymentAttempt, DeployError> {
        self.ensure_local()?;
        if !self.backups.list().await?.iter().any(|b| b.seq == seq) {
            return Err(DeployError::Restore(format!("Backup {} does not exist", seq)));
        }
        let token = self.acquire(DeploymentEvent::ManualRestore)?;
        let attempt = DeploymentAttempt::new(
            generate_uuid(),
            self.host.address.clone(),
            format!("restore-{}", seq),
        );
        let mut run = AttemptRecorder::new(token, attempt);
        info!("Manual restore {} started: backup {}", run.attempt.id, seq);

        let this = self.clone();
        tokio::spawn(async move {
            let outcome = match this.roll_back(&mut run, Some(seq)).await {
                Ok(outcome) => outcome,
                Err(e) => this.interrupted(&mut run, e),
            };
            this.finish(run, outcome).await
        })
        .await
        .map_err(|e| DeployError::Internal(format!("Restore task failed: {}", e)))
    }

    /// Backups, install and pm2 act on this machine
    fn ensure_local(&self) -> Result<(), DeployError> {
        if self.host.is_local() {
            return Ok(());
        }
        Err(DeployError::Config(format!(
            "{} is not this host; deploy it with RemoteDeployer or run deploykit there",
            self.host.destination()
        )))
    }

    fn acquire(&self, event: DeploymentEvent) -> Result<HostToken, DeployError> {
        self.ensure_local()?;
        let lock_file = self.tree.layout().lock_file();
        HostToken::acquire(&self.host.address, &self.fsm, lock_file.path(), event)
    }

    /// Building, Packaged and Transferring: nothing live has changed yet
    async fn stage<C>(
        &self,
        run: &mut AttemptRecorder,
        builder: &dyn Builder,
        mut cancel: Pin<&mut C>,
    ) -> Result<(Artifact, Dir), DeployError>
    where
        C: Future<Output = ()> + Send,
    {
        let artifact = run
            .timed(
                DeploymentState::Building,
                cancellable(cancel.as_mut(), DeploymentState::Building, builder.build()),
            )
            .await?;
        if artifact.version() != run.attempt.version {
            warn!(
                "Builder produced {} for requested version {}",
                artifact.version(),
                run.attempt.version
            );
        }
        run.attempt.artifact = Some(artifact.release());
        run.advance(DeploymentEvent::Built)?;

        run.timed(
            DeploymentState::Packaged,
            cancellable(cancel.as_mut(), DeploymentState::Packaged, artifact.verify()),
        )
        .await?;
        run.advance(DeploymentEvent::Packaged)?;

        let timeout = self.options.transport_timeout;
        let transfer = async {
            let staged = tokio::time::timeout(timeout, self.transport.send(&artifact, &self.host))
                .await
                .map_err(|_| {
                    DeployError::Transport(format!(
                        "{} transfer timed out after {:?}",
                        self.transport.name(),
                        timeout
                    ))
                })??;
            // Install reads the staged copy from this host's tree
            if !staged.exists().await {
                return Err(DeployError::Transport(format!(
                    "{} transport left {} at {:?}, which is not on this host",
                    self.transport.name(),
                    artifact.version(),
                    staged.path()
                )));
            }
            Ok(staged)
        };
        let staged = run
            .timed(
                DeploymentState::Transferring,
                cancellable(cancel.as_mut(), DeploymentState::Transferring, transfer),
            )
            .await?;
        run.advance(DeploymentEvent::Transferred)?;

        Ok((artifact, staged))
    }

    async fn abort(&self, mut run: AttemptRecorder, err: DeployError) -> DeploymentAttempt {
        warn!("Deployment {} aborted: {}", run.attempt.id, err);
        run.fail(&err);
        let event = match &err {
            DeployError::Cancelled(_) => DeploymentEvent::Cancel,
            _ => DeploymentEvent::Failed(err.to_string()),
        };
        if let Err(e) = run.advance(event) {
            error!("Deployment {}: {}", run.attempt.id, e);
        }
        self.finish(run, Outcome::Aborted).await
    }

    /// BackingUp through the terminal state
    async fn apply(self, mut run: AttemptRecorder, artifact: Artifact, staged: Dir) -> DeploymentAttempt {
        let outcome = match self.go_live(&mut run, &artifact, &staged).await {
            Ok(outcome) => outcome,
            Err(e) => self.interrupted(&mut run, e),
        };
        self.finish(run, outcome).await
    }

    async fn go_live(
        &self,
        run: &mut AttemptRecorder,
        artifact: &Artifact,
        staged: &Dir,
    ) -> Result<Outcome, DeployError> {
        match run.timed(DeploymentState::BackingUp, self.backups.create()).await {
            Ok(backup) => {
                info!("Backup {} taken before deploying {}", backup.seq, artifact.version());
                run.attempt.backup_seq = Some(backup.seq);
                run.advance(DeploymentEvent::BackedUp)?;
            }
            Err(e) => {
                warn!("Deployment {} aborted, backup failed: {}", run.attempt.id, e);
                run.fail(&e);
                run.advance(DeploymentEvent::Failed(e.to_string()))?;
                return Ok(Outcome::Aborted);
            }
        }

        let release = artifact.release();
        let deployed = run
            .timed(DeploymentState::Deploying, async {
                self.tree.install(staged, &release).await?;
                self.supervisor.reload().await
            })
            .await;
        if let Err(e) = deployed {
            error!("Deploying {} failed: {}", artifact.version(), e);
            run.fail(&e);
            run.advance(DeploymentEvent::DeployFailed(e.to_string()))?;
            return self.roll_back(run, None).await;
        }
        run.advance(DeploymentEvent::Reloaded)?;

        let timer = StageTimer::start();
        let report = self.probe().await;
        let failure = unhealthy(&report);
        run.attempt.health.push(report);
        run.record(DeploymentState::Verifying, timer, failure.as_ref());

        match failure {
            None => {
                run.advance(DeploymentEvent::Healthy)?;
                info!("{} committed on {}", artifact.version(), self.host.address);
                Ok(Outcome::Committed)
            }
            Some(e) => {
                warn!("{} failed verification: {}", artifact.version(), e);
                run.fail(&e);
                run.advance(DeploymentEvent::Unhealthy(e.to_string()))?;
                self.roll_back(run, None).await
            }
        }
    }

    /// RollingBack to `seq`, or to the newest backup when `None`
    async fn roll_back(
        &self,
        run: &mut AttemptRecorder,
        seq: Option<u64>,
    ) -> Result<Outcome, DeployError> {
        let timer = StageTimer::start();
        let result = self.restore_and_verify(run, seq).await;
        run.record(DeploymentState::RollingBack, timer, result.as_ref().err());

        match result {
            Ok(seq) => {
                run.attempt.backup_seq = Some(seq);
                run.advance(DeploymentEvent::Restored)?;
                info!("Rolled back {} to backup {}", self.host.address, seq);
                Ok(Outcome::RolledBack)
            }
            Err(e) => {
                run.fail(&e);
                run.advance(DeploymentEvent::RollbackFailed(e.to_string()))?;
                error!(
                    "Rollback on {} failed, manual intervention required: {}",
                    self.host.address, e
                );
                Ok(Outcome::ManualInterventionRequired)
            }
        }
    }

    async fn restore_and_verify(
        &self,
        run: &mut AttemptRecorder,
        seq: Option<u64>,
    ) -> Result<u64, DeployError> {
        let seq = match seq {
            Some(seq) => seq,
            None => self
                .backups
                .latest_seq()
                .await?
                .ok_or_else(|| DeployError::Restore("No backup to restore".to_string()))?,
        };

        self.backups.restore(seq).await?;
        self.supervisor.reload().await?;

        let report = self.probe().await;
        let failure = unhealthy(&report);
        run.attempt.health.push(report);
        match failure {
            None => Ok(seq),
            Some(e) => Err(e),
        }
    }

    async fn probe(&self) -> HealthReport {
        self.health
            .probe(
                &self.options.health_endpoint,
                self.options.health_timeout,
                self.options.health_attempts,
            )
            .await
    }

    /// An FSM or bookkeeping error after live was touched
    fn interrupted(&self, run: &mut AttemptRecorder, err: DeployError) -> Outcome {
        error!(
            "Deployment {} interrupted in {}, manual intervention required: {}",
            run.attempt.id, run.attempt.state, err
        );
        run.fail(&err);
        Outcome::ManualInterventionRequired
    }

    async fn finish(&self, run: AttemptRecorder, outcome: Outcome) -> DeploymentAttempt {
        let AttemptRecorder { token, mut attempt } = run;
        attempt.outcome = Some(outcome);
        attempt.finished_at = Some(chrono::Utc::now());

        for stage in &attempt.stages {
            info!(
                "  {:<12} {:>8}ms {}",
                stage.stage.to_string(),
                stage.duration_ms,
                stage.error.as_deref().unwrap_or("ok")
            );
        }

        if let Err(e) = self.history.record(&attempt).await {
            warn!("Failed to persist attempt {}: {}", attempt.id, e);
        }
        if attempt.artifact.is_some() {
            let staged = self.tree.layout().staged_artifact_dir(&attempt.version);
            if let Err(e) = staged.delete().await {
                warn!("Failed to clean staging for {}: {}", attempt.version, e);
            }
        }

        match outcome {
            Outcome::ManualInterventionRequired => error!(
                "Deployment {} of {}: {} ({}ms)",
                attempt.id,
                attempt.version,
                outcome,
                attempt.total_duration_ms()
            ),
            _ => info!(
                "Deployment {} of {}: {} ({}ms)",
                attempt.id,
                attempt.version,
                outcome,
                attempt.total_duration_ms()
            ),
        }

        if let Err(e) = token.transition(DeploymentEvent::Reset) {
            warn!("Deployment {}: {}", attempt.id, e);
        }
        drop(token);
        attempt
    }
}

async fn cancellable<C, F, T>(
    cancel: Pin<&mut C>,
    stage: DeploymentState,
    fut: F,
) -> Result<T, DeployError>
where
    C: Future<Output = ()>,
    F: Future<Output = Result<T, DeployError>>,
{
    tokio::select! {
        biased;
        _ = cancel => Err(DeployError::Cancelled(stage.to_string())),
        result = fut => result,
    }
}

fn unhealthy(report: &HealthReport) -> Option<DeployError> {
    match &report.verdict {
        HealthVerdict::Healthy => None,
        HealthVerdict::Unhealthy(failure) => Some(DeployError::HealthCheckFailure(format!(
            "{} after {} attempt(s)",
            failure,
            report.results.len()
        ))),
    }
}
