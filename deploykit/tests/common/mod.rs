//! Shared fakes for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use deploykit::backup::BackupManager;
use deploykit::deploy::orchestrator::{Orchestrator, OrchestratorOptions};
use deploykit::errors::DeployError;
use deploykit::filesys::dir::Dir;
use deploykit::health::HealthCheck;
use deploykit::models::artifact::Artifact;
use deploykit::models::health::{HealthCheckResult, HealthFailure, HealthReport, HealthVerdict};
use deploykit::storage::layout::DeployLayout;
use deploykit::storage::settings::HostSettings;
use deploykit::storage::tree::DeployTree;
use deploykit::supervisor::{Supervisor, WorkerState, WorkerStatus};
use deploykit::transport::{LocalTransport, Transport};

/// Supervisor that records reloads
#[derive(Default)]
pub struct FakeSupervisor {
    pub reloads: AtomicUsize,
    pub fail_reload: AtomicBool,
}

#[async_trait]
impl Supervisor for FakeSupervisor {
    async fn reload(&self) -> Result<(), DeployError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(DeployError::Supervisor("workers did not come online".to_string()));
        }
        Ok(())
    }

    async fn restart(&self) -> Result<(), DeployError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), DeployError> {
        Ok(())
    }

    async fn status(&self) -> Result<Vec<WorkerStatus>, DeployError> {
        Ok(vec![WorkerStatus {
            id: 0,
            name: "app".to_string(),
            pid: Some(4242),
            state: WorkerState::Online,
        }])
    }
}

/// Health check answering from a script of verdicts, healthy once exhausted
#[derive(Default)]
pub struct ScriptedHealth {
    script: Mutex<VecDeque<bool>>,
    pub probes: AtomicUsize,
    pub requests: AtomicUsize,
}

impl ScriptedHealth {
    /// Queue the verdicts of the next probe runs
    pub fn push(&self, verdicts: &[bool]) {
        self.script.lock().unwrap().extend(verdicts.iter().copied());
    }
}

#[async_trait]
impl HealthCheck for ScriptedHealth {
    async fn probe(&self, _endpoint: &str, _timeout: Duration, attempts: u32) -> HealthReport {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let healthy = self.script.lock().unwrap().pop_front().unwrap_or(true);

        let count = if healthy { 1 } else { attempts.max(1) };
        self.requests.fetch_add(count as usize, Ordering::SeqCst);
        let status = if healthy { 200 } else { 503 };
        let results = (0..count)
            .map(|_| HealthCheckResult {
                status: Some(status),
                timed_out: false,
                error: None,
                latency_ms: 1,
                checked_at: Utc::now(),
            })
            .collect();

        let verdict = if healthy {
            HealthVerdict::Healthy
        } else {
            HealthVerdict::Unhealthy(HealthFailure::Status(503))
        };
        HealthReport { verdict, results }
    }
}

/// Transport that always fails
pub struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn send(&self, _artifact: &Artifact, _host: &HostSettings) -> Result<Dir, DeployError> {
        Err(DeployError::Transport("connection refused".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Local transport that fails for listed versions and can be held open
pub struct ControlledTransport {
    inner: LocalTransport,
    fail_versions: Mutex<Vec<String>>,
    pub gate: Notify,
    pub entered: Notify,
    hold: AtomicBool,
}

impl ControlledTransport {
    pub fn new(layout: DeployLayout) -> Self {
        Self {
            inner: LocalTransport::new(layout),
            fail_versions: Mutex::new(Vec::new()),
            gate: Notify::new(),
            entered: Notify::new(),
            hold: AtomicBool::new(false),
        }
    }

    pub fn fail_version(&self, version: &str) {
        self.fail_versions.lock().unwrap().push(version.to_string());
    }

    /// Make the next sends wait for `gate`
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ControlledTransport {
    async fn send(&self, artifact: &Artifact, host: &HostSettings) -> Result<Dir, DeployError> {
        if self.hold.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        if self.fail_versions.lock().unwrap().iter().any(|v| v == artifact.version()) {
            return Err(DeployError::Transport(format!(
                "transfer of {} interrupted",
                artifact.version()
            )));
        }
        self.inner.send(artifact, host).await
    }

    fn name(&self) -> &str {
        "controlled"
    }
}

/// Transport that reports a staging path outside the local tree, as a push
/// to another machine does
pub struct ElsewhereTransport;

#[async_trait]
impl Transport for ElsewhereTransport {
    async fn send(&self, artifact: &Artifact, _host: &HostSettings) -> Result<Dir, DeployError> {
        Ok(Dir::new("/nonexistent/deploykit/staging").subdir(artifact.version()))
    }

    fn name(&self) -> &str {
        "elsewhere"
    }
}

/// An orchestrator over a temporary deploy root
pub struct Harness {
    pub tmp: tempfile::TempDir,
    pub tree: Arc<DeployTree>,
    pub backups: Arc<BackupManager>,
    pub transport: Arc<ControlledTransport>,
    pub supervisor: Arc<FakeSupervisor>,
    pub health: Arc<ScriptedHealth>,
    pub options: OrchestratorOptions,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub async fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DeployLayout::new(tmp.path().join("root"));
        let tree = Arc::new(DeployTree::new(layout.clone()));
        tree.prepare().await.unwrap();

        let backups = Arc::new(BackupManager::new(tree.clone(), 5));
        let transport = Arc::new(ControlledTransport::new(layout));
        let supervisor = Arc::new(FakeSupervisor::default());
        let health = Arc::new(ScriptedHealth::default());

        let options = OrchestratorOptions {
            health_endpoint: "http://127.0.0.1:3000/health".to_string(),
            health_timeout: Duration::from_millis(100),
            health_attempts: 3,
            transport_timeout: Duration::from_secs(10),
            attempt_history: 50,
        };
        let orchestrator = Orchestrator::new(
            HostSettings::default(),
            options.clone(),
            tree.clone(),
            backups.clone(),
            transport.clone(),
            supervisor.clone(),
            health.clone(),
        );

        Self {
            tmp,
            tree,
            backups,
            transport,
            supervisor,
            health,
            options,
            orchestrator,
        }
    }

    /// Another orchestrator over the same tree and fakes
    pub fn orchestrator_with(
        &self,
        host: HostSettings,
        options: OrchestratorOptions,
        transport: Arc<dyn Transport>,
    ) -> Orchestrator {
        Orchestrator::new(
            host,
            options,
            self.tree.clone(),
            self.backups.clone(),
            transport,
            self.supervisor.clone(),
            self.health.clone(),
        )
    }

    /// Write a build output for `version` and package it
    pub async fn artifact(&self, version: &str) -> Artifact {
        let dir = self.tmp.path().join("builds").join(version);
        write_build(&dir, version);
        Artifact::from_dir(version, dir).await.unwrap()
    }
}

/// Lay out a small app build tagged with `version`
pub fn write_build(dir: &Path, version: &str) {
    std::fs::create_dir_all(dir.join("public")).unwrap();
    std::fs::write(dir.join("server.js"), format!("console.log('{}');\n", version)).unwrap();
    std::fs::write(dir.join("VERSION"), version).unwrap();
    std::fs::write(dir.join("public/index.html"), format!("<h1>{}</h1>", version)).unwrap();
}
