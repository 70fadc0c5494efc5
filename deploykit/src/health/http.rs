//! HTTP health verifier

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::health::HealthCheck;
use crate::models::health::{HealthCheckResult, HealthFailure, HealthReport, HealthVerdict};

/// Issues `GET endpoint` and expects a 2xx, retrying with a fixed backoff
pub struct HttpHealthVerifier {
    client: Client,
    backoff: Duration,
}

impl HttpHealthVerifier {
    /// Create a new verifier
    pub fn new(backoff: Duration) -> Result<Self, DeployError> {
        let client = Client::builder().build()?;
        Ok(Self { client, backoff })
    }

    async fn attempt(&self, endpoint: &str, timeout: Duration) -> HealthCheckResult {
        let checked_at = Utc::now();
        let started = Instant::now();
        let response = self.client.get(endpoint).timeout(timeout).send().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match response {
            Ok(response) => HealthCheckResult {
                status: Some(response.status().as_u16()),
                timed_out: false,
                error: None,
                latency_ms,
                checked_at,
            },
            Err(e) => HealthCheckResult {
                status: None,
                timed_out: e.is_timeout(),
                error: Some(e.to_string()),
                latency_ms,
                checked_at,
            },
        }
    }
}

#[async_trait]
impl HealthCheck for HttpHealthVerifier {
    async fn probe(&self, endpoint: &str, timeout: Duration, attempts: u32) -> HealthReport {
        let attempts = attempts.max(1);
        let mut results = Vec::with_capacity(attempts as usize);

        for attempt in 1..=attempts {
            let result = self.attempt(endpoint, timeout).await;
            debug!(
                "Health probe {}/{} {}: status={:?} timed_out={} latency={}ms",
                attempt, attempts, endpoint, result.status, result.timed_out, result.latency_ms
            );
            let success = result.is_success();
            results.push(result);

            if success {
                return HealthReport {
                    verdict: HealthVerdict::Healthy,
                    results,
                };
            }
            if attempt < attempts {
                tokio::time::sleep(self.backoff).await;
            }
        }

        let verdict = HealthVerdict::Unhealthy(last_failure(&results));
        warn!("{} unhealthy after {} attempts: {:?}", endpoint, attempts, verdict);
        HealthReport { verdict, results }
    }
}

fn last_failure(results: &[HealthCheckResult]) -> HealthFailure {
    match results.last() {
        Some(HealthCheckResult {
            status: Some(code), ..
        }) => HealthFailure::Status(*code),
        Some(HealthCheckResult { timed_out: true, .. }) => HealthFailure::Timeout,
        Some(HealthCheckResult {
            error: Some(err), ..
        }) => HealthFailure::Connection(err.clone()),
        _ => HealthFailure::Connection("no response".to_string()),
    }
}
