//! Health check models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of a single probe request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// HTTP status code, if a response arrived
    pub status: Option<u16>,

    /// The request exceeded its timeout
    pub timed_out: bool,

    /// Connection-level error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Request latency in milliseconds
    pub latency_ms: u64,

    /// When the request was issued
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(code) if (200..300).contains(&code))
    }
}

/// Why the service was judged unhealthy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum HealthFailure {
    /// Last response carried a non-success status
    Status(u16),

    /// Last request timed out
    Timeout,

    /// Last request could not connect
    Connection(String),
}

impl std::fmt::Display for HealthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthFailure::Status(code) => write!(f, "status {}", code),
            HealthFailure::Timeout => write!(f, "timeout"),
            HealthFailure::Connection(err) => write!(f, "connection error: {}", err),
        }
    }
}

/// Verdict of a probe run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthVerdict {
    Healthy,
    Unhealthy(HealthFailure),
}

/// Outcome of `probe()`: the verdict plus every individual attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub verdict: HealthVerdict,
    pub results: Vec<HealthCheckResult>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.verdict == HealthVerdict::Healthy
    }
}
