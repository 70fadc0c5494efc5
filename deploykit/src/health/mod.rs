//! Post-deploy health verification
//!
//! The probe verdict is the only input to the commit/rollback decision.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;

use crate::models::health::HealthReport;

pub use http::HttpHealthVerifier;

/// Health check trait
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Probe `endpoint` up to `attempts` times, each bounded by `timeout`
    async fn probe(&self, endpoint: &str, timeout: Duration, attempts: u32) -> HealthReport;
}
