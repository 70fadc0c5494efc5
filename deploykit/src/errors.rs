//! Error types for deploykit

use thiserror::Error;

/// Main error type for a deployment attempt and its collaborators
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Build error: {0}")]
    Build(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("Health check failure: {0}")]
    HealthCheckFailure(String),

    #[error("Restore error: {0}")]
    Restore(String),

    #[error("Another deployment is already in progress on {0}")]
    ConcurrentDeployment(String),

    #[error("Deployment cancelled during {0}")]
    Cancelled(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Short machine-readable kind, used in the stage log
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::Build(_) => "build",
            DeployError::Transport(_) => "transport",
            DeployError::Supervisor(_) => "supervisor",
            DeployError::HealthCheckFailure(_) => "health_check",
            DeployError::Restore(_) => "restore",
            DeployError::ConcurrentDeployment(_) => "concurrent_deployment",
            DeployError::Cancelled(_) => "cancelled",
            DeployError::InvalidTransition(_) => "invalid_transition",
            DeployError::Config(_) => "config",
            DeployError::Io(_) => "io",
            DeployError::Json(_) => "json",
            DeployError::Http(_) => "http",
            DeployError::Internal(_) => "internal",
        }
    }
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_the_failure() {
        assert_eq!(DeployError::Build("x".into()).kind(), "build");
        assert_eq!(DeployError::Cancelled("building".into()).kind(), "cancelled");
        assert_eq!(DeployError::HealthCheckFailure("503".into()).kind(), "health_check");
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(DeployError::from(io).kind(), "io");
    }
}
