//! Deployment pipeline

pub mod attempt;
pub mod build;
pub mod fsm;
pub mod lock;
pub mod orchestrator;
pub mod remote;

pub use build::{Builder, CommandBuilder, PrebuiltBuilder};
pub use fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};
pub use orchestrator::{Orchestrator, OrchestratorOptions};
pub use remote::{RemoteAgent, RemoteDeployer, SshAgent};
