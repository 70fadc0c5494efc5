//! FSM tests

use deploykit::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};
use deploykit::errors::DeployError;
use tokio_test::{assert_err, assert_ok};

fn fsm_in_verifying() -> DeploymentFsm {
    let mut fsm = DeploymentFsm::new();
    for event in [
        DeploymentEvent::Deploy,
        DeploymentEvent::Built,
        DeploymentEvent::Packaged,
        DeploymentEvent::Transferred,
        DeploymentEvent::BackedUp,
        DeploymentEvent::Reloaded,
    ] {
        fsm.process(event).unwrap();
    }
    fsm
}

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), DeploymentState::Idle);
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_unhealthy_flow() {
    let mut fsm = fsm_in_verifying();
    assert_eq!(fsm.state(), DeploymentState::Verifying);

    // Verifying -> RollingBack
    fsm.process(DeploymentEvent::Unhealthy("status 503".to_string())).unwrap();
    assert_eq!(fsm.state(), DeploymentState::RollingBack);
    assert_eq!(fsm.error(), Some("status 503"));

    // RollingBack -> RolledBack -> Idle
    fsm.process(DeploymentEvent::Restored).unwrap();
    assert_eq!(fsm.state(), DeploymentState::RolledBack);
    fsm.process(DeploymentEvent::Reset).unwrap();
    assert_eq!(fsm.state(), DeploymentState::Idle);
}

#[test]
fn test_fsm_rollback_failure_is_incident() {
    let mut fsm = fsm_in_verifying();
    fsm.process(DeploymentEvent::Unhealthy("timeout".to_string())).unwrap();
    fsm.process(DeploymentEvent::RollbackFailed("still 503".to_string())).unwrap();

    assert_eq!(fsm.state(), DeploymentState::Incident);
    assert!(fsm.state().is_terminal());
    assert_eq!(fsm.error(), Some("still 503"));
}

#[test]
fn test_fsm_pre_live_failures_abort() {
    for steps in 0..4 {
        let mut fsm = DeploymentFsm::new();
        let events = [
            DeploymentEvent::Deploy,
            DeploymentEvent::Built,
            DeploymentEvent::Packaged,
            DeploymentEvent::Transferred,
        ];
        for event in events.into_iter().take(steps + 1) {
            fsm.process(event).unwrap();
        }
        fsm.process(DeploymentEvent::Failed("boom".to_string())).unwrap();
        assert_eq!(fsm.state(), DeploymentState::Aborted);
    }
}

#[test]
fn test_fsm_cancel_only_before_backup() {
    let mut fsm = DeploymentFsm::new();
    fsm.process(DeploymentEvent::Deploy).unwrap();
    fsm.process(DeploymentEvent::Built).unwrap();
    assert!(fsm.state().is_cancellable());
    fsm.process(DeploymentEvent::Cancel).unwrap();
    assert_eq!(fsm.state(), DeploymentState::Aborted);

    let mut fsm = fsm_in_verifying();
    assert!(!fsm.state().is_cancellable());
    let result = fsm.process(DeploymentEvent::Cancel);
    assert!(matches!(result, Err(DeployError::InvalidTransition(_))));
    assert_eq!(fsm.state(), DeploymentState::Verifying);
}

#[test]
fn test_fsm_deploy_failure_rolls_back() {
    let mut fsm = fsm_in_verifying();
    assert_err!(fsm.process(DeploymentEvent::DeployFailed("late".to_string())));

    let mut fsm = DeploymentFsm::new();
    for event in [
        DeploymentEvent::Deploy,
        DeploymentEvent::Built,
        DeploymentEvent::Packaged,
        DeploymentEvent::Transferred,
        DeploymentEvent::BackedUp,
    ] {
        fsm.process(event).unwrap();
    }
    fsm.process(DeploymentEvent::DeployFailed("reload failed".to_string())).unwrap();
    assert_eq!(fsm.state(), DeploymentState::RollingBack);
}

#[test]
fn test_fsm_rejects_deploy_while_busy() {
    let mut fsm = DeploymentFsm::new();
    let state = assert_ok!(fsm.process(DeploymentEvent::Deploy));
    assert_eq!(state, DeploymentState::Building);
    assert_err!(fsm.process(DeploymentEvent::Deploy));
    assert_err!(fsm.process(DeploymentEvent::ManualRestore));
    assert_err!(fsm.process(DeploymentEvent::Reset));
}

#[test]
fn test_fsm_manual_restore() {
    let mut fsm = DeploymentFsm::new();
    fsm.process(DeploymentEvent::ManualRestore).unwrap();
    assert_eq!(fsm.state(), DeploymentState::RollingBack);
    fsm.process(DeploymentEvent::Restored).unwrap();
    fsm.process(DeploymentEvent::Reset).unwrap();
    assert!(fsm.is_idle());
}
