//! FSM unit tests

use clouding_worker::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use clouding_worker::models::deployment::DeploymentStatus;

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), DeploymentStatus::Pending);
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = DeploymentFsm::new();

    // Pending -> Started
    fsm.process(DeploymentEvent::Start).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Started);

    // Started -> Completed
    fsm.process(DeploymentEvent::Complete).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Completed);
}

#[test]
fn test_fsm_failure_flow() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::Fail).unwrap();

    assert_eq!(fsm.state(), DeploymentStatus::Failed);
}

#[test]
fn test_fsm_duplicate_start_is_rejected() {
    let mut fsm = DeploymentFsm::new();

    assert!(fsm.try_process(DeploymentEvent::Start));
    assert!(!fsm.try_process(DeploymentEvent::Start));
    assert_eq!(fsm.state(), DeploymentStatus::Started);
}

#[test]
fn test_fsm_terminal_states_are_final() {
    for terminal in [DeploymentStatus::Completed, DeploymentStatus::Failed] {
        for event in [
            DeploymentEvent::Start,
            DeploymentEvent::Complete,
            DeploymentEvent::Fail,
        ] {
            let mut fsm = DeploymentFsm::from_state(terminal);
            assert!(fsm.process(event).is_err());
            assert_eq!(fsm.state(), terminal);
        }
    }
}

#[test]
fn test_fsm_cannot_finish_before_start() {
    let mut fsm = DeploymentFsm::new();

    let result = fsm.process(DeploymentEvent::Complete);
    assert!(result.is_err());
    assert!(result.unwrap_err().contains("Invalid transition"));
    assert_eq!(fsm.state(), DeploymentStatus::Pending);
}

#[test]
fn test_terminal_event_for_outcome() {
    assert_eq!(DeploymentEvent::for_outcome(true), DeploymentEvent::Fail);
    assert_eq!(DeploymentEvent::for_outcome(false), DeploymentEvent::Complete);
}
