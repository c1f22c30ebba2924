//! Finite state machine for deployment status
//!
//! `pending -> started -> {completed | failed}`. Every transition has a single
//! precondition; persistence layers apply it as a compare-and-swap so a
//! duplicate event is a no-op rather than an error.

use crate::models::deployment::DeploymentStatus;

/// Deployment event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// Executor run begins
    Start,

    /// Run finished with no failed host
    Complete,

    /// Run finished with at least one failed host, or was cut short
    Fail,
}

impl DeploymentEvent {
    /// Terminal event for a finished run
    pub fn for_outcome(any_failed: bool) -> Self {
        if any_failed {
            DeploymentEvent::Fail
        } else {
            DeploymentEvent::Complete
        }
    }

    /// Status the deployment must be in for the event to apply
    pub fn precondition(&self) -> DeploymentStatus {
        match self {
            DeploymentEvent::Start => DeploymentStatus::Pending,
            DeploymentEvent::Complete | DeploymentEvent::Fail => DeploymentStatus::Started,
        }
    }

    /// Status the deployment moves to
    pub fn target(&self) -> DeploymentStatus {
        match self {
            DeploymentEvent::Start => DeploymentStatus::Started,
            DeploymentEvent::Complete => DeploymentStatus::Completed,
            DeploymentEvent::Fail => DeploymentStatus::Failed,
        }
    }
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self::from_state(DeploymentStatus::Pending)
    }

    /// Resume an FSM from a persisted status
    pub fn from_state(state: DeploymentStatus) -> Self {
        Self { state }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        if self.state != event.precondition() {
            return Err(format!(
                "Invalid transition: {:?} -> {:?}",
                self.state, event
            ));
        }

        self.state = event.target();
        Ok(())
    }

    /// Apply the event when its precondition holds; returns whether the state changed
    pub fn try_process(&mut self, event: DeploymentEvent) -> bool {
        self.process(event).is_ok()
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
