// Worker status state machine with validation

use super::WorkerStatus;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateTransitionError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: WorkerStatus,
        to: WorkerStatus,
    },
}

/// Validates if a worker can transition from one status to another
pub fn can_transition(from: WorkerStatus, to: WorkerStatus) -> bool {
    use WorkerStatus::*;

    match (from, to) {
        // From Pending
        (Pending, Working) => true, // First heartbeat
        (Pending, Error) => true,
        (Pending, Stopped) => true,

        // From Working
        (Working, Paused) => true,
        (Working, Merging) => true,
        (Working, Error) => true,
        (Working, Stopped) => true,

        // From Paused
        (Paused, Working) => true,
        (Paused, Merging) => true,
        (Paused, Error) => true,
        (Paused, Stopped) => true,

        // From Merging
        (Merging, Merged) => true,
        (Merging, Error) => true,
        (Merging, Stopped) => true,
        (Merging, Working) => true, // Attempt rolled back
        (Merging, Paused) => true,  // Attempt rolled back

        // Merged, Error and Stopped are terminal
        _ => false,
    }
}

/// Validates and performs a state transition
pub fn transition_state(
    current: WorkerStatus,
    target: WorkerStatus,
) -> Result<WorkerStatus, StateTransitionError> {
    if !can_transition(current, target) {
        return Err(StateTransitionError::InvalidTransition {
            from: current,
            to: target,
        });
    }

    Ok(target)
}

/// Check if a status is a terminal state
pub fn is_terminal_state(status: WorkerStatus) -> bool {
    matches!(
        status,
        WorkerStatus::Merged | WorkerStatus::Error | WorkerStatus::Stopped
    )
}

/// Check if a status counts against the repository's worker capacity
pub fn is_active_state(status: WorkerStatus) -> bool {
    !matches!(status, WorkerStatus::Merged | WorkerStatus::Stopped)
}

/// Check if a worker in this status may start a merge
pub fn is_mergeable_state(status: WorkerStatus) -> bool {
    matches!(status, WorkerStatus::Working | WorkerStatus::Paused)
}

/// Get all valid next states from current state
pub fn valid_next_states(current: WorkerStatus) -> Vec<WorkerStatus> {
    WorkerStatus::all()
        .iter()
        .copied()
        .filter(|&state| can_transition(current, state))
        .collect()
}
