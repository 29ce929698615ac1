//! Saga execution state machine.

use serde::{Deserialize, Serialize};

/// The state of a saga execution.
///
/// State transitions:
/// ```text
/// Pending ──► Running ──┬──► Completed
///                       └──► Compensating ──┬──► Compensated
///                                           └──► CompensationFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    /// Created, no step has run yet.
    #[default]
    Pending,

    /// Steps are being executed.
    Running,

    /// A step failed and completed steps are being undone.
    Compensating,

    /// All steps completed successfully (terminal state).
    Completed,

    /// A step failed and every compensation succeeded (terminal state).
    Compensated,

    /// A step failed and at least one compensation failed (terminal state).
    /// Needs manual reconciliation.
    CompensationFailed,
}

impl SagaState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Compensated | SagaState::CompensationFailed
        )
    }

    /// Returns true if moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: SagaState) -> bool {
        matches!(
            (self, next),
            (SagaState::Pending, SagaState::Running)
                | (SagaState::Running, SagaState::Completed)
                | (SagaState::Running, SagaState::Compensating)
                | (SagaState::Compensating, SagaState::Compensated)
                | (SagaState::Compensating, SagaState::CompensationFailed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Pending => "PENDING",
            SagaState::Running => "RUNNING",
            SagaState::Compensating => "COMPENSATING",
            SagaState::Completed => "COMPLETED",
            SagaState::Compensated => "COMPENSATED",
            SagaState::CompensationFailed => "COMPENSATION_FAILED",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SagaState; 6] = [
        SagaState::Pending,
        SagaState::Running,
        SagaState::Compensating,
        SagaState::Completed,
        SagaState::Compensated,
        SagaState::CompensationFailed,
    ];

    #[test]
    fn test_default_state_is_pending() {
        assert_eq!(SagaState::default(), SagaState::Pending);
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![
                &SagaState::Completed,
                &SagaState::Compensated,
                &SagaState::CompensationFailed
            ]
        );
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_compensating_only_after_running() {
        let sources: Vec<_> = ALL
            .iter()
            .filter(|s| s.can_transition_to(SagaState::Compensating))
            .collect();
        assert_eq!(sources, vec![&SagaState::Running]);
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&SagaState::CompensationFailed).unwrap();
        assert_eq!(json, "\"COMPENSATION_FAILED\"");
        let back: SagaState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SagaState::CompensationFailed);
        assert_eq!(SagaState::Compensated.to_string(), "COMPENSATED");
    }
}
