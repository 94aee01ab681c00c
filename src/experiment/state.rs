//! Run state tracking.
//!
//! The sequencer walks every run through the same lifecycle and summarizes it in
//! a [`RunReport`] once the pumps have been stopped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Lifecycle of one run.
///
/// # State Machine
///
/// ```text
/// Idle ──> Configuring ──> Running(0) ──> Running(1) ──> … ──> Stopped
///   │           │               │                               ▲
///   └───────────┴───────────────┴──────── error / cancel ───────┘
/// ```
///
/// `Stopped` is entered exactly once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// No run in progress
    Idle,
    /// Syringe diameters being applied
    Configuring,
    /// Executing a schedule step (0-based)
    Running {
        /// Index of the step being applied
        step: usize,
    },
    /// Both pumps stopped; run over
    Stopped,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Configuring => write!(f, "Configuring"),
            RunState::Running { step } => write!(f, "Running(step {})", step + 1),
            RunState::Stopped => write!(f, "Stopped"),
        }
    }
}

impl RunState {
    /// Check if the state allows starting a new run.
    pub fn can_begin(&self) -> bool {
        matches!(self, RunState::Idle | RunState::Stopped)
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        match (self, next) {
            (RunState::Idle, RunState::Configuring) => true,
            (RunState::Configuring, RunState::Running { step: 0 }) => true,
            (RunState::Running { step }, RunState::Running { step: next_step }) => {
                next_step == step + 1
            }
            (RunState::Stopped, _) => false,
            (_, RunState::Stopped) => true,
            _ => false,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every step ran and both pumps stopped cleanly
    Completed,
    /// The operator interrupted the run
    Cancelled,
    /// A step or the cleanup failed
    Failed {
        /// Error message
        error: String,
    },
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique run identifier
    pub run_id: String,
    /// When the run began
    pub started_at: DateTime<Utc>,
    /// When the pumps were stopped
    pub finished_at: DateTime<Utc>,
    /// Steps in the schedule
    pub steps_total: usize,
    /// Steps whose dwell ran to completion
    pub steps_completed: usize,
    /// Every state visited, in order
    pub transitions: Vec<RunState>,
    /// How the run ended
    pub outcome: RunOutcome,
}

impl RunReport {
    /// Final state of the run.
    pub fn final_state(&self) -> RunState {
        self.transitions.last().copied().unwrap_or(RunState::Idle)
    }

    /// True if every step completed and cleanup succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        assert!(RunState::Idle.can_transition_to(RunState::Configuring));
        assert!(RunState::Configuring.can_transition_to(RunState::Running { step: 0 }));
        assert!(RunState::Running { step: 0 }.can_transition_to(RunState::Running { step: 1 }));
        assert!(RunState::Running { step: 2 }.can_transition_to(RunState::Stopped));
        assert!(RunState::Idle.can_transition_to(RunState::Stopped));
    }

    #[test]
    fn illegal_transitions() {
        assert!(!RunState::Idle.can_transition_to(RunState::Running { step: 0 }));
        assert!(!RunState::Running { step: 0 }.can_transition_to(RunState::Running { step: 2 }));
        assert!(!RunState::Stopped.can_transition_to(RunState::Stopped));
        assert!(!RunState::Stopped.can_transition_to(RunState::Configuring));
    }

    #[test]
    fn display_is_one_based() {
        assert_eq!(RunState::Running { step: 0 }.to_string(), "Running(step 1)");
        assert!(RunState::Stopped.can_begin());
        assert!(!RunState::Configuring.can_begin());
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_string(&RunOutcome::Failed {
            error: "timeout".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"outcome":"failed","error":"timeout"}"#);
    }
}
