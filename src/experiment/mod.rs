//! Experiment execution.
//!
//! - [`sequencer`]: applies a schedule to the two pumps and guarantees both are
//!   stopped afterwards
//! - [`state`]: run lifecycle and the report produced at the end of every run

pub mod sequencer;
pub mod state;

pub use sequencer::{run_experiment, ExperimentParams, RunSequencer};
pub use state::{RunOutcome, RunReport, RunState};
