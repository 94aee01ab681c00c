//! # Dual Syringe-Pump Co-Infusion Controller
//!
//! Drives two syringe pumps, one holding a glucose stock and one a buffer, whose
//! streams meet at a mixing point. A target concentration profile is turned into
//! a schedule of flow-rate pairs; for every step the faster stream is held back
//! so that both reach the mixing point together.
//!
//! ## Crate Structure
//!
//! - **`delay`**: start-offset calculation from the two flow rates and the shared
//!   travel length.
//! - **`experiment`**: the run sequencer and the run state machine
//!   (Idle, Configuring, Running, Stopped).
//! - **`pump`**: the `PumpChannel` trait, the vendor command vocabulary, the
//!   serial driver and a recording mock.
//! - **`profile`**: CSV concentration profile ingestion.
//! - **`schedule`**: the mixing model and the per-step rate schedule.
//! - **`clock`**: cancellable waits, real (`TokioClock`) or virtual (`VirtualClock`).
//! - **`config`**: figment-based configuration (defaults, TOML file, `DAPP_*` env).
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`error`**: the `PumpError` enum shared by all of the above.

pub mod clock;
pub mod config;
pub mod delay;
pub mod error;
pub mod experiment;
pub mod logging;
pub mod profile;
pub mod pump;
pub mod schedule;

pub use delay::{compute_delays, Channel, StartDelays};
pub use error::{PumpError, PumpResult};
pub use experiment::{run_experiment, ExperimentParams, RunReport, RunSequencer, RunState};
