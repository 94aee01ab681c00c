//! Custom error types for the pump controller.
//!
//! This module defines the primary error type, `PumpError`, shared by the delay
//! calculator, the run sequencer, the pump channels and the profile reader. Using
//! the `thiserror` crate, every failure a run can hit is a distinct variant so the
//! operator sees what went wrong and the sequencer can decide whether cleanup is
//! still owed.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidParameter`**: a non-positive or non-finite flow rate, travel length
//!   or other numeric input. Raised before any pump command is issued.
//! - **`ChannelUnavailable`**: a pump's serial port could not be opened. Fatal for
//!   the run; no command is sent to either pump.
//! - **`InputFormat`**: the concentration profile could not be turned into a
//!   schedule (missing column, bad cell, out-of-range target).
//! - **`CommandTimeout`** / **`NoResponse`**: a pump did not answer a command.
//! - **`CommandRejected`**: a pump answered `?` or `OOR` instead of a prompt.
//! - **`Cancelled`**: the operator interrupted a wait.
//! - **`CleanupFailed`**: one or both stop commands failed after an otherwise
//!   successful run.
//!
//! By using `#[from]`, `PumpError` can be created from I/O, CSV and configuration
//! errors with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the controller error type.
pub type PumpResult<T> = std::result::Result<T, PumpError>;

/// Errors raised while computing, configuring or running an infusion.
#[derive(Error, Debug)]
pub enum PumpError {
    /// A numeric input violated its precondition.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Name of the offending parameter
        name: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// The transport behind a pump channel could not be opened.
    #[error("Pump channel unavailable on {port}: {reason}")]
    ChannelUnavailable {
        /// Serial port path
        port: String,
        /// Underlying failure
        reason: String,
    },

    /// The concentration profile could not be turned into a schedule.
    #[error("Input format error: {0}")]
    InputFormat(String),

    /// A pump did not answer within the response window.
    #[error("Pump '{channel}' did not answer '{command}' within {timeout_ms} ms")]
    CommandTimeout {
        /// Channel name
        channel: String,
        /// Command that went unanswered
        command: String,
        /// Response window in milliseconds
        timeout_ms: u64,
    },

    /// The pump link closed before a response arrived.
    #[error("No response from pump '{channel}' to '{command}'")]
    NoResponse {
        /// Channel name
        channel: String,
        /// Command that went unanswered
        command: String,
    },

    /// The pump answered with its out-of-range or unknown-command marker.
    #[error("Pump '{channel}' rejected '{command}': {reply}")]
    CommandRejected {
        /// Channel name
        channel: String,
        /// Command that was refused
        command: String,
        /// Trimmed reply
        reply: String,
    },

    /// A wait was interrupted by the operator.
    #[error("Run cancelled by operator")]
    Cancelled,

    /// Stop commands failed during cleanup.
    #[error("Cleanup failed with errors")]
    CleanupFailed(Vec<PumpError>),

    /// I/O failure on a pump link or input file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV decoding failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl PumpError {
    /// Shorthand for [`PumpError::InvalidParameter`].
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        PumpError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// True for errors raised by a pump exchange (as opposed to input or setup).
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            PumpError::CommandTimeout { .. }
                | PumpError::NoResponse { .. }
                | PumpError::CommandRejected { .. }
                | PumpError::Io(_)
        )
    }
}

impl From<figment::Error> for PumpError {
    fn from(value: figment::Error) -> Self {
        PumpError::Config(Box::new(value))
    }
}
