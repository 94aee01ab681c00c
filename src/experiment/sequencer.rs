//! Run sequencer for two-pump co-infusion.
//!
//! The sequencer owns both pump channels for the duration of a run. It applies a
//! [`Schedule`] step by step: set both rates, start the lead pump, wait out the
//! start offset, start the lagging pump, then hold for the step's dwell.
//!
//! # Cleanup
//!
//! Once any command has reached a pump, both pumps are stopped when the run ends,
//! whether it completed, failed, or was cancelled. A stop failure on one pump
//! does not skip the stop on the other.
//!
//! # Example
//!
//! ```rust,ignore
//! let (clock, cancel) = TokioClock::new();
//! let mut sequencer = RunSequencer::new(glucose_pump, buffer_pump, clock);
//! let report = sequencer.run(&schedule, &params).await?;
//! println!("{} of {} steps", report.steps_completed, report.steps_total);
//! ```

use super::state::{RunOutcome, RunReport, RunState};
use crate::clock::Clock;
use crate::delay::{compute_delays, Channel, StartDelays};
use crate::error::{PumpError, PumpResult};
use crate::pump::{round_to_pump_precision, PumpChannel, RateUnits};
use crate::schedule::{Schedule, ScheduleStep};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Physical parameters fixed for a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentParams {
    /// Dwell for steps that carry no timing of their own
    pub dwell: Duration,
    /// Syringe inner diameter (mm), identical on both pumps
    pub syringe_diameter_mm: f64,
    /// Shared tubing length from syringe outlet to the mixing point
    pub travel_length: f64,
    /// Units the schedule's rates are expressed in
    pub rate_units: RateUnits,
}

impl Default for ExperimentParams {
    fn default() -> Self {
        Self {
            dwell: Duration::from_secs(60),
            syringe_diameter_mm: 20.0,
            travel_length: 100.0,
            rate_units: RateUnits::MlPerMin,
        }
    }
}

/// A schedule step with its start offsets resolved.
#[derive(Debug, Clone, Copy)]
struct PlannedStep {
    step: ScheduleStep,
    delays: StartDelays,
    offset: Duration,
}

/// Compute start offsets for every step before any command is sent.
fn plan(schedule: &Schedule, params: &ExperimentParams) -> PumpResult<Vec<PlannedStep>> {
    if schedule.is_empty() {
        return Err(PumpError::invalid("schedule", "must contain at least one step"));
    }
    if !(params.syringe_diameter_mm.is_finite() && params.syringe_diameter_mm > 0.0) {
        return Err(PumpError::invalid(
            "syringe_diameter_mm",
            format!("must be > 0, got {}", params.syringe_diameter_mm),
        ));
    }

    schedule
        .steps()
        .iter()
        .map(|step| {
            // Offsets follow the rates the pumps will actually run at
            let step = ScheduleStep {
                glucose_rate: round_to_pump_precision(step.glucose_rate),
                buffer_rate: round_to_pump_precision(step.buffer_rate),
                ..*step
            };
            let delays = compute_delays(step.glucose_rate, step.buffer_rate, params.travel_length)?;
            let offset = delays.offset_duration()?;
            Ok(PlannedStep {
                step,
                delays,
                offset,
            })
        })
        .collect()
}

/// Executes schedules against a glucose and a buffer pump.
pub struct RunSequencer<G, B, C> {
    glucose: G,
    buffer: B,
    clock: C,
    transitions: Vec<RunState>,
    commands_issued: bool,
    last_report: Option<RunReport>,
}

impl<G, B, C> RunSequencer<G, B, C>
where
    G: PumpChannel,
    B: PumpChannel,
    C: Clock,
{
    /// Take ownership of both channels and the clock.
    pub fn new(glucose: G, buffer: B, clock: C) -> Self {
        Self {
            glucose,
            buffer,
            clock,
            transitions: vec![RunState::Idle],
            commands_issued: false,
            last_report: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.transitions.last().copied().unwrap_or(RunState::Idle)
    }

    /// Report of the most recent run, including failed ones.
    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    /// The clock driving waits.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Release the channels.
    pub fn into_channels(self) -> (G, B) {
        (self.glucose, self.buffer)
    }

    fn transition(&mut self, next: RunState) {
        let current = self.state();
        if !current.can_transition_to(next) {
            warn!("Unexpected run state transition {} -> {}", current, next);
        }
        debug!("Run state {} -> {}", current, next);
        self.transitions.push(next);
    }

    /// Execute `schedule` and stop both pumps afterwards.
    ///
    /// # Errors
    ///
    /// Returns the first error of the run after cleanup has executed:
    /// - [`PumpError::InvalidParameter`] for an unusable schedule (no command sent)
    /// - [`PumpError::CommandTimeout`] / [`PumpError::NoResponse`] from a pump
    /// - [`PumpError::Cancelled`] if the operator interrupted a wait
    /// - [`PumpError::CleanupFailed`] if only the stop commands failed
    pub async fn run(
        &mut self,
        schedule: &Schedule,
        params: &ExperimentParams,
    ) -> PumpResult<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("experiment", run_id = %run_id, steps = schedule.len());
        self.run_inner(run_id, schedule, params).instrument(span).await
    }

    async fn run_inner(
        &mut self,
        run_id: String,
        schedule: &Schedule,
        params: &ExperimentParams,
    ) -> PumpResult<RunReport> {
        if !self.state().can_begin() {
            return Err(PumpError::invalid(
                "run",
                format!("sequencer busy in state {}", self.state()),
            ));
        }

        let started_at = Utc::now();
        self.transitions = vec![RunState::Idle];
        self.commands_issued = false;
        let mut steps_completed = 0;

        info!(
            "Starting run: {} steps, syringe {} mm, travel length {}",
            schedule.len(),
            params.syringe_diameter_mm,
            params.travel_length
        );

        let result = match plan(schedule, params) {
            Ok(planned) => self.execute(&planned, params, &mut steps_completed).await,
            Err(e) => Err(e),
        };

        let cleanup = if self.commands_issued {
            self.stop_both().await
        } else {
            Ok(())
        };
        self.transition(RunState::Stopped);

        let result = match (result, cleanup) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(cleanup_err)) => Err(cleanup_err),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_err)) => {
                error!("Cleanup after failed run also failed: {}", cleanup_err);
                Err(e)
            }
        };

        let outcome = match &result {
            Ok(()) => RunOutcome::Completed,
            Err(PumpError::Cancelled) => RunOutcome::Cancelled,
            Err(e) => RunOutcome::Failed {
                error: e.to_string(),
            },
        };

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            steps_total: schedule.len(),
            steps_completed,
            transitions: self.transitions.clone(),
            outcome,
        };
        self.last_report = Some(report.clone());

        match result {
            Ok(()) => {
                info!("Run completed: {} steps", steps_completed);
                Ok(report)
            }
            Err(e) => {
                if e.is_communication() {
                    warn!("Pump link failure; check cabling and serial settings");
                }
                error!(
                    "Run ended after {} of {} steps: {}",
                    steps_completed,
                    schedule.len(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn execute(
        &mut self,
        planned: &[PlannedStep],
        params: &ExperimentParams,
        steps_completed: &mut usize,
    ) -> PumpResult<()> {
        self.transition(RunState::Configuring);
        self.commands_issued = true;

        // Rate calibration depends on bore diameter, so this goes first
        self.glucose
            .set_syringe_diameter(params.syringe_diameter_mm)
            .await?;
        self.buffer
            .set_syringe_diameter(params.syringe_diameter_mm)
            .await?;

        for (index, planned_step) in planned.iter().enumerate() {
            if self.clock.is_cancelled() {
                return Err(PumpError::Cancelled);
            }
            self.transition(RunState::Running { step: index });

            let step = &planned_step.step;
            info!(
                step = index + 1,
                glucose_rate = step.glucose_rate,
                buffer_rate = step.buffer_rate,
                glucose_delay = planned_step.delays.glucose,
                buffer_delay = planned_step.delays.buffer,
                dwell_s = step.dwell.as_secs_f64(),
                "Applying schedule step"
            );

            self.glucose
                .set_flow_rate(step.glucose_rate, params.rate_units)
                .await?;
            self.buffer
                .set_flow_rate(step.buffer_rate, params.rate_units)
                .await?;

            self.start_staggered(planned_step).await?;
            info!(
                "Pumps started | Glucose: {} {} | Buffer: {} {}",
                step.glucose_rate, params.rate_units, step.buffer_rate, params.rate_units
            );

            self.clock.sleep(step.dwell).await?;
            *steps_completed += 1;
        }

        Ok(())
    }

    /// Start the lead channel, wait the offset, start the lagging channel.
    async fn start_staggered(&self, planned_step: &PlannedStep) -> PumpResult<()> {
        let lead = planned_step.delays.lead();
        self.start_channel(lead).await?;

        if !planned_step.offset.is_zero() {
            debug!(
                "Delaying {} start by {:.3} s",
                lead.other(),
                planned_step.offset.as_secs_f64()
            );
            self.clock.sleep(planned_step.offset).await?;
        }

        self.start_channel(lead.other()).await
    }

    async fn start_channel(&self, channel: Channel) -> PumpResult<()> {
        match channel {
            Channel::Glucose => self.glucose.start().await,
            Channel::Buffer => self.buffer.start().await,
        }
    }

    /// Stop both pumps, attempting each regardless of the other's result.
    async fn stop_both(&self) -> PumpResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.glucose.stop().await {
            error!("Failed to stop {}: {}", self.glucose.name(), e);
            errors.push(e);
        }
        if let Err(e) = self.buffer.stop().await {
            error!("Failed to stop {}: {}", self.buffer.name(), e);
            errors.push(e);
        }

        if errors.is_empty() {
            info!("Pumps stopped");
            Ok(())
        } else {
            Err(PumpError::CleanupFailed(errors))
        }
    }
}

/// Run `schedule` on the given channels and stop both pumps afterwards.
///
/// Convenience wrapper around [`RunSequencer`] for one-shot runs.
pub async fn run_experiment<G, B, C>(
    schedule: &Schedule,
    params: &ExperimentParams,
    glucose: G,
    buffer: B,
    clock: C,
) -> PumpResult<RunReport>
where
    G: PumpChannel,
    B: PumpChannel,
    C: Clock,
{
    RunSequencer::new(glucose, buffer, clock)
        .run(schedule, params)
        .await
}
