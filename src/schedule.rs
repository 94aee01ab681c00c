//! Pump schedules.
//!
//! A [`Schedule`] is the ordered list of `(glucose_rate, buffer_rate)` steps the
//! run sequencer applies. Schedules come either from a concentration profile via
//! a [`MixingModel`] or from a single pair of constant rates.

use crate::error::{PumpError, PumpResult};
use crate::profile::ConcentrationProfile;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One step of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScheduleStep {
    /// Glucose pump rate
    pub glucose_rate: f64,
    /// Buffer pump rate
    pub buffer_rate: f64,
    /// How long the step is held
    pub dwell: Duration,
    /// Target concentration this step was derived from
    pub concentration: Option<f64>,
}

/// Ordered steps of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schedule {
    steps: Vec<ScheduleStep>,
}

impl Schedule {
    /// Wrap a list of steps.
    pub fn new(steps: Vec<ScheduleStep>) -> Self {
        Self { steps }
    }

    /// Single step at fixed rates.
    pub fn constant(glucose_rate: f64, buffer_rate: f64, dwell: Duration) -> Self {
        Self::new(vec![ScheduleStep {
            glucose_rate,
            buffer_rate,
            dwell,
            concentration: None,
        }])
    }

    /// Steps in run order.
    pub fn steps(&self) -> &[ScheduleStep] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if there is nothing to run.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sum of all dwell periods.
    pub fn total_dwell(&self) -> Duration {
        self.steps.iter().map(|s| s.dwell).sum()
    }
}

/// Two-stream dilution of a glucose stock at constant total flow.
///
/// `glucose_rate = Q * c / C_stock` and `buffer_rate = Q - glucose_rate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixingModel {
    /// Glucose concentration in the stock syringe
    pub stock_concentration: f64,
    /// Combined flow of both pumps
    pub total_flow_rate: f64,
}

impl Default for MixingModel {
    fn default() -> Self {
        Self {
            stock_concentration: 33.0,
            total_flow_rate: 15.0,
        }
    }
}

impl MixingModel {
    /// Pump rates that produce `concentration` at the mixing point.
    ///
    /// # Errors
    /// [`PumpError::InvalidParameter`] for a non-positive model, and
    /// [`PumpError::InputFormat`] when the target is not strictly between zero and
    /// the stock concentration (one pump would have to stand still).
    pub fn rates_for(&self, concentration: f64) -> PumpResult<(f64, f64)> {
        if !(self.stock_concentration.is_finite() && self.stock_concentration > 0.0) {
            return Err(PumpError::invalid(
                "stock_concentration",
                format!("must be > 0, got {}", self.stock_concentration),
            ));
        }
        if !(self.total_flow_rate.is_finite() && self.total_flow_rate > 0.0) {
            return Err(PumpError::invalid(
                "total_flow_rate",
                format!("must be > 0, got {}", self.total_flow_rate),
            ));
        }
        if !(concentration > 0.0 && concentration < self.stock_concentration) {
            return Err(PumpError::InputFormat(format!(
                "target concentration {concentration} must be between 0 and the stock concentration {} (exclusive)",
                self.stock_concentration
            )));
        }

        let glucose_rate = self.total_flow_rate * concentration / self.stock_concentration;
        Ok((glucose_rate, self.total_flow_rate - glucose_rate))
    }

    /// Turn a profile into a schedule.
    ///
    /// Each step is held until the next row's timestamp; the last step, and every
    /// step of a profile without timing, is held for `default_dwell`.
    pub fn build_schedule(
        &self,
        profile: &ConcentrationProfile,
        default_dwell: Duration,
    ) -> PumpResult<Schedule> {
        let points = &profile.points;
        let mut steps = Vec::with_capacity(points.len());

        for (i, point) in points.iter().enumerate() {
            let (glucose_rate, buffer_rate) = self
                .rates_for(point.concentration)
                .map_err(|e| match e {
                    PumpError::InputFormat(msg) => {
                        PumpError::InputFormat(format!("row {}: {msg}", i + 1))
                    }
                    other => other,
                })?;

            let next_time = points.get(i + 1).and_then(|p| p.time_s);
            let dwell = match (point.time_s, next_time) {
                (Some(t), Some(next)) => Duration::try_from_secs_f64(next - t).map_err(|e| {
                    PumpError::InputFormat(format!("row {}: dwell {} s: {e}", i + 1, next - t))
                })?,
                _ => default_dwell,
            };

            steps.push(ScheduleStep {
                glucose_rate,
                buffer_rate,
                dwell,
                concentration: Some(point.concentration),
            });
        }

        Ok(Schedule::new(steps))
    }
}
