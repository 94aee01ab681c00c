//! Start-offset calculation for two streams meeting at a shared mixing point.
//!
//! Both syringes feed tubing of the same length into the mixing point. The stream
//! pushed at the higher flow rate covers that length sooner, so it is held back
//! by the difference in travel times and both streams arrive together.
//!
//! ```
//! use dapp_pumps::delay::compute_delays;
//!
//! // Glucose takes 20 time units to arrive, buffer takes 10.
//! let delays = compute_delays(5.0, 10.0, 100.0)?;
//! assert_eq!(delays.as_tuple(), (0.0, 10.0));
//! # Ok::<(), dapp_pumps::error::PumpError>(())
//! ```

use crate::error::{PumpError, PumpResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Relative tolerance below which two travel times are considered equal.
pub const DELAY_EPSILON: f64 = 1e-9;

/// Absolute floor for [`DELAY_EPSILON`] when travel times are tiny.
const ABSOLUTE_EPSILON: f64 = 1e-12;

/// One of the two pumps in a co-infusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Glucose stock syringe
    Glucose,
    /// Buffer (diluent) syringe
    Buffer,
}

impl Channel {
    /// The other channel.
    pub fn other(self) -> Self {
        match self {
            Channel::Glucose => Channel::Buffer,
            Channel::Buffer => Channel::Glucose,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Glucose => write!(f, "glucose"),
            Channel::Buffer => write!(f, "buffer"),
        }
    }
}

/// Start offsets for both channels, in the time unit of `length / rate`.
///
/// At most one field is positive.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StartDelays {
    /// Wait before starting the glucose pump
    pub glucose: f64,
    /// Wait before starting the buffer pump
    pub buffer: f64,
}

impl StartDelays {
    /// `(glucose_delay, buffer_delay)`
    pub fn as_tuple(&self) -> (f64, f64) {
        (self.glucose, self.buffer)
    }

    /// Exchange the two delays.
    pub fn swap(self) -> Self {
        Self {
            glucose: self.buffer,
            buffer: self.glucose,
        }
    }

    /// Delay owed by `channel`.
    pub fn for_channel(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Glucose => self.glucose,
            Channel::Buffer => self.buffer,
        }
    }

    /// Channel that starts first. Glucose leads when both delays are zero.
    pub fn lead(&self) -> Channel {
        if self.glucose > 0.0 {
            Channel::Buffer
        } else {
            Channel::Glucose
        }
    }

    /// Offset between the lead channel's start and the lagging channel's start.
    pub fn offset(&self) -> f64 {
        self.glucose.max(self.buffer)
    }

    /// The offset as a wall-clock wait, reading the delay as seconds.
    ///
    /// # Errors
    /// [`PumpError::InvalidParameter`] if the offset does not fit in a `Duration`.
    pub fn offset_duration(&self) -> PumpResult<Duration> {
        Duration::try_from_secs_f64(self.offset()).map_err(|e| {
            PumpError::invalid("length", format!("start offset {} s: {e}", self.offset()))
        })
    }

    /// True when both streams can start together.
    pub fn is_simultaneous(&self) -> bool {
        self.glucose == 0.0 && self.buffer == 0.0
    }
}

fn require_positive(name: &'static str, value: f64) -> PumpResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(PumpError::invalid(
            name,
            format!("must be finite and > 0, got {value}"),
        ))
    }
}

/// Compute how long each pump waits before starting.
///
/// Travel time for a stream is `length / rate`. The faster stream is delayed by
/// the difference so both reach the mixing point together.
///
/// # Errors
/// [`PumpError::InvalidParameter`] if either rate or the length is not strictly
/// positive and finite.
pub fn compute_delays(glucose_rate: f64, buffer_rate: f64, length: f64) -> PumpResult<StartDelays> {
    let glucose_rate = require_positive("glucose_rate", glucose_rate)?;
    let buffer_rate = require_positive("buffer_rate", buffer_rate)?;
    let length = require_positive("length", length)?;

    let glucose_travel = length / glucose_rate;
    let buffer_travel = length / buffer_rate;
    let difference = buffer_travel - glucose_travel;

    let tolerance = (DELAY_EPSILON * glucose_travel.max(buffer_travel)).max(ABSOLUTE_EPSILON);
    if difference.abs() < tolerance {
        return Ok(StartDelays::default());
    }

    Ok(StartDelays {
        glucose: difference.max(0.0),
        buffer: (-difference).max(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rates_start_together() {
        let delays = compute_delays(5.0, 5.0, 100.0).unwrap();
        assert_eq!(delays.as_tuple(), (0.0, 0.0));
        assert!(delays.is_simultaneous());
        assert_eq!(delays.lead(), Channel::Glucose);
    }

    #[test]
    fn faster_buffer_is_delayed() {
        // glucose travel 20, buffer travel 10
        let delays = compute_delays(5.0, 10.0, 100.0).unwrap();
        assert_eq!(delays.as_tuple(), (0.0, 10.0));
        assert_eq!(delays.lead(), Channel::Glucose);
        assert_eq!(delays.offset_duration().unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn faster_glucose_is_delayed() {
        // glucose travel 5, buffer travel 10
        let delays = compute_delays(10.0, 5.0, 50.0).unwrap();
        assert_eq!(delays.as_tuple(), (5.0, 0.0));
        assert_eq!(delays.lead(), Channel::Buffer);
        assert_eq!(delays.for_channel(Channel::Glucose), 5.0);
    }

    #[test]
    fn swapping_rates_swaps_delays() {
        let cases = [(5.0, 10.0, 100.0), (0.3, 7.5, 12.0), (2.0, 2.0, 1.0), (9.0, 1.5, 0.25)];
        for (a, b, l) in cases {
            let forward = compute_delays(a, b, l).unwrap();
            let reverse = compute_delays(b, a, l).unwrap();
            assert_eq!(forward, reverse.swap(), "rates ({a}, {b}), length {l}");
        }
    }

    #[test]
    fn at_most_one_delay_is_positive() {
        let rates = [0.01, 0.5, 1.0, 3.3, 10.0, 250.0];
        for &g in &rates {
            for &b in &rates {
                let d = compute_delays(g, b, 42.0).unwrap();
                assert!(d.glucose >= 0.0 && d.buffer >= 0.0);
                assert!(!(d.glucose > 0.0 && d.buffer > 0.0), "rates ({g}, {b})");
                if g == b {
                    assert!(d.is_simultaneous());
                } else {
                    assert!(d.offset() > 0.0);
                }
            }
        }
    }

    #[test]
    fn near_equal_travel_times_collapse_to_zero() {
        let delays = compute_delays(0.1 + 0.2, 0.3, 1.0).unwrap();
        assert!(delays.is_simultaneous());
    }

    #[test]
    fn rejects_non_positive_inputs() {
        let err = compute_delays(0.0, 5.0, 10.0).unwrap_err();
        assert!(matches!(
            err,
            PumpError::InvalidParameter { name: "glucose_rate", .. }
        ));

        let err = compute_delays(5.0, -1.0, 10.0).unwrap_err();
        assert!(matches!(
            err,
            PumpError::InvalidParameter { name: "buffer_rate", .. }
        ));

        let err = compute_delays(5.0, 5.0, 0.0).unwrap_err();
        assert!(matches!(err, PumpError::InvalidParameter { name: "length", .. }));

        assert!(compute_delays(f64::NAN, 5.0, 10.0).is_err());
        assert!(compute_delays(5.0, f64::INFINITY, 10.0).is_err());
    }

    #[test]
    fn channel_display_and_other() {
        assert_eq!(Channel::Glucose.to_string(), "glucose");
        assert_eq!(Channel::Buffer.other(), Channel::Glucose);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn rate() -> impl Strategy<Value = f64> {
            0.001f64..1000.0
        }

        proptest! {
            /// Only the faster stream is ever held back
            #[test]
            fn at_most_one_delay_positive(g in rate(), b in rate(), l in rate()) {
                let d = compute_delays(g, b, l).unwrap();
                prop_assert!(d.glucose >= 0.0 && d.buffer >= 0.0);
                prop_assert!(!(d.glucose > 0.0 && d.buffer > 0.0));
            }

            /// Outside the equal-rate band the delay is the travel-time difference
            #[test]
            fn delay_is_travel_time_difference(g in rate(), b in rate(), l in rate()) {
                let d = compute_delays(g, b, l).unwrap();
                if !d.is_simultaneous() {
                    let difference = l / b - l / g;
                    prop_assert_eq!(d.glucose, difference.max(0.0));
                    prop_assert_eq!(d.buffer, (-difference).max(0.0));
                    prop_assert_eq!(d.offset(), difference.abs());
                }
            }

            #[test]
            fn swapped_rates_swap_delays(g in rate(), b in rate(), l in rate()) {
                let forward = compute_delays(g, b, l).unwrap();
                let reverse = compute_delays(b, g, l).unwrap();
                prop_assert_eq!(forward, reverse.swap());
            }
        }
    }
}
