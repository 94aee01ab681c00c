//! Pump command vocabulary.
//!
//! Protocol Overview (Harvard Apparatus RS-232 command set):
//! - Format: ASCII command, CR (`\r`) terminated
//! - Baud: 9600, 8 data bits, no parity, 2 stop bits
//! - Commands: `DIA <mm>`, `RAT <rate> <units>`, `RUN`, `STP`
//! - Queries: `DIS` (volume/status display)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Command terminator appended to every command on the wire.
pub const TERMINATOR: &str = "\r";

/// Significant digits the pump accepts in a rate field.
pub const RATE_SIGNIFICANT_DIGITS: i32 = 4;

/// Round a rate to the precision the pump display can hold.
///
/// The pump rejects rate fields with more digits, so every rate is rounded
/// before it is planned or sent.
pub fn round_to_pump_precision(value: f64) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let factor = 10f64.powi(RATE_SIGNIFICANT_DIGITS - 1 - magnitude);
    (value * factor).round() / factor
}

/// Rate units understood by the `RAT` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RateUnits {
    /// Millilitres per minute
    #[default]
    #[serde(rename = "MM")]
    MlPerMin,
    /// Microlitres per minute
    #[serde(rename = "UM")]
    UlPerMin,
    /// Millilitres per hour
    #[serde(rename = "MH")]
    MlPerHour,
    /// Microlitres per hour
    #[serde(rename = "UH")]
    UlPerHour,
}

impl RateUnits {
    /// Wire code for the `RAT` command.
    pub fn code(self) -> &'static str {
        match self {
            RateUnits::MlPerMin => "MM",
            RateUnits::UlPerMin => "UM",
            RateUnits::MlPerHour => "MH",
            RateUnits::UlPerHour => "UH",
        }
    }
}

impl fmt::Display for RateUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for RateUnits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MM" => Ok(RateUnits::MlPerMin),
            "UM" => Ok(RateUnits::UlPerMin),
            "MH" => Ok(RateUnits::MlPerHour),
            "UH" => Ok(RateUnits::UlPerHour),
            other => Err(format!(
                "Unknown rate units '{other}'. Must be one of: MM, UM, MH, UH"
            )),
        }
    }
}

/// A single pump command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PumpCommand {
    /// Set syringe inner diameter (mm)
    Diameter(f64),
    /// Set infusion rate
    Rate(f64, RateUnits),
    /// Start infusing
    Run,
    /// Stop
    Stop,
    /// Query the status display
    Display,
}

impl PumpCommand {
    /// Command text without terminator.
    pub fn text(&self) -> String {
        match self {
            PumpCommand::Diameter(mm) => format!("DIA {mm}"),
            PumpCommand::Rate(rate, units) => {
                format!("RAT {} {units}", round_to_pump_precision(*rate))
            }
            PumpCommand::Run => "RUN".to_string(),
            PumpCommand::Stop => "STP".to_string(),
            PumpCommand::Display => "DIS".to_string(),
        }
    }

    /// Bytes written to the port, terminator included.
    pub fn to_wire(&self) -> Vec<u8> {
        format!("{}{}", self.text(), TERMINATOR).into_bytes()
    }
}

impl fmt::Display for PumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_text() {
        assert_eq!(PumpCommand::Diameter(20.0).text(), "DIA 20");
        assert_eq!(PumpCommand::Diameter(1.5).text(), "DIA 1.5");
        assert_eq!(
            PumpCommand::Rate(5.0, RateUnits::MlPerMin).text(),
            "RAT 5 MM"
        );
        assert_eq!(
            PumpCommand::Rate(0.25, RateUnits::UlPerHour).text(),
            "RAT 0.25 UH"
        );
        assert_eq!(PumpCommand::Run.text(), "RUN");
        assert_eq!(PumpCommand::Stop.text(), "STP");
        assert_eq!(PumpCommand::Display.text(), "DIS");
    }

    #[test]
    fn rates_are_sent_with_four_significant_digits() {
        assert_eq!(round_to_pump_precision(15.0 * 8.0 / 33.0), 3.636);
        assert_eq!(round_to_pump_precision(0.012346), 0.01235);
        assert_eq!(round_to_pump_precision(1234.5), 1235.0);
        assert_eq!(round_to_pump_precision(0.0), 0.0);

        let (glucose, buffer) = crate::schedule::MixingModel::default()
            .rates_for(8.0)
            .unwrap();
        assert_eq!(
            PumpCommand::Rate(glucose, RateUnits::MlPerMin).text(),
            "RAT 3.636 MM"
        );
        assert_eq!(
            PumpCommand::Rate(buffer, RateUnits::MlPerMin).text(),
            "RAT 11.36 MM"
        );
    }

    #[test]
    fn wire_format_appends_carriage_return() {
        assert_eq!(PumpCommand::Run.to_wire(), b"RUN\r".to_vec());
        assert_eq!(PumpCommand::Diameter(20.0).to_wire(), b"DIA 20\r".to_vec());
    }

    #[test]
    fn rate_units_parse() {
        assert_eq!("mm".parse::<RateUnits>(), Ok(RateUnits::MlPerMin));
        assert_eq!(" UH ".parse::<RateUnits>(), Ok(RateUnits::UlPerHour));
        assert!("ml/min".parse::<RateUnits>().is_err());
        assert_eq!(RateUnits::default(), RateUnits::MlPerMin);
    }
}
