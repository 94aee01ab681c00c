//! Concentration profile ingestion.
//!
//! A profile is a CSV file with a header row. The first column whose name
//! contains `concentration` (case-insensitive) holds the target concentration;
//! the first other column whose name contains `time` holds an optional
//! timestamp in seconds. When several columns match, column order decides.

use crate::error::{PumpError, PumpResult};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// One row of a concentration profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProfilePoint {
    /// Timestamp in seconds, if the profile has a time column
    pub time_s: Option<f64>,
    /// Target concentration (same units as the stock concentration)
    pub concentration: f64,
}

/// Ordered target concentrations read from a CSV source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcentrationProfile {
    /// Header of the column the concentrations came from
    pub concentration_column: String,
    /// Header of the time column, if any
    pub time_column: Option<String>,
    /// Rows in file order
    pub points: Vec<ProfilePoint>,
}

fn find_column<'a>(
    headers: impl Iterator<Item = &'a str>,
    needle: &str,
    skip: Option<usize>,
) -> Option<usize> {
    headers
        .enumerate()
        .filter(|(idx, _)| Some(*idx) != skip)
        .find(|(_, name)| name.to_lowercase().contains(needle))
        .map(|(idx, _)| idx)
}

fn parse_cell(value: &str, column: &str, row: usize) -> PumpResult<f64> {
    let value = value.trim();
    let parsed: f64 = value.parse().map_err(|_| {
        PumpError::InputFormat(format!(
            "row {row}: column '{column}' value '{value}' is not a number"
        ))
    })?;
    if !parsed.is_finite() {
        return Err(PumpError::InputFormat(format!(
            "row {row}: column '{column}' value '{value}' is not finite"
        )));
    }
    Ok(parsed)
}

impl ConcentrationProfile {
    /// Read a profile from a CSV file.
    ///
    /// # Errors
    /// [`PumpError::InputFormat`] if there is no concentration column, a cell
    /// cannot be parsed, the profile is empty, or timestamps do not increase.
    pub fn from_path<P: AsRef<Path>>(path: P) -> PumpResult<Self> {
        let path = path.as_ref();
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        let profile = Self::from_csv(reader)?;
        info!(
            "Successfully read {} data points from {}",
            profile.points.len(),
            path.display()
        );
        Ok(profile)
    }

    /// Read a profile from any CSV byte source.
    pub fn from_reader<R: Read>(source: R) -> PumpResult<Self> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        Self::from_csv(reader)
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> PumpResult<Self> {
        let headers = reader.headers()?.clone();

        let conc_idx = find_column(headers.iter(), "concentration", None).ok_or_else(|| {
            PumpError::InputFormat("No concentration column found in the CSV file".to_string())
        })?;
        let time_idx = find_column(headers.iter(), "time", Some(conc_idx));

        let concentration_column = headers.get(conc_idx).unwrap_or_default().to_string();
        let time_column = time_idx.and_then(|idx| headers.get(idx)).map(str::to_string);

        let mut points = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            let row = i + 1;

            let concentration = match record.get(conc_idx) {
                Some(value) if !value.trim().is_empty() => {
                    parse_cell(value, &concentration_column, row)?
                }
                _ => {
                    return Err(PumpError::InputFormat(format!(
                        "row {row}: missing value in column '{concentration_column}'"
                    )))
                }
            };

            let time_s = match (time_idx, time_column.as_deref()) {
                (Some(idx), Some(name)) => match record.get(idx) {
                    Some(value) if !value.trim().is_empty() => Some(parse_cell(value, name, row)?),
                    _ => None,
                },
                _ => None,
            };

            points.push(ProfilePoint {
                time_s,
                concentration,
            });
        }

        if points.is_empty() {
            return Err(PumpError::InputFormat(
                "Concentration profile has no data rows".to_string(),
            ));
        }

        let mut last_time: Option<(usize, f64)> = None;
        for (i, point) in points.iter().enumerate() {
            if let Some(t) = point.time_s {
                if let Some((prev_row, prev)) = last_time {
                    if t <= prev {
                        return Err(PumpError::InputFormat(format!(
                            "row {}: time {t} does not increase after row {prev_row} ({prev})",
                            i + 1
                        )));
                    }
                }
                last_time = Some((i + 1, t));
            }
        }

        Ok(Self {
            concentration_column,
            time_column,
            points,
        })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if the profile has no rows.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Concentrations in file order.
    pub fn concentrations(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.concentration).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn detects_columns_case_insensitively() {
        let csv = "Time (s),Glucose Concentration (mM)\n0,5\n60,10\n120,2.5\n";
        let profile = ConcentrationProfile::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(profile.concentration_column, "Glucose Concentration (mM)");
        assert_eq!(profile.time_column.as_deref(), Some("Time (s)"));
        assert_eq!(profile.concentrations(), vec![5.0, 10.0, 2.5]);
        assert_eq!(profile.points[2].time_s, Some(120.0));
    }

    #[test]
    fn first_matching_column_wins() {
        let csv = "concentration_a,CONCENTRATION_B\n1,2\n";
        let profile = ConcentrationProfile::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(profile.concentration_column, "concentration_a");
        assert_eq!(profile.concentrations(), vec![1.0]);
        assert!(profile.time_column.is_none());
    }

    #[test]
    fn time_column_is_optional() {
        let csv = "concentration\n3\n4\n";
        let profile = ConcentrationProfile::from_reader(csv.as_bytes()).unwrap();
        assert!(profile.time_column.is_none());
        assert!(profile.points.iter().all(|p| p.time_s.is_none()));
        assert_eq!(profile.len(), 2);
    }

    #[test]
    fn concentration_time_header_is_not_reused_as_time() {
        let csv = "concentration_at_time,elapsed_time\n3,0\n4,30\n";
        let profile = ConcentrationProfile::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(profile.concentration_column, "concentration_at_time");
        assert_eq!(profile.time_column.as_deref(), Some("elapsed_time"));
    }

    #[test]
    fn missing_concentration_column_is_input_error() {
        let csv = "time,glucose\n0,1\n";
        let err = ConcentrationProfile::from_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, PumpError::InputFormat(ref msg) if msg.contains("No concentration column")));
    }

    #[test]
    fn bad_cell_reports_row() {
        let csv = "concentration\n3\nabc\n";
        let err = ConcentrationProfile::from_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, PumpError::InputFormat(ref msg) if msg.starts_with("row 2")));
    }

    #[test]
    fn empty_profile_is_rejected() {
        let err = ConcentrationProfile::from_reader("concentration\n".as_bytes()).unwrap_err();
        assert!(matches!(err, PumpError::InputFormat(_)));
    }

    #[test]
    fn non_increasing_time_is_rejected() {
        let csv = "time,concentration\n0,1\n30,2\n30,3\n";
        let err = ConcentrationProfile::from_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, PumpError::InputFormat(ref msg) if msg.starts_with("row 3")));
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "time,concentration").unwrap();
        writeln!(file, "0, 11").unwrap();
        writeln!(file, "45, 22").unwrap();
        file.flush().unwrap();

        let profile = ConcentrationProfile::from_path(file.path()).unwrap();
        assert_eq!(profile.concentrations(), vec![11.0, 22.0]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ConcentrationProfile::from_path("/nonexistent/profile.csv").is_err());
    }
}
