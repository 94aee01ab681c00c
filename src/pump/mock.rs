//! Mock pump channel
//!
//! Records every command into a shared [`CallLog`] instead of talking to hardware.
//! Used by the test suite and by `--dry-run`. Failures can be injected on the
//! n-th occurrence of a call to exercise the sequencer's cleanup path.

use super::command::RateUnits;
use super::PumpChannel;
use crate::error::{PumpError, PumpResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Kind of call made on a pump channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// `set_syringe_diameter`
    Diameter,
    /// `set_flow_rate`
    Rate,
    /// `start`
    Start,
    /// `stop`
    Stop,
    /// `status`
    Status,
}

/// One recorded call, with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum PumpCall {
    /// Diameter set (mm)
    Diameter(f64),
    /// Rate set
    Rate(f64, RateUnits),
    /// Start
    Start,
    /// Stop
    Stop,
    /// Status query
    Status,
}

impl PumpCall {
    /// The call's kind, without arguments.
    pub fn kind(&self) -> CallKind {
        match self {
            PumpCall::Diameter(_) => CallKind::Diameter,
            PumpCall::Rate(..) => CallKind::Rate,
            PumpCall::Start => CallKind::Start,
            PumpCall::Stop => CallKind::Stop,
            PumpCall::Status => CallKind::Status,
        }
    }
}

/// A call together with the channel that received it.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    /// Channel name
    pub channel: String,
    /// The call
    pub call: PumpCall,
}

/// Ordered log of calls, shareable between several mock channels.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    records: Arc<Mutex<Vec<CallRecord>>>,
}

impl CallLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, channel: &str, call: PumpCall) {
        if let Ok(mut records) = self.records.lock() {
            records.push(CallRecord {
                channel: channel.to_string(),
                call,
            });
        }
    }

    /// Snapshot of every call, in issue order.
    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of calls of `kind` across all channels.
    pub fn count(&self, kind: CallKind) -> usize {
        self.records()
            .iter()
            .filter(|r| r.call.kind() == kind)
            .count()
    }

    /// Number of calls of `kind` on `channel`.
    pub fn count_for(&self, channel: &str, kind: CallKind) -> usize {
        self.records()
            .iter()
            .filter(|r| r.channel == channel && r.call.kind() == kind)
            .count()
    }

    /// Calls received by `channel`, in order.
    pub fn for_channel(&self, channel: &str) -> Vec<PumpCall> {
        self.records()
            .into_iter()
            .filter(|r| r.channel == channel)
            .map(|r| r.call)
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct FailRule {
    kind: CallKind,
    occurrence: usize,
}

#[derive(Debug, Default)]
struct MockState {
    diameter_mm: Option<f64>,
    rate: Option<(f64, RateUnits)>,
    running: bool,
    seen: Vec<CallKind>,
}

/// Simulated pump that records calls and tracks its own run state.
pub struct MockPump {
    name: String,
    log: CallLog,
    state: Mutex<MockState>,
    fail_rules: Vec<FailRule>,
}

impl MockPump {
    /// Create a mock writing to `log`.
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        Self {
            name: name.into(),
            log,
            state: Mutex::new(MockState::default()),
            fail_rules: Vec::new(),
        }
    }

    /// Answer the `occurrence`-th (1-based) call of `kind` with a timeout.
    ///
    /// The call is still recorded, as the command reached the wire.
    pub fn fail_on(mut self, kind: CallKind, occurrence: usize) -> Self {
        self.fail_rules.push(FailRule { kind, occurrence });
        self
    }

    /// Whether the simulated pump is currently infusing.
    pub fn is_running(&self) -> bool {
        self.state.lock().map(|s| s.running).unwrap_or(false)
    }

    /// Last rate set on the pump.
    pub fn rate(&self) -> Option<(f64, RateUnits)> {
        self.state.lock().ok().and_then(|s| s.rate)
    }

    /// Diameter set on the pump.
    pub fn diameter(&self) -> Option<f64> {
        self.state.lock().ok().and_then(|s| s.diameter_mm)
    }

    fn record(&self, call: PumpCall) -> PumpResult<()> {
        let kind = call.kind();
        self.log.push(&self.name, call.clone());

        let mut state = self
            .state
            .lock()
            .map_err(|_| PumpError::Io(std::io::Error::other("mock pump state poisoned")))?;
        state.seen.push(kind);
        let occurrence = state.seen.iter().filter(|k| **k == kind).count();

        if self
            .fail_rules
            .iter()
            .any(|rule| rule.kind == kind && rule.occurrence == occurrence)
        {
            return Err(PumpError::CommandTimeout {
                channel: self.name.clone(),
                command: format!("{kind:?}"),
                timeout_ms: 0,
            });
        }

        match call {
            PumpCall::Diameter(mm) => state.diameter_mm = Some(mm),
            PumpCall::Rate(rate, units) => state.rate = Some((rate, units)),
            PumpCall::Start => state.running = true,
            PumpCall::Stop => state.running = false,
            PumpCall::Status => {}
        }
        Ok(())
    }
}

#[async_trait]
impl PumpChannel for MockPump {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_syringe_diameter(&self, diameter_mm: f64) -> PumpResult<()> {
        self.record(PumpCall::Diameter(diameter_mm))?;
        info!(channel = %self.name, "MockPump: diameter {} mm", diameter_mm);
        Ok(())
    }

    async fn set_flow_rate(&self, rate: f64, units: RateUnits) -> PumpResult<()> {
        self.record(PumpCall::Rate(rate, units))?;
        info!(channel = %self.name, "MockPump: rate {:.4} {}", rate, units);
        Ok(())
    }

    async fn start(&self) -> PumpResult<()> {
        self.record(PumpCall::Start)?;
        info!(channel = %self.name, "MockPump: running");
        Ok(())
    }

    async fn stop(&self) -> PumpResult<()> {
        self.record(PumpCall::Stop)?;
        info!(channel = %self.name, "MockPump: stopped");
        Ok(())
    }

    async fn status(&self) -> PumpResult<String> {
        self.record(PumpCall::Status)?;
        let state = self
            .state
            .lock()
            .map_err(|_| PumpError::Io(std::io::Error::other("mock pump state poisoned")))?;
        let prompt = if state.running { '>' } else { ':' };
        Ok(match state.rate {
            Some((rate, units)) => format!("{rate} {units} {prompt}"),
            None => prompt.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order_across_channels() {
        let log = CallLog::new();
        let glucose = MockPump::new("glucose", log.clone());
        let buffer = MockPump::new("buffer", log.clone());

        glucose.set_syringe_diameter(20.0).await.unwrap();
        buffer.set_flow_rate(10.0, RateUnits::MlPerMin).await.unwrap();
        glucose.start().await.unwrap();

        let records = log.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].channel, "glucose");
        assert_eq!(records[1].call, PumpCall::Rate(10.0, RateUnits::MlPerMin));
        assert_eq!(log.count_for("glucose", CallKind::Start), 1);
        assert_eq!(log.for_channel("buffer").len(), 1);
        assert!(glucose.is_running());
        assert!(!buffer.is_running());
    }

    #[tokio::test]
    async fn injected_failure_hits_the_requested_occurrence() {
        let log = CallLog::new();
        let pump = MockPump::new("glucose", log.clone()).fail_on(CallKind::Rate, 2);

        pump.set_flow_rate(1.0, RateUnits::MlPerMin).await.unwrap();
        let err = pump
            .set_flow_rate(2.0, RateUnits::MlPerMin)
            .await
            .unwrap_err();
        assert!(matches!(err, PumpError::CommandTimeout { .. }));
        pump.set_flow_rate(3.0, RateUnits::MlPerMin).await.unwrap();

        assert_eq!(log.count(CallKind::Rate), 3);
        assert_eq!(pump.rate(), Some((3.0, RateUnits::MlPerMin)));
    }

    #[tokio::test]
    async fn status_reflects_run_state() {
        let pump = MockPump::new("buffer", CallLog::new());
        assert_eq!(pump.status().await.unwrap(), ":");
        pump.set_flow_rate(10.0, RateUnits::MlPerMin).await.unwrap();
        pump.start().await.unwrap();
        assert_eq!(pump.status().await.unwrap(), "10 MM >");
        pump.stop().await.unwrap();
        assert!(pump.status().await.unwrap().ends_with(':'));
    }
}
