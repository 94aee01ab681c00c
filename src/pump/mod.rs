//! Syringe pump channels.
//!
//! A [`PumpChannel`] is one physical pump and its link. The run sequencer only
//! sees this trait; the serial driver and the mock implement it.
//!
//! - [`command`]: the pump's text command vocabulary
//! - [`serial`]: RS-232 driver built on `tokio-serial`
//! - [`mock`]: recording channel for tests and dry runs

pub mod command;
pub mod mock;
pub mod serial;

pub use command::{round_to_pump_precision, PumpCommand, RateUnits};
pub use mock::{CallKind, CallLog, MockPump, PumpCall};
pub use serial::{SerialPump, SerialSettings};

use crate::error::PumpResult;
use async_trait::async_trait;

/// Capability: syringe pump control
///
/// # Contract
/// - Every method is one synchronous command/response exchange with the pump.
/// - `set_syringe_diameter` must be applied before any rate, since the pump
///   converts volumetric rates to plunger speed using the bore diameter.
/// - `stop` must be safe to call on a pump that is not running.
#[async_trait]
pub trait PumpChannel: Send + Sync {
    /// Human-readable channel name used in logs and errors.
    fn name(&self) -> &str;

    /// Set the syringe inner diameter in millimetres.
    async fn set_syringe_diameter(&self, diameter_mm: f64) -> PumpResult<()>;

    /// Set the infusion rate.
    async fn set_flow_rate(&self, rate: f64, units: RateUnits) -> PumpResult<()>;

    /// Start infusing at the configured rate.
    async fn start(&self) -> PumpResult<()>;

    /// Stop the pump.
    async fn stop(&self) -> PumpResult<()>;

    /// Raw status display text.
    async fn status(&self) -> PumpResult<String>;
}

#[async_trait]
impl<T: PumpChannel + ?Sized> PumpChannel for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn set_syringe_diameter(&self, diameter_mm: f64) -> PumpResult<()> {
        (**self).set_syringe_diameter(diameter_mm).await
    }

    async fn set_flow_rate(&self, rate: f64, units: RateUnits) -> PumpResult<()> {
        (**self).set_flow_rate(rate, units).await
    }

    async fn start(&self) -> PumpResult<()> {
        (**self).start().await
    }

    async fn stop(&self) -> PumpResult<()> {
        (**self).stop().await
    }

    async fn status(&self) -> PumpResult<String> {
        (**self).status().await
    }
}
