//! RS-232 syringe pump driver.
//!
//! Reference: Harvard Apparatus Pump 11 / PHD series RS-232 command set
//!
//! Protocol Overview:
//! - Format: ASCII command/response over RS-232
//! - Baud: 9600, 8 data bits, no parity, 2 stop bits, no flow control
//! - Terminator: CR (`\r`)
//! - The pump needs a short processing delay before its reply can be read
//!
//! # Example Usage
//!
//! ```no_run
//! use dapp_pumps::pump::{PumpChannel, RateUnits, SerialPump, SerialSettings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pump = SerialPump::open("glucose", "/dev/ttyUSB0", SerialSettings::default()).await?;
//!
//!     pump.set_syringe_diameter(20.0).await?;
//!     pump.set_flow_rate(5.0, RateUnits::MlPerMin).await?;
//!     pump.start().await?;
//!     println!("{}", pump.status().await?);
//!     pump.stop().await?;
//!
//!     Ok(())
//! }
//! ```

use super::command::{PumpCommand, RateUnits};
use super::PumpChannel;
use crate::error::{PumpError, PumpResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, instrument};

/// Window used to collect the tail of a reply once its first bytes arrived.
const DRAIN_WINDOW: Duration = Duration::from_millis(20);

/// Any async byte stream a pump can be driven over.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}
type DynSerial = Box<dyn SerialPortIO>;

/// Serial link parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Communication speed
    pub baud_rate: u32,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// How long to wait for the first byte of a reply
    pub response_timeout_ms: u64,
    /// Pause between writing a command and reading the reply
    pub processing_delay_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            stop_bits: 2,
            response_timeout_ms: 2000,
            processing_delay_ms: 100,
        }
    }
}

impl SerialSettings {
    /// Reply timeout as a `Duration`.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Processing delay as a `Duration`.
    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }

    fn tokio_stop_bits(&self) -> tokio_serial::StopBits {
        if self.stop_bits >= 2 {
            tokio_serial::StopBits::Two
        } else {
            tokio_serial::StopBits::One
        }
    }
}

/// Driver for one syringe pump on a serial port.
///
/// Implements [`PumpChannel`]. Each call writes one command and reads one reply.
pub struct SerialPump {
    name: String,
    /// Serial port protected by Mutex for exclusive access
    port: Mutex<DynSerial>,
    settings: SerialSettings,
}

impl SerialPump {
    /// Open the pump on `port_path`.
    ///
    /// # Errors
    /// [`PumpError::ChannelUnavailable`] if the port cannot be opened.
    pub async fn open(
        name: impl Into<String>,
        port_path: &str,
        settings: SerialSettings,
    ) -> PumpResult<Self> {
        let name = name.into();
        let port_path_owned = port_path.to_string();
        let baud_rate = settings.baud_rate;
        let stop_bits = settings.tokio_stop_bits();

        info!(channel = %name, port = %port_path, "Trying to connect to pump");

        // Use spawn_blocking to avoid blocking the async runtime
        let port = spawn_blocking(move || {
            tokio_serial::new(&port_path_owned, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(stop_bits)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
        })
        .await
        .map_err(|e| PumpError::ChannelUnavailable {
            port: port_path.to_string(),
            reason: format!("port opening task failed: {e}"),
        })?
        .map_err(|e| PumpError::ChannelUnavailable {
            port: port_path.to_string(),
            reason: e.to_string(),
        })?;

        info!(channel = %name, port = %port_path, "Connected to pump");
        Ok(Self::from_stream(name, port, settings))
    }

    /// Drive a pump over an already-open byte stream.
    pub fn from_stream(
        name: impl Into<String>,
        stream: impl SerialPortIO + 'static,
        settings: SerialSettings,
    ) -> Self {
        Self {
            name: name.into(),
            port: Mutex::new(Box::new(stream)),
            settings,
        }
    }

    /// Send one command and return the trimmed reply.
    pub async fn send_command(&self, command: PumpCommand) -> PumpResult<String> {
        let mut port = self.port.lock().await;
        let text = command.text();

        port.write_all(&command.to_wire()).await?;
        port.flush().await?;

        // Allow time for processing
        tokio::time::sleep(self.settings.processing_delay()).await;

        let mut buf = [0u8; 256];
        let mut reply = Vec::new();
        match tokio::time::timeout(self.settings.response_timeout(), port.read(&mut buf)).await {
            Ok(Ok(0)) => {
                return Err(PumpError::NoResponse {
                    channel: self.name.clone(),
                    command: text,
                })
            }
            Ok(Ok(n)) => reply.extend_from_slice(&buf[..n]),
            Ok(Err(e)) => return Err(PumpError::Io(e)),
            Err(_) => {
                return Err(PumpError::CommandTimeout {
                    channel: self.name.clone(),
                    command: text,
                    timeout_ms: self.settings.response_timeout_ms,
                })
            }
        }

        // Collect whatever else is already on the wire
        while let Ok(Ok(n)) = tokio::time::timeout(DRAIN_WINDOW, port.read(&mut buf)).await {
            if n == 0 {
                break;
            }
            reply.extend_from_slice(&buf[..n]);
        }

        let response = String::from_utf8_lossy(&reply).trim().to_string();
        debug!(channel = %self.name, "Sent: {} | Response: {}", text, response);

        if response.contains("OOR") || response.contains('?') {
            return Err(PumpError::CommandRejected {
                channel: self.name.clone(),
                command: text,
                reply: response,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl PumpChannel for SerialPump {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(channel = %self.name), err)]
    async fn set_syringe_diameter(&self, diameter_mm: f64) -> PumpResult<()> {
        self.send_command(PumpCommand::Diameter(diameter_mm)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(channel = %self.name), err)]
    async fn set_flow_rate(&self, rate: f64, units: RateUnits) -> PumpResult<()> {
        self.send_command(PumpCommand::Rate(rate, units)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(channel = %self.name), err)]
    async fn start(&self) -> PumpResult<()> {
        self.send_command(PumpCommand::Run).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(channel = %self.name), err)]
    async fn stop(&self) -> PumpResult<()> {
        self.send_command(PumpCommand::Stop).await?;
        Ok(())
    }

    async fn status(&self) -> PumpResult<String> {
        self.send_command(PumpCommand::Display).await
    }
}
