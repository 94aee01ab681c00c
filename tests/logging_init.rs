//! Subscriber installation runs in its own test binary; the global dispatcher
//! can only be set once per process.

use dapp_pumps::config::AppConfig;
use dapp_pumps::logging::{self, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn init_is_idempotent() {
    let config = TracingConfig::new(Level::ERROR).with_format(OutputFormat::Compact);
    assert!(logging::init(config).is_ok());
    assert!(logging::init(TracingConfig::new(Level::WARN)).is_ok());
    assert!(logging::init_from_config(&AppConfig::default()).is_ok());
}

#[test]
fn bad_configured_level_is_rejected_before_install() {
    let mut config = AppConfig::default();
    config.application.log_level = "chatty".to_string();
    assert!(logging::init_from_config(&config).is_err());
}
