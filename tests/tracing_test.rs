//! Subscriber installation. Lives in its own test binary because it installs a
//! process-wide global subscriber.

use signal_lab::config::LabConfig;
use signal_lab::tracing_setup::{self, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    let config = TracingConfig::new(Level::DEBUG)
        .with_format(OutputFormat::Compact)
        .with_ansi(false);
    tracing_setup::init(config.clone()).unwrap();
    tracing_setup::init(config.with_format(OutputFormat::Json)).unwrap();
    tracing_setup::init_from_config(&LabConfig::default()).unwrap();
    tracing::info!(target: "signal_lab", "subscriber installed");
}
