pub mod log_config;
pub use log_config::{LogConfig, LogLevel, OutputFormat};

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the process-wide subscriber from `LogConfig::from_env()`.
///
/// Safe to call from every test; only the first call has an effect.
pub fn init_test_logging() {
    init_logging(&LogConfig::from_env());
}

pub fn init_logging(config: &LogConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.filter_string()));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.include_target)
            .with_test_writer();

        // Another subscriber may already be installed (e.g. by tracing-test).
        let _ = match config.format {
            OutputFormat::Json => builder.json().try_init(),
            OutputFormat::Pretty => builder.pretty().try_init(),
            OutputFormat::Text => builder.try_init(),
        };
    });
}
