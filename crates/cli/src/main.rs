use std::process::ExitCode;

use shopkeep_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

/// Logs go to stderr; stdout carries the command's JSON payload.
fn init_logging(config: &AppConfig) {
    use shopkeep_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_env("SHOPKEEP_LOG_FILTER")
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

fn main() -> ExitCode {
    // A broken config is reported by the command itself.
    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        init_logging(&config);
    }
    shopkeep_cli::run()
}
