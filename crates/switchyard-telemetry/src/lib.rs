//! Logging setup for switchyard
//!
//! Installs a `tracing-subscriber` registry with an env filter and a text or
//! JSON formatter.

use switchyard_config::{LogFormat, TelemetryConfig};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the global subscriber
///
/// `RUST_LOG` wins over `log_filter`, which wins over the configured filter.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed
pub fn init(config: &TelemetryConfig, log_filter: Option<&str>) -> anyhow::Result<()> {
    let directives = filter_directives(config, log_filter);
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("invalid log filter {directives:?} ({e}), falling back to info");
        EnvFilter::new("info")
    });

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()?,
    }

    Ok(())
}

fn filter_directives(config: &TelemetryConfig, log_filter: Option<&str>) -> String {
    std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| log_filter.map(str::to_owned))
        .unwrap_or_else(|| config.filter.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(filter: &str) -> TelemetryConfig {
        TelemetryConfig {
            filter: filter.to_owned(),
            format: LogFormat::Text,
        }
    }

    #[test]
    fn rust_log_takes_precedence() {
        temp_env::with_var("RUST_LOG", Some("debug"), || {
            assert_eq!(filter_directives(&config("warn"), Some("trace")), "debug");
        });
    }

    #[test]
    fn override_beats_config() {
        temp_env::with_var_unset("RUST_LOG", || {
            assert_eq!(filter_directives(&config("warn"), Some("switchyard=trace")), "switchyard=trace");
            assert_eq!(filter_directives(&config("warn"), None), "warn");
        });
    }

    #[test]
    fn blank_rust_log_is_ignored() {
        temp_env::with_var("RUST_LOG", Some("  "), || {
            assert_eq!(filter_directives(&config("warn"), None), "warn");
        });
    }
}
