//! Structured logging setup shared by the forwarder service and its CLI.
//!
//! `tracing`/`tracing-subscriber` with an `EnvFilter` driven by `RUST_LOG`,
//! ANSI color only on a real TTY. No telemetry layers (Sentry /
//! OpenTelemetry) — out of scope for this service.

mod err_with_sources;

use anyhow::{Context, Result};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::ParseError, fmt, layer::SubscriberExt as _,
    util::SubscriberInitExt as _,
};

pub use err_with_sources::{ErrorWithSources, err_with_src};

/// Crates that are noisy at `debug` and below and are almost never what you
/// want to see when chasing a forwarder bug.
const IRRELEVANT_CRATES: &str = "rustls=warn,hyper_util=warn";

/// Installs a global `tracing` subscriber that writes to stdout.
///
/// The active filter comes from `RUST_LOG`, falling back to `default_directives`.
pub fn init(default_directives: &str) -> Result<()> {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| default_directives.to_string());
    let filter = try_filter(&directives).context("Failed to parse log directives")?;

    let subscriber = Registry::default().with(
        fmt::layer()
            .with_ansi(stdout_supports_ansi())
            .with_filter(filter),
    );

    subscriber
        .try_init()
        .context("Failed to install global tracing subscriber")?;

    Ok(())
}

/// Constructs an opinionated [`EnvFilter`] with known-noisy crates pre-silenced.
pub fn try_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    if directives.is_empty() {
        return EnvFilter::try_new(IRRELEVANT_CRATES);
    }

    EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{directives}"))
}

/// Whether stdout looks like it supports ANSI colour codes.
pub fn stdout_supports_ansi() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stdout())
}

/// Installs a subscriber scoped to the current test, for use in `#[test]` functions.
pub fn test(directives: &str) -> tracing::subscriber::DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_prepends_irrelevant_crates() {
        let filter = try_filter("info").unwrap();
        assert!(filter.to_string().contains("info"));
    }

    #[test]
    fn empty_directives_still_produce_a_filter() {
        assert!(try_filter("").is_ok());
    }
}
