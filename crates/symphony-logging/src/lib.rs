//! Logging setup shared by Symphony binaries, simulations and tests.
//!
//! Every crate logs through `tracing`; this crate only installs the
//! subscriber. `RUST_LOG` overrides the default filter.

use std::sync::Once;

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "symphony=info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

fn env_filter(default: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(default)?),
    }
}

/// Install the fmt subscriber, failing if one is already set.
pub fn try_init(default_filter: &str) -> Result<(), LoggingError> {
    tracing_subscriber::registry()
        .with(env_filter(default_filter)?)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}

/// Install the fmt subscriber with [`DEFAULT_FILTER`]. Later calls are no-ops.
pub fn init() {
    if let Err(e) = try_init(DEFAULT_FILTER) {
        tracing::debug!("Logging not initialised: {}", e);
    }
}

static TEST_INIT: Once = Once::new();

/// Capture logs in the test harness output. Safe to call from every test.
pub fn init_for_tests() {
    TEST_INIT.call_once(|| {
        let filter = env_filter("symphony=debug").unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_init_is_idempotent() {
        init_for_tests();
        init_for_tests();
        tracing::info!("still logging");
    }

    #[test]
    fn second_install_is_reported() {
        init_for_tests();
        assert!(matches!(
            try_init(DEFAULT_FILTER),
            Err(LoggingError::AlreadyInstalled(_))
        ));
    }
}
