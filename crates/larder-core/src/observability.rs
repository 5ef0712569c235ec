//! Logging initialization.
//!
//! Pantry operations log through `tracing`; this module only wires up
//! the subscriber. Skip-with-warning paths (malformed manifests during
//! a rescan, incomplete untracks) are the events worth watching at the
//! default level.

use std::str::FromStr;
use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::Error;

static INIT: Once = Once::new();

/// Filter applied when `RUST_LOG` is unset. sqlx logs every statement
/// at info, which drowns out catalog events on the relational index
/// backends.
const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(Error::InvalidInput(format!(
                "unknown log format '{other}', expected 'json' or 'pretty'"
            ))),
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup; subsequent calls are no-ops.
/// `RUST_LOG` overrides the default directives (e.g.
/// `larder_catalog=debug`).
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

        let registry = tracing_subscriber::registry().with(env_filter);
        match format {
            LogFormat::Json => {
                registry
                    .with(tracing_subscriber::fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                registry
                    .with(tracing_subscriber::fmt::layer().pretty())
                    .init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_known_names() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("verbose".parse::<LogFormat>().is_err());
    }

    #[test]
    fn default_format_is_pretty() {
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }
}
