/*!
 * Logging initialization
 *
 * `RUST_LOG` wins when set; otherwise only `courier` events at the configured
 * level are kept. Output is compact text on stdout, or JSON lines when a log
 * file is configured.
 */

use std::fs::File;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::CourierConfig;
use crate::error::{CourierError, Result};

/// Install the global subscriber for `config`
pub fn init_logging(config: &CourierConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("courier={}", effective_level(config))))
        .map_err(|e| CourierError::Config(format!("invalid log filter: {}", e)))?;
    let registry = tracing_subscriber::registry().with(filter);

    match &config.log_file {
        Some(path) => {
            let file = File::create(path).map_err(|e| CourierError::local_io(path, e))?;
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(Arc::new(file)))
                .try_init()
        }
        None => registry.with(fmt::layer().compact()).try_init(),
    }
    .map_err(|e| CourierError::Config(format!("logging already initialised: {}", e)))
}

/// Level used when `RUST_LOG` is not set
pub fn effective_level(config: &CourierConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_configured_level() {
        let config = CourierConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::WARN);
    }

    #[test]
    fn test_verbose_overrides_log_level() {
        let config = CourierConfig {
            log_level: LogLevel::Error,
            verbose: true,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::DEBUG);
    }
}
