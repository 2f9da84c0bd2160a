use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::infrastructure::config::AppConfig;
use crate::shared::error::SvckitError;

/// Valid values for the `log_level` parameter.
pub const LEVEL_CHOICES: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Valid values for the `log_format` parameter.
pub const FORMAT_CHOICES: &[&str] = &["text", "json"];

/// Initialize the process-wide tracing subscriber from the `log_level` and
/// `log_format` config parameters.
///
/// The subscriber is installed once per process; later calls validate the
/// parameters and otherwise do nothing, so repeated runs in one process are
/// safe.
pub fn init_logging(config: &AppConfig) -> Result<(), SvckitError> {
    let level = config.get_str("log_level").unwrap_or_else(|| "info".to_string());
    let format = config.get_str("log_format").unwrap_or_else(|| "text".to_string());

    level
        .parse::<Level>()
        .map_err(|e| SvckitError::Logging(format!("invalid log level '{level}': {e}")))?;
    if !FORMAT_CHOICES.contains(&format.as_str()) {
        return Err(SvckitError::Logging(format!(
            "invalid log format '{format}', expected one of {FORMAT_CHOICES:?}"
        )));
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.clone()));

    let registry = tracing_subscriber::registry().with(env_filter);
    let initialized = if format == "json" {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .is_ok()
    } else {
        registry
            .with(fmt::layer().with_target(false))
            .try_init()
            .is_ok()
    };

    if initialized {
        tracing::debug!("logging initialized with level={level} format={format}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ConfigSpec;

    fn config_with(args: &[&str]) -> AppConfig {
        let argv: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        AppConfig::resolve(ConfigSpec::new("test-app", "desc"), Some(&argv)).unwrap()
    }

    #[test]
    fn test_init_logging_defaults() {
        let config = config_with(&[]);
        assert!(init_logging(&config).is_ok());
        // A second call must be a harmless no-op.
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn test_init_logging_json_format() {
        let config = config_with(&["--log-format", "json", "--log-level", "debug"]);
        assert!(init_logging(&config).is_ok());
    }
}
