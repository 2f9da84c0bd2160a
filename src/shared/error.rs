use thiserror::Error;

/// Operational fault categories of the scaffold.
///
/// A shutdown request is deliberately not represented here: requesting
/// termination is normal control flow, carried by
/// [`crate::infrastructure::shutdown::ShutdownSignal`], and must never show
/// up in error logs as a failure.
#[derive(Error, Debug)]
pub enum SvckitError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Command-line error: {0}")]
    Cli(String),

    #[error("Logging setup error: {0}")]
    Logging(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Health endpoint error: {0}")]
    Health(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<clap::Error> for SvckitError {
    fn from(err: clap::Error) -> Self {
        SvckitError::Cli(err.to_string())
    }
}
