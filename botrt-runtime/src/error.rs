use crate::config::ConfigError;
use thiserror::Error;

/// Failure of a runtime entry point
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The entry exhausted its step budget. Actions recorded before the
    /// budget ran out were still emitted.
    #[error("Ran out of energy")]
    OutOfEnergy,

    #[error("Runtime has been unsubscribed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Script error: {0}")]
    Script(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
