//! Error types.

use thiserror::Error;

/// A meter was configured with an unusable bound.
///
/// Raised when the meter (or a [`Limits`](crate::Limits)) is built, never from
/// inside a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("'{name}' must be > 0, got {value}")]
    NotStrictlyPositive { name: &'static str, value: f64 },

    #[error("'max_per_second' of {0} is too small to schedule")]
    RateOutOfRange(f64),

    #[error("'max_at_once' must be at most {max}, got {value}")]
    TooManyAtOnce { value: usize, max: usize },
}

/// Failure of [`run_any`](crate::run_any).
#[derive(Debug, Error)]
pub enum RunAnyError<E> {
    /// No candidate was supplied, so nothing could produce a result.
    #[error("run_any needs at least one candidate")]
    Empty,

    /// A candidate failed before any other one succeeded.
    #[error("{0}")]
    Failed(E),
}

impl<E> RunAnyError<E> {
    /// Returns the candidate's own error, if there was one.
    pub fn into_failure(self) -> Option<E> {
        match self {
            RunAnyError::Empty => None,
            RunAnyError::Failed(err) => Some(err),
        }
    }
}

pub(crate) fn check_strictly_positive(
    name: &'static str,
    value: f64,
) -> Result<(), ConfigError> {
    // Written this way round so NaN is rejected too.
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotStrictlyPositive { name, value })
    }
}
