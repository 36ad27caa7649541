//! Run configuration: which meters apply to a run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::MeterStates;
use crate::error::ConfigError;
use crate::meter::{HardLimitMeter, Meter, RateLimitMeter};

/// The set of meters every task of a run must pass before it starts.
///
/// A `Limits` is immutable configuration and can be reused for any number of
/// runs; each run gets its own fresh meter states.
///
/// ```rust
/// use futures_meter::Limits;
///
/// let limits = Limits::new().max_at_once(4)?.max_per_second(10.0)?;
/// assert!(!limits.is_unlimited());
///
/// assert!(Limits::new().max_at_once(0).is_err());
/// # Ok::<(), futures_meter::ConfigError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Limits {
    meters: Vec<Arc<dyn Meter>>,
}

impl Limits {
    /// No limits at all: every task starts as soon as it is pulled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow at most `max_at_once` tasks to run concurrently.
    pub fn max_at_once(self, max_at_once: usize) -> Result<Self, ConfigError> {
        Ok(self.meter(HardLimitMeter::new(max_at_once)?))
    }

    /// Start at most `max_per_second` tasks per second.
    pub fn max_per_second(self, max_per_second: f64) -> Result<Self, ConfigError> {
        Ok(self.meter(RateLimitMeter::new(max_per_second)?))
    }

    /// Add a custom admission policy.
    pub fn meter(mut self, meter: impl Meter + 'static) -> Self {
        self.meters.push(Arc::new(meter));
        self
    }

    pub fn is_unlimited(&self) -> bool {
        self.meters.is_empty()
    }

    pub(crate) fn new_states(&self) -> MeterStates {
        MeterStates::new(self.meters.iter().map(|meter| meter.new_state()).collect())
    }
}

/// Serializable form of [`Limits`], for loading from configuration files.
///
/// Unset fields mean "no limit" for that dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Max tasks running at once
    #[serde(default)]
    pub max_at_once: Option<usize>,

    /// Max task starts per second
    #[serde(default)]
    pub max_per_second: Option<f64>,
}

impl TryFrom<LimitsConfig> for Limits {
    type Error = ConfigError;

    fn try_from(config: LimitsConfig) -> Result<Self, Self::Error> {
        let mut limits = Limits::new();
        if let Some(max_at_once) = config.max_at_once {
            limits = limits.max_at_once(max_at_once)?;
        }
        if let Some(max_per_second) = config.max_per_second {
            limits = limits.max_per_second(max_per_second)?;
        }
        Ok(limits)
    }
}
