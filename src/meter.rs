//! Admission-control policies.
//!
//! A [`Meter`] is an immutable policy. Each run asks every meter for a fresh
//! [`MeterState`], which then lives exactly as long as that run. Before a task
//! starts, the dispatcher waits on every state in turn, tells all of them the
//! task started, and once the task is gone (finished, failed or cancelled) tells
//! them it finished.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{check_strictly_positive, ConfigError};

/// Live admission state of one meter for one run.
#[async_trait]
pub trait MeterState: Send + Sync {
    /// Suspend until one more task may start.
    ///
    /// The dispatcher never has more than one of these calls in flight per run.
    async fn wait_task_can_start(&self);

    /// Record that an admitted task has started.
    fn notify_task_started(&self);

    /// Record that a previously started task is gone.
    ///
    /// Called exactly once per started task, including tasks that failed or
    /// were cancelled. It runs from a drop guard, hence it is synchronous.
    fn notify_task_finished(&self);
}

/// An admission-control policy.
pub trait Meter: Send + Sync + fmt::Debug {
    /// Creates the state for a new run.
    fn new_state(&self) -> Box<dyn MeterState>;
}

/// Caps the number of tasks running at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardLimitMeter {
    max_at_once: usize,
}

impl HardLimitMeter {
    /// Creates a meter that lets at most `max_at_once` tasks run concurrently.
    ///
    /// Fails if `max_at_once` is 0 or above [`Semaphore::MAX_PERMITS`].
    pub fn new(max_at_once: usize) -> Result<Self, ConfigError> {
        check_strictly_positive("max_at_once", max_at_once as f64)?;
        if max_at_once > Semaphore::MAX_PERMITS {
            return Err(ConfigError::TooManyAtOnce {
                value: max_at_once,
                max: Semaphore::MAX_PERMITS,
            });
        }
        Ok(Self { max_at_once })
    }

    pub fn max_at_once(&self) -> usize {
        self.max_at_once
    }
}

impl Meter for HardLimitMeter {
    fn new_state(&self) -> Box<dyn MeterState> {
        Box::new(HardLimitState {
            semaphore: Semaphore::new(self.max_at_once),
        })
    }
}

struct HardLimitState {
    semaphore: Semaphore,
}

#[async_trait]
impl MeterState for HardLimitState {
    async fn wait_task_can_start(&self) {
        // Waiting and taking the slot are the same step here. The permit is
        // handed back by `notify_task_finished`, not by a guard.
        if let Ok(permit) = self.semaphore.acquire().await {
            permit.forget();
        }
    }

    fn notify_task_started(&self) {}

    fn notify_task_finished(&self) {
        self.semaphore.add_permits(1);
    }
}

/// Caps how many tasks may start per second.
///
/// Uses the virtual scheduling form of the Generic Cell Rate Algorithm with a
/// burst of a single task: after an idle period one task starts immediately,
/// after that starts are spaced `1 / max_per_second` apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitMeter {
    max_per_second: f64,
    period: Duration,
}

impl RateLimitMeter {
    /// Burst size. Fixed for now.
    const MAX_PER_PERIOD: u32 = 1;

    /// Used in place of start times too far out for the clock to represent.
    const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

    /// Creates a meter starting at most `max_per_second` tasks per second.
    ///
    /// Fails if the rate is not strictly positive, or so small that its period
    /// does not fit in a [`Duration`].
    pub fn new(max_per_second: f64) -> Result<Self, ConfigError> {
        check_strictly_positive("max_per_second", max_per_second)?;
        let period = Duration::try_from_secs_f64(1.0 / max_per_second)
            .map_err(|_| ConfigError::RateOutOfRange(max_per_second))?;
        Ok(Self {
            max_per_second,
            period,
        })
    }

    pub fn max_per_second(&self) -> f64 {
        self.max_per_second
    }

    /// Time between two task starts.
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Meter for RateLimitMeter {
    fn new_state(&self) -> Box<dyn MeterState> {
        Box::new(RateState {
            period: self.period,
            task_delta: self.period / Self::MAX_PER_PERIOD,
            next_start_time: Mutex::new(Instant::now()),
        })
    }
}

struct RateState {
    period: Duration,
    task_delta: Duration,
    /// Theoretical arrival time of the next task.
    next_start_time: Mutex<Instant>,
}

impl RateState {
    fn next_start_time(&self) -> Instant {
        *self.next_start_time.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MeterState for RateState {
    async fn wait_task_can_start(&self) {
        let threshold = self.period - self.task_delta;
        loop {
            let now = Instant::now();
            let next_start_time = self.next_start_time().max(now);
            let time_until_start = next_start_time - now;
            if time_until_start <= threshold {
                break;
            }
            let delay = time_until_start - threshold;
            trace!(?delay, "rate limit reached, delaying next start");
            tokio::time::sleep(delay).await;
        }
    }

    fn notify_task_started(&self) {
        let now = Instant::now();
        let mut next_start_time = self
            .next_start_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *next_start_time = (*next_start_time)
            .max(now)
            .checked_add(self.task_delta)
            .unwrap_or_else(|| now + RateLimitMeter::FAR_FUTURE);
    }

    fn notify_task_finished(&self) {}
}
