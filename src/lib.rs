//! Concurrency- and rate-limited scheduling of async work
//!
//! This crate runs a batch of independent async tasks while keeping them under
//! two kinds of admission control: a cap on how many run at once
//! ([`Limits::max_at_once`]) and a cap on how many start per second
//! ([`Limits::max_per_second`], a GCRA rate limiter). Custom policies can be
//! plugged in by implementing [`Meter`].
//!
//! Four entry points cover the usual shapes of fan-out:
//!
//! - [`run_each`]: run a function over every input and wait for all of them;
//! - [`stream_map`]: the same, but stream results lazily as they complete;
//! - [`run_all`]: run a list of closures and collect results in input order;
//! - [`run_any`]: run a list of closures and keep the first result.
//!
//! Inputs are admitted strictly one at a time in input order, and once
//! admitted tasks run concurrently. All of them are polled from within the
//! future (or stream) returned by the entry point; nothing is spawned onto the
//! executor. The first task to fail ends the run: the remaining tasks are
//! dropped and the task's own error is returned, unchanged.
//!
//! The rate limiter relies on `tokio`'s timer, so runs must be polled from
//! inside a Tokio runtime when [`Limits::max_per_second`] is used.
//!
//! ```rust
//! use futures_meter::{run_all, Limits};
//!
//! async fn square(value: u64) -> Result<u64, std::io::Error> {
//!     Ok(value * value)
//! }
//!
//! let limits = Limits::new().max_at_once(2).unwrap().max_per_second(100.0).unwrap();
//! let tasks = (1..=4).map(|value| move || square(value));
//!
//! let squares = tokio_test::block_on(run_all(tasks, &limits)).unwrap();
//! assert_eq!(squares, vec![1, 4, 9, 16]);
//! ```
mod channel;
mod common;
mod dispatch;
mod error;
mod limits;
pub mod meter;
mod run;
mod stream;

pub use error::{ConfigError, RunAnyError};
pub use limits::{Limits, LimitsConfig};
pub use meter::{HardLimitMeter, Meter, MeterState, RateLimitMeter};
pub use run::{run_all, run_any, run_each, stream_map};
pub use stream::{Indexed, StreamMap};
