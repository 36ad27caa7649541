//! Entry points.

use std::collections::BTreeMap;

use futures::stream::{StreamExt, TryStreamExt};
use futures::{pin_mut, TryFuture};
use tracing::debug;

use crate::dispatch::Dispatch;
use crate::error::RunAnyError;
use crate::limits::Limits;
use crate::stream::StreamMap;

/// Runs `task_fn` on every item of `args` and waits for all of them.
///
/// Results are discarded. The first task error is returned unchanged and the
/// remaining tasks are cancelled.
///
/// ```rust
/// use std::sync::Mutex;
/// use futures_meter::{run_each, Limits};
///
/// let seen = Mutex::new(Vec::new());
/// let limits = Limits::new().max_at_once(2).unwrap();
///
/// tokio_test::block_on(async {
///     run_each(
///         |item: u32| {
///             let seen = &seen;
///             async move {
///                 seen.lock().unwrap().push(item);
///                 Ok::<_, std::io::Error>(())
///             }
///         },
///         1..=3,
///         &limits,
///     )
///     .await
///     .unwrap();
/// });
///
/// let mut seen = seen.into_inner().unwrap();
/// seen.sort();
/// assert_eq!(seen, vec![1, 2, 3]);
/// ```
pub async fn run_each<I, F, Fut>(task_fn: F, args: I, limits: &Limits) -> Result<(), Fut::Error>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: TryFuture,
{
    Dispatch::new(task_fn, args.into_iter(), limits.new_states(), None).await
}

/// Runs `task_fn` on every item of `args`, streaming results as tasks
/// complete.
///
/// Use [`StreamMap::with_index`] to learn which input each result belongs to.
/// Dropping the stream cancels the tasks still running.
///
/// ```rust
/// use futures::TryStreamExt;
/// use futures_meter::{stream_map, Limits};
///
/// async fn double(value: u64) -> Result<u64, std::io::Error> {
///     Ok(value * 2)
/// }
///
/// tokio_test::block_on(async {
///     let limits = Limits::new().max_at_once(4).unwrap();
///     let mut doubled: Vec<u64> = stream_map(double, 0..10, &limits)
///         .try_collect()
///         .await
///         .unwrap();
///     doubled.sort();
///     assert_eq!(doubled, (0..20).step_by(2).collect::<Vec<_>>());
/// });
/// ```
pub fn stream_map<I, F, Fut>(task_fn: F, args: I, limits: &Limits) -> StreamMap<I::IntoIter, F, Fut>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: TryFuture,
{
    StreamMap::new(task_fn, args.into_iter(), limits)
}

/// Runs every task and returns their results in input order.
///
/// ```rust
/// use std::time::Duration;
/// use futures_meter::{run_all, Limits};
///
/// async fn fetch(name: &'static str, delay: u64) -> Result<&'static str, std::io::Error> {
///     tokio::time::sleep(Duration::from_millis(delay)).await;
///     Ok(name)
/// }
///
/// tokio_test::block_on(async {
///     let tasks = [("slow", 20), ("fast", 1)].map(|(name, delay)| move || fetch(name, delay));
///     let results = run_all(tasks, &Limits::new()).await.unwrap();
///     assert_eq!(results, vec!["slow", "fast"]);
/// });
/// ```
pub async fn run_all<I, Fut>(tasks: I, limits: &Limits) -> Result<Vec<Fut::Ok>, Fut::Error>
where
    I: IntoIterator,
    I::Item: FnOnce() -> Fut,
    Fut: TryFuture,
{
    let results = stream_map(|task: I::Item| task(), tasks, limits).with_index();
    pin_mut!(results);

    let mut indexed = BTreeMap::new();
    while let Some((index, value)) = results.try_next().await? {
        indexed.insert(index, value);
    }
    Ok(list_from_indexed(indexed))
}

/// Runs tasks until one succeeds, returns its result and cancels the rest.
///
/// Fails with [`RunAnyError::Empty`] if there are no tasks, or with
/// [`RunAnyError::Failed`] if a task fails before any succeeds.
pub async fn run_any<I, Fut>(tasks: I, limits: &Limits) -> Result<Fut::Ok, RunAnyError<Fut::Error>>
where
    I: IntoIterator,
    I::Item: FnOnce() -> Fut,
    Fut: TryFuture,
{
    let results = stream_map(|task: I::Item| task(), tasks, limits);
    pin_mut!(results);

    match results.next().await {
        Some(Ok(value)) => {
            debug!("run_any got a result, cancelling the other tasks");
            Ok(value)
        }
        Some(Err(err)) => Err(RunAnyError::Failed(err)),
        None => Err(RunAnyError::Empty),
    }
}

/// Given `{0: v0, ..., n: vn}`, returns `[v0, ..., vn]`.
fn list_from_indexed<T>(indexed: BTreeMap<usize, T>) -> Vec<T> {
    debug_assert!(
        indexed.keys().copied().eq(0..indexed.len()),
        "results are missing for some inputs"
    );
    indexed.into_values().collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use proptest::prelude::*;
    use tokio::time::Instant;

    use super::*;
    use crate::common::tests::CountingMeter;

    #[derive(Debug, PartialEq)]
    struct Failure;

    async fn dummy(value: u64) -> Result<u64, Failure> {
        Ok(value)
    }

    /// Sleeps `ticks` milliseconds and then returns `value`.
    async fn dummy_delayed(value: &'static str, ticks: u64) -> Result<&'static str, Failure> {
        tokio::time::sleep(Duration::from_millis(ticks)).await;
        Ok(value)
    }

    #[derive(Debug, Default)]
    struct Observed {
        done: AtomicBool,
        dropped: AtomicBool,
    }

    /// Like `dummy_delayed`, recording whether it completed and when it was
    /// dropped.
    async fn observed(
        value: &'static str,
        ticks: u64,
        flags: Arc<Observed>,
    ) -> Result<&'static str, Failure> {
        struct OnDrop(Arc<Observed>);
        impl Drop for OnDrop {
            fn drop(&mut self) {
                self.0.dropped.store(true, Ordering::SeqCst);
            }
        }
        let on_drop = OnDrop(flags);
        let output = dummy_delayed(value, ticks).await;
        on_drop.0.done.store(true, Ordering::SeqCst);
        output
    }

    #[tokio::test]
    async fn test_run_each() {
        let output = Mutex::new(HashSet::new());
        let process = |item: &'static str| {
            output.lock().unwrap().insert(item);
            async { Ok::<_, Failure>(()) }
        };

        let items = ["apple", "banana", "cherry", "apple"];
        assert_eq!(run_each(process, items, &Limits::new()).await, Ok(()));
        assert_eq!(
            output.into_inner().unwrap(),
            HashSet::from(["apple", "banana", "cherry"])
        );
    }

    #[tokio::test]
    async fn test_run_each_failure() {
        let items = ["a", "b", "fail", "a"];
        let process = |item: &str| {
            let outcome = if item == "fail" { Err(Failure) } else { Ok(()) };
            async move { outcome }
        };
        assert_eq!(run_each(process, items, &Limits::new()).await, Err(Failure));
    }

    #[tokio::test]
    async fn test_stream_map_waits_for_all() {
        let called = AtomicUsize::new(0);
        let process = |_: &str| {
            called.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Failure>(()) }
        };

        let results = stream_map(process, ["apple", "banana", "cherry", "apple"], &Limits::new());
        assert_eq!(results.count().await, 4);
        assert_eq!(called.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_all_keeps_input_order() {
        let tasks =
            [("fast", 1), ("slow", 100)].map(|(value, ticks)| move || dummy_delayed(value, ticks));
        assert_eq!(run_all(tasks, &Limits::new()).await, Ok(vec!["fast", "slow"]));

        let tasks =
            [("slow", 100), ("fast", 1)].map(|(value, ticks)| move || dummy_delayed(value, ticks));
        assert_eq!(run_all(tasks, &Limits::new()).await, Ok(vec!["slow", "fast"]));
    }

    #[tokio::test]
    async fn test_run_all_empty() {
        let tasks: Vec<fn() -> std::future::Ready<Result<u8, Failure>>> = Vec::new();
        assert_eq!(run_all(tasks, &Limits::new()).await, Ok(vec![]));
    }

    #[tokio::test]
    async fn test_run_all_failure() {
        let tasks = (0..4).map(|value| {
            move || async move {
                if value == 2 {
                    Err(Failure)
                } else {
                    dummy(value).await
                }
            }
        });
        assert_eq!(run_all(tasks, &Limits::new()).await, Err(Failure));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_any_cancels_the_rest() {
        let fast = Arc::new(Observed::default());
        let slow = Arc::new(Observed::default());

        let tasks = [("fast", 1, Arc::clone(&fast)), ("slow", 100, Arc::clone(&slow))]
            .map(|(value, ticks, flags)| move || observed(value, ticks, flags));

        assert_eq!(run_any(tasks, &Limits::new()).await.ok(), Some("fast"));
        assert!(fast.done.load(Ordering::SeqCst));
        assert!(slow.dropped.load(Ordering::SeqCst));
        assert!(!slow.done.load(Ordering::SeqCst));

        // Nothing keeps running in the background.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!slow.done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_any_empty() {
        let tasks: Vec<fn() -> std::future::Ready<Result<u8, Failure>>> = Vec::new();
        assert!(matches!(
            run_any(tasks, &Limits::new()).await,
            Err(RunAnyError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_run_any_failure() {
        let tasks = [|| async { Err::<u8, _>(Failure) }];
        assert!(matches!(
            run_any(tasks, &Limits::new()).await,
            Err(RunAnyError::Failed(Failure))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_at_once() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let limits = Limits::new().max_at_once(4).unwrap();

        let process = |_: u32| {
            let (running, peak) = (Arc::clone(&running), Arc::clone(&peak));
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, Failure>(())
            }
        };
        run_each(process, 0..50, &limits).await.unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_max_at_once_above_semaphore_max() {
        assert!(Limits::new().max_at_once(usize::MAX).is_err());

        let limits = Limits::new().max_at_once(tokio::sync::Semaphore::MAX_PERMITS).unwrap();
        let tasks = (0..3).map(|value| move || dummy(value));
        assert_eq!(run_all(tasks, &limits).await, Ok(vec![0, 1, 2]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_rate_still_starts_first_task() {
        let limits = Limits::new().max_per_second(1e-19).unwrap();
        assert_eq!(run_all([|| dummy(7)], &limits).await, Ok(vec![7]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_per_second() {
        let starts = Mutex::new(Vec::new());
        let limits = Limits::new().max_per_second(10.0).unwrap();

        let process = |_: u32| {
            starts.lock().unwrap().push(Instant::now());
            async { Ok::<_, Failure>(()) }
        };
        run_each(process, 0..5, &limits).await.unwrap();

        let starts = starts.into_inner().unwrap();
        assert_eq!(starts.len(), 5);
        // One immediate start, then one every 100ms.
        let elapsed = starts[4] - starts[0];
        assert!(elapsed >= Duration::from_millis(399), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(420), "{elapsed:?}");
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(99));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_limits() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let limits = Limits::new()
            .max_at_once(2)
            .unwrap()
            .max_per_second(100.0)
            .unwrap();

        let started = Instant::now();
        let process = |_: u32| {
            let (running, peak) = (Arc::clone(&running), Arc::clone(&peak));
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, Failure>(())
            }
        };
        run_each(process, 0..6, &limits).await.unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        // Concurrency dominates: three waves of 50ms.
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_meters_balanced_after_failure() {
        let meter = CountingMeter::default();
        let limits = Limits::new().meter(meter.clone()).max_at_once(3).unwrap();

        let tasks = (0..10u64).map(|value| {
            move || async move {
                tokio::time::sleep(Duration::from_millis(10 * value)).await;
                if value == 4 {
                    return Err(Failure);
                }
                Ok(value)
            }
        });
        assert_eq!(run_all(tasks, &limits).await, Err(Failure));

        let started = meter.counts.started.load(Ordering::SeqCst);
        assert!(started < 10);
        assert_eq!(meter.counts.finished.load(Ordering::SeqCst), started);
    }

    #[test]
    fn test_list_from_indexed() {
        let indexed = BTreeMap::from([(2, "c"), (0, "a"), (1, "b")]);
        assert_eq!(list_from_indexed(indexed), vec!["a", "b", "c"]);
        assert!(list_from_indexed(BTreeMap::<usize, u8>::new()).is_empty());
    }

    proptest! {
        #[test]
        fn prop_run_all_ordered(
            delays in proptest::collection::vec(0u64..50, 0..30),
            max_at_once in 1usize..8,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let limits = Limits::new().max_at_once(max_at_once).unwrap();

            let tasks = delays.iter().copied().enumerate().map(|(index, delay)| {
                move || async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok::<_, Failure>(index)
                }
            });
            let results = runtime.block_on(run_all(tasks, &limits)).unwrap();
            prop_assert_eq!(results, (0..delays.len()).collect::<Vec<_>>());
        }
    }
}
