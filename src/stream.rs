//! Lazily streamed results of a metered run.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{Fuse, FutureExt};
use futures::ready;
use futures::stream::{FusedStream, Stream, StreamExt};
use futures::TryFuture;
use pin_project::pin_project;

use crate::channel::{self, Receiver};
use crate::dispatch::Dispatch;
use crate::limits::Limits;

/// Stream of results produced by [`stream_map`](crate::stream_map), in
/// completion order.
///
/// The stream owns the whole run: tasks only make progress while it is
/// polled, and dropping it cancels whatever is still running. If a task fails
/// the stream yields that error once and then ends.
#[pin_project]
#[must_use = "streams do nothing unless polled"]
pub struct StreamMap<I, F, Fut>
where
    I: Iterator,
    F: FnMut(I::Item) -> Fut,
    Fut: TryFuture,
{
    #[pin]
    driver: Fuse<Dispatch<I, F, Fut>>,
    results: Receiver<(usize, Fut::Ok)>,
    terminated: bool,
}

impl<I, F, Fut> StreamMap<I, F, Fut>
where
    I: Iterator,
    F: FnMut(I::Item) -> Fut,
    Fut: TryFuture,
{
    pub(crate) fn new(task_fn: F, args: I, limits: &Limits) -> Self {
        // Room for every result when the input length is known up front, so
        // workers never wait on a slow consumer.
        let (send_to, results) = match args.size_hint() {
            (lower, Some(upper)) if lower == upper => channel::bounded(lower),
            _ => channel::unbounded(),
        };
        Self {
            driver: Dispatch::new(task_fn, args, limits.new_states(), Some(send_to)).fuse(),
            results,
            terminated: false,
        }
    }

    /// Tag each result with the position of its input.
    pub fn with_index(self) -> Indexed<I, F, Fut> {
        Indexed { inner: self }
    }

    fn poll_indexed(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<(usize, Fut::Ok), Fut::Error>>> {
        let this = self.project();
        if *this.terminated {
            return Poll::Ready(None);
        }
        // Drive admission and the running tasks; once the run is done the
        // fused driver stays pending and the channel is closed.
        if let Poll::Ready(Err(err)) = this.driver.poll(cx) {
            *this.terminated = true;
            return Poll::Ready(Some(Err(err)));
        }
        match ready!(this.results.poll_next_unpin(cx)) {
            Some(item) => Poll::Ready(Some(Ok(item))),
            None => {
                *this.terminated = true;
                Poll::Ready(None)
            }
        }
    }
}

impl<I, F, Fut> Stream for StreamMap<I, F, Fut>
where
    I: Iterator,
    F: FnMut(I::Item) -> Fut,
    Fut: TryFuture,
{
    type Item = Result<Fut::Ok, Fut::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_indexed(cx)
            .map(|item| item.map(|result| result.map(|(_, value)| value)))
    }
}

impl<I, F, Fut> FusedStream for StreamMap<I, F, Fut>
where
    I: Iterator,
    F: FnMut(I::Item) -> Fut,
    Fut: TryFuture,
{
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

/// [`StreamMap`] yielding `(index, result)` pairs, see
/// [`StreamMap::with_index`].
#[pin_project]
#[must_use = "streams do nothing unless polled"]
pub struct Indexed<I, F, Fut>
where
    I: Iterator,
    F: FnMut(I::Item) -> Fut,
    Fut: TryFuture,
{
    #[pin]
    inner: StreamMap<I, F, Fut>,
}

impl<I, F, Fut> Stream for Indexed<I, F, Fut>
where
    I: Iterator,
    F: FnMut(I::Item) -> Fut,
    Fut: TryFuture,
{
    type Item = Result<(usize, Fut::Ok), Fut::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_indexed(cx)
    }
}

impl<I, F, Fut> FusedStream for Indexed<I, F, Fut>
where
    I: Iterator,
    F: FnMut(I::Item) -> Fut,
    Fut: TryFuture,
{
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}
