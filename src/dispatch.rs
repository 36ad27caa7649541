//! The admission loop that starts tasks under meter control.

use std::future::Future;
use std::iter::Enumerate;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::ready;
use futures::stream::{FuturesUnordered, Stream};
use futures::TryFuture;
use pin_project::pin_project;
use tracing::{debug, trace};

use crate::channel::Sender;
use crate::common::{FinishGuard, MeterStates};

/// Where workers forward `(index, result)` pairs.
pub(crate) type ResultSender<Fut> = Sender<(usize, <Fut as TryFuture>::Ok)>;

/// An input that was pulled from the iterator and waits for the meters.
struct Admission<T> {
    index: usize,
    value: T,
    wait: BoxFuture<'static, ()>,
}

/// Runs `task_fn` over every input, admitting them one by one in input order.
///
/// Every running task lives in `running`, so this future is the scope of the
/// run: dropping it cancels all tasks. The first task error is returned as is,
/// after dropping every other task and stopping admission.
///
/// On success or failure the result channel, if any, is closed.
#[pin_project]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub(crate) struct Dispatch<I, F, Fut>
where
    I: Iterator,
    F: FnMut(I::Item) -> Fut,
    Fut: TryFuture,
{
    args: Enumerate<I>,
    args_exhausted: bool,
    task_fn: F,
    states: MeterStates,
    admission: Option<Admission<I::Item>>,
    #[pin]
    running: FuturesUnordered<Worker<Fut>>,
    send_to: Option<ResultSender<Fut>>,
}

impl<I, F, Fut> Dispatch<I, F, Fut>
where
    I: Iterator,
    F: FnMut(I::Item) -> Fut,
    Fut: TryFuture,
{
    pub(crate) fn new(
        task_fn: F,
        args: I,
        states: MeterStates,
        send_to: Option<ResultSender<Fut>>,
    ) -> Self {
        debug!(meters = states.len(), "starting run");
        Self {
            args: args.enumerate(),
            args_exhausted: false,
            task_fn,
            states,
            admission: None,
            running: FuturesUnordered::new(),
            send_to,
        }
    }
}

fn close<T>(send_to: &mut Option<Sender<T>>) {
    if let Some(mut sender) = send_to.take() {
        sender.close_channel();
    }
}

impl<I, F, Fut> Future for Dispatch<I, F, Fut>
where
    I: Iterator,
    F: FnMut(I::Item) -> Fut,
    Fut: TryFuture,
{
    type Output = Result<(), Fut::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        loop {
            // Reap first, so a failure stops admission right away.
            while let Poll::Ready(Some(outcome)) = this.running.as_mut().poll_next(cx) {
                if let Err(err) = outcome {
                    debug!(in_flight = this.running.len(), "task failed, cancelling run");
                    *this.admission = None;
                    *this.args_exhausted = true;
                    this.running.clear();
                    close(this.send_to);
                    return Poll::Ready(Err(err));
                }
            }

            if this.admission.is_none() && !*this.args_exhausted {
                match this.args.next() {
                    Some((index, value)) => {
                        *this.admission = Some(Admission {
                            index,
                            value,
                            wait: this.states.wait_task_can_start(),
                        })
                    }
                    None => *this.args_exhausted = true,
                }
            }

            if let Some(admission) = this.admission.as_mut() {
                if admission.wait.as_mut().poll(cx).is_pending() {
                    return Poll::Pending;
                }
                if let Some(Admission { index, value, .. }) = this.admission.take() {
                    this.states.notify_task_started();
                    trace!(index, in_flight = this.running.len(), "task admitted");
                    let task = (this.task_fn)(value);
                    this.running.push(Worker {
                        index,
                        task,
                        task_done: false,
                        output: None,
                        send_to: this.send_to.clone(),
                        _finished: this.states.finish_guard(),
                    });
                }
                continue;
            }

            if this.running.is_empty() {
                debug!("run complete");
                close(this.send_to);
                return Poll::Ready(Ok(()));
            }
            return Poll::Pending;
        }
    }
}

/// One admitted task: runs it, then forwards its result.
///
/// The meters are told the task finished when the worker is dropped, which
/// `FuturesUnordered` does as soon as it completes, and which also happens if
/// the run is cancelled while the task runs or while its result waits for
/// room in the channel.
#[pin_project]
struct Worker<Fut>
where
    Fut: TryFuture,
{
    index: usize,
    #[pin]
    task: Fut,
    task_done: bool,
    output: Option<Fut::Ok>,
    send_to: Option<ResultSender<Fut>>,
    _finished: FinishGuard,
}

impl<Fut> Future for Worker<Fut>
where
    Fut: TryFuture,
{
    type Output = Result<(), Fut::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if !*this.task_done {
            match ready!(this.task.try_poll(cx)) {
                Ok(value) => {
                    *this.task_done = true;
                    *this.output = Some(value);
                }
                Err(err) => {
                    debug!(index = *this.index, "task failed");
                    return Poll::Ready(Err(err));
                }
            }
        }

        let Some(send_to) = this.send_to.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        // An error means the consumer is gone and nobody wants the result.
        if ready!(send_to.poll_ready(cx)).is_ok() {
            if let Some(value) = this.output.take() {
                if send_to.start_send((*this.index, value)).is_err() {
                    trace!(index = *this.index, "result dropped, consumer is gone");
                }
            }
        }
        Poll::Ready(Ok(()))
    }
}
