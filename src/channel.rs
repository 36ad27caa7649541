//! The channel carrying results from workers to the consumer of a run.
//!
//! A thin layer over `futures::channel::mpsc` so that bounded and unbounded
//! runs share one sender and one receiver type.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc::{self, SendError};
use futures::stream::{FusedStream, Stream, StreamExt};

/// Bounded channel. Every sender also gets one guaranteed slot on top of
/// `buffer`, as with [`mpsc::channel`].
pub(crate) fn bounded<T>(buffer: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::channel(buffer);
    (Sender::Bounded(tx), Receiver::Bounded(rx))
}

pub(crate) fn unbounded<T>() -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::unbounded();
    (Sender::Unbounded(tx), Receiver::Unbounded(rx))
}

pub(crate) enum Sender<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

impl<T> Sender<T> {
    /// Ready once `start_send` can take a message, or an error if the
    /// receiver is gone or the channel was closed.
    pub(crate) fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), SendError>> {
        match self {
            Sender::Bounded(tx) => tx.poll_ready(cx),
            Sender::Unbounded(tx) => tx.poll_ready(cx),
        }
    }

    pub(crate) fn start_send(&mut self, msg: T) -> Result<(), SendError> {
        match self {
            Sender::Bounded(tx) => tx.start_send(msg),
            Sender::Unbounded(tx) => tx.start_send(msg),
        }
    }

    /// Closes the channel for every sender. The receiver still gets what is
    /// buffered, then `None`.
    pub(crate) fn close_channel(&mut self) {
        match self {
            Sender::Bounded(tx) => tx.close_channel(),
            Sender::Unbounded(tx) => tx.close_channel(),
        }
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        match self {
            Sender::Bounded(tx) => Sender::Bounded(tx.clone()),
            Sender::Unbounded(tx) => Sender::Unbounded(tx.clone()),
        }
    }
}

pub(crate) enum Receiver<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

impl<T> Stream for Receiver<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        match self.get_mut() {
            Receiver::Bounded(rx) => rx.poll_next_unpin(cx),
            Receiver::Unbounded(rx) => rx.poll_next_unpin(cx),
        }
    }
}

impl<T> FusedStream for Receiver<T> {
    fn is_terminated(&self) -> bool {
        match self {
            Receiver::Bounded(rx) => rx.is_terminated(),
            Receiver::Unbounded(rx) => rx.is_terminated(),
        }
    }
}
