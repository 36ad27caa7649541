//! Module containing the per-run meter bookkeeping shared by the dispatcher
//! and its workers.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::meter::MeterState;

/// The states of every meter active in one run.
///
/// Cheap to clone: each worker keeps a handle so that it can report its own
/// completion.
#[derive(Clone)]
pub(crate) struct MeterStates {
    states: Arc<[Box<dyn MeterState>]>,
}

impl MeterStates {
    pub(crate) fn new(states: Vec<Box<dyn MeterState>>) -> Self {
        Self {
            states: Arc::from(states),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }

    /// Resolves once every meter admits one more task.
    ///
    /// Meters are awaited one after the other; all of them must be satisfied.
    pub(crate) fn wait_task_can_start(&self) -> BoxFuture<'static, ()> {
        let this = self.clone();
        Box::pin(async move {
            for state in this.states.iter() {
                state.wait_task_can_start().await;
            }
        })
    }

    pub(crate) fn notify_task_started(&self) {
        for state in self.states.iter() {
            state.notify_task_started();
        }
    }

    /// Returns a guard which reports the task as finished when dropped.
    pub(crate) fn finish_guard(&self) -> FinishGuard {
        FinishGuard {
            states: self.clone(),
        }
    }
}

/// Calls `notify_task_finished` on every meter when dropped.
///
/// Workers own one of these, so the meters hear about a task exactly once no
/// matter how it ended, including when it was dropped mid-flight.
pub(crate) struct FinishGuard {
    states: MeterStates,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        for state in self.states.states.iter() {
            state.notify_task_finished();
        }
    }
}
