//! Serialized action queue
//!
//! Each store owns one queue with two states:
//!
//! - **Idle**: nothing queued is running. A call starts immediately, stamps
//!   `$pending` with the start time, and the queue becomes pending.
//! - **Pending**: one queued action is in flight. New calls are parked in a
//!   FIFO and run one at a time, in call order, as their predecessors settle.
//!
//! When the FIFO drains, `$pending` returns to `false` and a
//! `QUEUE_FINISHED` event carries the elapsed time.
//!
//! Synchronous results advance the queue in the same call. Asynchronous
//! results are awaited on a `spawn_local` task, so queued async actions need a
//! `tokio::task::LocalSet`. There is no cancellation: an action that started
//! runs to completion. A run that is torn down instead (a panic, or its
//! `LocalSet` dropped) puts the queue back to idle and fails the parked calls
//! with `QueueDropped`. Immediate actions (`$a`) ignore the queue entirely.
//!
//! # Example
//!
//! ```ignore
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let a = store.queue().call("save", &[]);
//!     let b = store.queue().call("save", &[]); // runs after `a` settles
//!     a.await?;
//!     b.await?;
//! }).await;
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;

use crate::devtools::{self, DevtoolsEvent};
use crate::error::{Result, StoreError};
use crate::store::{ActionOutput, Store, PENDING_KEY};
use crate::value::Value;

struct QueueEntry {
    action: String,
    payload: Vec<Value>,
    resolve: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct QueueState {
    /// Set while a queued action is in flight
    started: Option<Instant>,
    planned: VecDeque<QueueEntry>,
}

enum Step {
    Next(QueueEntry),
    Finished(Duration),
}

/// Per-store queue state machine
#[derive(Default)]
pub(crate) struct ActionQueue {
    state: RefCell<QueueState>,
}

impl ActionQueue {
    pub(crate) fn is_pending(&self) -> bool {
        self.state.borrow().started.is_some()
    }

    pub(crate) fn planned_len(&self) -> usize {
        self.state.borrow().planned.len()
    }

    /// Queue `action` on `store`
    pub(crate) fn enqueue(store: &Store, action: &str, payload: Vec<Value>) -> QueuedCall {
        let (resolve, receiver) = oneshot::channel();
        devtools::emit(|| DevtoolsEvent::ActionQueued {
            store: store.id().to_string(),
            action: action.to_string(),
            payload: devtools::to_json(&payload),
        });

        let entry = QueueEntry {
            action: action.to_string(),
            payload,
            resolve,
        };
        let start = {
            let mut state = store.0.queue.state.borrow_mut();
            if state.started.is_some() {
                state.planned.push_back(entry);
                tracing::trace!(store = store.id(), action, planned = state.planned.len(), "action parked");
                None
            } else {
                state.started = Some(Instant::now());
                Some(entry)
            }
        };

        if let Some(entry) = start {
            begin(store, action);
            run_from(store.clone(), entry);
        }

        QueuedCall {
            action: action.to_string(),
            receiver,
        }
    }

    fn advance(&self) -> Step {
        let mut state = self.state.borrow_mut();
        match state.planned.pop_front() {
            Some(entry) => Step::Next(entry),
            None => {
                let elapsed = state
                    .started
                    .take()
                    .map(|started| started.elapsed())
                    .unwrap_or_default();
                Step::Finished(elapsed)
            }
        }
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Idle -> Pending
fn begin(store: &Store, action: &str) {
    let now = epoch_ms();
    if let Err(err) = store.state().set(PENDING_KEY, now as f64) {
        tracing::warn!(store = store.id(), %err, "could not mark queue pending");
    }
    tracing::debug!(store = store.id(), action, "queue pending");
    devtools::emit(|| DevtoolsEvent::QueuePending {
        store: store.id().to_string(),
        action: action.to_string(),
    });
}

/// Pending -> Idle
fn finish(store: &Store, elapsed: Duration) {
    if let Err(err) = store.state().set(PENDING_KEY, false) {
        tracing::warn!(store = store.id(), %err, "could not clear queue pending");
    }
    let duration_ms = elapsed.as_millis() as u64;
    tracing::debug!(store = store.id(), duration_ms, "queue finished");
    devtools::emit(|| DevtoolsEvent::QueueFinished {
        store: store.id().to_string(),
        ended_at: epoch_ms(),
        duration_ms,
    });
}

/// Owns the queue's in-flight run
///
/// If the run is dropped before it settles (a panicking action, a task torn
/// down with its `LocalSet`, or `spawn_local` outside one), the queue returns
/// to idle and every parked call resolves with `QueueDropped`.
struct InFlight {
    store: Store,
    settled: bool,
}

impl InFlight {
    fn new(store: Store) -> Self {
        Self {
            store,
            settled: false,
        }
    }

    fn finish(mut self, elapsed: Duration) {
        self.settled = true;
        finish(&self.store, elapsed);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Ok(mut state) = self.store.0.queue.state.try_borrow_mut() else {
            return;
        };
        let elapsed = state
            .started
            .take()
            .map(|started| started.elapsed())
            .unwrap_or_default();
        let dropped = std::mem::take(&mut state.planned);
        drop(state);

        tracing::warn!(
            store = self.store.id(),
            dropped = dropped.len(),
            "queued run abandoned before settling"
        );
        drop(dropped);
        finish(&self.store, elapsed);
    }
}

fn run_from(store: Store, entry: QueueEntry) {
    drive(InFlight::new(store), entry);
}

/// Run `entry` and everything queued behind it
///
/// Synchronous results loop here; the first asynchronous result hands the
/// rest of the run to a local task.
fn drive(run: InFlight, mut entry: QueueEntry) {
    loop {
        let output = run
            .store
            .invoke(&entry.action, &entry.payload)
            .unwrap_or_else(|err| ActionOutput::Ready(Err(err)));

        match output {
            ActionOutput::Ready(result) => {
                let _ = entry.resolve.send(result);
            }
            ActionOutput::Pending(future) => {
                tokio::task::spawn_local(async move {
                    let result = future.await;
                    let _ = entry.resolve.send(result);
                    match run.store.0.queue.advance() {
                        Step::Next(next) => drive(run, next),
                        Step::Finished(elapsed) => run.finish(elapsed),
                    }
                });
                return;
            }
        }

        match run.store.0.queue.advance() {
            Step::Next(next) => entry = next,
            Step::Finished(elapsed) => {
                run.finish(elapsed);
                return;
            }
        }
    }
}

// =============================================================================
// QUEUED CALL
// =============================================================================

/// Resolves with a queued action's result once it has run
#[must_use = "queued actions run regardless, but their result is lost if this is dropped"]
pub struct QueuedCall {
    action: String,
    receiver: oneshot::Receiver<Result<Value>>,
}

impl QueuedCall {
    pub fn action(&self) -> &str {
        &self.action
    }
}

impl Future for QueuedCall {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(StoreError::QueueDropped {
                action: this.action.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for QueuedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedCall")
            .field("action", &self.action)
            .finish()
    }
}
