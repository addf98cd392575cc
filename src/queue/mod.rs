//! Ordered task queue with failure recovery.
//!
//! [`Queue`] accepts fallible tasks from any number of producer threads and
//! executes them on any number of runners: each call to [`Queue::run`] or
//! [`Queue::run_queued`] *is* a runner; the queue spawns no execution
//! threads of its own. Runners check tasks out in batches, execute them
//! outside the queue lock, and on failure or cancellation hand the
//! unexecuted remainder back. When the last runner leaves, every returned
//! batch is folded onto the head of the queue in submission order, so the
//! next run replays exactly the uncompleted tail.

mod state;
use state::State;

mod run;


use crate::cancel::CancellationToken;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;
use tracing::debug;

/// A unit of work.
///
/// Tasks must be re-runnable: a task that failed, or that was returned
/// unexecuted when a sibling failed, goes back into the queue and may run
/// again after a resume.
pub type Task = Box<dyn FnMut() -> anyhow::Result<()> + Send>;

/// Largest number of tasks a runner checks out in one batch.
pub(crate) const BATCH_CAPACITY: usize = 2048;

/// Why queue execution halted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// The queue's cancellation token fired, directly or via the upstream
    /// source.
    #[error("queue cancelled")]
    Cancelled,

    /// A task returned this error and execution halted. The same latched
    /// error is handed to every observer until a resume or reset clears it.
    #[error("{0}")]
    Task(Arc<anyhow::Error>),
}

impl QueueError {
    /// The underlying task error, if execution halted on a task failure.
    pub fn task_error(&self) -> Option<&anyhow::Error> {
        match self {
            QueueError::Task(err) => Some(err),
            QueueError::Cancelled => None,
        }
    }

    /// True for the cancellation edge rather than a task failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueueError::Cancelled)
    }
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,

    /// Woken whenever tasks arrive, a runner exits, or cancellation fires.
    pub(crate) ready: Condvar,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Retire the watcher attached to the current token.
        self.state.get_mut().token.cancel();
    }
}

/// An ordered, multi-runner task queue with failure recovery.
///
/// Clones share one queue; hand a clone to every producer and runner
/// thread. See the [module docs](self) for the execution model.
#[derive(Clone)]
pub struct Queue {
    shared: Arc<Shared>,
}

impl Queue {
    /// Creates a queue observing `upstream` for external cancellation.
    /// `None` means the queue can only be cancelled through its own
    /// methods.
    pub fn new(upstream: Option<CancellationToken>) -> Self {
        let queue = Queue {
            shared: Arc::new(Shared {
                state: Mutex::new(State::new()),
                ready: Condvar::new(),
            }),
        };
        let mut state = queue.shared.state.lock();
        queue.install_token(&mut state, upstream);
        drop(state);
        queue
    }

    /// Appends one task to the queue and wakes waiting runners.
    ///
    /// Successful tasks are never executed more than once, are not lost on
    /// errors, and always execute in submission order. If execution halts
    /// on an error, the failing task and every unexecuted task return to
    /// the queue; handle the error, then call [`Queue::run`] again to
    /// resume, or [`Queue::skip_errored`] to drop the offender first.
    pub fn submit<F>(&self, task: F)
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        self.submit_all([Box::new(task) as Task]);
    }

    /// Appends tasks to the queue in order, atomically, and wakes waiting
    /// runners.
    pub fn submit_all<I>(&self, tasks: I)
    where
        I: IntoIterator<Item = Task>,
    {
        let mut state = self.shared.state.lock();
        state.buffer.extend(tasks);
        drop(state);
        self.shared.ready.notify_all();
    }

    /// Number of queued tasks.
    ///
    /// Does not count tasks currently executing, and can grow without new
    /// submissions: runners hand unexecuted tasks back when execution
    /// halts.
    pub fn len(&self) -> usize {
        self.shared.state.lock().len()
    }

    /// True when no tasks are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no runner currently holds a checked-out batch.
    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().running == 0
    }

    /// Stops execution.
    ///
    /// Runners abandon their batches at the next inter-task checkpoint and
    /// hand the unexecuted remainder back; a task already running is left
    /// to finish. Queued tasks are kept, and this does not wait for
    /// runners to wind down. Repeated calls are equivalent to one.
    pub fn cancel(&self) {
        let state = self.shared.state.lock();
        state.token.cancel();
        debug!("queue cancelled");
    }

    /// The latched task error or the cancellation error, if execution has
    /// halted; `None` while the queue is running or has not started.
    ///
    /// The next [`Queue::run`] or [`Queue::run_queued`] clears the halt
    /// state and resumes.
    pub fn error(&self) -> Option<QueueError> {
        self.shared.state.lock().current_error()
    }

    /// Blocks until execution halts, returning the responsible error.
    /// Returns immediately if the queue is already halted.
    pub fn wait_error(&self) -> QueueError {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(err) = state.current_error() {
                return err;
            }
            self.shared.ready.wait(&mut state);
        }
    }

    /// Blocks until the queue is caught up or halted: no runner holds a
    /// batch, and the queue is either empty or stopped on an error.
    ///
    /// The condition is re-evaluated after every wake, since tasks may be
    /// submitted while waiting.
    pub fn wait(&self) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock();
        while state.running > 0 || (state.len() > 0 && state.current_error().is_none()) {
            self.shared.ready.wait(&mut state);
        }
        match state.current_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stops execution, waits for every runner to exit, discards all
    /// queued tasks along with the recovery ledger and the latched error,
    /// and installs `upstream` as the new cancellation source.
    pub fn reset(&self, upstream: Option<CancellationToken>) {
        let mut state = self.shared.state.lock();
        state.token.cancel();
        while state.running > 0 {
            self.shared.ready.wait(&mut state);
        }
        state.clear();
        state.exit_error = None;
        self.install_token(&mut state, upstream);
        drop(state);
        self.shared.ready.notify_all();
        debug!("queue reset");
    }

    /// Replaces the upstream cancellation source without touching queue
    /// contents.
    ///
    /// The current internal token is cancelled, so in-flight runners
    /// observe a cancellation edge and return their batches; the next run
    /// call executes under a token derived from `upstream`.
    pub fn set_token(&self, upstream: Option<CancellationToken>) {
        let mut state = self.shared.state.lock();
        self.install_token(&mut state, upstream);
    }

    /// Drops the task whose failure halted execution, keeping every other
    /// task in order.
    ///
    /// Blocks while runners are still winding down. Returns `false` when
    /// no failed task is recorded in the queue.
    pub fn skip_errored(&self) -> bool {
        let mut state = self.shared.state.lock();
        while state.running > 0 {
            self.shared.ready.wait(&mut state);
        }
        state.skip_errored()
    }

    /// Derives a fresh internal token from `upstream` and points a watcher
    /// thread at it. The previous token is cancelled so its waiters and
    /// watcher move on. The state lock must be held.
    pub(crate) fn install_token(
        &self,
        state: &mut MutexGuard<'_, State>,
        upstream: Option<CancellationToken>,
    ) {
        state.token.cancel();
        let token = match &upstream {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        state.upstream = upstream;
        state.token = token.clone();
        spawn_watcher(Arc::downgrade(&self.shared), token);
    }
}

/// Wakes every queue waiter once `token` fires. Taking the state lock
/// around the broadcast closes the window between a waiter's cancellation
/// check and its wait.
fn spawn_watcher(shared: Weak<Shared>, token: CancellationToken) {
    thread::Builder::new()
        .name("kitbag-cancel".into())
        .spawn(move || {
            token.wait();
            if let Some(shared) = shared.upgrade() {
                let _state = shared.state.lock();
                shared.ready.notify_all();
            }
        })
        .expect("failed to spawn cancellation watcher");
}

impl Default for Queue {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Queue")
            .field("len", &state.len())
            .field("running", &state.running)
            .field("halted", &state.current_error().is_some())
            .finish()
    }
}
