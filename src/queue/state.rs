use super::{QueueError, Task};
use crate::cancel::CancellationToken;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Everything the queue mutates. Owned by the coordinator mutex; every
/// method here expects to be called with that lock held.
pub(crate) struct State {
    /// Pending tasks in submission order. Checkout drains from the front;
    /// recovery folds returned batches back onto the front.
    pub(crate) buffer: VecDeque<Task>,

    /// Returned-but-uncompleted batches, keyed by checkout serial. Higher
    /// keys are newer checkouts, so folding in descending key order lands
    /// the oldest batch at the head of the buffer.
    recover: BTreeMap<u64, Vec<Task>>,

    /// Checkout serial of the batch whose head task produced the latched
    /// error. Zero when no failed batch is in the ledger.
    err_checkout: u64,

    /// 1-based position, from the front of `buffer`, of the failed task
    /// after fold-back. Zero when no failure is recorded.
    err_index: usize,

    /// Monotonic checkout serial number.
    count: u64,

    /// Runners currently holding a checked-out batch, executing or winding
    /// down. The runner that drops this to zero folds the ledger.
    pub(crate) running: usize,

    /// First task error observed since the last resume or reset.
    pub(crate) exit_error: Option<Arc<anyhow::Error>>,

    /// Source the internal token is derived from; retained so a resume can
    /// derive a fresh token.
    pub(crate) upstream: Option<CancellationToken>,

    /// Internal token observed by runners and waiters.
    pub(crate) token: CancellationToken,
}

impl State {
    pub(crate) fn new() -> Self {
        State {
            buffer: VecDeque::new(),
            recover: BTreeMap::new(),
            err_checkout: 0,
            err_index: 0,
            count: 0,
            running: 0,
            exit_error: None,
            upstream: None,
            token: CancellationToken::new(),
        }
    }

    /// Number of queued tasks.
    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    /// The latched task error, else the cancellation error, else none.
    pub(crate) fn current_error(&self) -> Option<QueueError> {
        if let Some(err) = &self.exit_error {
            return Some(QueueError::Task(Arc::clone(err)));
        }
        if self.token.is_cancelled() {
            return Some(QueueError::Cancelled);
        }
        None
    }

    /// Moves up to `limit` tasks from the front of the buffer into `batch`
    /// and stamps the checkout with a fresh serial number. Any recorded
    /// failure position is invalidated, since the head tasks just left the
    /// buffer.
    pub(crate) fn checkout(&mut self, batch: &mut Vec<Task>, limit: usize) -> u64 {
        debug_assert!(batch.is_empty());
        let take = limit.min(self.buffer.len());
        batch.extend(self.buffer.drain(..take));
        self.count += 1;
        self.err_index = 0;
        self.count
    }

    /// Hands a batch's unexecuted tail back to the ledger under its
    /// checkout serial. Serials are unique, so a slot can never already be
    /// occupied.
    pub(crate) fn return_tasks(&mut self, tasks: Vec<Task>, checkout: u64) {
        let previous = self.recover.insert(checkout, tasks);
        debug_assert!(previous.is_none());
    }

    /// As [`State::return_tasks`], and records the batch as the one whose
    /// head task produced the latched error. The caller guarantees this is
    /// the first recorded failure since the last resume or reset.
    pub(crate) fn fail_tasks(&mut self, tasks: Vec<Task>, checkout: u64) {
        debug_assert_eq!(self.err_checkout, 0);
        self.return_tasks(tasks, checkout);
        self.err_checkout = checkout;
    }

    /// Folds every ledger batch back onto the front of the buffer, most
    /// recent checkout first, so the oldest batch ends up at the head and
    /// submission order is restored. The failed task's position is
    /// re-derived as older batches land in front of it.
    pub(crate) fn fold_back(&mut self) {
        if self.recover.is_empty() {
            return;
        }
        self.err_index = 0;
        let mut recovered = 0;
        let slots = std::mem::take(&mut self.recover);
        for (checkout, mut tasks) in slots.into_iter().rev() {
            if self.err_index > 0 {
                self.err_index += tasks.len();
            }
            recovered += tasks.len();
            while let Some(task) = tasks.pop() {
                self.buffer.push_front(task);
            }
            if checkout == self.err_checkout {
                self.err_index = 1;
                self.err_checkout = 0;
            }
        }
        debug!(recovered, queued = self.buffer.len(), "folded batches back into queue");
    }

    /// Drops the recorded failed task, keeping every other task in order.
    /// Returns `false` when no failure is recorded or the recorded position
    /// is no longer inside the buffer.
    pub(crate) fn skip_errored(&mut self) -> bool {
        if self.err_index == 0 || self.err_index > self.buffer.len() {
            return false;
        }
        let _failed = self.buffer.remove(self.err_index - 1);
        self.err_index = 0;
        true
    }

    /// Empties the buffer and the ledger and forgets any recorded failure
    /// position.
    pub(crate) fn clear(&mut self) {
        self.buffer.clear();
        self.recover.clear();
        self.err_checkout = 0;
        self.err_index = 0;
    }
}
