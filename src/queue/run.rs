use super::state::State;
use super::{BATCH_CAPACITY, Queue, QueueError, Task};
use parking_lot::MutexGuard;
use std::sync::Arc;
use tracing::{debug, trace};

impl Queue {
    /// Executes queued tasks, blocking for new submissions, until `limit`
    /// of them complete in this call. `limit == 0` means "until error or
    /// cancellation".
    ///
    /// Returns `Ok(())` once `limit` tasks have completed, the cancellation
    /// error if the queue is cancelled, or the first error returned by a
    /// task executed here. Calling again after a halt clears the halt state
    /// and resumes from the first unexecuted task.
    pub fn run(&self, limit: usize) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock();
        if state.current_error().is_some() {
            self.resume(&mut state);
        }

        let capacity = if limit == 0 {
            BATCH_CAPACITY
        } else {
            limit.min(BATCH_CAPACITY)
        };
        let mut batch: Vec<Task> = Vec::with_capacity(capacity);
        let mut remaining = limit;

        loop {
            while state.len() == 0 && !state.token.is_cancelled() {
                self.shared.ready.wait(&mut state);
            }
            if state.token.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            let take = if limit == 0 {
                capacity
            } else {
                remaining.min(capacity)
            };
            let (executed, halt) = self.run_batch(&mut state, &mut batch, take);
            if let Some(err) = halt {
                return Err(err);
            }
            if limit > 0 {
                remaining -= executed;
                if remaining == 0 {
                    return Ok(());
                }
            }
        }
    }

    /// Executes up to `limit` already-queued tasks without blocking for new
    /// submissions (tasks submitted while draining are still picked up).
    /// `limit == 0` drains until the queue is empty.
    ///
    /// Returns the number of tasks that completed in this call, plus the
    /// error that halted execution, if any. As with [`Queue::run`], calling
    /// after a halt resumes first.
    pub fn run_queued(&self, limit: usize) -> (usize, Option<QueueError>) {
        let mut state = self.shared.state.lock();
        if state.current_error().is_some() {
            self.resume(&mut state);
        }

        let capacity = if limit == 0 {
            state.len().min(BATCH_CAPACITY)
        } else {
            limit.min(BATCH_CAPACITY)
        };
        let mut batch: Vec<Task> = Vec::with_capacity(capacity);
        let mut done = 0;

        while state.len() > 0 {
            let take = if limit == 0 {
                capacity
            } else {
                capacity.min(limit - done)
            };
            let (executed, halt) = self.run_batch(&mut state, &mut batch, take);
            done += executed;
            if halt.is_some() {
                return (done, halt);
            }
            if limit > 0 && done >= limit {
                break;
            }
        }
        (done, None)
    }

    /// Checks out one batch and executes it with the lock released.
    ///
    /// Enters and leaves with the lock held. Returns how many tasks
    /// completed plus the error that stopped the batch, if any. On failure
    /// or cancellation the unexecuted remainder (including the stopped
    /// task) goes back to the recovery ledger, and whichever runner winds
    /// down last folds the ledger into the buffer.
    fn run_batch(
        &self,
        state: &mut MutexGuard<'_, State>,
        batch: &mut Vec<Task>,
        limit: usize,
    ) -> (usize, Option<QueueError>) {
        if state.token.is_cancelled() {
            return (0, Some(QueueError::Cancelled));
        }

        state.running += 1;
        let token = state.token.clone();
        let checkout = state.checkout(batch, limit);
        let size = batch.len();
        trace!(checkout, size, "batch checked out");

        let result = MutexGuard::unlocked(state, || {
            for index in 0..size {
                // Inter-task checkpoint. The snapshot token fires on
                // cancel, on upstream cancellation, and when the token is
                // replaced; a task already running is never interrupted.
                if token.is_cancelled() {
                    let mut state = self.shared.state.lock();
                    let rest: Vec<Task> = batch.drain(index..).collect();
                    state.return_tasks(rest, checkout);
                    self.finish_runner(&mut state);
                    return (index, Some(QueueError::Cancelled));
                }

                if let Err(err) = (batch[index])() {
                    let err = Arc::new(err);
                    debug!(error = %err, "task failed, halting queue");
                    let mut state = self.shared.state.lock();
                    state.token.cancel();
                    let rest: Vec<Task> = batch.drain(index..).collect();
                    if state.exit_error.is_none() {
                        state.exit_error = Some(Arc::clone(&err));
                        state.fail_tasks(rest, checkout);
                    } else {
                        // A sibling's failure already holds the record;
                        // this batch is still recovered, just unmarked.
                        state.return_tasks(rest, checkout);
                    }
                    self.finish_runner(&mut state);
                    return (index, Some(QueueError::Task(err)));
                }
            }
            (size, None)
        });

        if result.1.is_none() {
            state.running -= 1;
            if state.running == 0 {
                state.fold_back();
            }
        }
        batch.clear();
        self.shared.ready.notify_all();
        result
    }

    /// Releases this runner's slot; the last runner out folds the ledger so
    /// recovered batches are back in the buffer before anyone observes
    /// `running == 0`.
    fn finish_runner(&self, state: &mut MutexGuard<'_, State>) {
        state.running -= 1;
        if state.running == 0 {
            state.fold_back();
        }
    }

    /// Clears the halt state so execution can continue: waits for every
    /// other runner to finish winding down, unlatches the error, and
    /// derives a fresh token from the retained upstream source.
    fn resume(&self, state: &mut MutexGuard<'_, State>) {
        while state.running > 0 {
            self.shared.ready.wait(state);
        }
        state.exit_error = None;
        let upstream = state.upstream.clone();
        self.install_token(state, upstream);
        debug!("queue resumed");
    }
}
