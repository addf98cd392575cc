//! Cooperative cancellation for blocking code.
//!
//! Tokens form a tree: cancelling a parent cancels every token derived from
//! it, while cancelling a child leaves the parent untouched. Cancellation
//! is a single edge, so once fired a token never resets.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Signals and observes cancellation.
///
/// Clones share one cancellation state; use [`CancellationToken::child_token`]
/// to derive a token that can be cancelled on its own but still observes its
/// parent. All methods are safe to call from any thread.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,

    /// Strong link up the tree: a token keeps every ancestor alive, and an
    /// intermediate token stays alive while any descendant does. Queried
    /// by `is_cancelled` and never mutated after construction.
    parent: Option<Arc<Inner>>,

    /// Children registered for the cancellation wake. Drained on cancel,
    /// so a token holds its children only while it can still fire. A dead
    /// entry here means that whole subtree has no handles and no waiters
    /// left to wake.
    children: Mutex<Vec<Weak<Inner>>>,

    waiters: Condvar,
}

impl CancellationToken {
    /// Creates an independent token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                parent: None,
                children: Mutex::new(Vec::new()),
                waiters: Condvar::new(),
            }),
        }
    }

    /// Derives a token that is cancelled when either it or this token is
    /// cancelled. A child derived from an already-cancelled parent starts
    /// out cancelled.
    pub fn child_token(&self) -> CancellationToken {
        let child = Arc::new(Inner {
            cancelled: AtomicBool::new(false),
            parent: Some(Arc::clone(&self.inner)),
            children: Mutex::new(Vec::new()),
            waiters: Condvar::new(),
        });
        {
            // Checking cancellation under the children lock pairs with the
            // drain in `cancel`: the child is either registered before the
            // drain or sees the cancellation already recorded.
            let mut children = self.inner.children.lock();
            if self.inner.is_cancelled() {
                child.cancelled.store(true, Ordering::SeqCst);
            } else {
                children.push(Arc::downgrade(&child));
            }
        }
        CancellationToken { inner: child }
    }

    /// Fires the token, waking every waiter and cancelling every child.
    /// Repeated calls are equivalent to one.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// True once the token or any ancestor has fired.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Blocks the calling thread until the token fires. Returns immediately
    /// if it already has.
    pub fn wait(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut children = self.inner.children.lock();
        while !self.inner.is_cancelled() {
            self.inner.waiters.wait(&mut children);
        }
    }
}

impl Inner {
    /// Checks this token's flag, then walks the parent chain. The strong
    /// parent links make the answer authoritative even while a cancel is
    /// still propagating down.
    fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        match &self.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let children = {
            let mut children = self.children.lock();
            self.waiters.notify_all();
            std::mem::take(&mut *children)
        };
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::thread;
    use std::time::Duration;

    assert_impl_all!(CancellationToken: Send, Sync, Clone);

    #[test]
    fn test_fresh_token_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_parent_cancels_child_not_reverse() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        let sibling = parent.child_token();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());

        parent.cancel();
        assert!(sibling.is_cancelled());
    }

    #[test]
    fn test_grandchild_observes_root_cancel() {
        let root = CancellationToken::new();
        let grandchild = root.child_token().child_token();
        root.cancel();
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel();
        assert!(parent.child_token().is_cancelled());
    }

    #[test]
    fn test_wait_wakes_on_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();

        let handle = thread::spawn(move || waiter.wait());
        thread::sleep(Duration::from_millis(5));
        token.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_returns_immediately_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        token.wait();
    }
}
