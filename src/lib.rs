//! A small toolkit built around an ordered, recoverable task queue.
//!
//! The centerpiece is [`Queue`]: submit fallible tasks from any number of
//! threads and execute them on any number of runners, with the guarantee
//! that successful tasks run exactly once, in submission order, and that a
//! failure never loses work: every unexecuted task is handed back to the
//! queue so execution can resume (or skip the offender) later.
//!
//! Around it live the helpers the queue's callers tend to need:
//! [`CancellationToken`] for cooperative shutdown, [`ErrorTracker`] for
//! aggregating many failures into one, and the [`pace`] and [`numeric`]
//! grab bags.

pub mod cancel;
pub use cancel::CancellationToken;

pub mod numeric;

pub mod pace;
pub use pace::{Counter, Limiter};

pub mod queue;
pub use queue::{Queue, QueueError, Task};

pub mod tracker;
pub use tracker::ErrorTracker;
