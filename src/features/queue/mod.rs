//! Pending operation queue.
//!
//! Mutating API calls made while offline are recorded here and replayed by
//! the sync reconciler. Operations are kept in enqueue order and removed on
//! a successful replay or after [`MAX_RETRIES`] failed ones.

pub mod operation;
pub mod queue;

pub use operation::{NewOperation, OperationType, PendingOperation};
pub use queue::{FailOutcome, OperationQueue, QueueStats, MAX_RETRIES};
