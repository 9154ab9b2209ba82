//! Thread-level synchronization primitives.

mod timed_lock;

pub use timed_lock::TimedLock;
