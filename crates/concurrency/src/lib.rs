//! Bounded worker pool.
//!
//! The pool is the only place the engine introduces parallelism. N long-lived
//! threads share one FIFO queue guarded by a mutex and condvar. Tasks own
//! their input; the orchestrator is responsible for never submitting two
//! tasks that race on the same file. There is no preemption and no
//! cancellation of in-flight tasks.

pub mod pool;

pub use pool::{WorkerPool, WorkerPoolBuilder};
