//! FIFO worker pool with barrier-style wait-for-idle.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

type Task = Box<dyn FnOnce(&WorkerContext) + Send>;

/// Handle given to every running task; lets it fail the pool outcome.
pub struct WorkerContext {
    outcome: Arc<AtomicBool>,
}

impl WorkerContext {
    /// Mark the whole pool's outcome as failed. `wait_for_idle` reports it.
    pub fn fail(&self) {
        self.outcome.store(false, Ordering::Release);
    }
}

struct PoolInner {
    queue: Mutex<VecDeque<Task>>,
    /// Signalled when a task is queued or shutdown begins.
    work_ready: Condvar,
    /// Signalled when a worker goes idle or the queue drains.
    all_idle: Condvar,
    /// Number of tasks currently executing.
    working: AtomicUsize,
    shutdown: AtomicBool,
    outcome: Arc<AtomicBool>,
}

/// Bounded thread pool with one FIFO queue.
///
/// Dispatch order equals submission order. `wait_for_idle` blocks until the
/// queue is empty and no worker is executing, then reports the shared
/// outcome flag: `true` unless some task called [`WorkerContext::fail`].
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Vec<JoinHandle<()>>,
}

/// Builder so callers can name the threads per server.
pub struct WorkerPoolBuilder {
    size: usize,
    thread_name: String,
}

impl WorkerPoolBuilder {
    /// Pool with `size` threads.
    pub fn new(size: usize) -> Self {
        WorkerPoolBuilder {
            size,
            thread_name: "vault-worker".to_string(),
        }
    }

    /// Thread-name prefix for diagnostics.
    pub fn thread_name(mut self, name: &str) -> Self {
        self.thread_name = name.to_string();
        self
    }

    /// Spawn the workers.
    pub fn build(self) -> WorkerPool {
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            all_idle: Condvar::new(),
            working: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            outcome: Arc::new(AtomicBool::new(true)),
        });

        let workers = (0..self.size)
            .map(|i| {
                let inner = inner.clone();
                std::thread::Builder::new()
                    .name(format!("{}-{i}", self.thread_name))
                    .spawn(move || worker_loop(&inner))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        debug!(size = self.size, "worker pool started");
        WorkerPool { inner, workers }
    }
}

impl WorkerPool {
    /// Convenience: pool with `size` threads and the default thread name.
    pub fn new(size: usize) -> Self {
        WorkerPoolBuilder::new(size).build()
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Submit a task. O(1); dispatch is FIFO.
    ///
    /// With zero workers the task runs inline on the caller's thread, which
    /// keeps single-threaded configurations free of any queueing.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce(&WorkerContext) + Send + 'static,
    {
        if self.workers.is_empty() {
            let context = WorkerContext {
                outcome: self.inner.outcome.clone(),
            };
            task(&context);
            return;
        }
        let mut queue = self.inner.queue.lock();
        queue.push_back(Box::new(task));
        drop(queue);
        self.inner.work_ready.notify_one();
    }

    /// Block until the queue is empty and every worker is idle.
    ///
    /// Returns the pool outcome: `true` unless some task failed it. The
    /// flag is left untouched so several submission batches can share one
    /// verdict; call [`WorkerPool::reset_outcome`] between unrelated runs.
    pub fn wait_for_idle(&self) -> bool {
        let mut queue = self.inner.queue.lock();
        loop {
            let working = self.inner.working.load(Ordering::Acquire);
            if queue.is_empty() && working == 0 {
                break;
            }
            self.inner.all_idle.wait(&mut queue);
        }
        drop(queue);
        self.inner.outcome.load(Ordering::Acquire)
    }

    /// Reset the shared outcome flag to success.
    pub fn reset_outcome(&self) {
        self.inner.outcome.store(true, Ordering::Release);
    }

    /// Drain outstanding tasks, join all threads.
    pub fn shutdown(mut self) -> bool {
        let outcome = self.wait_for_idle();
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.work_ready.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
        outcome
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.work_ready.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.working.fetch_add(1, Ordering::AcqRel);
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let context = WorkerContext {
            outcome: inner.outcome.clone(),
        };
        task(&context);

        {
            // the queue lock orders this decrement against wait_for_idle's
            // check, so the notify cannot be lost
            let queue = inner.queue.lock();
            let working = inner.working.fetch_sub(1, Ordering::AcqRel) - 1;
            if working == 0 && queue.is_empty() {
                inner.all_idle.notify_all();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_thousand_noops_drain() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..1000 {
            let counter = counter.clone();
            pool.submit(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert!(pool.wait_for_idle());
        assert_eq!(counter.load(Ordering::Relaxed), 1000);
        // idle again immediately: queue empty, nobody working
        assert!(pool.wait_for_idle());
    }

    #[test]
    fn test_failed_task_fails_outcome() {
        let pool = WorkerPool::new(2);
        pool.submit(|_| {});
        pool.submit(|ctx| ctx.fail());
        pool.submit(|_| {});
        assert!(!pool.wait_for_idle());
        // outcome sticks across waits until reset
        assert!(!pool.wait_for_idle());
        pool.reset_outcome();
        assert!(pool.wait_for_idle());
    }

    #[test]
    fn test_inline_execution_with_zero_workers() {
        let pool = WorkerPool::new(0);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        pool.submit(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        // ran synchronously
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert!(pool.wait_for_idle());
    }

    #[test]
    fn test_wait_blocks_until_slow_tasks_finish() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = counter.clone();
            pool.submit(move |_| {
                std::thread::sleep(Duration::from_millis(20));
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert!(pool.wait_for_idle());
        assert_eq!(counter.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn test_shutdown_joins() {
        let pool = WorkerPool::new(3);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = counter.clone();
            pool.submit(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert!(pool.shutdown());
        assert_eq!(counter.load(Ordering::Relaxed), 50);
    }

    #[test]
    fn test_fifo_dispatch_single_worker() {
        let pool = WorkerPool::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let order = order.clone();
            pool.submit(move |_| {
                order.lock().push(i);
            });
        }
        pool.wait_for_idle();
        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }
}
