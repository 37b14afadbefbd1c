//! Bounded worker pool used to run both protocol servers' per-request
//! bodies off the accept threads.
//!
//! Tasks queue behind a mutex guarded by two condition variables
//! (`not_empty`, `not_full`), matching the original bounded-circular-queue
//! shape: workers block on `not_empty` to pop, producers block on
//! `not_full` to push. A synchronous [`WorkerPool::submit`] gets its
//! result back over a one-shot `mpsc::sync_channel`; a fire-and-forget
//! submission queues the closure and returns immediately.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Pool auto-sizing bounds used when the configured thread count is `0`.
const MIN_THREADS_IF_AUTO: usize = 2;
const MAX_THREADS_IF_AUTO: usize = 16;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("worker pool shutting down")]
    ShuttingDown,
}

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    tasks: VecDeque<Task>,
    capacity: usize,
    shutdown: bool,
}

/// A bounded pool of worker threads draining a shared task queue.
pub struct WorkerPool {
    queue: Mutex<Queue>,
    not_empty: Condvar,
    not_full: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Build a pool with `threads` workers (`0` auto-sizes from
    /// [`std::thread::available_parallelism`], clamped to
    /// `[MIN_THREADS_IF_AUTO, MAX_THREADS_IF_AUTO]`) and a task queue of
    /// depth `queue_depth` (`0` defaults to the thread count).
    pub fn new(threads: usize, queue_depth: usize) -> Arc<Self> {
        let threads = if threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(MIN_THREADS_IF_AUTO)
                .clamp(MIN_THREADS_IF_AUTO, MAX_THREADS_IF_AUTO)
        } else {
            threads
        };
        let capacity = if queue_depth == 0 { threads } else { queue_depth };

        let pool = Arc::new(WorkerPool {
            queue: Mutex::new(Queue {
                tasks: VecDeque::with_capacity(capacity),
                capacity,
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            workers: Mutex::new(Vec::with_capacity(threads)),
            shutdown: Arc::new(AtomicBool::new(false)),
        });

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let pool = pool.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("propd-worker-{index}"))
                    .spawn(move || pool.worker_loop())
                    .expect("failed to spawn worker thread"),
            );
        }
        *pool.workers.lock() = workers;
        pool
    }

    fn worker_loop(&self) {
        loop {
            let task = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(task) = queue.tasks.pop_front() {
                        self.not_full.notify_one();
                        break Some(task);
                    }
                    if queue.shutdown {
                        break None;
                    }
                    self.not_empty.wait(&mut queue);
                }
            };
            match task {
                Some(task) => task(),
                None => return,
            }
        }
    }

    /// Queue `task`. Blocks the caller while the queue is full.
    fn enqueue(&self, task: Task) -> Result<(), PoolError> {
        let mut queue = self.queue.lock();
        loop {
            if queue.shutdown {
                return Err(PoolError::ShuttingDown);
            }
            if queue.tasks.len() < queue.capacity {
                queue.tasks.push_back(task);
                self.not_empty.notify_one();
                return Ok(());
            }
            self.not_full.wait(&mut queue);
        }
    }

    /// Submit a unit of work. When `sync` is true, blocks until `f` has
    /// run and returns its result; otherwise the task is queued and
    /// `Ok(())` is returned immediately without waiting for it to run.
    pub fn submit<F, T>(&self, f: F, sync: bool) -> Result<Option<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if !sync {
            self.enqueue(Box::new(move || {
                f();
            }))?;
            return Ok(None);
        }

        let (tx, rx) = mpsc::sync_channel::<T>(1);
        self.enqueue(Box::new(move || {
            let _ = tx.send(f());
        }))?;
        match rx.recv() {
            Ok(result) => Ok(Some(result)),
            Err(_) => Err(PoolError::ShuttingDown),
        }
    }

    /// Signal shutdown, wake every blocked worker and producer, and join
    /// all worker threads. Any task still queued when shutdown begins is
    /// dropped without running.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut queue = self.queue.lock();
            queue.shutdown = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
