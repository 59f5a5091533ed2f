//! Fixed worker pool with N-dimensional range partitioning.
//!
//! A [`WorkerPool`] owns a set of long-lived threads. Each call to
//! [`WorkerPool::run_kernel`] splits an index space of up to [`MAX_DIMS`]
//! dimensions into one contiguous run per worker, hands every worker its
//! run through its command channel, and blocks on a countdown latch until
//! all of them report back.
//!
//! # Partitioning
//!
//! The space is flattened row-major (the last dimension varies fastest)
//! into `T = Π dims` items and cut into runs of `ceil(T / workers)` items.
//! A worker only receives the N-D index its run starts at plus the run
//! length, and walks the rest with an odometer increment ([`Dims::advance`]).
//! Workers past the end of the space get an empty run.
//!
//! ```text
//! dims = [2, 3], 4 workers, ceil(6 / 4) = 2 items each
//!
//!   (0,0) (0,1) │ (0,2) (1,0) │ (1,1) (1,2) │ ─
//!    worker 0   │  worker 1   │  worker 2   │ worker 3 (empty)
//! ```
//!
//! # Synchronization
//!
//! - One dispatch at a time: `run_kernel` holds a mutex for its whole
//!   duration.
//! - Every worker, including those with an empty run, counts the latch
//!   down exactly once per dispatch, so the caller never returns before
//!   the last item is done.
//! - There is no timeout or cancellation. A kernel that never returns
//!   stalls the pool and the caller.
//!
//! Kernels must only write the items they are handed. The partition
//! guarantees runs are disjoint.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, trace, warn};

/// Highest supported rank of an index space.
pub const MAX_DIMS: usize = 3;

const WORKER_STACK_SIZE: usize = 256 * 1024;

/// Extents of an index space of rank 1 to [`MAX_DIMS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dims {
    extents: [u32; MAX_DIMS],
    rank: usize,
}

impl Dims {
    /// Validates and stores `extents`, outermost first.
    ///
    /// # Errors
    /// - `InvalidArg` if the rank is zero or above [`MAX_DIMS`], or the
    ///   item count does not fit in a `u32`.
    pub fn new(extents: &[u32]) -> Result<Self> {
        if extents.is_empty() || extents.len() > MAX_DIMS {
            return Err(Error::invalid_arg(format!(
                "rank {} outside [1, {MAX_DIMS}]",
                extents.len()
            )));
        }
        let total: u64 = extents.iter().map(|&e| u64::from(e)).product();
        if total > u64::from(u32::MAX) {
            return Err(Error::invalid_arg(format!("{total} items exceed u32")));
        }
        let mut padded = [1; MAX_DIMS];
        padded[..extents.len()].copy_from_slice(extents);
        Ok(Self {
            extents: padded,
            rank: extents.len(),
        })
    }

    /// A one-dimensional space of `n` items.
    #[must_use]
    pub const fn linear(n: u32) -> Self {
        Self {
            extents: [n, 1, 1],
            rank: 1,
        }
    }

    /// Number of dimensions.
    #[must_use]
    pub const fn rank(&self) -> usize {
        self.rank
    }

    /// Extents, outermost first.
    #[must_use]
    pub fn extents(&self) -> &[u32] {
        &self.extents[..self.rank]
    }

    /// Total number of items.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.extents().iter().product()
    }

    /// Row-major N-D index of flat item `flat`. `flat` must be below
    /// [`Dims::total`].
    #[must_use]
    pub fn unflatten(&self, mut flat: u32) -> [u32; MAX_DIMS] {
        let mut index = [0; MAX_DIMS];
        for d in (0..self.rank).rev() {
            index[d] = flat % self.extents[d];
            flat /= self.extents[d];
        }
        index
    }

    /// Odometer increment: bumps the innermost dimension and carries
    /// outward. Returns `false` on carry-out of the outermost dimension,
    /// leaving `index` wrapped to all zeros.
    pub fn advance(&self, index: &mut [u32; MAX_DIMS]) -> bool {
        for d in (0..self.rank).rev() {
            index[d] += 1;
            if index[d] < self.extents[d] {
                return true;
            }
            index[d] = 0;
        }
        false
    }
}

/// Data-parallel work item executed by the pool.
pub trait Kernel: Send + Sync {
    /// Processes one item. `index` has [`Dims::rank`] entries.
    fn run_item(&self, index: &[u32]);

    /// Processes `count` consecutive items starting at `start`.
    fn run(&self, dims: &Dims, start: [u32; MAX_DIMS], count: u32) {
        let mut index = start;
        for i in 0..count {
            self.run_item(&index[..dims.rank()]);
            if i + 1 < count && !dims.advance(&mut index) {
                break;
            }
        }
    }
}

impl<F> Kernel for F
where
    F: Fn(&[u32]) + Send + Sync,
{
    fn run_item(&self, index: &[u32]) {
        self(index);
    }
}

/// One worker's share of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    /// N-D index of the first item.
    pub start: [u32; MAX_DIMS],
    /// Number of items; `0` means idle this round.
    pub count: u32,
}

/// Splits `dims` into one contiguous run per worker.
#[must_use]
pub fn partition(dims: &Dims, workers: usize) -> Vec<Assignment> {
    let workers = workers.max(1) as u64;
    let total = u64::from(dims.total());
    let per = total.div_ceil(workers);
    (0..workers)
        .map(|w| {
            let begin = (w * per).min(total);
            let count = (total - begin).min(per);
            Assignment {
                start: if count > 0 {
                    dims.unflatten(begin as u32)
                } else {
                    [0; MAX_DIMS]
                },
                count: count as u32,
            }
        })
        .collect()
}

struct Latch {
    remaining: Mutex<usize>,
    done: Condvar,
    failed: AtomicBool,
}

impl Latch {
    fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            done: Condvar::new(),
            failed: AtomicBool::new(false),
        }
    }

    fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.done.notify_all();
        }
    }

    fn fail(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }

    fn wait(&self) -> bool {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.done.wait(&mut remaining);
        }
        !self.failed.load(Ordering::Relaxed)
    }
}

struct Job {
    kernel: Arc<dyn Kernel>,
    dims: Dims,
    assignment: Assignment,
    latch: Arc<Latch>,
}

enum Command {
    Run(Job),
    Stop,
}

struct Worker {
    commands: mpsc::Sender<Command>,
    handle: Option<thread::JoinHandle<()>>,
}

fn worker_loop(id: usize, commands: &mpsc::Receiver<Command>) {
    trace!(worker = id, "worker started");
    while let Ok(command) = commands.recv() {
        let Command::Run(job) = command else {
            break;
        };
        let Job {
            kernel,
            dims,
            assignment,
            latch,
        } = job;
        if assignment.count > 0 {
            let run = panic::catch_unwind(AssertUnwindSafe(|| {
                kernel.run(&dims, assignment.start, assignment.count);
            }));
            if run.is_err() {
                warn!(worker = id, "kernel panicked");
                latch.fail();
            }
        }
        drop(kernel);
        latch.count_down();
    }
    trace!(worker = id, "worker stopped");
}

/// Fixed set of persistent worker threads.
pub struct WorkerPool {
    workers: Vec<Worker>,
    dispatch: Mutex<()>,
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.workers.len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawns `threads` workers.
    ///
    /// # Errors
    /// - `InvalidArg` if `threads` is zero.
    /// - `OperationFailed` if a thread cannot be spawned; workers already
    ///   started are stopped and joined.
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::invalid_arg("pool needs at least one thread"));
        }
        let mut pool = Self {
            workers: Vec::with_capacity(threads),
            dispatch: Mutex::new(()),
        };
        for id in 0..threads {
            let (commands, receiver) = mpsc::channel();
            let handle = thread::Builder::new()
                .name(format!("briny-worker-{id}"))
                .stack_size(WORKER_STACK_SIZE)
                .spawn(move || worker_loop(id, &receiver))
                .map_err(|e| Error::operation_failed(format!("failed to spawn worker {id}: {e}")))?;
            pool.workers.push(Worker {
                commands,
                handle: Some(handle),
            });
        }
        debug!(threads, "worker pool started");
        Ok(pool)
    }

    /// Number of workers.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Runs `kernel` over `dims` and returns once every item is done.
    ///
    /// # Errors
    /// - `NotInitialized` after [`WorkerPool::shutdown`].
    /// - `OperationFailed` if a worker is gone or the kernel panicked.
    pub fn run_kernel(&self, kernel: Arc<dyn Kernel>, dims: Dims) -> Result<()> {
        if self.workers.is_empty() {
            return Err(Error::not_initialized("worker pool is shut down"));
        }
        let _dispatch = self.dispatch.lock();
        let plan = partition(&dims, self.workers.len());
        let latch = Arc::new(Latch::new(self.workers.len()));
        let mut delivered = true;
        for (worker, assignment) in self.workers.iter().zip(plan) {
            let job = Job {
                kernel: Arc::clone(&kernel),
                dims,
                assignment,
                latch: Arc::clone(&latch),
            };
            if worker.commands.send(Command::Run(job)).is_err() {
                delivered = false;
                latch.count_down();
            }
        }
        let clean = latch.wait();
        if !delivered {
            return Err(Error::operation_failed("a worker thread has exited"));
        }
        if !clean {
            return Err(Error::operation_failed("kernel panicked"));
        }
        Ok(())
    }

    /// Stops and joins every worker. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for worker in &self.workers {
            let _ = worker.commands.send(Command::Stop);
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
        debug!(threads = self.workers.len(), "worker pool stopped");
        self.workers.clear();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn expand(dims: &Dims, plan: &[Assignment]) -> Vec<[u32; MAX_DIMS]> {
        let mut seen = Vec::new();
        for a in plan {
            let mut index = a.start;
            for i in 0..a.count {
                seen.push(index);
                if i + 1 < a.count {
                    assert!(dims.advance(&mut index));
                }
            }
        }
        seen
    }

    #[test]
    fn dims_validation() {
        assert!(Dims::new(&[]).is_err());
        assert!(Dims::new(&[1, 2, 3, 4]).is_err());
        assert!(Dims::new(&[u32::MAX, 2]).is_err());
        let dims = Dims::new(&[2, 3, 4]).unwrap();
        assert_eq!(dims.total(), 24);
        assert_eq!(dims.extents(), &[2, 3, 4]);
    }

    #[test]
    fn odometer_carries_outward() {
        let dims = Dims::new(&[2, 2]).unwrap();
        let mut index = [0, 1, 0];
        assert!(dims.advance(&mut index));
        assert_eq!(index, [1, 0, 0]);
        assert!(dims.advance(&mut index));
        assert!(!dims.advance(&mut index));
        assert_eq!(index, [0, 0, 0]);
    }

    #[test]
    fn unflatten_is_row_major() {
        let dims = Dims::new(&[2, 3, 4]).unwrap();
        assert_eq!(dims.unflatten(0), [0, 0, 0]);
        assert_eq!(dims.unflatten(5), [0, 1, 1]);
        assert_eq!(dims.unflatten(23), [1, 2, 3]);
    }

    #[test]
    fn partition_covers_space_exactly() {
        for extents in [&[1][..], &[7], &[2, 3], &[3, 1, 5], &[4, 4, 4], &[0, 3]] {
            let dims = Dims::new(extents).unwrap();
            for workers in 1..=9 {
                let plan = partition(&dims, workers);
                assert_eq!(plan.len(), workers);
                let expected: Vec<_> = (0..dims.total()).map(|f| dims.unflatten(f)).collect();
                assert_eq!(expand(&dims, &plan), expected, "{extents:?} over {workers}");
            }
        }
    }

    #[test]
    fn trailing_workers_idle() {
        let plan = partition(&Dims::linear(2), 4);
        let counts: Vec<_> = plan.iter().map(|a| a.count).collect();
        assert_eq!(counts, vec![1, 1, 0, 0]);
    }

    #[test]
    fn pool_visits_every_item_once() {
        let pool = WorkerPool::new(3).unwrap();
        let hits: Arc<Vec<AtomicU32>> = Arc::new((0..60).map(|_| AtomicU32::new(0)).collect());
        let sink = Arc::clone(&hits);
        let kernel = move |index: &[u32]| {
            let flat = (index[0] * 4 + index[1]) * 5 + index[2];
            sink[flat as usize].fetch_add(1, Ordering::Relaxed);
        };
        pool.run_kernel(Arc::new(kernel), Dims::new(&[3, 4, 5]).unwrap())
            .unwrap();
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn pool_reusable_across_dispatches() {
        let pool = WorkerPool::new(2).unwrap();
        let total = Arc::new(AtomicU32::new(0));
        for _ in 0..50 {
            let sink = Arc::clone(&total);
            pool.run_kernel(
                Arc::new(move |_: &[u32]| {
                    sink.fetch_add(1, Ordering::Relaxed);
                }),
                Dims::linear(7),
            )
            .unwrap();
        }
        assert_eq!(total.load(Ordering::Relaxed), 350);
    }

    #[test]
    fn panicking_kernel_reported() {
        let pool = WorkerPool::new(2).unwrap();
        let err = pool
            .run_kernel(Arc::new(|_: &[u32]| panic!("boom")), Dims::linear(4))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::OperationFailed);
        pool.run_kernel(Arc::new(|_: &[u32]| {}), Dims::linear(4))
            .unwrap();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut pool = WorkerPool::new(2).unwrap();
        pool.shutdown();
        pool.shutdown();
        assert_eq!(pool.threads(), 0);
        let err = pool
            .run_kernel(Arc::new(|_: &[u32]| {}), Dims::linear(1))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotInitialized);
        assert_eq!(WorkerPool::new(0).unwrap_err().kind(), crate::ErrorKind::InvalidArg);
    }
}
