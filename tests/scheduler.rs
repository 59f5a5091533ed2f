use briny_infer::ErrorKind;
use briny_infer::ce::Provider;
use briny_infer::ce::pool::{Dims, Kernel, MAX_DIMS, PoolConfig, PoolProvider, WorkerPool, partition};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

fn flatten(dims: &Dims, index: &[u32]) -> usize {
    index
        .iter()
        .zip(dims.extents())
        .fold(0usize, |acc, (&i, &e)| acc * e as usize + i as usize)
}

#[test]
fn partition_covers_every_item_in_order() {
    let shapes: &[&[u32]] = &[
        &[1],
        &[7],
        &[64],
        &[1000],
        &[3, 5],
        &[1, 9],
        &[16, 16],
        &[2, 3, 4],
        &[5, 1, 7],
        &[4, 4, 4],
    ];
    for &shape in shapes {
        let dims = Dims::new(shape).unwrap();
        let total = dims.total() as usize;
        for workers in [1, 2, 3, 4, 7, 8, 16, 33] {
            let plan = partition(&dims, workers);
            assert_eq!(plan.len(), workers);

            let per = total.div_ceil(workers);
            let mut next = 0usize;
            for a in &plan {
                assert!(a.count as usize <= per);
                if a.count == 0 {
                    continue;
                }
                assert_eq!(flatten(&dims, &a.start[..dims.rank()]), next, "{shape:?}/{workers}");
                next += a.count as usize;
            }
            assert_eq!(next, total, "{shape:?}/{workers}");

            // idle workers only trail the busy ones
            let first_idle = plan.iter().position(|a| a.count == 0).unwrap_or(workers);
            assert!(plan[first_idle..].iter().all(|a| a.count == 0));
        }
    }
}

#[test]
fn odometer_walks_the_whole_space() {
    let dims = Dims::new(&[2, 3, 4]).unwrap();
    let mut index = [0; MAX_DIMS];
    let mut seen = 1;
    while dims.advance(&mut index) {
        assert_eq!(flatten(&dims, &index), seen);
        seen += 1;
    }
    assert_eq!(seen, 24);
    assert_eq!(index, [0, 0, 0]);
}

#[test]
fn pool_visits_each_item_once() {
    for threads in [1, 2, 3, 8] {
        let pool = WorkerPool::new(threads).unwrap();
        let shapes: [&[u32]; 3] = [&[97], &[6, 11], &[3, 4, 5]];
        for shape in shapes {
            let dims = Dims::new(shape).unwrap();
            let hits: Arc<Vec<AtomicU32>> =
                Arc::new((0..dims.total()).map(|_| AtomicU32::new(0)).collect());
            let kernel = {
                let hits = Arc::clone(&hits);
                move |index: &[u32]| {
                    hits[flatten(&dims, index)].fetch_add(1, Ordering::Relaxed);
                }
            };
            pool.run_kernel(Arc::new(kernel), dims).unwrap();
            assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
        }
    }
}

struct Tally {
    items: AtomicU32,
    runs: AtomicU32,
}

impl Kernel for Tally {
    fn run_item(&self, _index: &[u32]) {
        self.items.fetch_add(1, Ordering::Relaxed);
    }

    fn run(&self, dims: &Dims, start: [u32; MAX_DIMS], count: u32) {
        if count > 0 {
            self.runs.fetch_add(1, Ordering::Relaxed);
        }
        let mut index = start;
        for i in 0..count {
            self.run_item(&index[..dims.rank()]);
            if i + 1 < count {
                dims.advance(&mut index);
            }
        }
    }
}

#[test]
fn custom_run_sees_one_chunk_per_busy_worker() {
    let pool = WorkerPool::new(4).unwrap();
    let tally = Arc::new(Tally {
        items: AtomicU32::new(0),
        runs: AtomicU32::new(0),
    });
    pool.run_kernel(tally.clone(), Dims::linear(10)).unwrap();
    assert_eq!(tally.items.load(Ordering::Relaxed), 10);
    // ceil(10 / 4) = 3: runs of 3, 3, 3, 1
    assert_eq!(tally.runs.load(Ordering::Relaxed), 4);

    pool.run_kernel(tally.clone(), Dims::linear(2)).unwrap();
    assert_eq!(tally.items.load(Ordering::Relaxed), 12);
    assert_eq!(tally.runs.load(Ordering::Relaxed), 6);
}

#[test]
fn provider_runs_kernels_through_its_pool() {
    let mut provider = PoolProvider::new();
    let noop = |_: &[u32]| {};
    let err = provider.run_kernel(Arc::new(noop), &[4]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotInitialized);

    provider
        .init(Some(&PoolConfig::default().with_threads(3)))
        .unwrap();
    assert_eq!(provider.threads(), 3);

    let sum = Arc::new(AtomicU32::new(0));
    let kernel = {
        let sum = Arc::clone(&sum);
        move |index: &[u32]| {
            sum.fetch_add(index[0] * 10 + index[1], Ordering::Relaxed);
        }
    };
    provider.run_kernel(Arc::new(kernel), &[3, 4]).unwrap();
    // Σ over rows 0..3 and cols 0..4 of (10 r + c)
    assert_eq!(sum.load(Ordering::Relaxed), 10 * 3 * 4 + 6 * 3);

    let err = provider.run_kernel(Arc::new(noop), &[1, 1, 1, 1]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArg);

    provider.uninit();
    assert_eq!(provider.threads(), 0);
}
