use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use wren_core::error::{Error, Result};

/// Bounded pool for independent work items.
///
/// Results come back in input order and every call blocks until all items
/// are done. With a single thread, or a single item, work runs on the
/// calling thread.
pub struct WorkerPool {
    threads: usize,
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::invalid_argument("worker pool needs at least one thread"));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("wren-worker-{}", i))
            .build()
            .map_err(|e| Error::msg(format!("failed to start worker pool: {}", e)))?;
        Ok(WorkerPool { threads, pool })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        if self.threads == 1 || items.len() < 2 {
            return items.iter().map(f).collect();
        }
        self.pool.install(|| items.par_iter().map(f).collect())
    }

    /// Like [`WorkerPool::map`]; the first error encountered is returned.
    pub fn try_map<T, R, F>(&self, items: &[T], f: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync + Send,
    {
        if self.threads == 1 || items.len() < 2 {
            return items.iter().map(f).collect();
        }
        self.pool.install(|| items.par_iter().map(f).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_preserved() {
        let pool = WorkerPool::new(4).unwrap();
        let items: Vec<usize> = (0..100).collect();
        let out = pool.map(&items, |i| i * i);
        assert_eq!(out, items.iter().map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn test_error_propagates() {
        let pool = WorkerPool::new(2).unwrap();
        let items = [1, 2, 3, 0, 5];
        let r = pool.try_map(&items, |&i| {
            if i == 0 {
                Err(Error::msg("zero"))
            } else {
                Ok(10 / i)
            }
        });
        assert!(r.is_err());
        assert!(WorkerPool::new(0).is_err());
    }
}
