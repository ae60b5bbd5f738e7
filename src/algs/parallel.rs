//! Worker pool and data-parallel helpers.
//!
//! With the `rayon` feature every helper runs on a rayon pool (a dedicated one
//! when a thread count is requested, the global pool otherwise). Without it
//! the same helpers run serially. Outputs are always in input order, so
//! results never depend on the number of threads.

use crate::mesh_error::MeshAdaptError;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Pool shared by all parallel phases of one refinement call.
#[derive(Debug, Default)]
pub struct WorkerPool {
    #[cfg(feature = "rayon")]
    pool: Option<rayon::ThreadPool>,
}

impl WorkerPool {
    /// Build a pool with `num_threads` workers, or use the global pool for `None`.
    pub fn new(num_threads: Option<usize>) -> Result<Self, MeshAdaptError> {
        if num_threads == Some(0) {
            return Err(MeshAdaptError::InvalidParameter(
                "num_threads must be positive".into(),
            ));
        }
        #[cfg(feature = "rayon")]
        {
            let pool = match num_threads {
                Some(n) => Some(
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(n)
                        .build()
                        .map_err(|e| MeshAdaptError::InvalidParameter(e.to_string()))?,
                ),
                None => None,
            };
            Ok(Self { pool })
        }
        #[cfg(not(feature = "rayon"))]
        {
            Ok(Self {})
        }
    }

    /// Number of worker threads used by the helpers.
    pub fn num_threads(&self) -> usize {
        #[cfg(feature = "rayon")]
        {
            match &self.pool {
                Some(pool) => pool.current_num_threads(),
                None => rayon::current_num_threads(),
            }
        }
        #[cfg(not(feature = "rayon"))]
        {
            1
        }
    }

    /// Run `op` inside the pool.
    pub fn install<R, OP>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        #[cfg(feature = "rayon")]
        {
            match &self.pool {
                Some(pool) => pool.install(op),
                None => op(),
            }
        }
        #[cfg(not(feature = "rayon"))]
        {
            op()
        }
    }

    /// `items.map(f)` in parallel, preserving order.
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        self.install(|| par_map(items, f))
    }
}

/// Order-preserving parallel map over a slice.
pub fn par_map<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        items.par_iter().map(f).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        items.iter().map(f).collect()
    }
}

/// Order-preserving parallel map over `0..n`.
pub fn par_map_range<R, F>(n: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(usize) -> R + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        (0..n).into_par_iter().map(f).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        (0..n).map(f).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_preserve_input_order() {
        let pool = WorkerPool::new(Some(2)).unwrap();
        let squares = pool.map(&[1u64, 2, 3, 4], |x| x * x);
        assert_eq!(squares, vec![1, 4, 9, 16]);
        let cubes = pool.install(|| par_map_range(4, |i| i * i * i));
        assert_eq!(cubes, vec![0, 1, 8, 27]);
        assert!(pool.num_threads() >= 1);
    }

    #[test]
    fn zero_threads_is_rejected() {
        assert!(matches!(
            WorkerPool::new(Some(0)),
            Err(MeshAdaptError::InvalidParameter(_))
        ));
    }
}
