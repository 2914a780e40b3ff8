//! Thread pool used to dispatch voxel and pixel work
use rayon::prelude::*;
use std::sync::Arc;

/// Thread pool to use for integration, raycasting, and extraction
///
/// Volumes store an `Option<ThreadPool>` in their settings; if it's `None`,
/// every operation runs on the calling thread.
#[derive(Clone, Debug)]
pub enum ThreadPool {
    /// User-provided pool
    Custom(Arc<rayon::ThreadPool>),
    /// Global Rayon pool
    Global,
}

impl ThreadPool {
    /// Runs a function across the thread pool
    pub fn run<F: FnOnce() -> V + Send, V: Send>(&self, f: F) -> V {
        match self {
            ThreadPool::Custom(p) => p.install(f),
            ThreadPool::Global => f(),
        }
    }

    /// Returns the number of threads in the pool
    pub fn thread_count(&self) -> usize {
        match self {
            ThreadPool::Custom(p) => p.current_num_threads(),
            ThreadPool::Global => rayon::current_num_threads(),
        }
    }
}

impl From<rayon::ThreadPool> for ThreadPool {
    fn from(p: rayon::ThreadPool) -> Self {
        ThreadPool::Custom(Arc::new(p))
    }
}

/// Calls `f(i, chunk)` on every `chunk`-sized slice of `data`
///
/// Chunks are processed in parallel if a pool is provided.
pub(crate) fn for_each_chunk_mut<T, F>(
    threads: Option<&ThreadPool>,
    data: &mut [T],
    chunk: usize,
    f: F,
) where
    T: Send,
    F: Fn(usize, &mut [T]) + Send + Sync,
{
    if let Some(threads) = threads {
        threads.run(|| {
            data.par_chunks_mut(chunk)
                .enumerate()
                .for_each(|(i, c)| f(i, c))
        })
    } else {
        data.chunks_mut(chunk)
            .enumerate()
            .for_each(|(i, c)| f(i, c))
    }
}

/// Maps `f` over `0..n`, returning results in index order
pub(crate) fn map_range<T, F>(
    threads: Option<&ThreadPool>,
    n: usize,
    f: F,
) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Send + Sync,
{
    if let Some(threads) = threads {
        threads.run(|| (0..n).into_par_iter().map(f).collect())
    } else {
        (0..n).map(f).collect()
    }
}
