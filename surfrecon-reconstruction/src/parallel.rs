//! Parallel processing utilities for surface reconstruction
//!
//! This module provides configurable thread pool management for the
//! data-parallel phases of reconstruction: sparse system assembly,
//! sparse matrix-vector products, lattice evaluation and cell scanning.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use surfrecon_core::{Error, Result};

/// Thread pool installed by [`init_thread_pool`]
static GLOBAL_THREAD_POOL: OnceLock<Arc<ThreadPool>> = OnceLock::new();
static THREAD_POOL_CONFIG: Mutex<ThreadPoolConfig> = Mutex::new(ThreadPoolConfig::new());

/// Thread pool configuration for parallel processing
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Number of threads to use (None = let rayon decide)
    pub num_threads: Option<usize>,
    /// Thread stack size in bytes
    pub stack_size: Option<usize>,
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// Enable parallel processing (can be disabled for debugging)
    pub enabled: bool,
    /// Inputs shorter than this are processed sequentially
    pub min_parallel_len: usize,
}

impl ThreadPoolConfig {
    const fn new() -> Self {
        Self {
            num_threads: None,
            stack_size: None,
            thread_name_prefix: String::new(),
            enabled: true,
            min_parallel_len: 64,
        }
    }

    /// Set number of threads
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Set stack size
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Enable or disable parallel processing
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the sequential cut-off
    pub fn with_min_parallel_len(mut self, len: usize) -> Self {
        self.min_parallel_len = len;
        self
    }
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "surfrecon".to_string(),
            ..Self::new()
        }
    }
}

/// Initialize the global thread pool with custom configuration.
///
/// Only the first successful call builds a pool; later calls update the
/// sequential/parallel switches but keep the existing threads.
pub fn init_thread_pool(config: ThreadPoolConfig) -> Result<()> {
    if GLOBAL_THREAD_POOL.get().is_none() {
        let mut builder = ThreadPoolBuilder::new();

        if let Some(num_threads) = config.num_threads {
            builder = builder.num_threads(num_threads);
        }

        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        if !config.thread_name_prefix.is_empty() {
            let prefix = config.thread_name_prefix.clone();
            builder = builder.thread_name(move |index| format!("{}-{}", prefix, index));
        }

        let pool = builder
            .build()
            .map_err(|e| Error::Algorithm(format!("Failed to create thread pool: {}", e)))?;

        // A concurrent initializer may have won the race; its pool is kept
        let _ = GLOBAL_THREAD_POOL.set(Arc::new(pool));
    }

    *config_guard() = config;

    Ok(())
}

/// The pool installed by [`init_thread_pool`], if any
pub fn get_thread_pool() -> Option<Arc<ThreadPool>> {
    GLOBAL_THREAD_POOL.get().cloned()
}

/// The stored config stays valid even if a holder of the lock panicked
fn config_guard() -> MutexGuard<'static, ThreadPoolConfig> {
    THREAD_POOL_CONFIG
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Get current thread pool configuration
pub fn get_config() -> ThreadPoolConfig {
    config_guard().clone()
}

/// Check if parallel processing is enabled
pub fn is_parallel_enabled() -> bool {
    get_config().enabled
}

fn run_sequentially(len: usize) -> bool {
    let config = get_config();
    !config.enabled || len < config.min_parallel_len
}

/// Execute a parallel operation on the configured pool, or rayon's global pool
pub fn execute_parallel<F, R>(op: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    match get_thread_pool() {
        Some(pool) => pool.install(op),
        None => op(),
    }
}

/// Parallel map operation
pub fn parallel_map<T, U, F>(data: &[T], f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync + Send,
{
    if run_sequentially(data.len()) {
        return data.iter().map(f).collect();
    }

    execute_parallel(|| data.par_iter().map(f).collect())
}

/// Parallel map with index
pub fn parallel_map_indexed<T, U, F>(data: &[T], f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(usize, &T) -> U + Sync + Send,
{
    if run_sequentially(data.len()) {
        return data.iter().enumerate().map(|(i, x)| f(i, x)).collect();
    }

    execute_parallel(|| data.par_iter().enumerate().map(|(i, x)| f(i, x)).collect())
}

/// Parallel map over `0..len`, results in index order
pub fn parallel_map_range<U, F>(len: usize, f: F) -> Vec<U>
where
    U: Send,
    F: Fn(usize) -> U + Sync + Send,
{
    if run_sequentially(len) {
        return (0..len).map(f).collect();
    }

    execute_parallel(|| (0..len).into_par_iter().map(f).collect())
}

/// Run `f(chunk_index, chunk)` over disjoint `chunk_len`-sized chunks of `data`
pub fn parallel_for_each_chunk_mut<T, F>(data: &mut [T], chunk_len: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync + Send,
{
    let chunk_len = chunk_len.max(1);
    if !is_parallel_enabled() || data.len() / chunk_len < 2 {
        data.chunks_mut(chunk_len).enumerate().for_each(|(i, c)| f(i, c));
        return;
    }

    execute_parallel(|| {
        data.par_chunks_mut(chunk_len)
            .enumerate()
            .for_each(|(i, c)| f(i, c))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_pool_config() {
        let config = ThreadPoolConfig::default()
            .with_threads(4)
            .with_stack_size(16 * 1024 * 1024)
            .with_enabled(true)
            .with_min_parallel_len(8);

        assert_eq!(config.num_threads, Some(4));
        assert_eq!(config.stack_size, Some(16 * 1024 * 1024));
        assert_eq!(config.thread_name_prefix, "surfrecon");
        assert_eq!(config.min_parallel_len, 8);
        assert!(config.enabled);
    }

    #[test]
    fn test_config_survives_poisoned_lock() {
        let _ = std::thread::spawn(|| {
            let _guard = config_guard();
            panic!("poison the config lock");
        })
        .join();
        assert!(THREAD_POOL_CONFIG.is_poisoned());

        init_thread_pool(ThreadPoolConfig::default()).unwrap();
        let config = get_config();
        assert_eq!(config.thread_name_prefix, "surfrecon");
        assert!(config.enabled);
    }

    #[test]
    fn test_parallel_map() {
        let data: Vec<usize> = (0..1000).collect();
        let result = parallel_map(&data, |x| x * 2);
        assert_eq!(result[999], 1998);
        assert_eq!(result.len(), 1000);
    }

    #[test]
    fn test_parallel_map_indexed_keeps_order() {
        let data = vec![10, 20, 30];
        let result = parallel_map_indexed(&data, |i, x| i + x);
        assert_eq!(result, vec![10, 21, 32]);
    }

    #[test]
    fn test_parallel_map_range() {
        let squares = parallel_map_range(500, |i| i * i);
        assert_eq!(squares[0], 0);
        assert_eq!(squares[499], 499 * 499);
    }

    #[test]
    fn test_chunks_are_disjoint() {
        let mut data = vec![0usize; 40];
        parallel_for_each_chunk_mut(&mut data, 10, |i, chunk| chunk.fill(i));
        assert_eq!(&data[..10], &[0; 10]);
        assert_eq!(&data[30..], &[3; 10]);
    }
}
