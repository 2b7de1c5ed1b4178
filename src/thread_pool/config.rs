use std::thread;

/// Default prefix for worker thread names.
const DEFAULT_THREAD_NAME: &str = "pool-worker";

/// Settings used to build a [`WorkerPool`](super::WorkerPool).
///
/// ```
/// use workpool::{PoolConfig, WorkerPool};
///
/// let pool = WorkerPool::with_config(PoolConfig::default().threads(2).thread_name("io"))?;
/// assert_eq!(pool.thread_count(), 2);
/// # Ok::<(), workpool::PoolError>(())
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    threads: usize,
    thread_name: String,
    stack_size: Option<usize>,
}

impl Default for PoolConfig {
    /// One worker per logical CPU, named `pool-worker-{id}`.
    fn default() -> Self {
        PoolConfig {
            threads: num_cpus::get(),
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            stack_size: None,
        }
    }
}

impl PoolConfig {
    /// Sets the number of worker threads. Fixed for the pool's lifetime.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the prefix of worker thread names; workers are named `{prefix}-{id}`.
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Sets the stack size of each worker thread, in bytes.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Returns the configured number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.threads
    }

    pub(crate) fn thread_builder(&self, id: usize) -> thread::Builder {
        let builder = thread::Builder::new().name(format!("{}-{id}", self.thread_name));
        match self.stack_size {
            Some(bytes) => builder.stack_size(bytes),
            None => builder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_every_cpu() {
        let config = PoolConfig::default();
        assert_eq!(config.thread_count(), num_cpus::get());
        assert_eq!(config.thread_name, DEFAULT_THREAD_NAME);
        assert!(config.stack_size.is_none());
    }

    #[test]
    fn setters_override_defaults() {
        let config = PoolConfig::default()
            .threads(3)
            .thread_name("render")
            .stack_size(64 * 1024);
        assert_eq!(config.thread_count(), 3);
        assert_eq!(config.thread_name, "render");
        assert_eq!(config.stack_size, Some(64 * 1024));
    }
}
