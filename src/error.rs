use std::io;
use thiserror::Error;

/// Error type for worker pool operations.
#[derive(Error, Debug)]
pub enum PoolError {
    /// A pool was requested with zero worker threads.
    #[error("Worker pool needs at least one thread")]
    InvalidSize,

    /// The OS refused to spawn a worker thread.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),

    /// A blocking drain was requested from one of the pool's own workers,
    /// which can never become idle to help the drain complete.
    #[error("Cannot wait on a worker pool from inside one of its own jobs")]
    ReentrantCall,

    /// One or more worker threads panicked outside of job execution.
    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),
}

/// Result type alias for worker pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
