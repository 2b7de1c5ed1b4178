#![deny(missing_docs)]

//! A fixed-size worker thread pool.
//!
//! [`WorkerPool`] runs submitted closures on a fixed set of long-lived
//! threads pulling from a shared FIFO queue. Callers can block until the
//! queue drains with [`WorkerPool::wait_all`], and stop the pool with
//! [`WorkerPool::shutdown`], which either drains or discards queued work.
//! Dropping the pool drains it.
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use workpool::{ThreadPool, WorkerPool};
//!
//! let pool = WorkerPool::new(4)?;
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! for _ in 0..100 {
//!     let counter = Arc::clone(&counter);
//!     pool.spawn(move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     });
//! }
//!
//! pool.wait_all()?;
//! assert_eq!(counter.load(Ordering::SeqCst), 100);
//! # Ok::<(), workpool::PoolError>(())
//! ```

mod error;
/// Thread pool trait and the worker pool implementation.
pub mod thread_pool;

pub use error::{PoolError, Result};
pub use thread_pool::{PoolConfig, PoolState, ThreadPool, WorkerPool};
