use std::thread;

use log::{Level, LevelFilter, Log, Metadata, Record};

use workpool::{PoolConfig, PoolError, PoolState, Result, WorkerPool};

const DOOMED_PREFIX: &str = "doomed";

/// A logger that fails on error records emitted from doomed worker threads,
/// killing the worker outside of any job.
struct FailingLogger;

impl Log for FailingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Error
    }

    fn log(&self, record: &Record) {
        let doomed = thread::current()
            .name()
            .is_some_and(|name| name.starts_with(DOOMED_PREFIX));
        if record.level() == Level::Error && doomed {
            panic_control::disable_hook_in_current_thread();
            panic!("logger failure");
        }
    }

    fn flush(&self) {}
}

static LOGGER: FailingLogger = FailingLogger;

#[test]
fn worker_lost_outside_a_job_is_reported_on_shutdown() -> Result<()> {
    log::set_logger(&LOGGER).unwrap();
    log::set_max_level(LevelFilter::Error);

    let pool = WorkerPool::with_config(PoolConfig::default().threads(1).thread_name(DOOMED_PREFIX))?;
    pool.spawn(|| {
        panic_control::disable_hook_in_current_thread();
        panic!("job failure");
    });

    // The failed job is retired before the worker logs it and dies.
    pool.wait_all()?;
    assert_eq!(pool.panicked_jobs(), 1);

    let result = pool.shutdown(false);
    assert!(matches!(result, Err(PoolError::WorkerPanicked(_))));
    assert_eq!(pool.state(), PoolState::Stopped);
    pool.shutdown(true)?;
    Ok(())
}
