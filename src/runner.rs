//! # Bounded Task Runner
//!
//! Every stage fans out over its package list through [`run_bounded`]. Work
//! runs on a dedicated rayon pool with exactly `limit` threads, so at most
//! `limit` units are in flight at once. Units are expected to block on
//! subprocesses and filesystem I/O, which is why each run gets its own pool
//! instead of sharing rayon's global one.
//!
//! An optional [`AbortSignal`] stops dispatch: once raised, items that have
//! not started are skipped and counted in [`RunReport::not_started`], while
//! items already running finish normally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::error::{Error, Result};

/// Shared cancellation flag observed between units of work.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops dispatch of further work. Running work is not interrupted.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The underlying flag, for registration with OS signal handlers.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// Outcome of a bounded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport<R> {
    /// One result per item that was started. Order is not significant.
    pub results: Vec<R>,
    /// Items skipped because the abort signal was raised first.
    pub not_started: usize,
}

impl<R> RunReport<R> {
    pub fn was_aborted(&self) -> bool {
        self.not_started > 0
    }
}

/// Runs `work` once per item with at most `limit` concurrent executions.
///
/// A `limit` of zero is treated as one. Failures are whatever `work`
/// returns; the runner never stops on them. Only failing to build the
/// thread pool is an error.
pub fn run_bounded<T, R, F>(
    items: &[T],
    limit: usize,
    signal: Option<&AbortSignal>,
    work: F,
) -> Result<RunReport<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let limit = limit.max(1);
    debug!("Running {} items with concurrency {}", items.len(), limit);

    let pool = ThreadPoolBuilder::new()
        .num_threads(limit)
        .thread_name(|i| format!("registry-worker-{}", i))
        .build()
        .map_err(|e| Error::Runner {
            message: e.to_string(),
        })?;

    let outcomes: Vec<Option<R>> = pool.install(|| {
        items
            .par_iter()
            .map(|item| {
                if signal.is_some_and(AbortSignal::is_aborted) {
                    None
                } else {
                    Some(work(item))
                }
            })
            .collect()
    });

    let total = outcomes.len();
    let results: Vec<R> = outcomes.into_iter().flatten().collect();
    let not_started = total - results.len();
    if not_started > 0 {
        debug!("Abort requested; {} items were not started", not_started);
    }

    Ok(RunReport {
        results,
        not_started,
    })
}
