//! Bounded fan-out of independent units of work.
//!
//! [`TaskCoordinator::run`] blocks until every unit of the batch has reached
//! a terminal state. A unit that returns an error or panics is recorded as
//! failed in the [`BatchResult`]; its siblings keep running. Nothing is
//! retried here.

pub mod batch;
pub mod progress;
pub mod unit;

pub use batch::{BatchResult, BatchSummary, UnitOutcome};
pub use progress::{LogProgress, Progress};
pub use unit::{UnitOfWork, UnitState, WorkUnit};

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use bon::Builder;
use getset::Getters;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use validator::Validate;

/// Worker pool settings. `threads` defaults to the available parallelism.
#[skip_serializing_none]
#[derive(Clone, Default, Validate, Serialize, Deserialize, Debug, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct CoordinatorConfig {
    #[validate(range(min = 1))]
    threads: Option<usize>,
}

/// `Dispatching` while some unit of the running batch has not started yet,
/// `Draining` once every unit is on a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoordinatorState {
    Idle = 0,
    Dispatching = 1,
    Draining = 2,
}

impl From<u8> for CoordinatorState {
    fn from(value: u8) -> Self {
        match value {
            1 => CoordinatorState::Dispatching,
            2 => CoordinatorState::Draining,
            _ => CoordinatorState::Idle,
        }
    }
}

/// Owns the worker pool. Construct one per job and pass it by reference to
/// the operations that fan out; the workers are torn down when it drops.
pub struct TaskCoordinator {
    pool: ThreadPool,
    state: AtomicU8,
    progress: Arc<dyn Progress>,
}

struct IdleOnDrop<'a>(&'a AtomicU8);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(CoordinatorState::Idle as u8, Ordering::SeqCst);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl TaskCoordinator {
    pub fn new(config: &CoordinatorConfig) -> Result<Self> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("frag-worker-{i}"));
        if let Some(threads) = config.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build()?;
        tracing::debug!(
            "Task coordinator started with {} workers",
            pool.current_num_threads()
        );

        Ok(Self {
            pool,
            state: AtomicU8::new(CoordinatorState::Idle as u8),
            progress: Arc::new(LogProgress),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn state(&self) -> CoordinatorState {
        self.state.load(Ordering::SeqCst).into()
    }

    /// Runs every unit on the pool and waits for all of them.
    ///
    /// Outcomes are returned in submission order whatever the completion
    /// order was.
    pub fn run<U: UnitOfWork>(&self, operation: &str, units: Vec<U>) -> BatchResult {
        let total = units.len();
        if total == 0 {
            tracing::info!("{operation}: nothing to do");
            return BatchResult::new(operation, Vec::new());
        }

        self.state
            .store(CoordinatorState::Dispatching as u8, Ordering::SeqCst);
        let _idle = IdleOnDrop(&self.state);
        tracing::info!(
            "{operation}: dispatching {total} units on {} workers",
            self.parallelism()
        );

        let started = AtomicUsize::new(0);
        let completed = AtomicUsize::new(0);
        let progress = self.progress.as_ref();
        let outcomes = self.pool.install(|| {
            units
                .into_par_iter()
                .map(|unit| {
                    let id = unit.identifier();
                    if started.fetch_add(1, Ordering::SeqCst) + 1 == total {
                        // every unit is on a worker now, only completions remain
                        self.state
                            .store(CoordinatorState::Draining as u8, Ordering::SeqCst);
                    }
                    progress.unit_started(operation, &id);
                    let outcome = execute_unit(id, unit);
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    progress.unit_finished(operation, &outcome, done, total);
                    outcome
                })
                .collect::<Vec<_>>()
        });

        let batch = BatchResult::new(operation, outcomes);
        let summary = batch.summary();
        if summary.failed == 0 {
            tracing::info!("{summary}");
        } else {
            tracing::warn!("{summary}");
        }
        batch
    }
}

fn execute_unit<U: UnitOfWork>(id: Arc<str>, unit: U) -> UnitOutcome {
    match catch_unwind(AssertUnwindSafe(move || unit.execute())) {
        Ok(Ok(())) => UnitOutcome::succeeded(id),
        Ok(Err(e)) => UnitOutcome::failed(id, e),
        Err(payload) => {
            let message = panic_message(payload);
            UnitOutcome::failed(
                id.clone(),
                Error::UnitPanicked {
                    unit: id,
                    message,
                },
            )
        }
    }
}

impl Drop for TaskCoordinator {
    fn drop(&mut self) {
        tracing::debug!("Task coordinator shutting down");
    }
}
