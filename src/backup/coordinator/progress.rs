use crate::backup::coordinator::batch::UnitOutcome;

/// Receives a callback each time a unit of a batch starts running and each
/// time one reaches a terminal state. Called from worker threads.
pub trait Progress: Send + Sync {
    fn unit_started(&self, _operation: &str, _id: &str) {}

    fn unit_finished(&self, operation: &str, outcome: &UnitOutcome, completed: usize, total: usize);
}

/// Reports progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl Progress for LogProgress {
    fn unit_started(&self, operation: &str, id: &str) {
        tracing::trace!("{operation}: {id} running");
    }

    fn unit_finished(&self, operation: &str, outcome: &UnitOutcome, completed: usize, total: usize) {
        match &outcome.error {
            None => tracing::debug!("{operation}: {completed}/{total} done ({})", outcome.id),
            Some(e) => tracing::error!(
                "{operation}: {completed}/{total} done, {} failed: {e}",
                outcome.id
            ),
        }
    }
}
