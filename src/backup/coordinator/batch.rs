use crate::backup::coordinator::unit::UnitState;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use itertools::Itertools;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Terminal result of one unit.
#[derive(Debug)]
pub struct UnitOutcome {
    pub id: Arc<str>,
    pub state: UnitState,
    pub error: Option<Error>,
}

impl UnitOutcome {
    pub fn succeeded<S: Into<Arc<str>>>(id: S) -> Self {
        Self {
            id: id.into(),
            state: UnitState::Succeeded,
            error: None,
        }
    }

    pub fn failed<S: Into<Arc<str>>>(id: S, error: Error) -> Self {
        Self {
            id: id.into(),
            state: UnitState::Failed,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == UnitState::Succeeded
    }
}

/// Per-unit outcomes of one coordinator run, in submission order.
#[derive(Debug)]
pub struct BatchResult {
    operation: Arc<str>,
    outcomes: Vec<UnitOutcome>,
}

/// Counts and failed identifiers of a [`BatchResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub operation: Arc<str>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_ids: Vec<Arc<str>>,
}

impl Display for BatchSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} of {} succeeded",
            self.operation, self.succeeded, self.total
        )?;
        if self.failed > 0 {
            write!(f, ", failed: {}", self.failed_ids.iter().join(", "))?;
        }
        Ok(())
    }
}

impl BatchResult {
    pub fn new<S: Into<Arc<str>>>(operation: S, outcomes: Vec<UnitOutcome>) -> Self {
        Self {
            operation: operation.into(),
            outcomes,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn outcomes(&self) -> &[UnitOutcome] {
        &self.outcomes
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn failed_ids(&self) -> Vec<Arc<str>> {
        self.failures().map(|o| o.id.clone()).collect()
    }

    /// `true` when no unit failed; an empty batch is a success.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(UnitOutcome::is_success)
    }

    pub fn summary(&self) -> BatchSummary {
        let failed_ids = self.failed_ids();
        BatchSummary {
            operation: self.operation.clone(),
            total: self.total(),
            succeeded: self.total() - failed_ids.len(),
            failed: failed_ids.len(),
            failed_ids,
        }
    }

    /// Appends the outcomes of `other`, keeping this batch's operation name.
    pub fn extend(&mut self, other: BatchResult) {
        self.outcomes.extend(other.outcomes);
    }

    /// Escalates any failed unit into [`Error::PartialBatchFailure`],
    /// followed by the individual unit errors.
    ///
    /// Used by operations whose output is unusable when incomplete.
    pub fn into_hard_result(self) -> Result<BatchSummary> {
        let summary = self.summary();
        if summary.failed == 0 {
            return Ok(summary);
        }

        let unit_errors = self
            .outcomes
            .into_iter()
            .filter_map(|o| o.error.map(|e| e.add_msg(format!("Unit {}", o.id))))
            .collect_vec();
        let batch_error = Error::PartialBatchFailure {
            operation: summary.operation.to_string(),
            total: summary.total,
            failed: summary.failed_ids,
        };
        Err(if unit_errors.is_empty() {
            batch_error
        } else {
            batch_error.chain(unit_errors.into())
        })
    }
}
