use crate::backup::result_error::result::Result;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// One independent piece of I/O handed to the
/// [`TaskCoordinator`](super::TaskCoordinator).
///
/// A unit carries everything it needs by value and must be safe to run
/// again: it writes to a fixed destination, so repeating it converges on
/// the same end state.
pub trait UnitOfWork: Send {
    /// Name reported in [`BatchResult`](super::BatchResult) entries.
    fn identifier(&self) -> Arc<str>;

    fn execute(self) -> Result<()>;
}

/// Lifecycle of a unit inside a batch.
///
/// A unit is `Pending` until a worker picks it up and `Running` while it
/// executes, which the coordinator reports through
/// [`Progress::unit_started`](super::Progress::unit_started). Only the
/// terminal `Succeeded` and `Failed` states are recorded in a
/// [`BatchResult`](super::BatchResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Adapts a closure into a [`UnitOfWork`].
pub struct WorkUnit<F> {
    id: Arc<str>,
    work: F,
}

impl<F> WorkUnit<F>
where
    F: FnOnce() -> Result<()> + Send,
{
    pub fn new<S: Into<Arc<str>>>(id: S, work: F) -> Self {
        Self {
            id: id.into(),
            work,
        }
    }
}

impl<F> Debug for WorkUnit<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit").field("id", &self.id).finish()
    }
}

impl<F> UnitOfWork for WorkUnit<F>
where
    F: FnOnce() -> Result<()> + Send,
{
    fn identifier(&self) -> Arc<str> {
        self.id.clone()
    }

    fn execute(self) -> Result<()> {
        (self.work)()
    }
}
