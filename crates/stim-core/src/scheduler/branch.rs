use std::fmt;

use super::Scheduler;
use crate::error::BoxError;

type Resolve = Box<dyn FnOnce() -> Result<Scheduler, BoxError> + Send>;

/// Placeholder that substitutes itself with a queue the first time it is reached.
///
/// Conditional branches pick between two prepared queues; deferred flows build their
/// queue on demand, which is how loops re-schedule their repetitions.
pub struct Branch {
    name: String,
    resolve: Resolve,
}

impl Branch {
    /// Evaluate `predicate` once and continue with `then_queue` or `else_queue`.
    pub fn conditional<P>(
        name: impl Into<String>,
        predicate: P,
        then_queue: Scheduler,
        else_queue: Scheduler,
    ) -> Self
    where
        P: FnOnce() -> Result<bool, BoxError> + Send + 'static,
    {
        Self {
            name: name.into(),
            resolve: Box::new(move || {
                if predicate()? {
                    Ok(then_queue)
                } else {
                    Ok(else_queue)
                }
            }),
        }
    }

    /// Build the queue with `factory` when the branch is reached.
    pub fn deferred<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce() -> Result<Scheduler, BoxError> + Send + 'static,
    {
        Self {
            name: name.into(),
            resolve: Box::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn resolve(self) -> Result<Scheduler, BoxError> {
        (self.resolve)()
    }
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch").field("name", &self.name).finish()
    }
}
