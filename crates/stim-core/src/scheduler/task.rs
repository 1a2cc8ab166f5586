use std::fmt;

use stim_model::ControlSignal;

use super::{Branch, Scheduler};
use crate::error::BoxError;

/// Result of one step invocation.
pub type StepResult = Result<ControlSignal, BoxError>;

type StepFn = Box<dyn FnMut() -> StepResult + Send>;

/// A named callable scheduled on a queue.
pub struct Step {
    name: String,
    run: StepFn,
}

impl Step {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut() -> StepResult + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(f),
        }
    }

    /// Bind `args` to the step; the callable receives them on every invocation.
    pub fn with_args<A, F>(name: impl Into<String>, mut args: A, mut f: F) -> Self
    where
        A: Send + 'static,
        F: FnMut(&mut A) -> StepResult + Send + 'static,
    {
        Self::new(name, move || f(&mut args))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke(&mut self) -> StepResult {
        (self.run)()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// Unit of work held by a [`Scheduler`].
#[derive(Debug)]
pub enum Task {
    Step(Step),
    Queue(Scheduler),
    Branch(Branch),
}

impl Task {
    pub fn name(&self) -> &str {
        match self {
            Task::Step(step) => step.name(),
            Task::Queue(queue) => queue.name(),
            Task::Branch(branch) => branch.name(),
        }
    }
}

impl From<Step> for Task {
    fn from(step: Step) -> Self {
        Task::Step(step)
    }
}

impl From<Scheduler> for Task {
    fn from(queue: Scheduler) -> Self {
        Task::Queue(queue)
    }
}

impl From<Branch> for Task {
    fn from(branch: Branch) -> Self {
        Task::Branch(branch)
    }
}
