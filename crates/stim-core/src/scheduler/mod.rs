//! Cooperative task queue driving the experiment flow.
//!
//! A [`Scheduler`] holds an ordered list of tasks and runs at most one step per
//! [`Scheduler::tick`]. Sub-queues are delegated to; when a sub-queue has nothing left to
//! run it is popped and the parent continues within the same tick, so nesting never costs
//! a tick. A `Stop` (or an error) clears the queue and every enclosing queue at once.

mod branch;
pub use branch::Branch;
mod task;
pub use task::{Step, StepResult, Task};

use std::collections::VecDeque;

use stim_model::{ControlSignal, SchedulerState};
use tracing::{debug, trace};

use crate::error::{BoxError, FlowError};

/// Result of advancing a queue by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// A step ran and returned `Continue` or `Next`.
    Ran(ControlSignal),
    /// Nothing left to run; no step was invoked.
    Exhausted,
    /// A step stopped the flow or failed; the queue was cleared.
    Aborted,
}

/// Ordered queue of steps, sub-queues and branches.
#[derive(Debug)]
pub struct Scheduler {
    name: String,
    tasks: VecDeque<Task>,
    state: SchedulerState,
    error: Option<FlowError>,
}

impl Scheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: VecDeque::new(),
            state: SchedulerState::NotStarted,
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Number of pending top-level tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Error that stopped the queue, if any.
    pub fn error(&self) -> Option<&FlowError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<FlowError> {
        self.error.take()
    }

    /// Append a task. Adding to a stopped queue makes it runnable again.
    pub fn add(&mut self, task: impl Into<Task>) -> &mut Self {
        let task = task.into();
        trace!(queue = %self.name, task = task.name(), "task added");
        if self.state == SchedulerState::Stopped {
            self.state = SchedulerState::Running;
        }
        self.tasks.push_back(task);
        self
    }

    pub fn add_step<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: FnMut() -> StepResult + Send + 'static,
    {
        self.add(Step::new(name, f))
    }

    pub fn add_step_with<A, F>(&mut self, name: impl Into<String>, args: A, f: F) -> &mut Self
    where
        A: Send + 'static,
        F: FnMut(&mut A) -> StepResult + Send + 'static,
    {
        self.add(Step::with_args(name, args, f))
    }

    pub fn add_queue(&mut self, queue: Scheduler) -> &mut Self {
        self.add(queue)
    }

    /// Branch on `predicate`, evaluated once when the branch is reached.
    pub fn add_conditional<P>(
        &mut self,
        name: impl Into<String>,
        predicate: P,
        then_queue: Scheduler,
        else_queue: Scheduler,
    ) -> &mut Self
    where
        P: FnOnce() -> bool + Send + 'static,
    {
        self.add(Branch::conditional(
            name,
            move || Ok(predicate()),
            then_queue,
            else_queue,
        ))
    }

    /// Like [`Scheduler::add_conditional`], for predicates that can fail.
    pub fn add_fallible_conditional<P>(
        &mut self,
        name: impl Into<String>,
        predicate: P,
        then_queue: Scheduler,
        else_queue: Scheduler,
    ) -> &mut Self
    where
        P: FnOnce() -> Result<bool, BoxError> + Send + 'static,
    {
        self.add(Branch::conditional(name, predicate, then_queue, else_queue))
    }

    /// Build a sub-queue lazily when it is reached.
    pub fn add_deferred<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: FnOnce() -> Result<Scheduler, BoxError> + Send + 'static,
    {
        self.add(Branch::deferred(name, factory))
    }

    pub fn start(&mut self) {
        debug!(queue = %self.name, tasks = self.tasks.len(), "scheduler started");
        self.state = SchedulerState::Running;
    }

    /// Stop the queue and discard the remaining tasks.
    pub fn stop(&mut self) {
        if self.state != SchedulerState::Stopped {
            debug!(queue = %self.name, discarded = self.tasks.len(), "scheduler stopped");
        }
        self.tasks.clear();
        self.state = SchedulerState::Stopped;
    }

    /// Run at most one step.
    ///
    /// Returns the signal of the step that ran (`Continue` or `Next`), or `Stop` once the
    /// queue is stopped: explicitly, by an error (see [`Scheduler::error`]) or because no
    /// task is left. A queue that has not been started runs nothing and returns `Stop` when
    /// empty, `Continue` otherwise.
    pub fn tick(&mut self) -> ControlSignal {
        match self.state {
            SchedulerState::NotStarted if self.tasks.is_empty() => return ControlSignal::Stop,
            SchedulerState::NotStarted => return ControlSignal::Continue,
            SchedulerState::Stopped => return ControlSignal::Stop,
            SchedulerState::Running => {}
        }

        match self.advance() {
            Outcome::Ran(signal) => signal,
            Outcome::Exhausted => {
                debug!(queue = %self.name, "scheduler exhausted");
                ControlSignal::Stop
            }
            Outcome::Aborted => ControlSignal::Stop,
        }
    }

    fn advance(&mut self) -> Outcome {
        match self.state {
            SchedulerState::NotStarted => self.state = SchedulerState::Running,
            SchedulerState::Stopped => return Outcome::Exhausted,
            SchedulerState::Running => {}
        }

        loop {
            if matches!(self.tasks.front(), Some(Task::Branch(_)))
                && let Err(err) = self.expand_branch()
            {
                self.abort(Some(err));
                return Outcome::Aborted;
            }

            match self.tasks.front_mut() {
                None => {
                    self.state = SchedulerState::Stopped;
                    return Outcome::Exhausted;
                }
                Some(Task::Step(step)) => {
                    let result = step.invoke();
                    let origin = step.name().to_string();
                    return self.apply(origin, result);
                }
                Some(Task::Queue(child)) => match child.advance() {
                    Outcome::Exhausted => {
                        trace!(queue = %self.name, child = child.name(), "sub-queue exhausted");
                        self.tasks.pop_front();
                    }
                    Outcome::Aborted => {
                        let err = child.take_error().map(|e| e.within(&self.name));
                        self.abort(err);
                        return Outcome::Aborted;
                    }
                    ran => return ran,
                },
                Some(Task::Branch(_)) => {}
            }
        }
    }

    fn apply(&mut self, origin: String, result: StepResult) -> Outcome {
        match result {
            Ok(ControlSignal::Continue) => Outcome::Ran(ControlSignal::Continue),
            Ok(ControlSignal::Next) => {
                trace!(queue = %self.name, task = %origin, "step done");
                self.tasks.pop_front();
                Outcome::Ran(ControlSignal::Next)
            }
            Ok(ControlSignal::Stop) => {
                debug!(queue = %self.name, task = %origin, "step requested stop");
                self.abort(None);
                Outcome::Aborted
            }
            Err(source) => {
                let err = FlowError::new(origin, self.name.clone(), source);
                debug!(queue = %self.name, error = %err, "step failed");
                self.abort(Some(err));
                Outcome::Aborted
            }
        }
    }

    /// Replace the branch at the head with the queue it resolves to.
    fn expand_branch(&mut self) -> Result<(), FlowError> {
        let Some(Task::Branch(branch)) = self.tasks.pop_front() else {
            return Ok(());
        };
        let origin = branch.name().to_string();
        let queue = branch
            .resolve()
            .map_err(|source| FlowError::new(origin.as_str(), self.name.clone(), source))?;
        debug!(queue = %self.name, branch = %origin, chosen = queue.name(), "branch resolved");
        self.tasks.push_front(Task::Queue(queue));
        Ok(())
    }

    fn abort(&mut self, error: Option<FlowError>) {
        self.tasks.clear();
        self.state = SchedulerState::Stopped;
        if error.is_some() {
            self.error = error;
        }
    }
}
