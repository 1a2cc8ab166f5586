use thiserror::Error;

/// Error type returned by steps and predicates.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure raised inside a scheduled step or predicate.
///
/// `origin` names the failing task, `context` the chain of queues it ran in (outermost first).
#[derive(Error, Debug)]
#[error("task `{origin}` failed in `{context}`: {source}")]
pub struct FlowError {
    origin: String,
    context: String,
    source: BoxError,
}

impl FlowError {
    pub fn new(origin: impl Into<String>, queue: impl Into<String>, source: BoxError) -> Self {
        Self {
            origin: origin.into(),
            context: queue.into(),
            source,
        }
    }

    /// Prefix the context with an enclosing queue.
    pub fn within(mut self, queue: &str) -> Self {
        self.context = format!("{queue} > {}", self.context);
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}
