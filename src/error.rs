use std::fmt;

use thiserror::Error;

use crate::job::{ColumnId, ComponentHandle};

/// Convenience result type for job graph validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Convenience result type for component invocations.
pub type ComponentResult<T> = Result<T, ComponentError>;

/// Fatal errors found while validating a job graph.
///
/// These are raised by [`crate::job::JobBuilder::freeze`] and prevent a job from being frozen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A consumed column has no producer in the job (and is not a bound physical column).
    #[error("component '{component}' consumes column {column} which no component produces")]
    UnresolvedColumn { component: String, column: ColumnId },

    /// The component graph contains a cycle. `cycle` lists the components along the cycle, with
    /// the first component repeated at the end.
    #[error("cycle detected between components: {}", .names.join(" -> "))]
    CycleDetected {
        cycle: Vec<ComponentHandle>,
        names: Vec<String>,
    },

    /// A requirement references an outcome category the filter cannot produce.
    #[error(
        "component '{component}' requires outcome '{category}' which filter '{filter}' cannot produce (available: {available:?})"
    )]
    AmbiguousRequirement {
        component: String,
        filter: String,
        category: String,
        available: Vec<String>,
    },

    /// A requirement references a component that is not a filter.
    #[error("component '{component}' requires an outcome of '{referenced}', which is not a filter")]
    RequirementNotFilter { component: String, referenced: String },

    /// An analyzer has no wired input columns.
    #[error("analyzer '{component}' has no input columns")]
    MissingInput { component: String },

    /// A physical column name is not part of the bound schema.
    #[error("source column '{name}' not found in schema")]
    UnknownSourceColumn { name: String },

    /// A component rejected its configuration.
    #[error("component '{component}' has an invalid configuration: {message}")]
    InvalidConfiguration { component: String, message: String },
}

/// Errors returned by [`crate::job::JobBuilder`] mutation methods and `freeze`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobBuildError {
    /// The builder has been frozen; no further mutation is allowed.
    #[error("job has been frozen and can no longer be modified")]
    Frozen,

    /// The handle does not belong to this builder.
    #[error("unknown component {0}")]
    UnknownComponent(ComponentHandle),

    /// Graph validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Error returned by a single component invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComponentError {
    /// Free-form failure reported by component code.
    #[error("{0}")]
    Message(String),

    /// The component panicked; the payload message is preserved when it is a string.
    #[error("component panicked: {0}")]
    Panicked(String),

    /// A transformer returned a different number of values than its signature declares.
    #[error("expected {expected} output values, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    /// A filter returned a category outside of its declared categories.
    #[error("filter produced undeclared category '{0}'")]
    UnknownCategory(String),

    /// Configuration could not be interpreted by the component.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The task never ran because its runner was cancelled first.
    #[error("discarded after cancellation")]
    Discarded,
}

impl ComponentError {
    /// Free-form component failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Configuration failure.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }
}

/// Identifies the component a [`TaskFailure`] originated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedComponent {
    pub handle: ComponentHandle,
    pub name: String,
}

/// A failure captured during execution.
///
/// Task failures are recorded by the task runner and reported through
/// [`crate::execution::AnalysisResult::failures`]; they never abort sibling tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// The failing component, if the failure is attributable to one.
    pub component: Option<FailedComponent>,
    /// The 1-based physical row id being processed, if any.
    pub row: Option<u64>,
    /// What went wrong.
    pub cause: ComponentError,
}

impl TaskFailure {
    /// Failure attributed to a component, optionally on a specific row.
    pub fn in_component(
        handle: ComponentHandle,
        name: impl Into<String>,
        row: Option<u64>,
        cause: ComponentError,
    ) -> Self {
        Self {
            component: Some(FailedComponent {
                handle,
                name: name.into(),
            }),
            row,
            cause,
        }
    }

    /// Failure of a task as a whole (e.g. a panic outside component code or a source error).
    pub fn task(row: Option<u64>, cause: ComponentError) -> Self {
        Self {
            component: None,
            row,
            cause,
        }
    }

    /// `true` if this failure was raised by `handle`.
    pub fn involves(&self, handle: ComponentHandle) -> bool {
        self.component.as_ref().is_some_and(|c| c.handle == handle)
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.component {
            Some(c) => write!(f, "component '{}' ({}) failed", c.name, c.handle)?,
            None => f.write_str("task failed")?,
        }
        if let Some(row) = self.row {
            write!(f, " on row {row}")?;
        }
        write!(f, ": {}", self.cause)
    }
}

impl std::error::Error for TaskFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Error reported by an external row source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A row does not match the source schema.
    #[error("row {row} has {actual} values but the schema has {expected} fields")]
    RowArity {
        row: u64,
        expected: usize,
        actual: usize,
    },

    /// Pre-aggregated rows could not be read back.
    #[error(transparent)]
    SortMerge(#[from] SortMergeError),

    /// Any other source failure.
    #[error("{0}")]
    Message(String),
}

/// Convenience result type for the sort-merge writer.
pub type SortMergeResult<T> = Result<T, SortMergeError>;

/// Errors from spilling, merging or writing in [`crate::sort::SortMergeWriter`].
///
/// Any error during `write` invalidates the partial output.
#[derive(Debug, Error)]
pub enum SortMergeError {
    /// Temporary file or sink I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A spill record could not be encoded or decoded.
    #[error("spill serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Writer options are not usable.
    #[error("invalid sort-merge options: {0}")]
    InvalidOptions(String),
}

/// Errors from constructing or driving the execution engine.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Engine options are not usable.
    #[error("invalid execution options: {0}")]
    InvalidOptions(String),

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Spawning a background thread failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A row source failed while being drained.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Pre-aggregation through the sort-merge writer failed.
    #[error(transparent)]
    SortMerge(#[from] SortMergeError),
}

/// Errors loading an [`crate::config::EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The config text is not valid JSON for the expected shape.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The config parsed but contains unusable values.
    #[error("invalid config: {0}")]
    Invalid(String),
}
