use serde::Serialize;

use crate::error::TaskFailure;
use crate::job::{AnalyzerResult, ComponentHandle};

use super::observer::ExecutionMetricsSnapshot;

/// Result of one analyzer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentResultEntry {
    pub handle: ComponentHandle,
    pub name: String,
    pub result: AnalyzerResult,
}

/// Everything a finished (or cancelled) run produced.
///
/// Analyzers that were disabled by a failure contribute no result; their failure is listed in
/// [`AnalysisResult::failures`].
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub(crate) results: Vec<ComponentResultEntry>,
    pub(crate) failures: Vec<TaskFailure>,
    pub(crate) cancelled: bool,
    pub(crate) rows_read: u64,
    pub(crate) metrics: ExecutionMetricsSnapshot,
}

impl AnalysisResult {
    /// Result of a run that never got to process rows.
    pub(crate) fn aborted(failure: TaskFailure) -> Self {
        Self {
            results: Vec::new(),
            failures: vec![failure],
            cancelled: false,
            rows_read: 0,
            metrics: ExecutionMetricsSnapshot::default(),
        }
    }

    /// `true` if nothing failed and the run was not cancelled.
    pub fn is_successful(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    /// Analyzer results in dependency order.
    pub fn results(&self) -> &[ComponentResultEntry] {
        &self.results
    }

    pub fn result(&self, handle: ComponentHandle) -> Option<&AnalyzerResult> {
        self.results
            .iter()
            .find(|r| r.handle == handle)
            .map(|r| &r.result)
    }

    pub fn result_by_name(&self, name: &str) -> Option<&AnalyzerResult> {
        self.results
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.result)
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Rows handed to row tasks, after skipping and limiting.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn metrics(&self) -> &ExecutionMetricsSnapshot {
        &self.metrics
    }

    /// Analyzer results as JSON, keyed by component name.
    pub fn results_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.results
                .iter()
                .map(|r| {
                    (
                        r.name.clone(),
                        serde_json::to_value(&r.result).unwrap_or(serde_json::Value::Null),
                    )
                })
                .collect(),
        )
    }
}
