use std::sync::{Mutex, PoisonError};

use crate::error::{ComponentError, ComponentResult};
use crate::job::{Analyzer, AnalyzerResult, Component, ComponentContext, DistributionEntry};
use crate::sort::{NullPlacement, SortMergeOptions, SortMergeWriter, VecSink};
use crate::types::Value;

/// Frequencies of the values of its single input column, in ascending value order.
///
/// Values are compared by their display text. Counting goes through a [`SortMergeWriter`], so
/// columns with more distinct values than fit in memory spill to temporary files. The writer
/// needs exclusive access, which the default [`crate::job::Concurrency::ExclusiveAccess`]
/// capability guarantees.
pub struct ValueDistributionAnalyzer {
    options: SortMergeOptions,
    writer: Mutex<Option<SortMergeWriter<String>>>,
}

impl ValueDistributionAnalyzer {
    /// Analyzer with the default buffer size and the null bucket last.
    pub fn new() -> Self {
        Self::with_options(SortMergeOptions::new(NullPlacement::Last))
    }

    pub fn with_options(options: SortMergeOptions) -> Self {
        Self {
            options,
            writer: Mutex::new(None),
        }
    }

    fn fresh_writer(&self) -> ComponentResult<SortMergeWriter<String>> {
        SortMergeWriter::with_options(self.options.clone()).map_err(|e| ComponentError::invalid_configuration(e.to_string()))
    }
}

impl Default for ValueDistributionAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for ValueDistributionAnalyzer {
    fn initialize(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<()> {
        let writer = self.fresh_writer()?;
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(writer);
        Ok(())
    }
}

impl Analyzer for ValueDistributionAnalyzer {
    fn validate(&self, ctx: &ComponentContext<'_>) -> ComponentResult<()> {
        self.options
            .validate()
            .map_err(|e| ComponentError::invalid_configuration(e.to_string()))?;
        if ctx.inputs.len() > 1 {
            return Err(ComponentError::invalid_configuration(format!(
                "expected one input column, got {}",
                ctx.inputs.len()
            )));
        }
        Ok(())
    }

    fn run(&self, _ctx: &ComponentContext<'_>, values: &[Value], distinct_count: u64) -> ComponentResult<()> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(self.fresh_writer()?);
        }
        let key = match values.first() {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.to_string()),
        };
        if let Some(writer) = guard.as_mut() {
            writer
                .append_with_frequency(key, distinct_count)
                .map_err(|e| ComponentError::new(e.to_string()))?;
        }
        Ok(())
    }

    fn result(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<AnalyzerResult> {
        let writer = match self.writer.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some(writer) => writer,
            None => self.fresh_writer()?,
        };
        let mut sink = VecSink::new();
        writer
            .write(&mut sink)
            .map_err(|e| ComponentError::new(e.to_string()))?;
        Ok(AnalyzerResult::Distribution(
            sink.into_records()
                .into_iter()
                .map(|(value, count)| DistributionEntry { value, count })
                .collect(),
        ))
    }
}
