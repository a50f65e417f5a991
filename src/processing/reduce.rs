//! Reducing analyzers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{ComponentError, ComponentResult};
use crate::job::{Analyzer, AnalyzerResult, Component, ComponentContext, Concurrency};
use crate::types::{DataType, Value};

/// Built-in reduction operations over a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOp {
    /// Count all rows (including nulls).
    Count,
    /// Sum numeric values, ignoring nulls.
    Sum,
    /// Minimum numeric value, ignoring nulls.
    Min,
    /// Maximum numeric value, ignoring nulls.
    Max,
}

#[derive(Debug, Default)]
struct ReduceState {
    rows: u64,
    int: Option<i64>,
    float: Option<f64>,
}

/// Reduces its single input column with a [`ReduceOp`].
///
/// Rows are weighted by their distinct count, so `Count` and `Sum` give the same answer over a
/// deduplicated source as over the raw rows.
///
/// - `Count` returns [`AnalyzerResult::Count`].
/// - `Sum`/`Min`/`Max` return [`AnalyzerResult::Value`] typed like the input column, or
///   `Value::Null` if there were no non-null values or the column is not numeric.
#[derive(Debug)]
pub struct ReduceAnalyzer {
    op: ReduceOp,
    state: Mutex<ReduceState>,
}

impl ReduceAnalyzer {
    pub fn new(op: ReduceOp) -> Self {
        Self {
            op,
            state: Mutex::new(ReduceState::default()),
        }
    }

    pub fn op(&self) -> ReduceOp {
        self.op
    }
}

impl Component for ReduceAnalyzer {
    fn concurrency(&self) -> Concurrency {
        Concurrency::ConcurrencySafe
    }

    fn initialize(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ReduceState::default();
        Ok(())
    }
}

impl Analyzer for ReduceAnalyzer {
    fn validate(&self, ctx: &ComponentContext<'_>) -> ComponentResult<()> {
        if ctx.inputs.len() > 1 {
            return Err(ComponentError::invalid_configuration(format!(
                "expected one input column, got {}",
                ctx.inputs.len()
            )));
        }
        Ok(())
    }

    fn run(&self, _ctx: &ComponentContext<'_>, values: &[Value], distinct_count: u64) -> ComponentResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match (self.op, values.first()) {
            (ReduceOp::Count, _) => state.rows = state.rows.wrapping_add(distinct_count),
            (_, None | Some(Value::Null)) => {}
            (ReduceOp::Sum, Some(Value::Int64(v))) => {
                let add = i64::try_from(distinct_count)
                    .ok()
                    .and_then(|n| v.checked_mul(n))
                    .and_then(|x| x.checked_add(state.int.unwrap_or(0)))
                    .ok_or_else(|| ComponentError::new("integer sum overflowed"))?;
                state.int = Some(add);
            }
            (ReduceOp::Sum, Some(Value::Float64(v))) => {
                state.float = Some(state.float.unwrap_or(0.0) + v * distinct_count as f64);
            }
            (ReduceOp::Min, Some(Value::Int64(v))) => state.int = Some(state.int.map_or(*v, |a| a.min(*v))),
            (ReduceOp::Min, Some(Value::Float64(v))) => {
                state.float = Some(state.float.map_or(*v, |a| a.min(*v)))
            }
            (ReduceOp::Max, Some(Value::Int64(v))) => state.int = Some(state.int.map_or(*v, |a| a.max(*v))),
            (ReduceOp::Max, Some(Value::Float64(v))) => {
                state.float = Some(state.float.map_or(*v, |a| a.max(*v)))
            }
            (_, Some(_)) => {}
        }
        Ok(())
    }

    fn result(&self, ctx: &ComponentContext<'_>) -> ComponentResult<AnalyzerResult> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if self.op == ReduceOp::Count {
            return Ok(AnalyzerResult::Count(state.rows));
        }
        let value = match ctx.inputs.first().map(|c| &c.data_type) {
            Some(DataType::Int64) => state.int.map(Value::Int64),
            Some(DataType::Float64) => state.float.map(Value::Float64),
            _ => None,
        };
        Ok(AnalyzerResult::Value(value.unwrap_or(Value::Null)))
    }
}

/// Counts rows (weighted by distinct count) without locking.
#[derive(Debug, Default)]
pub struct RowCountAnalyzer {
    rows: AtomicU64,
}

impl RowCountAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.rows.load(Ordering::SeqCst)
    }
}

impl Component for RowCountAnalyzer {
    fn concurrency(&self) -> Concurrency {
        Concurrency::ConcurrencySafe
    }

    fn initialize(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<()> {
        self.rows.store(0, Ordering::SeqCst);
        Ok(())
    }
}

impl Analyzer for RowCountAnalyzer {
    fn run(&self, _ctx: &ComponentContext<'_>, _values: &[Value], distinct_count: u64) -> ComponentResult<()> {
        self.rows.fetch_add(distinct_count, Ordering::SeqCst);
        Ok(())
    }

    fn result(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<AnalyzerResult> {
        Ok(AnalyzerResult::Count(self.count()))
    }
}
