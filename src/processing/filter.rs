//! Built-in filters.

use crate::error::{ComponentError, ComponentResult};
use crate::job::{Component, ComponentContext, Concurrency, Filter};
use crate::types::Value;

/// Categorizes a numeric value as `VALID` when it lies within an inclusive range.
///
/// Nulls and non-numeric values are `INVALID`. The bounds can be overridden with the `min` and
/// `max` properties.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RangeFilter {
    min: Option<f64>,
    max: Option<f64>,
}

impl RangeFilter {
    pub const VALID: &'static str = "VALID";
    pub const INVALID: &'static str = "INVALID";

    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub fn at_least(min: f64) -> Self {
        Self::new(Some(min), None)
    }

    pub fn at_most(max: f64) -> Self {
        Self::new(None, Some(max))
    }

    pub fn between(min: f64, max: f64) -> Self {
        Self::new(Some(min), Some(max))
    }

    fn bounds(&self, ctx: &ComponentContext<'_>) -> (Option<f64>, Option<f64>) {
        (
            ctx.config.get_f64("min").or(self.min),
            ctx.config.get_f64("max").or(self.max),
        )
    }
}

impl Component for RangeFilter {
    fn concurrency(&self) -> Concurrency {
        Concurrency::ConcurrencySafe
    }
}

impl Filter for RangeFilter {
    fn categories(&self) -> Vec<String> {
        vec![Self::VALID.to_string(), Self::INVALID.to_string()]
    }

    fn validate(&self, ctx: &ComponentContext<'_>) -> ComponentResult<()> {
        if ctx.inputs.len() > 1 {
            return Err(ComponentError::invalid_configuration(format!(
                "expected one input column, got {}",
                ctx.inputs.len()
            )));
        }
        if let (Some(min), Some(max)) = self.bounds(ctx) {
            if min > max {
                return Err(ComponentError::invalid_configuration(format!(
                    "min ({min}) is greater than max ({max})"
                )));
            }
        }
        Ok(())
    }

    fn categorize<'s>(&'s self, ctx: &ComponentContext<'_>, values: &[Value]) -> ComponentResult<&'s str> {
        let Some(v) = values.first().and_then(Value::as_f64) else {
            return Ok(Self::INVALID);
        };
        let (min, max) = self.bounds(ctx);
        let in_range = min.is_none_or(|m| v >= m) && max.is_none_or(|m| v <= m);
        Ok(if in_range { Self::VALID } else { Self::INVALID })
    }
}

/// Categorizes a row as `NOT_NULL` when none of its input values is null.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCheckFilter;

impl NullCheckFilter {
    pub const NOT_NULL: &'static str = "NOT_NULL";
    pub const NULL: &'static str = "NULL";
}

impl Component for NullCheckFilter {
    fn concurrency(&self) -> Concurrency {
        Concurrency::ConcurrencySafe
    }
}

impl Filter for NullCheckFilter {
    fn categories(&self) -> Vec<String> {
        vec![Self::NOT_NULL.to_string(), Self::NULL.to_string()]
    }

    fn categorize<'s>(&'s self, _ctx: &ComponentContext<'_>, values: &[Value]) -> ComponentResult<&'s str> {
        Ok(if values.iter().any(Value::is_null) {
            Self::NULL
        } else {
            Self::NOT_NULL
        })
    }
}
