//! Built-in transformers.

use crate::error::{ComponentError, ComponentResult};
use crate::job::{Component, ComponentContext, Concurrency, OutputColumn, Signature, Transformer};
use crate::types::{DataType, Value};

/// Transformer backed by a closure with a fixed set of declared outputs.
///
/// The closure must return one value per declared output.
pub struct MapTransformer<F> {
    outputs: Vec<OutputColumn>,
    mapper: F,
}

impl<F> MapTransformer<F>
where
    F: Fn(&[Value]) -> ComponentResult<Vec<Value>> + Send + Sync,
{
    pub fn new(outputs: Vec<OutputColumn>, mapper: F) -> Self {
        Self { outputs, mapper }
    }
}

impl<F> Component for MapTransformer<F>
where
    F: Fn(&[Value]) -> ComponentResult<Vec<Value>> + Send + Sync,
{
    fn concurrency(&self) -> Concurrency {
        Concurrency::ConcurrencySafe
    }
}

impl<F> Transformer for MapTransformer<F>
where
    F: Fn(&[Value]) -> ComponentResult<Vec<Value>> + Send + Sync,
{
    fn validate(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<Signature> {
        Ok(Signature::new(self.outputs.clone()))
    }

    fn transform(&self, _ctx: &ComponentContext<'_>, values: &[Value]) -> ComponentResult<Vec<Value>> {
        (self.mapper)(values)
    }
}

/// Splits a string column into a configured number of token columns.
///
/// Properties:
/// - `num_tokens` (required for any output): number of token columns, at most
///   [`TokenizerTransformer::MAX_TOKENS`].
/// - `delimiter` (optional): separator; whitespace when unset.
///
/// Until `num_tokens` is set the transformer declares no outputs. Missing tokens are null and
/// extra tokens are dropped. A null input yields nulls.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenizerTransformer;

impl TokenizerTransformer {
    pub const NUM_TOKENS: &'static str = "num_tokens";
    pub const DELIMITER: &'static str = "delimiter";
    /// Largest accepted `num_tokens`.
    pub const MAX_TOKENS: usize = 1024;

    fn num_tokens(ctx: &ComponentContext<'_>) -> ComponentResult<usize> {
        let Some(v) = ctx.config.get_property(Self::NUM_TOKENS) else {
            return Ok(0);
        };
        let n = v.as_u64().ok_or_else(|| {
            ComponentError::invalid_configuration(format!("{} must be a non-negative integer", Self::NUM_TOKENS))
        })?;
        match usize::try_from(n) {
            Ok(n) if n <= Self::MAX_TOKENS => Ok(n),
            _ => Err(ComponentError::invalid_configuration(format!(
                "{} must be at most {}, got {n}",
                Self::NUM_TOKENS,
                Self::MAX_TOKENS
            ))),
        }
    }
}

impl Component for TokenizerTransformer {
    fn concurrency(&self) -> Concurrency {
        Concurrency::ConcurrencySafe
    }
}

impl Transformer for TokenizerTransformer {
    fn validate(&self, ctx: &ComponentContext<'_>) -> ComponentResult<Signature> {
        let n = Self::num_tokens(ctx)?;
        if n == 0 {
            return Ok(Signature::empty());
        }
        let source = match ctx.inputs {
            [column] => column.name.as_str(),
            [] => "value",
            _ => {
                return Err(ComponentError::invalid_configuration(format!(
                    "expected one input column, got {}",
                    ctx.inputs.len()
                )));
            }
        };
        Ok(Signature::new(
            (1..=n)
                .map(|i| OutputColumn::new(format!("{source} (token {i})"), DataType::Utf8))
                .collect(),
        ))
    }

    fn transform(&self, ctx: &ComponentContext<'_>, values: &[Value]) -> ComponentResult<Vec<Value>> {
        let n = Self::num_tokens(ctx)?;
        let text = match values.first() {
            None | Some(Value::Null) => return Ok(vec![Value::Null; n]),
            Some(Value::Utf8(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        let tokens: Vec<&str> = match ctx.config.get_str(Self::DELIMITER) {
            Some(delimiter) if !delimiter.is_empty() => text.split(delimiter).collect(),
            _ => text.split_whitespace().collect(),
        };
        Ok((0..n)
            .map(|i| {
                tokens
                    .get(i)
                    .map(|t| Value::Utf8((*t).to_string()))
                    .unwrap_or(Value::Null)
            })
            .collect())
    }
}
