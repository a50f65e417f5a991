//! Component roles and the contracts jobs are built from.
//!
//! A job is assembled from three roles:
//!
//! - [`Filter`]: categorizes each row into one of its declared categories (an outcome).
//! - [`Transformer`]: appends virtual column values to each row. Its output shape is computed by
//!   [`Transformer::validate`] from configuration and cached on the frozen job.
//! - [`Analyzer`]: accumulates statistics and exposes a result after all rows are processed.
//!
//! All roles share the lifecycle hooks of [`Component`]. Every invocation receives a
//! [`ComponentContext`] carrying the component's name, configuration and resolved input columns.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ComponentResult;
use crate::types::{DataType, Value};

use super::column::Column;

/// Stable handle of a component inside a job builder and the job frozen from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentHandle(u32);

impl ComponentHandle {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Arena index of the component.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a component may be invoked concurrently from several worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concurrency {
    /// Stateless or internally synchronized; invocations may overlap.
    ConcurrencySafe,
    /// Invocations are serialized by the engine.
    #[default]
    ExclusiveAccess,
}

/// The role a component plays in a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Filter,
    Transformer,
    Analyzer,
}

/// Property map configuring a component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    properties: BTreeMap<String, serde_json::Value>,
}

impl ComponentConfig {
    /// Empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) a property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Raw property value.
    pub fn get_property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get_property(key).and_then(|v| v.as_str())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_property(key).and_then(|v| v.as_u64())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get_property(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_property(key).and_then(|v| v.as_bool())
    }

    /// Iterate properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// One declared output of a transformer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputColumn {
    pub name: String,
    pub data_type: DataType,
}

impl OutputColumn {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Output shape of a transformer, computed once from its configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    columns: Vec<OutputColumn>,
}

impl Signature {
    pub fn new(columns: Vec<OutputColumn>) -> Self {
        Self { columns }
    }

    /// A signature without outputs (e.g. a transformer that is not configured yet).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[OutputColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Per-invocation view of the component's static setup.
#[derive(Debug, Clone, Copy)]
pub struct ComponentContext<'a> {
    /// Name given to the component when it was added to the job.
    pub name: &'a str,
    /// Configured properties.
    pub config: &'a ComponentConfig,
    /// Resolved input columns, in wiring order. Values passed to the component follow this order.
    pub inputs: &'a [Column],
}

/// Lifecycle hooks shared by all component roles.
pub trait Component: Send + Sync {
    /// Concurrency capability. Defaults to [`Concurrency::ExclusiveAccess`].
    fn concurrency(&self) -> Concurrency {
        Concurrency::ExclusiveAccess
    }

    /// Called once before the first row of a run.
    fn initialize(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<()> {
        Ok(())
    }

    /// Called once after the last row of a run, also when the run was cancelled.
    fn close(&self, _ctx: &ComponentContext<'_>) {}
}

/// Categorizes rows. Exactly one category is produced per evaluated row.
pub trait Filter: Component {
    /// The declared category enumeration. Queried when the job is validated.
    fn categories(&self) -> Vec<String>;

    /// Optional configuration check, run when the job is validated.
    fn validate(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<()> {
        Ok(())
    }

    /// Categorize one row. The returned category must be one of [`Filter::categories`].
    fn categorize<'s>(&'s self, ctx: &ComponentContext<'_>, values: &[Value]) -> ComponentResult<&'s str>;
}

/// Produces virtual column values.
pub trait Transformer: Component {
    /// Compute the output signature from configuration and inputs.
    ///
    /// Returning an empty signature is valid: the transformer then declares no columns yet.
    fn validate(&self, ctx: &ComponentContext<'_>) -> ComponentResult<Signature>;

    /// Produce one value per output column of the validated signature.
    fn transform(&self, ctx: &ComponentContext<'_>, values: &[Value]) -> ComponentResult<Vec<Value>>;
}

/// Accumulates values into a result.
pub trait Analyzer: Component {
    /// Optional configuration check, run when the job is validated.
    fn validate(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<()> {
        Ok(())
    }

    /// Accumulate one logical row that stands for `distinct_count` physical rows.
    fn run(&self, ctx: &ComponentContext<'_>, values: &[Value], distinct_count: u64) -> ComponentResult<()>;

    /// The accumulated result. Called once after all rows are processed.
    fn result(&self, ctx: &ComponentContext<'_>) -> ComponentResult<AnalyzerResult>;
}

/// One entry of a value distribution. `value == None` is the null bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionEntry {
    pub value: Option<String>,
    pub count: u64,
}

/// Result produced by an analyzer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum AnalyzerResult {
    /// A single count.
    Count(u64),
    /// A single value (e.g. a sum or minimum).
    Value(Value),
    /// Value frequencies in sorted order.
    Distribution(Vec<DistributionEntry>),
    /// Anything else, as JSON.
    Json(serde_json::Value),
}

/// A component instance tagged with its role.
#[derive(Clone)]
pub enum ComponentKind {
    Filter(Arc<dyn Filter>),
    Transformer(Arc<dyn Transformer>),
    Analyzer(Arc<dyn Analyzer>),
}

impl ComponentKind {
    pub fn role(&self) -> Role {
        match self {
            ComponentKind::Filter(_) => Role::Filter,
            ComponentKind::Transformer(_) => Role::Transformer,
            ComponentKind::Analyzer(_) => Role::Analyzer,
        }
    }

    pub fn concurrency(&self) -> Concurrency {
        match self {
            ComponentKind::Filter(c) => c.concurrency(),
            ComponentKind::Transformer(c) => c.concurrency(),
            ComponentKind::Analyzer(c) => c.concurrency(),
        }
    }

    pub(crate) fn initialize(&self, ctx: &ComponentContext<'_>) -> ComponentResult<()> {
        match self {
            ComponentKind::Filter(c) => c.initialize(ctx),
            ComponentKind::Transformer(c) => c.initialize(ctx),
            ComponentKind::Analyzer(c) => c.initialize(ctx),
        }
    }

    pub(crate) fn close(&self, ctx: &ComponentContext<'_>) {
        match self {
            ComponentKind::Filter(c) => c.close(ctx),
            ComponentKind::Transformer(c) => c.close(ctx),
            ComponentKind::Analyzer(c) => c.close(ctx),
        }
    }
}

impl fmt::Debug for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentKind").field(&self.role()).finish()
    }
}

/// Everything needed to add a component to a job.
#[derive(Debug, Clone)]
pub struct ComponentDescriptor {
    pub(crate) name: String,
    pub(crate) kind: ComponentKind,
    pub(crate) concurrency: Option<Concurrency>,
    pub(crate) config: ComponentConfig,
}

impl ComponentDescriptor {
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            kind,
            concurrency: None,
            config: ComponentConfig::new(),
        }
    }

    pub fn filter(name: impl Into<String>, filter: impl Filter + 'static) -> Self {
        Self::new(name, ComponentKind::Filter(Arc::new(filter)))
    }

    pub fn transformer(name: impl Into<String>, transformer: impl Transformer + 'static) -> Self {
        Self::new(name, ComponentKind::Transformer(Arc::new(transformer)))
    }

    pub fn analyzer(name: impl Into<String>, analyzer: impl Analyzer + 'static) -> Self {
        Self::new(name, ComponentKind::Analyzer(Arc::new(analyzer)))
    }

    /// Override the component's declared concurrency capability.
    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Preset a configuration property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.set(key, value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.kind.role()
    }

    /// Effective concurrency: the override if set, otherwise the component's own declaration.
    pub fn concurrency(&self) -> Concurrency {
        self.concurrency.unwrap_or_else(|| self.kind.concurrency())
    }
}
