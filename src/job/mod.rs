//! Job graph model.
//!
//! A job is built with [`JobBuilder`]: physical columns come from the bound schema, components
//! are added as filters, transformers or analyzers, and wired by [`ColumnId`] and by
//! [`Requirement`]s on filter [`Outcome`]s. [`JobBuilder::freeze`] validates the graph and returns
//! an immutable [`Job`] with a cached topological order and resolved per-component metadata.
//!
//! [`SourceColumnFinder`] answers lineage queries over the builder state at any time.

mod builder;
mod column;
mod component;
mod finder;
mod frozen;
mod outcome;

pub use builder::JobBuilder;
pub use column::{Column, ColumnId};
pub use component::{
    Analyzer, AnalyzerResult, Component, ComponentConfig, ComponentContext, ComponentDescriptor,
    ComponentHandle, ComponentKind, Concurrency, DistributionEntry, Filter, OutputColumn, Role,
    Signature, Transformer,
};
pub use finder::SourceColumnFinder;
pub use frozen::{Job, JobComponent};
pub use outcome::{Outcome, Requirement};

pub(crate) use frozen::ValueSlot;
