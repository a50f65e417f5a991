//! `rust-data-quality` runs data-quality jobs: graphs of filters, transformers and analyzers that
//! are evaluated row by row over a tabular source.
//!
//! ## Concepts
//!
//! - A **job** is a set of components wired together by column lineage. Physical columns come from
//!   the bound [`types::Schema`]; transformers add virtual columns. Filters categorize rows, and
//!   any component can be gated on a filter outcome (a *requirement*).
//! - A [`job::JobBuilder`] collects components and validates the graph when it is frozen into an
//!   immutable [`job::Job`] (unresolved columns, cycles, requirements that can never be met).
//! - The [`execution::ExecutionEngine`] feeds rows from a [`execution::RowSource`] through the job
//!   on a pluggable task runner (single- or multi-threaded), collecting analyzer results and
//!   component failures into an [`execution::AnalysisResult`].
//! - [`sort::SortMergeWriter`] counts keys with a bounded in-memory buffer and spills to temporary
//!   files, merging them into a sorted, deduplicated output.
//!
//! ## Quick example
//!
//! ```rust
//! use rust_data_quality::execution::{DataSetSource, ExecutionEngine, ExecutionOptions};
//! use rust_data_quality::job::{AnalyzerResult, JobBuilder};
//! use rust_data_quality::processing::{RangeFilter, RowCountAnalyzer};
//! use rust_data_quality::types::{DataSet, DataType, Field, Schema, Value};
//!
//! let schema = Schema::new(vec![Field::new("age", DataType::Int64)]);
//! let rows = [15, 20, 17, 30].into_iter().map(|a| vec![Value::Int64(a)]).collect();
//! let ds = DataSet::new(schema.clone(), rows);
//!
//! let mut builder = JobBuilder::new(schema);
//! let age = builder.source_column("age").unwrap();
//! let adult = builder.add_filter("adult", RangeFilter::at_least(18.0)).unwrap();
//! builder.set_input(adult, [age]).unwrap();
//! let adults = builder.add_analyzer("adults", RowCountAnalyzer::new()).unwrap();
//! builder.set_input(adults, [age]).unwrap();
//! builder.set_requirement(adults, adult, RangeFilter::VALID).unwrap();
//! let job = builder.freeze().unwrap();
//!
//! let engine = ExecutionEngine::new(ExecutionOptions::default()).unwrap();
//! let result = engine.run(&job, &mut DataSetSource::new(ds));
//! assert_eq!(result.result(adults), Some(&AnalyzerResult::Count(2)));
//! ```
//!
//! ## Modules
//!
//! - [`types`]: schema, values and in-memory datasets
//! - [`job`]: component traits, the job builder, lineage queries and frozen jobs
//! - [`execution`]: row processing, task runners, observers and the execution engine
//! - [`processing`]: built-in filters, transformers and analyzers
//! - [`sort`]: external sort-merge-dedup writer
//! - [`config`]: JSON engine configuration
//! - [`error`]: error types

pub mod config;
pub mod error;
pub mod execution;
pub mod job;
pub mod processing;
pub mod sort;
pub mod types;

pub use error::{ComponentError, ExecutionError, JobBuildError, TaskFailure, ValidationError};
