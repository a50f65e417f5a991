//! Built-in components.
//!
//! - Filters: [`RangeFilter`], [`NullCheckFilter`]
//! - Transformers: [`MapTransformer`], [`TokenizerTransformer`]
//! - Analyzers: [`ReduceAnalyzer`], [`RowCountAnalyzer`], [`ValueDistributionAnalyzer`]
//!
//! ## Example: filter → transform → analyze
//!
//! ```rust
//! use rust_data_quality::execution::{DataSetSource, ExecutionEngine, ExecutionOptions};
//! use rust_data_quality::job::{AnalyzerResult, ColumnId, JobBuilder, OutputColumn};
//! use rust_data_quality::processing::{MapTransformer, RangeFilter, ReduceAnalyzer, ReduceOp};
//! use rust_data_quality::types::{DataSet, DataType, Field, Schema, Value};
//!
//! let schema = Schema::new(vec![
//!     Field::new("id", DataType::Int64),
//!     Field::new("score", DataType::Float64),
//! ]);
//! let ds = DataSet::new(
//!     schema.clone(),
//!     vec![
//!         vec![Value::Int64(1), Value::Float64(10.0)],
//!         vec![Value::Int64(2), Value::Float64(-3.0)],
//!         vec![Value::Int64(3), Value::Null],
//!     ],
//! );
//!
//! let mut builder = JobBuilder::new(schema);
//! let score = builder.source_column("score").unwrap();
//!
//! // Keep only non-negative scores.
//! let positive = builder.add_filter("positive", RangeFilter::at_least(0.0)).unwrap();
//! builder.set_input(positive, [score]).unwrap();
//!
//! // Double the score.
//! let scaled = builder
//!     .add_transformer(
//!         "scaled",
//!         MapTransformer::new(vec![OutputColumn::new("scaled", DataType::Float64)], |row: &[Value]| {
//!             Ok(vec![row[0].as_f64().map(|v| Value::Float64(v * 2.0)).unwrap_or(Value::Null)])
//!         }),
//!     )
//!     .unwrap();
//! builder.set_input(scaled, [score]).unwrap();
//! builder.set_requirement(scaled, positive, RangeFilter::VALID).unwrap();
//!
//! // Sum scaled scores (nulls ignored).
//! let sum = builder.add_analyzer("sum", ReduceAnalyzer::new(ReduceOp::Sum)).unwrap();
//! builder.set_input(sum, [ColumnId::output(scaled, 0)]).unwrap();
//!
//! let job = builder.freeze().unwrap();
//! let engine = ExecutionEngine::new(ExecutionOptions::single_threaded()).unwrap();
//! let result = engine.run(&job, &mut DataSetSource::new(ds));
//!
//! assert!(result.is_successful());
//! assert_eq!(result.result(sum), Some(&AnalyzerResult::Value(Value::Float64(20.0))));
//! ```

mod distribution;
pub mod filter;
pub mod map;
pub mod reduce;

pub use distribution::ValueDistributionAnalyzer;
pub use filter::{NullCheckFilter, RangeFilter};
pub use map::{MapTransformer, TokenizerTransformer};
pub use reduce::{ReduceAnalyzer, ReduceOp, RowCountAnalyzer};
