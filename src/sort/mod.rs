//! External-memory sort and aggregate.
//!
//! [`SortMergeWriter`] counts keys in a bounded in-memory buffer and spills sorted runs to
//! temporary files when it fills up. [`SortMergeWriter::write`] then streams a k-way merge of all
//! runs into a [`RecordSink`], summing counts of equal keys. [`SortMergeWriter::into_records`]
//! yields the same records lazily as [`MergedRecords`].

mod sink;
mod spill;
mod writer;

pub use sink::{RecordSink, TextSink, VecSink};
pub use writer::{MergedRecords, NullPlacement, SortMergeOptions, SortMergeWriter};
