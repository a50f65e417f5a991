//! Row sources feeding the engine.

use crate::error::{ExecutionError, SourceError};
use crate::sort::{MergedRecords, NullPlacement, SortMergeOptions, SortMergeWriter};
use crate::types::{DataSet, RowKey, Schema, Value};

/// One row read from a source, standing for `distinct_count` identical physical rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub values: Vec<Value>,
    pub distinct_count: u64,
}

impl SourceRow {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            distinct_count: 1,
        }
    }

    pub fn with_distinct_count(values: Vec<Value>, distinct_count: u64) -> Self {
        Self { values, distinct_count }
    }
}

/// A pull-based stream of rows in schema order.
pub trait RowSource {
    fn schema(&self) -> &Schema;

    /// The next row, an error, or `None` at the end of the stream.
    fn next_row(&mut self) -> Option<Result<SourceRow, SourceError>>;
}

/// Owning source over the rows of a [`DataSet`].
#[derive(Debug)]
pub struct DataSetSource {
    schema: Schema,
    rows: std::vec::IntoIter<Vec<Value>>,
}

impl DataSetSource {
    pub fn new(dataset: DataSet) -> Self {
        Self {
            schema: dataset.schema,
            rows: dataset.rows.into_iter(),
        }
    }
}

impl From<DataSet> for DataSetSource {
    fn from(dataset: DataSet) -> Self {
        Self::new(dataset)
    }
}

impl RowSource for DataSetSource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next_row(&mut self) -> Option<Result<SourceRow, SourceError>> {
        self.rows.next().map(|values| Ok(SourceRow::new(values)))
    }
}

/// Source over any iterator of row results.
pub struct IterSource<I> {
    schema: Schema,
    rows: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Result<Vec<Value>, SourceError>>,
{
    pub fn new(schema: Schema, rows: I) -> Self {
        Self { schema, rows }
    }
}

impl<I> RowSource for IterSource<I>
where
    I: Iterator<Item = Result<Vec<Value>, SourceError>>,
{
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next_row(&mut self) -> Option<Result<SourceRow, SourceError>> {
        self.rows.next().map(|r| r.map(SourceRow::new))
    }
}

/// Source yielding each distinct row of another source once, with its multiplicity as
/// `distinct_count`, in row-key order.
///
/// Rows are pre-aggregated through a [`SortMergeWriter`], so the inner source may be larger than
/// memory. The inner source is drained when this source is built; distinct rows are then merged
/// from the writer's spill files one at a time as they are read.
#[derive(Debug)]
pub struct DeduplicatedSource {
    schema: Schema,
    rows: MergedRecords<RowKey>,
}

impl DeduplicatedSource {
    /// Drain `source` with the default buffer size.
    pub fn from_source(source: &mut dyn RowSource) -> Result<Self, ExecutionError> {
        Self::with_options(source, SortMergeOptions::new(NullPlacement::Last))
    }

    /// Drain `source` with explicit writer options.
    pub fn with_options(source: &mut dyn RowSource, options: SortMergeOptions) -> Result<Self, ExecutionError> {
        let schema = source.schema().clone();
        let mut writer = SortMergeWriter::with_options(options)?;
        while let Some(row) = source.next_row() {
            let row = row?;
            writer.append_with_frequency(Some(RowKey(row.values)), row.distinct_count)?;
        }

        Ok(Self {
            schema,
            rows: writer.into_records()?,
        })
    }

    /// Sorted runs the distinct rows are merged from. Zero when they all fit in the buffer.
    pub fn spill_count(&self) -> usize {
        self.rows.runs()
    }

    /// Distinct rows currently held in memory: at most the buffer size, or one per sorted run.
    pub fn rows_in_memory(&self) -> usize {
        self.rows.held_in_memory()
    }
}

impl RowSource for DeduplicatedSource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next_row(&mut self) -> Option<Result<SourceRow, SourceError>> {
        loop {
            match self.rows.next()? {
                Ok((Some(key), count)) => return Some(Ok(SourceRow::with_distinct_count(key.0, count))),
                Ok((None, _)) => continue,
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}
