use std::fmt::Display;
use std::io::Write;

use crate::error::SortMergeResult;

/// Destination for the ordered output of [`super::SortMergeWriter::write`].
///
/// `write_header` is called once before any record and `finish` once after the last one.
/// A `None` key is the null record.
pub trait RecordSink<K> {
    fn write_header(&mut self) -> SortMergeResult<()> {
        Ok(())
    }

    fn write_record(&mut self, key: Option<&K>, count: u64) -> SortMergeResult<()>;

    fn finish(&mut self) -> SortMergeResult<()> {
        Ok(())
    }
}

/// Collects records in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VecSink<K> {
    records: Vec<(Option<K>, u64)>,
}

impl<K> VecSink<K> {
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    pub fn records(&self) -> &[(Option<K>, u64)] {
        &self.records
    }

    pub fn into_records(self) -> Vec<(Option<K>, u64)> {
        self.records
    }
}

impl<K> Default for VecSink<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone> RecordSink<K> for VecSink<K> {
    fn write_record(&mut self, key: Option<&K>, count: u64) -> SortMergeResult<()> {
        self.records.push((key.cloned(), count));
        Ok(())
    }
}

/// Writes tab-separated `key<TAB>count` lines, with an optional header line.
#[derive(Debug)]
pub struct TextSink<W: Write> {
    writer: W,
    header: Option<String>,
    null_label: String,
}

impl<W: Write> TextSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header: None,
            null_label: "<null>".to_string(),
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    /// Label printed for the null record.
    pub fn with_null_label(mut self, label: impl Into<String>) -> Self {
        self.null_label = label.into();
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<K: Display, W: Write> RecordSink<K> for TextSink<W> {
    fn write_header(&mut self) -> SortMergeResult<()> {
        if let Some(header) = &self.header {
            writeln!(self.writer, "{header}")?;
        }
        Ok(())
    }

    fn write_record(&mut self, key: Option<&K>, count: u64) -> SortMergeResult<()> {
        match key {
            Some(key) => writeln!(self.writer, "{key}\t{count}")?,
            None => writeln!(self.writer, "{}\t{count}", self.null_label)?,
        }
        Ok(())
    }

    fn finish(&mut self) -> SortMergeResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}
