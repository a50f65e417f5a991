use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, btree_map};
use std::fmt;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SortMergeError, SortMergeResult};

use super::sink::RecordSink;
use super::spill::{SpillFile, SpillReader};

/// Where the null record is emitted relative to the sorted keys.
///
/// No default is provided; callers choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullPlacement {
    First,
    Last,
}

fn default_buffer_size() -> usize {
    SortMergeOptions::DEFAULT_BUFFER_SIZE
}

fn default_file_prefix() -> String {
    "sort-merge-".to_string()
}

/// Settings for a [`SortMergeWriter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortMergeOptions {
    /// Distinct keys held in memory before the buffer is spilled.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    pub null_placement: NullPlacement,
    /// Directory for spill files. The system temp directory when unset.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// File name prefix of spill files.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl SortMergeOptions {
    pub const DEFAULT_BUFFER_SIZE: usize = 50_000;

    pub fn new(null_placement: NullPlacement) -> Self {
        Self {
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
            null_placement,
            temp_dir: None,
            file_prefix: default_file_prefix(),
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn validate(&self) -> SortMergeResult<()> {
        if self.buffer_size == 0 {
            return Err(SortMergeError::InvalidOptions(
                "buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// External-memory aggregator: counts keys, spilling sorted runs to disk when the in-memory buffer
/// is full, and writes `(key, count)` records in ascending key order with equal keys summed.
///
/// Null keys are counted separately and written as one record before or after the sorted keys.
/// Counts wrap on overflow.
///
/// The writer is single-owner: every mutating method takes `&mut self`, so it cannot be fed from
/// several threads at once. Use one writer per thread and combine them with
/// [`SortMergeWriter::absorb`].
///
/// ```compile_fail
/// use rust_data_quality::sort::{NullPlacement, SortMergeWriter};
///
/// let mut writer = SortMergeWriter::<String>::new(10, NullPlacement::Last).unwrap();
/// std::thread::scope(|s| {
///     s.spawn(|| writer.append(Some("a".to_string())));
///     s.spawn(|| writer.append(Some("b".to_string())));
/// });
/// ```
///
/// ```
/// use rust_data_quality::sort::{NullPlacement, SortMergeWriter, VecSink};
///
/// let mut writer = SortMergeWriter::new(2, NullPlacement::First).unwrap();
/// for key in ["b", "a", "c", "a"] {
///     writer.append(Some(key.to_string())).unwrap();
/// }
/// writer.append(None).unwrap();
///
/// let mut sink = VecSink::new();
/// assert_eq!(writer.write(&mut sink).unwrap(), 4);
/// assert_eq!(
///     sink.into_records(),
///     vec![
///         (None, 1),
///         (Some("a".to_string()), 2),
///         (Some("b".to_string()), 1),
///         (Some("c".to_string()), 1),
///     ]
/// );
/// ```
pub struct SortMergeWriter<K> {
    options: SortMergeOptions,
    buffer: BTreeMap<K, u64>,
    null_count: u64,
    spills: Vec<SpillFile<K>>,
}

impl<K> SortMergeWriter<K>
where
    K: Ord + Serialize + DeserializeOwned,
{
    /// Writer with an in-memory buffer of `buffer_size` distinct keys. A zero size is rejected.
    pub fn new(buffer_size: usize, null_placement: NullPlacement) -> SortMergeResult<Self> {
        Self::with_options(SortMergeOptions::new(null_placement).with_buffer_size(buffer_size))
    }

    /// Writer from full options.
    pub fn with_options(options: SortMergeOptions) -> SortMergeResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            buffer: BTreeMap::new(),
            null_count: 0,
            spills: Vec::new(),
        })
    }

    pub fn options(&self) -> &SortMergeOptions {
        &self.options
    }

    /// Count one occurrence of `key`.
    pub fn append(&mut self, key: Option<K>) -> SortMergeResult<()> {
        self.append_with_frequency(key, 1)
    }

    /// Count `frequency` occurrences of `key`.
    ///
    /// A key already in the buffer is incremented in place. A new key arriving while the buffer
    /// is full first spills the buffer to a temporary file.
    pub fn append_with_frequency(&mut self, key: Option<K>, frequency: u64) -> SortMergeResult<()> {
        let Some(key) = key else {
            self.null_count = self.null_count.wrapping_add(frequency);
            return Ok(());
        };
        if let Some(count) = self.buffer.get_mut(&key) {
            *count = count.wrapping_add(frequency);
            return Ok(());
        }
        if self.buffer.len() >= self.options.buffer_size {
            self.spill()?;
        }
        self.buffer.insert(key, frequency);
        Ok(())
    }

    /// Distinct keys currently held in memory.
    pub fn buffered_keys(&self) -> usize {
        self.buffer.len()
    }

    /// Sorted runs written to disk so far.
    pub fn spill_count(&self) -> usize {
        self.spills.len()
    }

    pub fn null_count(&self) -> u64 {
        self.null_count
    }

    /// Merge another writer's state into this one, e.g. a per-thread shard.
    pub fn absorb(&mut self, other: SortMergeWriter<K>) -> SortMergeResult<()> {
        self.null_count = self.null_count.wrapping_add(other.null_count);
        self.spills.extend(other.spills);
        for (key, count) in other.buffer {
            self.append_with_frequency(Some(key), count)?;
        }
        Ok(())
    }

    fn spill(&mut self) -> SortMergeResult<()> {
        let entries = std::mem::take(&mut self.buffer);
        let spill = SpillFile::write(
            self.options.temp_dir.as_deref(),
            &self.options.file_prefix,
            &entries,
        )?;
        debug!(
            records = spill.records(),
            path = %spill.path().display(),
            spills = self.spills.len() + 1,
            "spilled sort buffer"
        );
        self.spills.push(spill);
        Ok(())
    }

    /// Consume the writer and stream its records in output order: ascending keys with equal
    /// keys summed, and the null record first or last.
    ///
    /// Only one head record per sorted run is held in memory at a time. Spill files stay on disk
    /// until the returned iterator is dropped.
    pub fn into_records(mut self) -> SortMergeResult<MergedRecords<K>> {
        let keys = if self.spills.is_empty() {
            KeyStream::Buffer(std::mem::take(&mut self.buffer).into_iter())
        } else {
            if !self.buffer.is_empty() {
                self.spill()?;
            }
            debug!(runs = self.spills.len(), "merging sorted runs");
            KeyStream::Merge(SpillMerge::open(std::mem::take(&mut self.spills))?)
        };
        let nulls = (self.null_count > 0).then_some(self.null_count);
        let (leading_null, trailing_null) = match self.options.null_placement {
            NullPlacement::First => (nulls, None),
            NullPlacement::Last => (None, nulls),
        };
        Ok(MergedRecords {
            leading_null,
            trailing_null,
            keys,
        })
    }

    /// Write all records to `sink` in ascending key order and return how many were written,
    /// including the null record.
    ///
    /// Spill files are removed when the writer is consumed, whether or not writing succeeds.
    pub fn write<S>(self, sink: &mut S) -> SortMergeResult<u64>
    where
        S: RecordSink<K> + ?Sized,
    {
        sink.write_header()?;
        let mut written = 0u64;
        for record in self.into_records()? {
            let (key, count) = record?;
            sink.write_record(key.as_ref(), count)?;
            written += 1;
        }
        sink.finish()?;
        Ok(written)
    }
}

/// Records of a consumed [`SortMergeWriter`], read lazily from its buffer or merged from its
/// spill files.
///
/// Iteration stops after the first error.
pub struct MergedRecords<K> {
    leading_null: Option<u64>,
    trailing_null: Option<u64>,
    keys: KeyStream<K>,
}

enum KeyStream<K> {
    Buffer(btree_map::IntoIter<K, u64>),
    Merge(SpillMerge<K>),
    Failed,
}

impl<K> MergedRecords<K> {
    /// Number of sorted runs being merged. Zero when nothing was spilled.
    pub fn runs(&self) -> usize {
        match &self.keys {
            KeyStream::Merge(merge) => merge.readers.len(),
            KeyStream::Buffer(_) | KeyStream::Failed => 0,
        }
    }

    /// Keyed records currently held in memory: what is left of the buffer, or one head record per
    /// run that is not yet exhausted.
    pub fn held_in_memory(&self) -> usize {
        match &self.keys {
            KeyStream::Buffer(entries) => entries.len(),
            KeyStream::Merge(merge) => merge.heap.len(),
            KeyStream::Failed => 0,
        }
    }
}

impl<K> Iterator for MergedRecords<K>
where
    K: Ord + DeserializeOwned,
{
    type Item = SortMergeResult<(Option<K>, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(count) = self.leading_null.take() {
            return Some(Ok((None, count)));
        }
        let next = match &mut self.keys {
            KeyStream::Buffer(entries) => entries.next().map(Ok),
            KeyStream::Merge(merge) => merge.next_record().transpose(),
            KeyStream::Failed => None,
        };
        match next {
            Some(Ok((key, count))) => Some(Ok((Some(key), count))),
            Some(Err(err)) => {
                self.keys = KeyStream::Failed;
                self.trailing_null = None;
                Some(Err(err))
            }
            None => self.trailing_null.take().map(|count| Ok((None, count))),
        }
    }
}

impl<K> fmt::Debug for MergedRecords<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedRecords")
            .field("runs", &self.runs())
            .field("held_in_memory", &self.held_in_memory())
            .field("leading_null", &self.leading_null)
            .field("trailing_null", &self.trailing_null)
            .finish()
    }
}

struct MergeHead<K> {
    key: K,
    count: u64,
    source: usize,
}

impl<K: Ord> PartialEq for MergeHead<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord> Eq for MergeHead<K> {}

impl<K: Ord> PartialOrd for MergeHead<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for MergeHead<K> {
    // Reversed so the max-heap pops the smallest key first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// k-way merge over sorted runs. Readers are declared before the files so they are closed first.
struct SpillMerge<K> {
    readers: Vec<SpillReader<K>>,
    heap: BinaryHeap<MergeHead<K>>,
    _spills: Vec<SpillFile<K>>,
}

impl<K> SpillMerge<K>
where
    K: Ord + DeserializeOwned,
{
    fn open(spills: Vec<SpillFile<K>>) -> SortMergeResult<Self>
    where
        K: Serialize,
    {
        let readers = spills
            .iter()
            .map(SpillFile::reader)
            .collect::<SortMergeResult<Vec<_>>>()?;
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(readers.len()),
            readers,
            _spills: spills,
        };
        for source in 0..merge.readers.len() {
            merge.advance(source)?;
        }
        Ok(merge)
    }

    fn advance(&mut self, source: usize) -> SortMergeResult<()> {
        if let Some((key, count)) = self.readers[source].next_record()? {
            self.heap.push(MergeHead { key, count, source });
        }
        Ok(())
    }

    /// Smallest remaining key with the counts of every run presenting it summed.
    fn next_record(&mut self) -> SortMergeResult<Option<(K, u64)>> {
        let Some(MergeHead { key, mut count, source }) = self.heap.pop() else {
            return Ok(None);
        };
        self.advance(source)?;
        while self.heap.peek().is_some_and(|head| head.key == key) {
            if let Some(head) = self.heap.pop() {
                count = count.wrapping_add(head.count);
                self.advance(head.source)?;
            }
        }
        Ok(Some((key, count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::{TextSink, VecSink};

    fn keys(sink: VecSink<String>) -> Vec<(Option<String>, u64)> {
        sink.into_records()
    }

    #[test]
    fn fast_path_writes_without_spilling() {
        let mut writer = SortMergeWriter::new(100, NullPlacement::Last).unwrap();
        for k in ["x", "y", "x"] {
            writer.append(Some(k.to_string())).unwrap();
        }
        assert_eq!(writer.spill_count(), 0);

        let mut sink = VecSink::new();
        assert_eq!(writer.write(&mut sink).unwrap(), 2);
        assert_eq!(
            keys(sink),
            vec![(Some("x".to_string()), 2), (Some("y".to_string()), 1)]
        );
    }

    #[test]
    fn new_key_on_full_buffer_spills_but_existing_key_does_not() {
        let mut writer = SortMergeWriter::new(2, NullPlacement::Last).unwrap();
        writer.append(Some("a".to_string())).unwrap();
        writer.append(Some("b".to_string())).unwrap();
        writer.append(Some("a".to_string())).unwrap();
        assert_eq!(writer.spill_count(), 0);
        writer.append(Some("c".to_string())).unwrap();
        assert_eq!(writer.spill_count(), 1);
        assert_eq!(writer.buffered_keys(), 1);
    }

    #[test]
    fn equal_keys_across_runs_are_summed() {
        let mut writer = SortMergeWriter::new(1, NullPlacement::Last).unwrap();
        for k in ["b", "a", "b", "a", "c", "a"] {
            writer.append(Some(k.to_string())).unwrap();
        }
        assert!(writer.spill_count() > 1);

        let mut sink = VecSink::new();
        assert_eq!(writer.write(&mut sink).unwrap(), 3);
        assert_eq!(
            keys(sink),
            vec![
                (Some("a".to_string()), 3),
                (Some("b".to_string()), 2),
                (Some("c".to_string()), 1),
            ]
        );
    }

    #[test]
    fn null_record_is_omitted_when_no_nulls_were_seen() {
        let mut writer = SortMergeWriter::new(4, NullPlacement::First).unwrap();
        writer.append(Some("a".to_string())).unwrap();
        let mut sink = VecSink::new();
        assert_eq!(writer.write(&mut sink).unwrap(), 1);
        assert_eq!(keys(sink), vec![(Some("a".to_string()), 1)]);
    }

    #[test]
    fn counts_wrap_on_overflow() {
        let mut writer = SortMergeWriter::new(4, NullPlacement::Last).unwrap();
        writer.append_with_frequency(Some(1u32), u64::MAX).unwrap();
        writer.append_with_frequency(Some(1u32), 2).unwrap();
        let mut sink = VecSink::new();
        writer.write(&mut sink).unwrap();
        assert_eq!(sink.into_records(), vec![(Some(1u32), 1)]);
    }

    #[test]
    fn absorb_combines_shards() {
        let mut left = SortMergeWriter::new(1, NullPlacement::Last).unwrap();
        left.append(Some("a".to_string())).unwrap();
        left.append(Some("b".to_string())).unwrap();
        left.append(None).unwrap();

        let mut right = SortMergeWriter::new(1, NullPlacement::Last).unwrap();
        right.append(Some("b".to_string())).unwrap();
        right.append(None).unwrap();

        left.absorb(right).unwrap();
        assert_eq!(left.null_count(), 2);

        let mut sink = VecSink::new();
        left.write(&mut sink).unwrap();
        assert_eq!(
            keys(sink),
            vec![
                (Some("a".to_string()), 1),
                (Some("b".to_string()), 2),
                (None, 2),
            ]
        );
    }

    #[test]
    fn text_sink_writes_header_and_lines() {
        let mut writer = SortMergeWriter::new(8, NullPlacement::Last).unwrap();
        writer.append(Some("x".to_string())).unwrap();
        writer.append(None).unwrap();

        let mut sink = TextSink::new(Vec::new()).with_header("value\tcount");
        writer.write(&mut sink).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text, "value\tcount\nx\t1\n<null>\t1\n");
    }

    #[test]
    fn zero_buffer_is_rejected_by_options() {
        let options = SortMergeOptions::new(NullPlacement::Last).with_buffer_size(0);
        assert!(matches!(
            SortMergeWriter::<String>::with_options(options),
            Err(SortMergeError::InvalidOptions(_))
        ));
    }

    #[test]
    fn zero_buffer_is_rejected_by_new() {
        assert!(matches!(
            SortMergeWriter::<String>::new(0, NullPlacement::Last),
            Err(SortMergeError::InvalidOptions(_))
        ));
    }

    #[test]
    fn merged_records_hold_one_head_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let options = SortMergeOptions::new(NullPlacement::First)
            .with_buffer_size(4)
            .with_temp_dir(dir.path());
        let mut writer = SortMergeWriter::with_options(options).unwrap();
        for k in (0..40u32).rev().chain(0..40) {
            writer.append(Some(k)).unwrap();
        }
        writer.append(None).unwrap();

        let mut records = writer.into_records().unwrap();
        let runs = records.runs();
        assert!(runs > 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), runs);
        assert_eq!(records.next().unwrap().unwrap(), (None, 1));

        let mut expected = 0u32;
        while let Some(record) = records.next() {
            assert!(records.held_in_memory() <= runs);
            assert_eq!(record.unwrap(), (Some(expected), 2));
            expected += 1;
        }
        assert_eq!(expected, 40);
        drop(records);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
