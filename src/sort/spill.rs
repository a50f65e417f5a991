use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::TempPath;

use crate::error::SortMergeResult;

/// One sorted run on disk: a bincode record count followed by `(key, count)` records in key order.
///
/// The file is removed when the value is dropped.
pub(crate) struct SpillFile<K> {
    path: TempPath,
    records: u64,
    _key: PhantomData<fn() -> K>,
}

impl<K: Serialize + DeserializeOwned> SpillFile<K> {
    pub(crate) fn write(dir: Option<&Path>, prefix: &str, entries: &BTreeMap<K, u64>) -> SortMergeResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix).suffix(".spill");
        let named = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let (file, path) = named.into_parts();

        let records = entries.len() as u64;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, &records)?;
        for (key, count) in entries {
            bincode::serialize_into(&mut writer, &(key, *count))?;
        }
        writer.flush()?;

        Ok(Self {
            path,
            records,
            _key: PhantomData,
        })
    }

    pub(crate) fn records(&self) -> u64 {
        self.records
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn reader(&self) -> SortMergeResult<SpillReader<K>> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let remaining: u64 = bincode::deserialize_from(&mut reader)?;
        Ok(SpillReader {
            reader,
            remaining,
            _key: PhantomData,
        })
    }
}

pub(crate) struct SpillReader<K> {
    reader: BufReader<File>,
    remaining: u64,
    _key: PhantomData<fn() -> K>,
}

impl<K: DeserializeOwned> SpillReader<K> {
    pub(crate) fn next_record(&mut self) -> SortMergeResult<Option<(K, u64)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(bincode::deserialize_from(&mut self.reader)?))
    }
}
