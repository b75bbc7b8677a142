// VecIngest — source.rs
// CSV files as a stream of raw rows. The header line is skipped.
// Author: d65v <https://github.com/d65v>

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecordsIntoIter};

use crate::record::RawRow;
use crate::Result;

/// Yields one [`RawRow`] per CSV record. Rows may differ in length; the
/// transformer decides what to do with short or wide rows.
pub struct CsvRowSource<R> {
    records: StringRecordsIntoIter<R>,
}

impl CsvRowSource<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        log::debug!("reading rows from {}", path.display());
        Ok(Self::from_reader(file))
    }
}

impl<R: Read> CsvRowSource<R> {
    pub fn from_reader(reader: R) -> Self {
        let records = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader)
            .into_records();
        Self { records }
    }
}

impl<R: Read> Iterator for CsvRowSource<R> {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e.into())),
        };
        let line = record.position().map_or(0, |p| p.line());
        Some(Ok(RawRow::new(
            line,
            record.iter().map(str::to_string).collect(),
        )))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
