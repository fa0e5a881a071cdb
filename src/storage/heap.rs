//! Heap Files
//!
//! An unordered, appendable on-disk sequence of rows. Rows are stored as
//! length-prefixed bincode records with a crc32 checksum:
//!
//! ```text
//! [u32 payload len][u32 crc32(payload)][payload = bincode(Row)] ...
//! ```
//!
//! Handles are cheap to clone; every scan opens its own reader so several
//! scans of the same file can be live at once (the n-way merge relies on
//! this).

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::PathBuf;

use crate::value::{DataType, Row};

use super::{StorageError, StorageResult};

/// A handle to a heap file under a storage manager's directory.
#[derive(Debug, Clone)]
pub struct HeapFile {
    name: String,
    path: PathBuf,
    schema: Vec<DataType>,
}

impl HeapFile {
    pub(super) fn new(name: String, path: PathBuf, schema: Vec<DataType>) -> Self {
        HeapFile { name, path, schema }
    }

    /// The manager-scoped name this file was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared column types; empty for untyped temp files.
    pub fn schema(&self) -> &[DataType] {
        &self.schema
    }

    /// Lazily scan all rows in insertion order.
    pub fn iter_scan(&self) -> StorageResult<HeapFileScan> {
        let file = File::open(&self.path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::FileNotFound(self.name.clone())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(HeapFileScan {
            name: self.name.clone(),
            reader: BufReader::new(file),
            offset: 0,
            failed: false,
        })
    }

    /// Append a batch of rows in one buffered write.
    pub fn batch_append(&self, rows: &[Row]) -> StorageResult<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for row in rows {
            let payload = bincode::serialize(row)?;
            let crc = crc32fast::hash(&payload);
            writer.write_all(&(payload.len() as u32).to_le_bytes())?;
            writer.write_all(&crc.to_le_bytes())?;
            writer.write_all(&payload)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Discard all rows.
    pub fn truncate(&self) -> StorageResult<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(0)?;
        Ok(())
    }
}

/// Lazy scanner over a heap file's records.
pub struct HeapFileScan {
    name: String,
    reader: BufReader<File>,
    offset: u64,
    failed: bool,
}

impl HeapFileScan {
    fn read_record(&mut self) -> StorageResult<Option<Row>> {
        let mut header = [0u8; 8];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        }
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload)?;
        if crc32fast::hash(&payload) != crc {
            return Err(StorageError::CorruptRecord {
                file: self.name.clone(),
                offset: self.offset,
            });
        }
        self.offset += 8 + len as u64;
        let row: Row = bincode::deserialize(&payload)?;
        Ok(Some(row))
    }
}

impl Iterator for HeapFileScan {
    type Item = StorageResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_record() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
