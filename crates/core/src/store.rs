//! Append-only, line-oriented log store.
//!
//! # Layout
//!
//! ```text
//! Timestamp, PM1.0_std, ... , Status\n      <- header, offset 0, written once
//! 2021-05-03T14:02:00+00:00,...,good\n      <- one record per line
//! ...
//! ```
//!
//! Bytes are never rewritten or deleted, so any offset at a line boundary
//! stays valid forever. That is what makes cursor-based resumable upload
//! safe.
//!
//! # Reading
//!
//! [`LogStore::read_from`] yields only lines whose terminator has been
//! observed. A trailing partial line (a torn write from a crash, or a
//! sample still being written) is not returned and its bytes are not
//! counted as consumed.

use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};

use tracing::debug;

use crate::error::{Result, StorageError};
use crate::record::{LogRecord, HEADER};
use crate::volume::Volume;

/// Default store file name.
pub const DEFAULT_FILE_NAME: &str = "data.txt";

/// One complete line read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Raw bytes including the terminator
    pub bytes: Vec<u8>,
    /// Offset of the first byte
    pub start: u64,
    /// Offset one past the terminator
    pub end: u64,
}

impl Line {
    /// Whether this is the header line.
    pub fn is_header(&self) -> bool {
        self.start == 0
    }

    /// Line content without `\n` or `\r\n`.
    pub fn content(&self) -> &[u8] {
        let mut content = self.bytes.as_slice();
        if let Some(rest) = content.strip_suffix(b"\n") {
            content = rest;
        }
        if let Some(rest) = content.strip_suffix(b"\r") {
            content = rest;
        }
        content
    }
}

/// Append-only log store on a [`Volume`].
#[derive(Debug, Clone)]
pub struct LogStore<V> {
    volume: V,
    name: String,
}

impl<V: Volume> LogStore<V> {
    /// Open `name`, writing the header if the file does not exist yet.
    pub fn open_or_create(volume: V, name: impl Into<String>) -> Result<Self> {
        let store = Self {
            volume,
            name: name.into(),
        };
        if !store.volume.exists(&store.name) {
            store.write_header()?;
        }
        Ok(store)
    }

    /// Delete the store and start over with a fresh header.
    ///
    /// Any upload cursor for this store must be reset to zero by the caller.
    pub fn recreate(&self) -> Result<()> {
        self.volume
            .remove(&self.name)
            .map_err(|source| StorageError::Write {
                name: self.name.clone(),
                source,
            })?;
        self.write_header()
    }

    fn write_header(&self) -> Result<()> {
        debug!(store = %self.name, "writing log header");
        self.append_line(&format!("{HEADER}\n"))
    }

    /// Append one record as a single CSV line.
    ///
    /// Opens, writes, flushes and closes the file on every call so a
    /// power loss can tear at most the line being written.
    ///
    /// # Errors
    /// `StorageError::Open` or `StorageError::Write`. The caller decides
    /// whether to drop the sample.
    pub fn append(&self, record: &LogRecord) -> Result<u64> {
        let line = record.to_csv_line();
        self.append_line(&line)?;
        Ok(line.len() as u64)
    }

    fn append_line(&self, line: &str) -> Result<()> {
        let mut file = self
            .volume
            .open_append(&self.name)
            .map_err(|source| StorageError::Open {
                name: self.name.clone(),
                source,
            })?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|source| StorageError::Write {
                name: self.name.clone(),
                source,
            })?;
        Ok(())
    }

    /// Read complete lines starting at byte `offset`.
    ///
    /// `offset` must be a line boundary (0 or the `end` of a previously
    /// returned line). The returned reader is forward-only; call again to
    /// restart.
    pub fn read_from(&self, offset: u64) -> Result<LineReader<V::Reader>> {
        let mut file = self
            .volume
            .open_read(&self.name)
            .map_err(|source| StorageError::Open {
                name: self.name.clone(),
                source,
            })?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|source| StorageError::Read {
                name: self.name.clone(),
                source,
            })?;
        Ok(LineReader {
            reader: BufReader::new(file),
            name: self.name.clone(),
            position: offset,
            done: false,
        })
    }

    /// Current size in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self
            .volume
            .len(&self.name)
            .map_err(|source| StorageError::Read {
                name: self.name.clone(),
                source,
            })?)
    }

    /// Whether the store holds nothing but its header.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? <= HEADER.len() as u64 + 1)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn volume(&self) -> &V {
        &self.volume
    }
}

/// Lazy iterator over complete lines.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: BufReader<R>,
    name: String,
    position: u64,
    done: bool,
}

impl<R: std::io::Read> LineReader<R> {
    /// Offset of the next unread byte (always a line boundary).
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<R: std::io::Read> Iterator for LineReader<R> {
    type Item = Result<Line>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut bytes = Vec::new();
        match self.reader.read_until(b'\n', &mut bytes) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) if bytes.last() != Some(&b'\n') => {
                // Unterminated tail: not data yet
                debug!(
                    store = %self.name,
                    offset = self.position,
                    bytes = bytes.len(),
                    "ignoring partial trailing line"
                );
                self.done = true;
                None
            }
            Ok(n) => {
                let start = self.position;
                self.position += n as u64;
                Some(Ok(Line {
                    bytes,
                    start,
                    end: self.position,
                }))
            }
            Err(source) => {
                self.done = true;
                Some(Err(StorageError::Read {
                    name: self.name.clone(),
                    source,
                }
                .into()))
            }
        }
    }
}
