//! Upload cursor persistence.
//!
//! The cursor is the byte offset of the first log line not yet uploaded.
//! It only moves forward, and only to a line boundary whose preceding
//! records were all either delivered or deliberately skipped.
//!
//! # File Format
//!
//! ```text
//! <offset decimal> <crc32 of offset bytes, hex>\n
//! ```
//!
//! The checksum catches a cursor file torn by power loss. A corrupt file is
//! reported so the uploader can fall back to offset 0: re-sending is
//! acceptable, skipping is not.

use std::fmt;
use std::io::Read;

use tracing::{debug, warn};

use crate::error::{CursorError, Error, Result};
use crate::volume::Volume;

/// Default cursor file name.
pub const DEFAULT_FILE_NAME: &str = "upload.cursor";

/// Byte offset into the log store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(pub u64);

impl Cursor {
    pub const START: Cursor = Cursor(0);

    pub fn offset(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Load/save seam for the cursor.
pub trait CursorStore {
    /// Last saved cursor, or [`Cursor::START`] if none was ever saved.
    fn load(&mut self) -> Result<Cursor>;

    /// Persist `cursor`.
    fn save(&mut self, cursor: Cursor) -> Result<()>;
}

/// Saved cursor, or [`Cursor::START`] if the stored one is corrupt.
pub fn load_or_start<C: CursorStore + ?Sized>(cursor_store: &mut C) -> Result<Cursor> {
    match cursor_store.load() {
        Err(Error::Cursor(CursorError::Corrupt { name })) => {
            warn!(file = %name, "cursor file corrupt, rescanning from the start");
            Ok(Cursor::START)
        }
        other => other,
    }
}

/// Cursor held in memory only.
#[derive(Debug, Default, Clone)]
pub struct MemoryCursorStore {
    cursor: Cursor,
    /// Every value passed to `save`, in order
    pub history: Vec<Cursor>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(cursor: Cursor) -> Self {
        Self {
            cursor,
            history: Vec::new(),
        }
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&mut self) -> Result<Cursor> {
        Ok(self.cursor)
    }

    fn save(&mut self, cursor: Cursor) -> Result<()> {
        self.cursor = cursor;
        self.history.push(cursor);
        Ok(())
    }
}

/// Cursor kept in a checksummed sidecar file on a [`Volume`].
#[derive(Debug, Clone)]
pub struct FileCursorStore<V> {
    volume: V,
    name: String,
}

impl<V: Volume> FileCursorStore<V> {
    pub fn new(volume: V, name: impl Into<String>) -> Self {
        Self {
            volume,
            name: name.into(),
        }
    }

    fn encode(cursor: Cursor) -> String {
        let digits = cursor.0.to_string();
        format!("{} {:08x}\n", digits, crc32fast::hash(digits.as_bytes()))
    }

    fn decode(&self, text: &str) -> std::result::Result<Cursor, CursorError> {
        let corrupt = || CursorError::Corrupt {
            name: self.name.clone(),
        };
        let (digits, crc) = text.trim_end().split_once(' ').ok_or_else(corrupt)?;
        let crc = u32::from_str_radix(crc, 16).map_err(|_| corrupt())?;
        if crc32fast::hash(digits.as_bytes()) != crc {
            return Err(corrupt());
        }
        digits.parse().map(Cursor).map_err(|_| corrupt())
    }
}

impl<V: Volume> CursorStore for FileCursorStore<V> {
    fn load(&mut self) -> Result<Cursor> {
        if !self.volume.exists(&self.name) {
            return Ok(Cursor::START);
        }
        let mut text = String::new();
        self.volume
            .open_read(&self.name)
            .and_then(|mut file| file.read_to_string(&mut text))
            .map_err(CursorError::Io)?;
        Ok(self.decode(&text)?)
    }

    fn save(&mut self, cursor: Cursor) -> Result<()> {
        self.volume
            .replace(&self.name, Self::encode(cursor).as_bytes())
            .map_err(CursorError::Io)?;
        debug!(cursor = cursor.0, file = %self.name, "cursor saved");
        Ok(())
    }
}
