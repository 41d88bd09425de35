//! Status filtering and column projection for upload.
//!
//! The remote schema does not want the standard-particle PM triplet (it
//! duplicates the atmospheric one), the 0.3um count, or the status token.
//! Projection of a stored line:
//!
//! ```text
//! t,10,20,30,40,50,60,1,2,3,4,5,6,1.0,2.0,3.0,good
//!   ^^^^^^^^           ^                     ^^^^
//!   dropped            dropped               dropped (only good rows get here)
//! t,40,50,60,2,3,4,5,6,1.0,2.0,3.0
//! ```
//!
//! The operation is a textual splice on the stored field text: fields are
//! split at literal commas and the kept ones re-joined, so values are never
//! re-formatted.

use crate::error::{RecordError, Result};
use crate::record::COLUMNS;

/// Columns removed before upload, by header name.
pub const DROPPED_COLUMNS: [&str; 5] = [
    "PM1.0_std",
    "PM2.5_std",
    "PM10.0_std",
    "count_0.3um",
    "Status",
];

/// Name of the status column.
const STATUS_COLUMN: &str = "Status";

/// Projects stored lines into upload records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordProjector {
    /// Number of columns a data line must have
    columns: usize,
    /// Index of the status column
    status: usize,
    /// Per-column keep flag
    keep: Vec<bool>,
}

impl RecordProjector {
    /// Build a projector from column names in stored order.
    ///
    /// # Errors
    /// `RecordError::UnknownHeader` if a dropped column or the status column
    /// is missing.
    pub fn from_columns<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let names: Vec<&str> = names.iter().map(|n| n.as_ref().trim()).collect();
        let index_of = |wanted: &str| {
            names
                .iter()
                .position(|n| *n == wanted)
                .ok_or_else(|| RecordError::UnknownHeader(wanted.to_string()))
        };

        let status = index_of(STATUS_COLUMN)?;
        let mut keep = vec![true; names.len()];
        for dropped in DROPPED_COLUMNS {
            keep[index_of(dropped)?] = false;
        }

        Ok(Self {
            columns: names.len(),
            status,
            keep,
        })
    }

    /// Build a projector from a stored header line.
    pub fn from_header(header: &str) -> Result<Self> {
        let names: Vec<&str> = header.trim_end_matches(['\r', '\n']).split(',').collect();
        Self::from_columns(&names)
    }

    /// Number of columns a data line must have.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Project one data line (terminator optional).
    ///
    /// Returns `Ok(None)` when the status is not good: the line is consumed
    /// but contributes nothing to a batch.
    ///
    /// # Errors
    /// `RecordError::MissingColumns` when the field count does not match the
    /// header. When the status is the last column, any extra commas are
    /// taken to belong to the status text.
    pub fn project(&self, line: &str) -> Result<Option<String>> {
        let line = line.trim_end_matches(['\r', '\n']);

        let fields: Vec<&str> = if self.status + 1 == self.columns {
            line.splitn(self.columns, ',').collect()
        } else {
            line.split(',').collect()
        };
        if fields.len() != self.columns {
            return Err(RecordError::MissingColumns {
                expected: self.columns,
                actual: fields.len(),
            }
            .into());
        }

        if !fields[self.status].starts_with('g') {
            return Ok(None);
        }

        let kept: Vec<&str> = fields
            .iter()
            .zip(&self.keep)
            .filter_map(|(field, keep)| keep.then_some(*field))
            .collect();
        Ok(Some(kept.join(",")))
    }
}

impl Default for RecordProjector {
    /// Projector for the built-in 17-column layout.
    fn default() -> Self {
        let mut keep = vec![true; COLUMNS.len()];
        for (i, name) in COLUMNS.iter().enumerate() {
            if DROPPED_COLUMNS.contains(name) {
                keep[i] = false;
            }
        }
        Self {
            columns: COLUMNS.len(),
            status: COLUMNS.len() - 1,
            keep,
        }
    }
}
