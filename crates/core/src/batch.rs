//! Size-bounded upload batch.
//!
//! # Body Format
//!
//! ```text
//! write_api_key=<key>&time_format=absolute&updates=<record>|<record>|...|<record>
//! +---------------- preamble ----------------------+------- records -------------+
//! ```
//!
//! Records are joined with `|`; there is no trailing delimiter. The body is
//! sent as-is (projected records contain only digits, signs, dots, commas,
//! `:`, `-`, `+` and `T`).
//!
//! # Size Constraint
//!
//! `body().len() <= max_size - margin` at all times. A record is appended in
//! its entirety or not at all; [`UploadBatch::fits`] tells the caller to flush
//! first.

use crate::error::{Error, RecordError, Result};

/// Default maximum request body size in bytes.
pub const DEFAULT_MAX_SIZE: usize = 5000;

/// Default bytes held back below the maximum.
pub const DEFAULT_MARGIN: usize = 200;

/// Record delimiter inside the body.
pub const DELIMITER: char = '|';

/// Body size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Hard ceiling on the request body
    pub max_size: usize,
    /// Safety margin kept free below `max_size`
    pub margin: usize,
}

impl BatchLimits {
    pub const fn new(max_size: usize, margin: usize) -> Self {
        Self { max_size, margin }
    }

    /// Largest body a batch may grow to.
    pub fn capacity(&self) -> usize {
        self.max_size.saturating_sub(self.margin)
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_MARGIN)
    }
}

/// Authentication and envelope fields that start every body.
pub fn preamble(api_key: &str) -> String {
    format!("write_api_key={api_key}&time_format=absolute&updates=")
}

/// One outgoing request body under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadBatch {
    body: String,
    preamble_len: usize,
    capacity: usize,
    records: usize,
}

impl UploadBatch {
    /// Empty batch holding just the preamble.
    ///
    /// # Errors
    /// `Error::Config` if the preamble leaves no room for a single byte of
    /// record data.
    pub fn new(api_key: &str, limits: BatchLimits) -> Result<Self> {
        let body = preamble(api_key);
        let capacity = limits.capacity();
        if body.len() >= capacity {
            return Err(Error::Config(format!(
                "batch capacity {} (max {} - margin {}) leaves no room after a {}-byte preamble",
                capacity,
                limits.max_size,
                limits.margin,
                body.len()
            )));
        }
        Ok(Self {
            preamble_len: body.len(),
            body,
            capacity,
            records: 0,
        })
    }

    /// Bytes `record` would add, delimiter included.
    fn cost(&self, record: &str) -> usize {
        if self.records == 0 {
            record.len()
        } else {
            record.len() + DELIMITER.len_utf8()
        }
    }

    /// Whether `record` can be appended without exceeding capacity.
    pub fn fits(&self, record: &str) -> bool {
        self.body.len() + self.cost(record) <= self.capacity
    }

    /// Whether `record` would fit even in an empty batch.
    pub fn can_ever_fit(&self, record: &str) -> bool {
        self.preamble_len + record.len() <= self.capacity
    }

    /// Append `record` whole.
    ///
    /// # Errors
    /// `RecordError::Oversized` if it does not fit; the batch is unchanged.
    pub fn push(&mut self, record: &str) -> Result<()> {
        if !self.fits(record) {
            return Err(RecordError::Oversized {
                len: record.len(),
                capacity: self.capacity - self.preamble_len,
            }
            .into());
        }
        if self.records > 0 {
            self.body.push(DELIMITER);
        }
        self.body.push_str(record);
        self.records += 1;
        Ok(())
    }

    /// Request body as it stands.
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether no record has been appended.
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn record_count(&self) -> usize {
        self.records
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all records, keeping the preamble.
    pub fn reset(&mut self) {
        self.body.truncate(self.preamble_len);
        self.records = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "ABCDEF0123456789";

    #[test]
    fn test_preamble() {
        assert_eq!(
            preamble(KEY),
            "write_api_key=ABCDEF0123456789&time_format=absolute&updates="
        );
    }

    #[test]
    fn test_records_are_pipe_joined() {
        let mut batch = UploadBatch::new(KEY, BatchLimits::default()).unwrap();
        assert!(batch.is_empty());

        batch.push("a,1").unwrap();
        batch.push("b,2").unwrap();
        batch.push("c,3").unwrap();

        assert_eq!(batch.record_count(), 3);
        assert_eq!(batch.body(), format!("{}a,1|b,2|c,3", preamble(KEY)));
    }

    #[test]
    fn test_body_never_exceeds_capacity() {
        let limits = BatchLimits::new(300, 50);
        let mut batch = UploadBatch::new(KEY, limits).unwrap();
        let record = "2021-05-03T14:02:00+00:00,1,2,3";

        let mut pushed = 0;
        while batch.fits(record) {
            batch.push(record).unwrap();
            pushed += 1;
            assert!(batch.len() <= limits.capacity());
        }

        assert!(pushed > 1);
        assert!(batch.push(record).is_err());
        assert_eq!(batch.record_count(), pushed);
        assert!(batch.len() <= limits.max_size);
    }

    #[test]
    fn test_exact_fit() {
        let base = preamble(KEY).len();
        let mut batch = UploadBatch::new(KEY, BatchLimits::new(base + 7 + 10, 10)).unwrap();

        assert!(batch.fits("1234567"));
        assert!(!batch.fits("12345678"));
        batch.push("1234567").unwrap();
        assert_eq!(batch.len(), batch.capacity());
        assert!(!batch.fits(""));
    }

    #[test]
    fn test_reset_keeps_preamble() {
        let mut batch = UploadBatch::new(KEY, BatchLimits::default()).unwrap();
        batch.push("x").unwrap();
        batch.reset();

        assert!(batch.is_empty());
        assert_eq!(batch.body(), preamble(KEY));

        batch.push("y").unwrap();
        assert_eq!(batch.body(), format!("{}y", preamble(KEY)));
    }

    #[test]
    fn test_oversized_record() {
        let base = preamble(KEY).len();
        let mut batch = UploadBatch::new(KEY, BatchLimits::new(base + 20, 10)).unwrap();
        let record = "x".repeat(11);

        assert!(!batch.can_ever_fit(&record));
        assert!(matches!(
            batch.push(&record),
            Err(Error::Record(RecordError::Oversized {
                len: 11,
                capacity: 10
            }))
        ));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_limits_too_small() {
        let result = UploadBatch::new(KEY, BatchLimits::new(100, 60));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
