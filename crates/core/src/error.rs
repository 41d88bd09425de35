//! Error types for the particulate logger core.
//!
//! All operations return structured errors rather than panicking. Nothing in
//! the core is fatal to the process: every variant is either retried by the
//! caller or reported and skipped.

use thiserror::Error;

/// Top-level error type for all operations in the core.
///
/// Each variant corresponds to a specific failure domain:
/// - Frame: a sensor frame failed length or checksum validation
/// - Bus: the sensor did not answer on the register bus
/// - Storage: the log store could not be opened, written or read
/// - Record: a stored log line does not match the expected schema
/// - Delivery: the remote endpoint rejected a batch or was unreachable
/// - Cursor: the persisted upload cursor could not be loaded or saved
#[derive(Debug, Error)]
pub enum Error {
    /// Sensor frame rejected (corrupt or truncated)
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Sensor bus transaction failed
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Log store I/O failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Log line could not be projected
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Batch was not accepted by the endpoint
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Upload cursor persistence failed
    #[error("cursor error: {0}")]
    Cursor(#[from] CursorError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether retrying the same operation may succeed.
    ///
    /// Corrupt frames, bus timeouts and retryable delivery failures are
    /// transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Frame(FrameError::Checksum { .. }) => true,
            Error::Bus(BusError::Timeout { .. }) => true,
            Error::Delivery(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Sensor frame errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Additive checksum over the payload does not match the trailing byte
    #[error("checksum mismatch: frame says {expected:#04x}, payload sums to {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    /// Buffer is not exactly one frame long
    #[error("frame length mismatch: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

/// Sensor bus errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Requested bytes did not become available within the poll budget
    #[error("bus timeout at address {address:#04x}: {available}/{requested} bytes after {waited_ms}ms")]
    Timeout {
        address: u8,
        requested: usize,
        available: usize,
        waited_ms: u64,
    },

    /// Bus driver failure
    #[error("bus I/O failure: {0}")]
    Io(String),
}

/// Log store errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store file could not be opened
    #[error("cannot open {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing or flushing a record failed
    #[error("cannot write {name}: {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the store failed
    #[error("cannot read {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Log record errors raised while projecting stored lines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Line has fewer comma-separated fields than the header declares
    #[error("malformed record: expected {expected} columns, found {actual}")]
    MissingColumns { expected: usize, actual: usize },

    /// Projected record can never fit in an empty batch
    #[error("record of {len} bytes exceeds batch capacity of {capacity} bytes")]
    Oversized { len: usize, capacity: usize },

    /// Line is not valid UTF-8
    #[error("record is not valid UTF-8")]
    NotUtf8,

    /// Header does not name a column the projection needs
    #[error("header has no column named {0:?}")]
    UnknownHeader(String),
}

/// Delivery errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Endpoint answered with a non-success status
    #[error("batch rejected with status {code}")]
    Rejected { code: u16 },

    /// Endpoint unreachable or connection dropped mid-request
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// Retry policy gave up on a batch
    #[error("gave up after {attempts} attempts, last failure: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<DeliveryError>,
    },
}

impl DeliveryError {
    /// Whether sending the same batch again may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeliveryError::RetriesExhausted { .. })
    }
}

/// Cursor persistence errors.
#[derive(Debug, Error)]
pub enum CursorError {
    /// Stored cursor failed its integrity check
    #[error("cursor file {name} is corrupt")]
    Corrupt { name: String },

    /// Cursor file could not be read or written
    #[error("cursor I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Result with our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let checksum: Error = FrameError::Checksum {
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(checksum.is_retryable());

        let length: Error = FrameError::Length {
            expected: 29,
            actual: 3,
        }
        .into();
        assert!(!length.is_retryable());

        let rejected: Error = DeliveryError::Rejected { code: 500 }.into();
        assert!(rejected.is_retryable());

        let exhausted: Error = DeliveryError::RetriesExhausted {
            attempts: 3,
            last: Box::new(DeliveryError::Rejected { code: 500 }),
        }
        .into();
        assert!(!exhausted.is_retryable());

        let io: Error = BusError::Io("receive buffer drained early".to_string()).into();
        assert!(!io.is_retryable());
        assert!(DeliveryError::ConnectionFailed {
            reason: "refused".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err: Error = RecordError::MissingColumns {
            expected: 17,
            actual: 5,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "record error: malformed record: expected 17 columns, found 5"
        );
    }
}
