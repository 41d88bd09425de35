//! pmlog-core: particulate-matter logger with resumable bulk upload
//!
//! This library provides the core components of a field logger that:
//! - Reads fixed-size frames from a particulate sensor over a register bus
//! - Appends one CSV line per sample to an append-only log store
//! - Periodically projects good records and uploads them in size-bounded
//!   batches, resuming from a persisted cursor so each record goes out once
//!
//! # Architecture
//!
//! - `frame`: 29-byte sensor frame checksum and decoding
//! - `sensor`: bus ports and the sensor driver
//! - `record`: log record layout, timestamps, fix staleness
//! - `volume`: named-file storage (directory or in-memory)
//! - `store`: append-only line store with complete-line reads
//! - `cursor`: upload cursor persistence
//! - `transform`: status filter and column projection
//! - `batch`: size-bounded request body
//! - `delivery`: one-request-per-batch client, TCP and simulated links
//! - `uploader`: resumable upload pass
//! - `export`: local dump of the store, whole or since a cursor
//! - `sampler`: one acquire-stamp-append cycle
//! - `retry`: retry policy and sleep seam
//! - `metrics`: observable system behavior
//!
//! # Design Principles
//!
//! - **No panics**: All errors are structured and recoverable
//! - **Injected I/O**: bus, files, network and delays sit behind traits
//! - **Deterministic**: Seeded randomness makes simulated runs reproducible
//! - **At-least-once**: the cursor never passes an undelivered record

pub mod batch;
pub mod cursor;
pub mod delivery;
pub mod error;
pub mod export;
pub mod frame;
pub mod metrics;
pub mod record;
pub mod retry;
pub mod sampler;
pub mod sensor;
pub mod store;
pub mod transform;
pub mod uploader;
pub mod volume;

// Re-export commonly used types
pub use error::{Error, Result};
