//! Metrics collection and reporting for the logger.
//!
//! This module provides observable insights into system behavior:
//! - Sampling (acquisitions, corrupt frames, bus timeouts, dropped samples)
//! - Upload (passes, batches, delivery attempts, skipped records)
//! - Timing information
//!
//! # Design
//!
//! Counters live in a plain struct updated explicitly by the sampler and
//! folded in from each upload [`PassReport`].
//!
//! # Thread Safety
//!
//! The `Metrics` struct is NOT thread-safe. For multi-threaded use, wrap in
//! `Arc<Mutex<Metrics>>`.

use std::time::{Duration, Instant};

use crate::uploader::PassReport;

/// Counters for one logger run.
#[derive(Debug, Clone)]
pub struct Metrics {
    // === Timing ===
    /// When the run started
    pub start_time: Instant,

    /// When the run ended (set on completion)
    pub end_time: Option<Instant>,

    // === Sampling ===
    /// Sampling cycles started
    pub samples_taken: u64,

    /// Samples appended to the store
    pub samples_logged: u64,

    /// Samples lost to storage failures
    pub samples_dropped: u64,

    /// Samples logged with a non-good status
    pub stale_samples: u64,

    /// Bytes appended to the store
    pub bytes_logged: u64,

    // === Sensor ===
    /// Frames fully read from the bus
    pub frames_read: u64,

    /// Frames rejected by the checksum
    pub checksum_failures: u64,

    /// Bus reads that timed out
    pub bus_timeouts: u64,

    // === Upload ===
    /// Upload passes completed
    pub passes: u64,

    /// Upload passes aborted
    pub passes_failed: u64,

    /// Batches accepted
    pub batches_sent: u64,

    /// Delivery attempts, retries included
    pub delivery_attempts: u64,

    /// Responses with a non-success status
    pub rejections: u64,

    /// Connections that failed
    pub connection_failures: u64,

    /// Records inside accepted batches
    pub records_uploaded: u64,

    /// Records skipped for their status
    pub records_filtered: u64,

    /// Lines skipped as unparsable
    pub records_malformed: u64,

    /// Records skipped as too large
    pub records_oversized: u64,

    /// Store bytes read by upload passes
    pub bytes_scanned: u64,
}

impl Metrics {
    /// Create new metrics with start time set to now.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            end_time: None,
            samples_taken: 0,
            samples_logged: 0,
            samples_dropped: 0,
            stale_samples: 0,
            bytes_logged: 0,
            frames_read: 0,
            checksum_failures: 0,
            bus_timeouts: 0,
            passes: 0,
            passes_failed: 0,
            batches_sent: 0,
            delivery_attempts: 0,
            rejections: 0,
            connection_failures: 0,
            records_uploaded: 0,
            records_filtered: 0,
            records_malformed: 0,
            records_oversized: 0,
            bytes_scanned: 0,
        }
    }

    /// Mark the run as complete.
    pub fn complete(&mut self) {
        self.end_time = Some(Instant::now());
    }

    /// Get total duration (or current elapsed if not complete).
    pub fn duration(&self) -> Duration {
        match self.end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    /// Fold in the counters of a completed pass.
    pub fn record_pass(&mut self, report: &PassReport) {
        self.passes += 1;
        self.batches_sent += report.batches_sent;
        self.delivery_attempts += report.attempts;
        self.rejections += report.rejections;
        self.connection_failures += report.connection_failures;
        self.records_uploaded += report.records_uploaded;
        self.records_filtered += report.filtered;
        self.records_malformed += report.malformed;
        self.records_oversized += report.oversized;
        self.bytes_scanned += report.bytes_scanned;
    }

    /// Corrupt frames / frames read.
    pub fn frame_error_rate(&self) -> f64 {
        if self.frames_read == 0 {
            0.0
        } else {
            self.checksum_failures as f64 / self.frames_read as f64
        }
    }

    /// Accepted batches / delivery attempts.
    pub fn acceptance_rate(&self) -> f64 {
        if self.delivery_attempts == 0 {
            0.0
        } else {
            self.batches_sent as f64 / self.delivery_attempts as f64
        }
    }

    /// Samples logged / samples taken.
    pub fn logging_rate(&self) -> f64 {
        if self.samples_taken == 0 {
            0.0
        } else {
            self.samples_logged as f64 / self.samples_taken as f64
        }
    }

    /// Print a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n=== Run Summary ===");
        println!("Duration: {} ms", self.duration().as_millis());
        println!();

        println!("=== Sampling ===");
        println!("Samples taken: {}", self.samples_taken);
        println!("Samples logged: {} ({:.1}%)", self.samples_logged, self.logging_rate() * 100.0);
        println!("Samples dropped: {}", self.samples_dropped);
        println!("Stale samples: {}", self.stale_samples);
        println!("Bytes logged: {}", self.bytes_logged);
        println!();

        println!("=== Sensor ===");
        println!("Frames read: {}", self.frames_read);
        println!("Checksum failures: {} ({:.2}%)", self.checksum_failures, self.frame_error_rate() * 100.0);
        println!("Bus timeouts: {}", self.bus_timeouts);
        println!();

        println!("=== Upload ===");
        println!("Passes: {} ({} failed)", self.passes, self.passes_failed);
        println!("Batches sent: {}", self.batches_sent);
        println!("Delivery attempts: {} ({:.1}% accepted)", self.delivery_attempts, self.acceptance_rate() * 100.0);
        println!("Rejections: {}", self.rejections);
        println!("Connection failures: {}", self.connection_failures);
        println!("Records uploaded: {}", self.records_uploaded);
        println!("Records filtered: {}", self.records_filtered);
        println!("Records malformed: {}", self.records_malformed);
        println!("Records oversized: {}", self.records_oversized);
        println!("Bytes scanned: {}", self.bytes_scanned);
        println!();
    }

    /// Print just the final result.
    pub fn print_result(&self) {
        if self.passes_failed > 0 {
            println!("✗ Upload incomplete: {} passes aborted", self.passes_failed);
        } else if self.samples_dropped > 0 {
            println!("✗ {} samples dropped by storage failures", self.samples_dropped);
        } else {
            println!("✓ Run completed");
            println!(
                "  {} samples logged, {} records uploaded in {} ms",
                self.samples_logged,
                self.records_uploaded,
                self.duration().as_millis()
            );
        }
    }

    /// Export metrics as a simple text format (for parsing/testing).
    pub fn export_text(&self) -> String {
        format!(
            "duration_ms={}\n\
             samples_taken={}\n\
             samples_logged={}\n\
             samples_dropped={}\n\
             stale_samples={}\n\
             checksum_failures={}\n\
             bus_timeouts={}\n\
             frame_error_rate={:.4}\n\
             passes={}\n\
             passes_failed={}\n\
             batches_sent={}\n\
             delivery_attempts={}\n\
             acceptance_rate={:.4}\n\
             records_uploaded={}\n\
             records_filtered={}\n\
             records_malformed={}\n\
             records_oversized={}\n",
            self.duration().as_millis(),
            self.samples_taken,
            self.samples_logged,
            self.samples_dropped,
            self.stale_samples,
            self.checksum_failures,
            self.bus_timeouts,
            self.frame_error_rate(),
            self.passes,
            self.passes_failed,
            self.batches_sent,
            self.delivery_attempts,
            self.acceptance_rate(),
            self.records_uploaded,
            self.records_filtered,
            self.records_malformed,
            self.records_oversized,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
