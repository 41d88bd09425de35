//! One sampling cycle: acquire, stamp, append.
//!
//! A failed acquisition (after the retry policy) is returned to the caller.
//! A failed append is logged and the sample is dropped for that cycle; the
//! logger keeps running.

use tracing::{debug, error};

use crate::error::{BusError, Error, FrameError, Result};
use crate::metrics::Metrics;
use crate::record::{FixTracker, GeoFix, LogRecord};
use crate::retry::{RetryPolicy, Sleep};
use crate::sensor::{ParticleSensor, SensorBus};
use crate::store::LogStore;
use crate::volume::Volume;

/// Ties the sensor, the fix tracker and the log store together.
pub struct Sampler<B, V, S> {
    sensor: ParticleSensor<B>,
    tracker: FixTracker,
    store: LogStore<V>,
    retry: RetryPolicy,
    sleeper: S,
}

impl<B, V, S> Sampler<B, V, S>
where
    B: SensorBus,
    V: Volume,
    S: Sleep,
{
    pub fn new(sensor: ParticleSensor<B>, store: LogStore<V>, retry: RetryPolicy, sleeper: S) -> Self {
        Self {
            sensor,
            tracker: FixTracker::new(),
            store,
            retry,
            sleeper,
        }
    }

    /// Select the sensor's bus mode.
    pub fn begin(&mut self) -> Result<()> {
        self.sensor.begin()
    }

    /// Take one sample at `fix` and append it.
    ///
    /// Returns `Ok(None)` when the record could not be stored.
    ///
    /// # Errors
    /// Acquisition errors once the retry policy gives up.
    pub fn sample(&mut self, fix: &GeoFix, metrics: &mut Metrics) -> Result<Option<LogRecord>> {
        metrics.samples_taken += 1;

        let reading = self
            .sensor
            .read_with_retry(&self.retry, &mut self.sleeper, |err| match err {
                Error::Frame(FrameError::Checksum { .. }) => {
                    metrics.frames_read += 1;
                    metrics.checksum_failures += 1;
                }
                Error::Bus(BusError::Timeout { .. }) => metrics.bus_timeouts += 1,
                _ => {}
            })?;
        metrics.frames_read += 1;

        let status = self.tracker.observe(fix);
        if !status.is_good() {
            metrics.stale_samples += 1;
        }
        let record = LogRecord::new(*fix, reading, status);

        match self.store.append(&record) {
            Ok(bytes) => {
                metrics.samples_logged += 1;
                metrics.bytes_logged += bytes;
                debug!(timestamp = %fix.timestamp, status = %record.status, "sample logged");
                Ok(Some(record))
            }
            Err(e) => {
                metrics.samples_dropped += 1;
                error!(timestamp = %fix.timestamp, error = %e, "sample dropped");
                Ok(None)
            }
        }
    }

    pub fn store(&self) -> &LogStore<V> {
        &self.store
    }

    pub fn sensor(&self) -> &ParticleSensor<B> {
        &self.sensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::frame::{RawFrame, SensorReading, FRAME_LEN};
    use crate::record::Status;
    use chrono::{TimeZone, Utc};
    use crate::retry::RecordingSleep;
    use crate::volume::MemVolume;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Bus answering each request from a queue of canned outcomes.
    #[derive(Default)]
    struct QueueBus {
        replies: VecDeque<std::result::Result<[u8; FRAME_LEN], BusError>>,
    }

    impl SensorBus for QueueBus {
        fn write(&mut self, _address: u8, _bytes: &[u8]) -> std::result::Result<(), BusError> {
            Ok(())
        }

        fn request_bytes(
            &mut self,
            address: u8,
            buf: &mut [u8],
        ) -> std::result::Result<(), BusError> {
            match self.replies.pop_front() {
                Some(Ok(bytes)) => {
                    buf.copy_from_slice(&bytes);
                    Ok(())
                }
                Some(Err(e)) => Err(e),
                None => Err(BusError::Timeout {
                    address,
                    requested: buf.len(),
                    available: 0,
                    waited_ms: 10,
                }),
            }
        }
    }

    fn reading() -> SensorReading {
        SensorReading::from_words([3, 5, 6, 3, 5, 6, 700, 210, 30, 2, 0, 0])
    }

    fn good_frame() -> [u8; FRAME_LEN] {
        *RawFrame::from_reading(&reading()).as_bytes()
    }

    fn corrupt_frame() -> [u8; FRAME_LEN] {
        let mut bytes = good_frame();
        bytes[10] ^= 0xFF;
        bytes
    }

    fn timeout() -> BusError {
        BusError::Timeout {
            address: 0x40,
            requested: FRAME_LEN,
            available: 3,
            waited_ms: 10,
        }
    }

    fn fix(second: u32) -> GeoFix {
        GeoFix {
            timestamp: Utc.with_ymd_and_hms(2021, 5, 3, 14, 0, second).unwrap(),
            latitude: 42.40594,
            longitude: -71.11632,
            elevation_m: 24.5,
        }
    }

    fn sampler(
        replies: Vec<std::result::Result<[u8; FRAME_LEN], BusError>>,
        volume: &MemVolume,
        retry: RetryPolicy,
    ) -> Sampler<QueueBus, MemVolume, RecordingSleep> {
        let bus = QueueBus {
            replies: replies.into(),
        };
        let store = LogStore::open_or_create(volume.clone(), "data.txt").unwrap();
        Sampler::new(ParticleSensor::new(bus), store, retry, RecordingSleep::new())
    }

    #[test]
    fn test_sample_appends_record() {
        let volume = MemVolume::new();
        let mut sampler = sampler(vec![Ok(good_frame())], &volume, RetryPolicy::once());
        let mut metrics = Metrics::new();

        let record = sampler.sample(&fix(0), &mut metrics).unwrap().unwrap();

        assert_eq!(record.reading, reading());
        assert_eq!(record.status, Status::Good);
        let text = String::from_utf8(volume.contents("data.txt").unwrap()).unwrap();
        assert!(text.ends_with(&record.to_csv_line()));
        assert_eq!(metrics.samples_logged, 1);
        assert_eq!(metrics.bytes_logged, record.to_csv_line().len() as u64);
    }

    #[test]
    fn test_acquisition_retried() {
        let volume = MemVolume::new();
        let mut sampler = sampler(
            vec![Err(timeout()), Ok(corrupt_frame()), Ok(good_frame())],
            &volume,
            RetryPolicy::bounded(5, Duration::from_millis(100)),
        );
        let mut metrics = Metrics::new();

        let record = sampler.sample(&fix(0), &mut metrics).unwrap();

        assert!(record.is_some());
        assert_eq!(metrics.bus_timeouts, 1);
        assert_eq!(metrics.checksum_failures, 1);
        assert_eq!(metrics.frames_read, 2);
    }

    #[test]
    fn test_acquisition_gives_up() {
        let volume = MemVolume::new();
        let mut sampler = sampler(
            vec![Ok(corrupt_frame()), Ok(corrupt_frame())],
            &volume,
            RetryPolicy::bounded(2, Duration::ZERO),
        );
        let mut metrics = Metrics::new();

        let result = sampler.sample(&fix(0), &mut metrics);

        assert!(matches!(result, Err(Error::Frame(FrameError::Checksum { .. }))));
        assert_eq!(metrics.samples_logged, 0);
        assert!(sampler.store().is_empty().unwrap());
    }

    #[test]
    fn test_stale_fix_logged_as_stale() {
        let volume = MemVolume::new();
        let mut sampler = sampler(
            vec![Ok(good_frame()), Ok(good_frame())],
            &volume,
            RetryPolicy::once(),
        );
        let mut metrics = Metrics::new();

        sampler.sample(&fix(5), &mut metrics).unwrap();
        let second = sampler.sample(&fix(5), &mut metrics).unwrap().unwrap();

        assert!(!second.status.is_good());
        assert_eq!(metrics.stale_samples, 1);
        assert_eq!(metrics.samples_logged, 2);
    }

    #[test]
    fn test_storage_failure_drops_sample() {
        let volume = MemVolume::new();
        let mut sampler = sampler(
            vec![Ok(good_frame()), Ok(good_frame())],
            &volume,
            RetryPolicy::once(),
        );
        let mut metrics = Metrics::new();

        volume.set_read_only(true);
        assert_eq!(sampler.sample(&fix(1), &mut metrics).unwrap(), None);
        assert_eq!(metrics.samples_dropped, 1);

        volume.set_read_only(false);
        assert!(sampler.sample(&fix(2), &mut metrics).unwrap().is_some());
        assert_eq!(metrics.samples_taken, 2);

        // The store itself reports the failure as a storage error
        volume.set_read_only(true);
        let record = LogRecord::new(fix(3), reading(), Status::Good);
        assert!(matches!(
            sampler.store().append(&record),
            Err(Error::Storage(StorageError::Open { .. }))
        ));
    }
}
