//! Sensor bus port and the particulate sensor driver.
//!
//! The register bus itself is an external collaborator. Two seams are
//! offered:
//!
//! - [`RawBus`]: a Wire-style bus where a read is requested and bytes then
//!   trickle into a receive buffer
//! - [`SensorBus`]: the "request N bytes, get them or time out" primitive
//!
//! [`PolledBus`] adapts the former into the latter with the bounded
//! poll-wait the sensor needs. [`ParticleSensor`] sits on a `SensorBus` and
//! turns bus transactions into decoded readings.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{BusError, Error, Result};
use crate::frame::{decode, RawFrame, SensorReading, FRAME_LEN};
use crate::retry::{RetryPolicy, Sleep};

/// Default 7-bit bus address of the sensor.
pub const DEFAULT_ADDRESS: u8 = 0x40;

/// Command byte that switches the sensor to bus communication mode.
pub const SELECT_COMM: u8 = 0x88;

/// Wire-style register bus.
pub trait RawBus {
    /// Write `bytes` to the device at `address`.
    fn write(&mut self, address: u8, bytes: &[u8]) -> std::result::Result<(), BusError>;

    /// Ask the device at `address` for `count` bytes.
    fn request(&mut self, address: u8, count: usize);

    /// Bytes received so far for the last request.
    fn available(&mut self) -> usize;

    /// Pop one received byte.
    fn read_byte(&mut self) -> Option<u8>;
}

/// Request/response bus primitive.
pub trait SensorBus {
    /// Write `bytes` to the device at `address`.
    fn write(&mut self, address: u8, bytes: &[u8]) -> std::result::Result<(), BusError>;

    /// Fill `buf` from the device at `address` or time out.
    fn request_bytes(&mut self, address: u8, buf: &mut [u8]) -> std::result::Result<(), BusError>;
}

/// Poll budget for a bus read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Delay between polls
    pub step: Duration,
    /// Polls before giving up
    pub max_steps: u32,
}

impl Default for PollTiming {
    /// 1 ms steps, 10 steps.
    fn default() -> Self {
        Self {
            step: Duration::from_millis(1),
            max_steps: 10,
        }
    }
}

/// Adapts a [`RawBus`] into a [`SensorBus`] by polling until the requested
/// byte count is available.
pub struct PolledBus<B, S> {
    bus: B,
    sleeper: S,
    timing: PollTiming,
}

impl<B: RawBus, S: Sleep> PolledBus<B, S> {
    pub fn new(bus: B, sleeper: S, timing: PollTiming) -> Self {
        Self {
            bus,
            sleeper,
            timing,
        }
    }

    /// Release the wrapped bus.
    pub fn into_inner(self) -> B {
        self.bus
    }

    pub fn inner(&self) -> &B {
        &self.bus
    }
}

impl<B: RawBus, S: Sleep> SensorBus for PolledBus<B, S> {
    fn write(&mut self, address: u8, bytes: &[u8]) -> std::result::Result<(), BusError> {
        self.bus.write(address, bytes)
    }

    fn request_bytes(&mut self, address: u8, buf: &mut [u8]) -> std::result::Result<(), BusError> {
        let requested = buf.len();
        self.bus.request(address, requested);

        let mut steps = 0;
        loop {
            let available = self.bus.available();
            if available == requested {
                break;
            }
            steps += 1;
            if steps > self.timing.max_steps {
                return Err(BusError::Timeout {
                    address,
                    requested,
                    available,
                    waited_ms: (self.timing.step * self.timing.max_steps).as_millis() as u64,
                });
            }
            self.sleeper.sleep(self.timing.step);
        }

        for slot in buf.iter_mut() {
            *slot = self
                .bus
                .read_byte()
                .ok_or_else(|| BusError::Io("receive buffer drained early".to_string()))?;
        }
        Ok(())
    }
}

/// Particulate sensor on a register bus.
pub struct ParticleSensor<B> {
    bus: B,
    address: u8,
}

impl<B: SensorBus> ParticleSensor<B> {
    /// Sensor at the default address.
    pub fn new(bus: B) -> Self {
        Self::with_address(bus, DEFAULT_ADDRESS)
    }

    pub fn with_address(bus: B, address: u8) -> Self {
        Self { bus, address }
    }

    /// Switch the sensor into bus communication mode.
    pub fn begin(&mut self) -> Result<()> {
        self.bus.write(self.address, &[SELECT_COMM])?;
        debug!(address = self.address, "particle sensor selected");
        Ok(())
    }

    /// Read one raw frame without validating it.
    pub fn read_frame(&mut self) -> Result<RawFrame> {
        let mut buf = [0u8; FRAME_LEN];
        self.bus.request_bytes(self.address, &mut buf)?;
        Ok(RawFrame::new(buf))
    }

    /// One acquisition + decode.
    pub fn read(&mut self) -> Result<SensorReading> {
        let frame = self.read_frame()?;
        decode(&frame)
    }

    /// Acquire until a frame decodes, within `policy`.
    ///
    /// Errors that [`Error::is_retryable`] accepts (bus timeouts, checksum
    /// failures) are retried; anything else is returned immediately. `on_failure` is told about each failed attempt
    /// so the caller can count them.
    pub fn read_with_retry<S, L>(
        &mut self,
        policy: &RetryPolicy,
        sleeper: &mut S,
        mut on_failure: L,
    ) -> Result<SensorReading>
    where
        S: Sleep + ?Sized,
        L: FnMut(&Error),
    {
        let (attempts, result) = policy.run(
            sleeper,
            || self.read(),
            Error::is_retryable,
            |attempt, err| {
                warn!(attempt, error = %err, "sensor read failed");
                on_failure(err);
            },
        );
        if attempts > 1 && result.is_ok() {
            debug!(attempts, "sensor read recovered");
        }
        result
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RecordingSleep;
    use std::collections::VecDeque;

    /// Bus that makes a scripted number of bytes available per request.
    #[derive(Default)]
    struct ScriptedBus {
        responses: VecDeque<Vec<u8>>,
        rx: VecDeque<u8>,
        delivered: usize,
        polls_until_ready: usize,
        polls: usize,
        writes: Vec<(u8, Vec<u8>)>,
        starved: bool,
    }

    impl RawBus for ScriptedBus {
        fn write(&mut self, address: u8, bytes: &[u8]) -> std::result::Result<(), BusError> {
            self.writes.push((address, bytes.to_vec()));
            Ok(())
        }

        fn request(&mut self, _address: u8, _count: usize) {
            self.polls = 0;
            self.rx = self.responses.pop_front().unwrap_or_default().into();
            self.delivered = 0;
        }

        fn available(&mut self) -> usize {
            self.polls += 1;
            if self.polls > self.polls_until_ready {
                self.delivered = self.rx.len();
            }
            self.delivered
        }

        fn read_byte(&mut self) -> Option<u8> {
            if self.starved {
                return None;
            }
            self.rx.pop_front()
        }
    }

    fn sample_reading() -> SensorReading {
        SensorReading::from_words([5, 8, 9, 5, 8, 9, 900, 300, 40, 3, 1, 0])
    }

    #[test]
    fn test_polled_read_after_delay() {
        let frame = RawFrame::from_reading(&sample_reading());
        let bus = ScriptedBus {
            responses: VecDeque::from([frame.as_bytes().to_vec()]),
            polls_until_ready: 3,
            ..Default::default()
        };
        let polled = PolledBus::new(bus, RecordingSleep::new(), PollTiming::default());
        let mut sensor = ParticleSensor::new(polled);

        assert_eq!(sensor.read().unwrap(), sample_reading());
        assert_eq!(sensor.bus().sleeper.delays.len(), 3);
    }

    #[test]
    fn test_polled_read_times_out() {
        let bus = ScriptedBus {
            responses: VecDeque::from([vec![0u8; 5]]),
            ..Default::default()
        };
        let polled = PolledBus::new(bus, RecordingSleep::new(), PollTiming::default());
        let mut sensor = ParticleSensor::new(polled);

        let result = sensor.read();
        assert!(matches!(
            result,
            Err(Error::Bus(BusError::Timeout {
                address: DEFAULT_ADDRESS,
                requested: FRAME_LEN,
                available: 5,
                waited_ms: 10,
            }))
        ));
        assert_eq!(sensor.bus().sleeper.delays.len(), 10);
    }

    #[test]
    fn test_begin_sends_select_command() {
        let polled = PolledBus::new(
            ScriptedBus::default(),
            RecordingSleep::new(),
            PollTiming::default(),
        );
        let mut sensor = ParticleSensor::new(polled);
        sensor.begin().unwrap();

        assert_eq!(
            sensor.bus().inner().writes,
            vec![(DEFAULT_ADDRESS, vec![SELECT_COMM])]
        );
    }

    #[test]
    fn test_retry_skips_corrupt_and_missing_frames() {
        let good = RawFrame::from_reading(&sample_reading());
        let mut corrupt = good;
        corrupt.as_bytes_mut()[6] ^= 0xFF;

        let bus = ScriptedBus {
            responses: VecDeque::from([
                vec![],
                corrupt.as_bytes().to_vec(),
                good.as_bytes().to_vec(),
            ]),
            ..Default::default()
        };
        let polled = PolledBus::new(bus, RecordingSleep::new(), PollTiming::default());
        let mut sensor = ParticleSensor::new(polled);
        let mut sleeper = RecordingSleep::new();
        let mut failures = Vec::new();

        let reading = sensor
            .read_with_retry(
                &RetryPolicy::unbounded(Duration::from_millis(50)),
                &mut sleeper,
                |err| failures.push(err.to_string()),
            )
            .unwrap();

        assert_eq!(reading, sample_reading());
        assert_eq!(failures.len(), 2);
        assert!(failures[0].contains("bus timeout"));
        assert!(failures[1].contains("checksum"));
        assert_eq!(sleeper.delays, vec![Duration::from_millis(50); 2]);
    }

    #[test]
    fn test_retry_bounded() {
        let bus = ScriptedBus::default();
        let polled = PolledBus::new(bus, RecordingSleep::new(), PollTiming::default());
        let mut sensor = ParticleSensor::new(polled);
        let mut sleeper = RecordingSleep::new();

        let result = sensor.read_with_retry(
            &RetryPolicy::bounded(3, Duration::from_millis(1)),
            &mut sleeper,
            |_| {},
        );

        assert!(matches!(result, Err(Error::Bus(BusError::Timeout { .. }))));
        assert_eq!(sleeper.delays.len(), 2);
    }

    #[test]
    fn test_retry_stops_on_bus_failure() {
        let frame = RawFrame::from_reading(&sample_reading());
        let bus = ScriptedBus {
            responses: VecDeque::from([frame.as_bytes().to_vec(), frame.as_bytes().to_vec()]),
            starved: true,
            ..Default::default()
        };
        let polled = PolledBus::new(bus, RecordingSleep::new(), PollTiming::default());
        let mut sensor = ParticleSensor::new(polled);
        let mut sleeper = RecordingSleep::new();
        let mut failures = 0;

        let result = sensor.read_with_retry(
            &RetryPolicy::unbounded(Duration::from_millis(50)),
            &mut sleeper,
            |_| failures += 1,
        );

        assert!(matches!(result, Err(Error::Bus(BusError::Io(_)))));
        assert_eq!(failures, 1);
        assert!(sleeper.delays.is_empty());
        assert_eq!(sensor.bus().inner().responses.len(), 1);
    }
}
