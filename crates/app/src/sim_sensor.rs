//! Simulated sensor bus and GPS for dry runs.
//!
//! # Design
//!
//! Readings follow a bounded random walk so the log looks like real air:
//! - PM values drift slowly, atmospheric values track standard ones
//! - Particle counts scale with the PM level
//! - Occasionally a frame is corrupted or the bus stalls
//!
//! The GPS hands back a fresh fix per sample, except that now and then it
//! repeats the previous one, which the logger records as stale.

use std::collections::VecDeque;
use std::time::Duration;

use pmlog_core::error::BusError;
use pmlog_core::frame::{RawFrame, SensorReading};
use chrono::{DateTime, Utc};
use pmlog_core::record::GeoFix;
use pmlog_core::sensor::RawBus;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Probability the GPS repeats its previous fix.
const STALE_FIX_RATE: f64 = 0.05;

/// Wire-level particulate sensor stand-in.
pub struct SimulatedBus {
    rng: ChaCha8Rng,
    corrupt_rate: f64,
    timeout_rate: f64,
    pm2p5: f64,
    rx: VecDeque<u8>,
    /// Bytes withheld on a stalled read
    stalled: bool,
}

impl SimulatedBus {
    pub fn new(seed: u64, corrupt_rate: f64, timeout_rate: f64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            corrupt_rate,
            timeout_rate,
            pm2p5: 8.0,
            rx: VecDeque::new(),
            stalled: false,
        }
    }

    /// Next reading on the random walk.
    fn next_reading(&mut self) -> SensorReading {
        self.pm2p5 = (self.pm2p5 + self.rng.gen_range(-1.5..=1.5)).clamp(0.0, 300.0);
        let pm2p5 = self.pm2p5;
        let pm1p0 = pm2p5 * self.rng.gen_range(0.6..0.8);
        let pm10p0 = pm2p5 * self.rng.gen_range(1.1..1.5);
        let count_0p3 = pm2p5 * 120.0 + self.rng.gen_range(0.0..50.0);

        let words = [
            pm1p0 as u16,
            pm2p5 as u16,
            pm10p0 as u16,
            pm1p0 as u16,
            pm2p5 as u16,
            pm10p0 as u16,
            count_0p3 as u16,
            (count_0p3 * 0.3) as u16,
            (count_0p3 * 0.05) as u16,
            (count_0p3 * 0.005) as u16,
            (count_0p3 * 0.001) as u16,
            (count_0p3 * 0.0002) as u16,
        ];
        SensorReading::from_words(words)
    }
}

impl RawBus for SimulatedBus {
    fn write(&mut self, _address: u8, _bytes: &[u8]) -> Result<(), BusError> {
        Ok(())
    }

    fn request(&mut self, _address: u8, _count: usize) {
        let mut frame = RawFrame::from_reading(&self.next_reading());
        if self.rng.gen::<f64>() < self.corrupt_rate {
            let at = self.rng.gen_range(0..28);
            frame.as_bytes_mut()[at] ^= self.rng.gen_range(1..=255u8);
        }
        self.stalled = self.rng.gen::<f64>() < self.timeout_rate;
        self.rx = frame.as_bytes().iter().copied().collect();
    }

    fn available(&mut self) -> usize {
        if self.stalled {
            self.rx.len() / 2
        } else {
            self.rx.len()
        }
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }
}

/// GPS stand-in walking around a start position.
pub struct SimulatedGps {
    rng: ChaCha8Rng,
    now: DateTime<Utc>,
    latitude: f64,
    longitude: f64,
    elevation_m: f64,
    last: Option<GeoFix>,
}

impl SimulatedGps {
    pub fn new(seed: u64, start: DateTime<Utc>) -> Self {
        Self {
            // Distinct stream from the sensor's
            rng: ChaCha8Rng::seed_from_u64(seed ^ 0x6770_7300),
            now: start,
            latitude: 42.40594,
            longitude: -71.11632,
            elevation_m: 24.5,
            last: None,
        }
    }

    /// Fix for a sample taken `elapsed` after the previous one.
    pub fn fix(&mut self, elapsed: Duration) -> GeoFix {
        if let Some(last) = self.last {
            if self.rng.gen::<f64>() < STALE_FIX_RATE {
                return last;
            }
        }

        self.now += chrono::Duration::seconds(elapsed.as_secs().max(1) as i64);
        self.latitude += self.rng.gen_range(-2e-5..2e-5);
        self.longitude += self.rng.gen_range(-2e-5..2e-5);
        self.elevation_m = (self.elevation_m + self.rng.gen_range(-0.3..0.3)).max(0.0);

        let fix = GeoFix {
            timestamp: self.now,
            latitude: self.latitude,
            longitude: self.longitude,
            elevation_m: self.elevation_m,
        };
        self.last = Some(fix);
        fix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmlog_core::frame::decode;
    use chrono::TimeZone;
    use pmlog_core::record::FixTracker;

    fn read_raw(bus: &mut SimulatedBus) -> Option<RawFrame> {
        bus.request(0x40, 29);
        if bus.available() < 29 {
            return None;
        }
        let bytes: Vec<u8> = std::iter::from_fn(|| bus.read_byte()).collect();
        RawFrame::from_slice(&bytes).ok()
    }

    #[test]
    fn test_perfect_bus_always_decodes() {
        let mut bus = SimulatedBus::new(42, 0.0, 0.0);
        for _ in 0..500 {
            let frame = read_raw(&mut bus).unwrap();
            assert!(decode(&frame).is_ok());
        }
    }

    #[test]
    fn test_faults_are_injected() {
        let mut bus = SimulatedBus::new(7, 0.2, 0.2);
        let mut corrupt = 0;
        let mut stalled = 0;
        for _ in 0..500 {
            match read_raw(&mut bus) {
                Some(frame) if decode(&frame).is_err() => corrupt += 1,
                Some(_) => {}
                None => stalled += 1,
            }
        }
        assert!(corrupt > 50 && corrupt < 150);
        assert!(stalled > 50 && stalled < 150);
    }

    #[test]
    fn test_determinism() {
        let mut a = SimulatedBus::new(12345, 0.1, 0.1);
        let mut b = SimulatedBus::new(12345, 0.1, 0.1);
        for _ in 0..50 {
            assert_eq!(read_raw(&mut a), read_raw(&mut b));
        }
    }

    #[test]
    fn test_gps_time_moves_by_interval() {
        let start = Utc.timestamp_opt(1_620_050_520, 0).unwrap();
        let mut gps = SimulatedGps::new(9, start);
        let mut previous = start;
        for _ in 0..50 {
            let fix = gps.fix(Duration::from_secs(2));
            assert!(fix.timestamp == previous || fix.timestamp == previous + chrono::Duration::seconds(2));
            previous = fix.timestamp;
        }
        assert!(previous > start);
    }

    #[test]
    fn test_gps_mostly_advances() {
        let mut gps = SimulatedGps::new(3, Utc.timestamp_opt(1_620_050_520, 0).unwrap());
        let mut tracker = FixTracker::new();
        let mut stale = 0;
        for _ in 0..400 {
            if !tracker.observe(&gps.fix(Duration::from_secs(2))).is_good() {
                stale += 1;
            }
        }
        assert!(stale > 0 && stale < 60);
    }
}
