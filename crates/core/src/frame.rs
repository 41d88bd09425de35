//! Particulate sensor frame decoding.
//!
//! The sensor answers every read with a fixed 29-byte frame:
//!
//! # Frame Format
//!
//! ```text
//! +----------------------+
//! | reserved (4 bytes)   |  sensor id / padding, ignored
//! +----------------------+
//! | PM1.0 std (2)        |  u16 big-endian, offset 4
//! | PM2.5 std (2)        |
//! | PM10 std (2)         |
//! | PM1.0 atm (2)        |
//! | PM2.5 atm (2)        |
//! | PM10 atm (2)         |
//! | count >=0.3um (2)    |
//! | count >=0.5um (2)    |
//! | count >=1.0um (2)    |
//! | count >=2.5um (2)    |
//! | count >=5.0um (2)    |
//! | count >=10um (2)     |  offset 26
//! +----------------------+
//! | checksum (1)         |  low 8 bits of sum(bytes[0..28])
//! +----------------------+
//! ```
//!
//! Decoding is pure: no I/O and no retry. A frame that fails its checksum
//! yields no reading at all.

use crate::error::{FrameError, Result};

/// Total frame length in bytes (payload + checksum).
pub const FRAME_LEN: usize = 29;

/// Number of payload bytes covered by the checksum.
pub const PAYLOAD_LEN: usize = 28;

/// Offset of the first measurement word.
const FIRST_WORD: usize = 4;

/// Number of 16-bit measurement words in a frame.
pub const WORD_COUNT: usize = 12;

/// One decoded particulate reading.
///
/// Field order matches the frame and the log store columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorReading {
    /// PM1.0 concentration, standard particle (ug/m^3)
    pub pm1p0_std: u16,
    /// PM2.5 concentration, standard particle (ug/m^3)
    pub pm2p5_std: u16,
    /// PM10 concentration, standard particle (ug/m^3)
    pub pm10p0_std: u16,
    /// PM1.0 concentration, atmospheric environment (ug/m^3)
    pub pm1p0_atm: u16,
    /// PM2.5 concentration, atmospheric environment (ug/m^3)
    pub pm2p5_atm: u16,
    /// PM10 concentration, atmospheric environment (ug/m^3)
    pub pm10p0_atm: u16,
    /// Particles >= 0.3um (pcs/L)
    pub count_0p3um: u16,
    /// Particles >= 0.5um (pcs/L)
    pub count_0p5um: u16,
    /// Particles >= 1.0um (pcs/L)
    pub count_1p0um: u16,
    /// Particles >= 2.5um (pcs/L)
    pub count_2p5um: u16,
    /// Particles >= 5.0um (pcs/L)
    pub count_5p0um: u16,
    /// Particles >= 10um (pcs/L)
    pub count_10p0um: u16,
}

impl SensorReading {
    /// Build a reading from the 12 words in frame order.
    pub const fn from_words(w: [u16; WORD_COUNT]) -> Self {
        Self {
            pm1p0_std: w[0],
            pm2p5_std: w[1],
            pm10p0_std: w[2],
            pm1p0_atm: w[3],
            pm2p5_atm: w[4],
            pm10p0_atm: w[5],
            count_0p3um: w[6],
            count_0p5um: w[7],
            count_1p0um: w[8],
            count_2p5um: w[9],
            count_5p0um: w[10],
            count_10p0um: w[11],
        }
    }

    /// All 12 words in frame order.
    pub const fn words(&self) -> [u16; WORD_COUNT] {
        [
            self.pm1p0_std,
            self.pm2p5_std,
            self.pm10p0_std,
            self.pm1p0_atm,
            self.pm2p5_atm,
            self.pm10p0_atm,
            self.count_0p3um,
            self.count_0p5um,
            self.count_1p0um,
            self.count_2p5um,
            self.count_5p0um,
            self.count_10p0um,
        ]
    }
}

/// A raw frame exactly as read from the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame([u8; FRAME_LEN]);

impl RawFrame {
    /// Wrap a frame-sized array.
    pub const fn new(bytes: [u8; FRAME_LEN]) -> Self {
        Self(bytes)
    }

    /// Copy a frame out of a slice.
    ///
    /// # Errors
    /// `FrameError::Length` unless the slice is exactly `FRAME_LEN` bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; FRAME_LEN] = bytes.try_into().map_err(|_| FrameError::Length {
            expected: FRAME_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(array))
    }

    /// Encode a reading into a valid frame.
    ///
    /// The reserved header bytes are zero. Used by simulated sensors.
    pub fn from_reading(reading: &SensorReading) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        for (i, word) in reading.words().iter().enumerate() {
            let at = FIRST_WORD + i * 2;
            bytes[at..at + 2].copy_from_slice(&word.to_be_bytes());
        }
        bytes[PAYLOAD_LEN] = checksum(&bytes[..PAYLOAD_LEN]);
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Mutable raw bytes (for fault injection).
    pub fn as_bytes_mut(&mut self) -> &mut [u8; FRAME_LEN] {
        &mut self.0
    }

    /// Checksum byte carried by the frame.
    pub fn stored_checksum(&self) -> u8 {
        self.0[PAYLOAD_LEN]
    }
}

/// 8-bit truncated additive sum.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Decode a raw frame into a reading.
///
/// # Errors
/// `FrameError::Checksum` if the payload sum does not match byte 28. No
/// partial reading is produced in that case.
pub fn decode(raw: &RawFrame) -> Result<SensorReading> {
    let bytes = raw.as_bytes();
    let actual = checksum(&bytes[..PAYLOAD_LEN]);
    let expected = raw.stored_checksum();
    if actual != expected {
        return Err(FrameError::Checksum { expected, actual }.into());
    }

    let mut words = [0u16; WORD_COUNT];
    for (i, word) in words.iter_mut().enumerate() {
        let at = FIRST_WORD + i * 2;
        *word = u16::from_be_bytes([bytes[at], bytes[at + 1]]);
    }

    Ok(SensorReading::from_words(words))
}
