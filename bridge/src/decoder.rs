//! Health record payload decoding.
//!
//! NHS 3152 health tags carry three big-endian 16-bit fields:
//!
//! ```text
//! offset 0-1: temperature, int16,  0.1 degC
//! offset 2-3: pH,          uint16, 0.01
//! offset 4-5: glucose,     uint16, mg/dL
//! ```
//!
//! Anything past offset 5 is ignored.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Minimum length of a health record payload.
pub const HEALTH_PAYLOAD_LEN: usize = 6;

const TEMPERATURE_SCALE: f32 = 10.0;
const PH_SCALE: f32 = 100.0;

/// One calibrated measurement set read from a health patch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub temperature_celsius: f32,
    pub ph: f32,
    pub glucose_mgdl: f32,
}

/// The unscaled integers as they sit on the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReading {
    pub temperature: i16,
    pub ph: u16,
    pub glucose: u16,
}

pub fn decode(payload: &[u8]) -> Result<SensorReading, DecodeError> {
    RawReading::from_bytes(payload).map(RawReading::to_reading)
}

impl RawReading {
    pub fn from_bytes(payload: &[u8]) -> Result<Self, DecodeError> {
        let [t0, t1, p0, p1, g0, g1, ..] = *payload else {
            return Err(DecodeError::TooShort { len: payload.len() });
        };
        Ok(RawReading {
            temperature: i16::from_be_bytes([t0, t1]),
            ph: u16::from_be_bytes([p0, p1]),
            glucose: u16::from_be_bytes([g0, g1]),
        })
    }

    pub fn to_bytes(self) -> [u8; HEALTH_PAYLOAD_LEN] {
        let [t0, t1] = self.temperature.to_be_bytes();
        let [p0, p1] = self.ph.to_be_bytes();
        let [g0, g1] = self.glucose.to_be_bytes();
        [t0, t1, p0, p1, g0, g1]
    }

    pub fn to_reading(self) -> SensorReading {
        SensorReading {
            temperature_celsius: f32::from(self.temperature) / TEMPERATURE_SCALE,
            ph: f32::from(self.ph) / PH_SCALE,
            glucose_mgdl: f32::from(self.glucose),
        }
    }
}

impl SensorReading {
    /// Inverse of [`decode`]. Values outside the wire range saturate.
    pub fn to_raw(&self) -> RawReading {
        RawReading {
            temperature: (self.temperature_celsius * TEMPERATURE_SCALE).round() as i16,
            ph: (self.ph * PH_SCALE).round() as u16,
            glucose: self.glucose_mgdl.round() as u16,
        }
    }

    pub fn to_payload(&self) -> [u8; HEALTH_PAYLOAD_LEN] {
        self.to_raw().to_bytes()
    }
}
