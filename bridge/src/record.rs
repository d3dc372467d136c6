use serde::{Deserialize, Serialize};

/// Type marker of records carrying health measurements.
pub const HEALTH_RECORD_TYPE: u8 = b'H';
/// Type marker of records carrying calibration data.
pub const CALIBRATION_RECORD_TYPE: u8 = b'C';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TypeNameFormat {
    Empty,
    #[default]
    WellKnown,
    MimeMediaType,
    AbsoluteUri,
    External,
    Unknown,
    Unchanged,
    Reserved,
}

/// One record of an NDEF message as exchanged with a tag channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NdefRecord {
    #[serde(default)]
    pub tnf: TypeNameFormat,
    #[serde(rename = "type")]
    pub record_type: Vec<u8>,
    #[serde(default)]
    pub id: Vec<u8>,
    pub payload: Vec<u8>,
}

impl NdefRecord {
    pub fn well_known(record_type: &[u8], payload: Vec<u8>) -> Self {
        NdefRecord {
            tnf: TypeNameFormat::WellKnown,
            record_type: record_type.to_vec(),
            id: Vec::new(),
            payload,
        }
    }

    pub fn health(payload: Vec<u8>) -> Self {
        Self::well_known(&[HEALTH_RECORD_TYPE], payload)
    }

    pub fn calibration(payload: Vec<u8>) -> Self {
        Self::well_known(&[CALIBRATION_RECORD_TYPE], payload)
    }

    /// First byte of the type field, if any.
    pub fn type_marker(&self) -> Option<u8> {
        self.record_type.first().copied()
    }

    pub fn is_health(&self) -> bool {
        self.type_marker() == Some(HEALTH_RECORD_TYPE)
    }

    pub fn is_calibration(&self) -> bool {
        self.type_marker() == Some(CALIBRATION_RECORD_TYPE)
    }
}

/// First health record of a message, in record order.
pub fn find_health_record(records: &[NdefRecord]) -> Option<&NdefRecord> {
    records.iter().find(|record| record.is_health())
}
