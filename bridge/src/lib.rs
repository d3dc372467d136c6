//! Bridge between an NHS 3152 health patch and the application layer.
//!
//! The patch is read over NFC: a discovered tag's NDEF message carries a
//! health record (type `H`) whose payload decodes into temperature, pH and
//! glucose. Calibration data goes the other way as a record of type `C`.
//!
//! The platform NFC stack and the native sensor driver sit behind the
//! [`Transport`] trait; [`Session`] owns the connection state machine on top
//! of it.

pub mod decoder;
pub mod error;
pub mod history;
pub mod record;
pub mod session;
pub mod simulator;
pub mod transport;

pub use decoder::{decode, RawReading, SensorReading};
pub use error::{BridgeError, ChannelError, DecodeError, TransportError};
pub use history::{ReadingHistory, Statistics, TimestampedReading};
pub use record::NdefRecord;
pub use session::{ConnectionState, Session, SessionConfig, SessionEvent, SessionStatus};
pub use simulator::SimulatedTransport;
pub use transport::{AdapterState, Tag, TagChannel, TagSink, Transport};
