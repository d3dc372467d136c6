use thiserror::Error;

/// Failure to turn a health record payload into a reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("health payload too short: {len} bytes, need at least 6")]
    TooShort { len: usize },
}

/// Failure reported by the transport for a driver-level call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("native driver failure: {0}")]
    Native(String),
}

/// Failure while talking to a tag through its NDEF channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("tag does not expose an NDEF channel")]
    NotNdef,
    #[error("tag is no longer in range")]
    TagLost,
    #[error("tag I/O failure: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("NFC not supported on this device")]
    NotSupported,
    #[error("NFC is not enabled")]
    NotEnabled,
    #[error("NFC not connected")]
    NotConnected,
    #[error("NFC already connected")]
    AlreadyConnected,
    #[error("no tag available for writing")]
    NoTagPresent,
    #[error("tag has left the reader field")]
    TagLost,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("transport {operation} failed: {source}")]
    TransportFailure {
        operation: &'static str,
        #[source]
        source: TransportError,
    },
    #[error(transparent)]
    ChannelIo(#[from] ChannelError),
    #[error("tag I/O timed out")]
    TagTimeout,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("transport worker failed: {0}")]
    Worker(String),
}

impl BridgeError {
    pub(crate) fn transport(operation: &'static str) -> impl FnOnce(TransportError) -> Self {
        move |source| BridgeError::TransportFailure { operation, source }
    }
}
