//! Boundary to the platform NFC stack and the native sensor driver.
//!
//! Everything here is synchronous and may block; the session moves these
//! calls onto the blocking pool.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{
    error::{ChannelError, TransportError},
    record::NdefRecord,
};

/// A physical tag currently or previously in the reader field.
///
/// The transport owns tags; the session only holds weak references.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Tag {
    uid: Vec<u8>,
}

impl Tag {
    pub fn new(uid: impl Into<Vec<u8>>) -> Self {
        Tag { uid: uid.into() }
    }

    pub fn uid(&self) -> &[u8] {
        &self.uid
    }

    pub fn uid_hex(&self) -> String {
        self.uid.iter().map(|b| format!("{b:02X}")).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Unsupported,
    Disabled,
    Enabled,
}

/// Sending half of the discovery queue handed to the transport's reader loop.
#[derive(Debug, Clone)]
pub struct TagSink(mpsc::Sender<Arc<Tag>>);

impl TagSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<Tag>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (TagSink(tx), rx)
    }

    /// Queue a discovered tag. Never blocks; returns false if the tag was dropped.
    pub fn deliver(&self, tag: Arc<Tag>) -> bool {
        match self.0.try_send(tag) {
            Ok(()) => true,
            Err(TrySendError::Full(tag)) => {
                tracing::warn!("Discovery queue full, dropping tag {}", tag.uid_hex());
                false
            }
            Err(TrySendError::Closed(tag)) => {
                tracing::debug!("Discovery stopped, ignoring tag {}", tag.uid_hex());
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// An open NDEF connection to one tag.
pub trait TagChannel: Send {
    /// Records of the tag's NDEF message in order; empty when the tag holds none.
    fn read_message(&mut self) -> Result<Vec<NdefRecord>, ChannelError>;
    fn write_message(&mut self, records: &[NdefRecord]) -> Result<(), ChannelError>;
    fn close(&mut self) -> Result<(), ChannelError>;
}

pub trait Transport: Send + Sync + 'static {
    type Channel: TagChannel;

    fn adapter_state(&self) -> AdapterState;

    fn is_adapter_present_and_enabled(&self) -> bool {
        self.adapter_state() == AdapterState::Enabled
    }

    fn connect(&self, device_label: &str) -> Result<(), TransportError>;
    fn disconnect(&self) -> Result<(), TransportError>;
    fn read_data(&self) -> Result<Vec<u8>, TransportError>;
    fn update_config(&self, temp_offset: f32) -> Result<(), TransportError>;
    fn calibrate(&self) -> Result<bool, TransportError>;
    fn test_connection(&self) -> Result<bool, TransportError>;
    fn firmware_version(&self) -> Result<String, TransportError>;

    /// Start the reader loop. Returns false when no reader loop is available.
    fn enable_presence_detection(&self, sink: TagSink, poll_interval: Duration) -> bool;
    fn disable_presence_detection(&self);

    fn open_channel(&self, tag: &Tag) -> Result<Self::Channel, ChannelError>;
}

/// Open channel that is closed when dropped, whatever path the caller takes.
pub struct ScopedChannel<C: TagChannel> {
    inner: C,
    tag_uid: String,
}

impl<C: TagChannel> ScopedChannel<C> {
    pub fn open<T>(transport: &T, tag: &Tag) -> Result<Self, ChannelError>
    where
        T: Transport<Channel = C>,
    {
        let inner = transport.open_channel(tag)?;
        Ok(ScopedChannel {
            inner,
            tag_uid: tag.uid_hex(),
        })
    }

    pub fn read_message(&mut self) -> Result<Vec<NdefRecord>, ChannelError> {
        self.inner.read_message()
    }

    pub fn write_message(&mut self, records: &[NdefRecord]) -> Result<(), ChannelError> {
        self.inner.write_message(records)
    }
}

impl<C: TagChannel> Drop for ScopedChannel<C> {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            tracing::warn!("Error closing tag {}: {}", self.tag_uid, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_renders_as_upper_hex() {
        assert_eq!(Tag::new(vec![0x04, 0xA1, 0x0F]).uid_hex(), "04A10F");
    }

    #[tokio::test]
    async fn sink_drops_when_full_or_closed() {
        let (sink, mut rx) = TagSink::channel(1);
        assert!(sink.deliver(Arc::new(Tag::new(vec![1]))));
        assert!(!sink.deliver(Arc::new(Tag::new(vec![2]))));
        assert_eq!(rx.recv().await.unwrap().uid(), &[1]);
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.deliver(Arc::new(Tag::new(vec![3]))));
    }
}
