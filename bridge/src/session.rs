//! Connection state machine around one health patch reader.
//!
//! All mutable session fields live in one [`SessionState`] behind a single
//! async mutex. Tag discoveries arrive through a [`TagSink`] queue and are
//! processed one at a time by a worker task. Tag channel work (reads and
//! calibration writes) is serialized by a separate gate, so the state lock
//! is never held across a tag exchange.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    decoder::{self, SensorReading},
    error::{BridgeError, ChannelError, TransportError},
    record::{self, NdefRecord},
    transport::{AdapterState, ScopedChannel, Tag, TagSink, Transport},
};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected,
    ConnectedAndReading,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self != ConnectionState::Disconnected
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Label passed to the native driver on connect.
    pub device_label: String,
    /// Reader presence check delay.
    pub presence_check_ms: u64,
    /// Upper bound for one tag channel exchange.
    pub tag_timeout_ms: u64,
    /// Discovered tags waiting to be processed before new ones are dropped.
    pub discovery_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_label: "NFC Mode".into(),
            presence_check_ms: 250,
            tag_timeout_ms: 3000,
            discovery_queue: 8,
        }
    }
}

impl SessionConfig {
    pub fn presence_check_interval(&self) -> Duration {
        Duration::from_millis(self.presence_check_ms)
    }

    pub fn tag_io_timeout(&self) -> Duration {
        Duration::from_millis(self.tag_timeout_ms)
    }
}

/// Notifications published to subscribers of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Connected { reading: bool },
    Disconnected,
    TagDiscovered { uid: String },
    Reading { uid: String, reading: SensorReading },
    TagReadFailed { uid: String, error: String },
    CalibrationWritten { uid: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub reading: bool,
    /// Uid of the current tag while it is still in range
    pub current_tag: Option<String>,
    pub last_reading: Option<SensorReading>,
    pub config: SessionConfig,
    pub communication_mode: &'static str,
}

struct SessionState {
    connection: ConnectionState,
    config: SessionConfig,
    current_tag: Option<Weak<Tag>>,
    last_reading: Option<SensorReading>,
    discovery_task: Option<JoinHandle<()>>,
}

pub struct Session<T: Transport> {
    transport: Arc<T>,
    state: Mutex<SessionState>,
    /// Serializes tag channel work, one tag exchange at a time.
    tag_gate: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: Arc<T>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            transport,
            state: Mutex::new(SessionState {
                connection: ConnectionState::Disconnected,
                config: SessionConfig::default(),
                current_tag: None,
                last_reading: None,
                discovery_task: None,
            }),
            tag_gate: Mutex::new(()),
            events,
        })
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.lock().await.connection
    }

    pub async fn last_reading(&self) -> Option<SensorReading> {
        self.state.lock().await.last_reading
    }

    /// The most recently discovered tag, if the transport still holds it.
    pub async fn current_tag(&self) -> Option<Arc<Tag>> {
        self.state
            .lock()
            .await
            .current_tag
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub async fn status(&self) -> SessionStatus {
        let state = self.state.lock().await;
        SessionStatus {
            state: state.connection,
            connected: state.connection.is_connected(),
            reading: state.connection == ConnectionState::ConnectedAndReading,
            current_tag: state
                .current_tag
                .as_ref()
                .and_then(Weak::upgrade)
                .map(|tag| tag.uid_hex()),
            last_reading: state.last_reading,
            config: state.config.clone(),
            communication_mode: "NFC",
        }
    }

    pub async fn connect(self: &Arc<Self>, config: SessionConfig) -> Result<ConnectionState, BridgeError> {
        let mut state = self.state.lock().await;
        if state.connection.is_connected() {
            warn!("Connect requested while already connected");
            return Err(BridgeError::AlreadyConnected);
        }

        match self.call(|t| t.adapter_state()).await? {
            AdapterState::Unsupported => {
                error!("NFC not supported on this device");
                return Err(BridgeError::NotSupported);
            }
            AdapterState::Disabled => {
                error!("NFC is not enabled");
                return Err(BridgeError::NotEnabled);
            }
            AdapterState::Enabled => {}
        }

        let label = config.device_label.clone();
        self.call(move |t| t.connect(&label))
            .await?
            .map_err(BridgeError::transport("connect"))
            .inspect_err(|e| error!("Error connecting to NFC: {}", e))?;

        let (sink, rx) = TagSink::channel(config.discovery_queue);
        let interval = config.presence_check_interval();
        let reading = match self
            .call(move |t| t.enable_presence_detection(sink, interval))
            .await
        {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Could not enable NFC reader mode: {}", e);
                false
            }
        };

        let connection = if reading {
            state.discovery_task = Some(self.spawn_discovery(rx));
            info!("NFC reader mode enabled");
            ConnectionState::ConnectedAndReading
        } else {
            ConnectionState::Connected
        };
        state.connection = connection;
        info!("NFC connected as '{}'", config.device_label);
        state.config = config;
        self.publish(SessionEvent::Connected { reading });
        Ok(state.connection)
    }

    /// Tears the session down. Calling this while disconnected does nothing.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if !state.connection.is_connected() {
            debug!("Disconnect requested while not connected");
            return;
        }

        if state.connection == ConnectionState::ConnectedAndReading {
            if let Err(e) = self.call(|t| t.disable_presence_detection()).await {
                warn!("Error disabling NFC reader mode: {}", e);
            } else {
                info!("NFC reader mode disabled");
            }
        }
        if let Some(task) = state.discovery_task.take() {
            task.abort();
        }

        match self.call(|t| t.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Error disconnecting NFC transport: {}", e),
            Err(e) => warn!("Error disconnecting NFC transport: {}", e),
        }

        state.connection = ConnectionState::Disconnected;
        info!("NFC disconnected");
        self.publish(SessionEvent::Disconnected);
    }

    pub async fn read_raw_data(&self) -> Result<Vec<u8>, BridgeError> {
        self.with_connection("read", |t| t.read_data()).await
    }

    pub async fn calibrate(&self) -> Result<(), BridgeError> {
        if self.with_connection("calibrate", |t| t.calibrate()).await? {
            info!("Sensor calibration completed");
            Ok(())
        } else {
            Err(BridgeError::TransportFailure {
                operation: "calibrate",
                source: TransportError::Native("calibration rejected".into()),
            })
        }
    }

    pub async fn test_connection(&self) -> Result<bool, BridgeError> {
        self.with_connection("test", |t| t.test_connection()).await
    }

    pub async fn firmware_version(&self) -> Result<String, BridgeError> {
        self.with_connection("firmware", |t| t.firmware_version()).await
    }

    /// Applies driver settings. `params` must be an object with a numeric `temp_offset`.
    pub async fn update_config(&self, params: &Value) -> Result<(), BridgeError> {
        let temp_offset = params
            .get("temp_offset")
            .and_then(Value::as_f64)
            .ok_or_else(|| BridgeError::InvalidConfig("temp_offset must be a number".into()))?
            as f32;
        if !temp_offset.is_finite() {
            return Err(BridgeError::InvalidConfig("temp_offset is out of range".into()));
        }

        self.with_connection("update_config", move |t| t.update_config(temp_offset))
            .await
            .inspect_err(|e| error!("Error updating config: {}", e))?;
        info!("Temperature offset set to {:.2}", temp_offset);
        Ok(())
    }

    /// Processes one discovered tag: records it as current and decodes its
    /// first health record into the last reading.
    ///
    /// Returns `Ok(None)` when the tag carries no health record.
    pub async fn handle_tag(&self, tag: Arc<Tag>) -> Result<Option<SensorReading>, BridgeError> {
        let _gate = self.tag_gate.lock().await;
        let uid = tag.uid_hex();
        let timeout = {
            let mut state = self.state.lock().await;
            state.current_tag = Some(Arc::downgrade(&tag));
            state.config.tag_io_timeout()
        };
        info!("NFC tag discovered: {}", uid);
        self.publish(SessionEvent::TagDiscovered { uid: uid.clone() });

        match self.read_health(tag, timeout).await {
            Ok(Some(reading)) => {
                self.state.lock().await.last_reading = Some(reading);
                info!(
                    "Sensor Data - Temp: {:.1}°C, pH: {:.2}, Glucose: {:.0}",
                    reading.temperature_celsius, reading.ph, reading.glucose_mgdl
                );
                self.publish(SessionEvent::Reading { uid, reading });
                Ok(Some(reading))
            }
            Ok(None) => {
                debug!("Tag {} carries no health record", uid);
                Ok(None)
            }
            Err(e) => {
                warn!("Error reading NFC tag {}: {}", uid, e);
                self.publish(SessionEvent::TagReadFailed {
                    uid,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Replaces the current tag's NDEF message with one calibration record.
    ///
    /// A write that hits the tag timeout before it is issued is abandoned,
    /// so `TagTimeout` leaves the tag untouched.
    pub async fn write_calibration_to_tag(&self, payload: &[u8]) -> Result<(), BridgeError> {
        let _gate = self.tag_gate.lock().await;
        let (tag, timeout) = {
            let state = self.state.lock().await;
            let Some(current) = state.current_tag.as_ref() else {
                error!("No tag available for writing");
                return Err(BridgeError::NoTagPresent);
            };
            let Some(tag) = current.upgrade() else {
                warn!("Current tag has left the reader field");
                return Err(BridgeError::TagLost);
            };
            (tag, state.config.tag_io_timeout())
        };
        let uid = tag.uid_hex();
        let records = vec![NdefRecord::calibration(payload.to_vec())];

        let result = self
            .with_channel(tag, timeout, move |channel| channel.write_message(&records))
            .await;

        match result {
            Ok(()) => {
                info!("Calibration data written to tag {}", uid);
                self.publish(SessionEvent::CalibrationWritten { uid });
                Ok(())
            }
            Err(e) => {
                warn!("Error writing to tag {}: {}", uid, e);
                Err(e)
            }
        }
    }

    async fn read_health(&self, tag: Arc<Tag>, timeout: Duration) -> Result<Option<SensorReading>, BridgeError> {
        let records = self
            .with_channel(tag, timeout, |channel| channel.read_message())
            .await?;
        match record::find_health_record(&records) {
            Some(health) => Ok(Some(decoder::decode(&health.payload)?)),
            None => Ok(None),
        }
    }

    fn spawn_discovery(self: &Arc<Self>, mut rx: mpsc::Receiver<Arc<Tag>>) -> JoinHandle<()> {
        let session = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(tag) = rx.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                // Failures are already logged and published by handle_tag
                let _ = session.handle_tag(tag).await;
            }
            debug!("Discovery worker stopped");
        })
    }

    /// Runs a transport call on the blocking pool.
    async fn call<R, F>(&self, f: F) -> Result<R, BridgeError>
    where
        F: FnOnce(&T) -> R + Send + 'static,
        R: Send + 'static,
    {
        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || f(&transport))
            .await
            .map_err(|e| BridgeError::Worker(e.to_string()))
    }

    /// Single pass-through call that requires a live connection. The state
    /// lock is held for the duration so a disconnect cannot interleave.
    async fn with_connection<R, F>(&self, operation: &'static str, f: F) -> Result<R, BridgeError>
    where
        F: FnOnce(&T) -> Result<R, TransportError> + Send + 'static,
        R: Send + 'static,
    {
        let state = self.state.lock().await;
        if !state.connection.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        let result = self.call(f).await?.map_err(BridgeError::transport(operation));
        drop(state);
        result
    }

    /// Opens a scoped channel to `tag` on the blocking pool and runs `f` on it.
    /// The channel is closed when `f` returns, even if the timeout fires first.
    ///
    /// If the timeout fires while the channel is still being opened, `f` is
    /// never run. An operation already handed to the tag cannot be recalled.
    async fn with_channel<R, F>(&self, tag: Arc<Tag>, timeout: Duration, f: F) -> Result<R, BridgeError>
    where
        F: FnOnce(&mut ScopedChannel<T::Channel>) -> Result<R, ChannelError> + Send + 'static,
        R: Send + 'static,
    {
        let transport = self.transport.clone();
        let abandoned = Arc::new(AtomicBool::new(false));
        let io = tokio::task::spawn_blocking({
            let abandoned = abandoned.clone();
            move || {
                let mut channel = ScopedChannel::open(&*transport, &tag)?;
                if abandoned.load(Ordering::SeqCst) {
                    debug!("Dropping tag exchange for {} after timeout", tag.uid_hex());
                    return Err(ChannelError::Io("exchange abandoned after timeout".into()));
                }
                f(&mut channel)
            }
        });

        match tokio::time::timeout(timeout, io).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(ChannelError::TagLost))) => Err(BridgeError::TagLost),
            Ok(Ok(Err(e))) => Err(BridgeError::ChannelIo(e)),
            Ok(Err(e)) => Err(BridgeError::Worker(e.to_string())),
            Err(_) => {
                abandoned.store(true, Ordering::SeqCst);
                Err(BridgeError::TagTimeout)
            }
        }
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if let Some(task) = self.state.get_mut().discovery_task.take() {
            task.abort();
        }
    }
}
