//! In-memory transport standing in for the NFC stack and native driver.
//!
//! Used by the tests and by the server when no reader hardware is attached.
//! Tags are presented and removed explicitly. Several tags may be in the
//! field at once; removing them drops the transport's handles, so weak
//! references held elsewhere stop resolving.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use crate::{
    decoder::{SensorReading, HEALTH_PAYLOAD_LEN},
    error::{ChannelError, TransportError},
    record::{self, NdefRecord},
    transport::{AdapterState, Tag, TagChannel, TagSink, Transport},
};

struct SimState {
    adapter: AdapterState,
    fail_connect: bool,
    reader_mode_available: bool,
    calibration_ok: bool,
    fail_io: bool,
    io_delay: Option<Duration>,
    connected: bool,
    temp_offset: f32,
    sink: Option<TagSink>,
    poll_interval: Option<Duration>,
    field: HashMap<Vec<u8>, Arc<Tag>>,
    last_seen: Option<Vec<u8>>,
    contents: HashMap<Vec<u8>, Vec<NdefRecord>>,
}

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    writes: AtomicUsize,
    opened: AtomicUsize,
    open_now: AtomicUsize,
    open_peak: AtomicUsize,
}

struct Shared {
    state: Mutex<SimState>,
    counters: Counters,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct SimulatedTransport {
    shared: Arc<Shared>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SimState {
                    adapter: AdapterState::Enabled,
                    fail_connect: false,
                    reader_mode_available: true,
                    calibration_ok: true,
                    fail_io: false,
                    io_delay: None,
                    connected: false,
                    temp_offset: 0.0,
                    sink: None,
                    poll_interval: None,
                    field: HashMap::new(),
                    last_seen: None,
                    contents: HashMap::new(),
                }),
                counters: Counters::default(),
            }),
        }
    }

    // Behaviour knobs //////////////////////////////////////////////

    pub fn set_adapter_state(&self, adapter: AdapterState) {
        self.shared.lock().adapter = adapter;
    }

    pub fn set_connect_failure(&self, fail: bool) {
        self.shared.lock().fail_connect = fail;
    }

    pub fn set_reader_mode_available(&self, available: bool) {
        self.shared.lock().reader_mode_available = available;
    }

    pub fn set_calibration_result(&self, ok: bool) {
        self.shared.lock().calibration_ok = ok;
    }

    pub fn set_io_failure(&self, fail: bool) {
        self.shared.lock().fail_io = fail;
    }

    /// Makes opening a channel stall for `delay`, like a tag at the edge of the field.
    pub fn set_io_delay(&self, delay: Option<Duration>) {
        self.shared.lock().io_delay = delay;
    }

    // Tags /////////////////////////////////////////////////////////

    /// Puts a tag with the given NDEF records in the field and notifies the
    /// reader loop if one is running. A tag with the same uid is replaced.
    pub fn present_tag(&self, uid: impl Into<Vec<u8>>, records: Vec<NdefRecord>) -> Arc<Tag> {
        let tag = Arc::new(Tag::new(uid));
        let sink = {
            let mut state = self.shared.lock();
            state.contents.insert(tag.uid().to_vec(), records);
            state.field.insert(tag.uid().to_vec(), tag.clone());
            state.last_seen = Some(tag.uid().to_vec());
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink.deliver(tag.clone());
        }
        tag
    }

    pub fn present_reading(&self, uid: impl Into<Vec<u8>>, reading: &SensorReading) -> Arc<Tag> {
        self.present_tag(uid, vec![NdefRecord::health(reading.to_payload().to_vec())])
    }

    /// Takes every tag out of the field. Returns false if the field was empty.
    pub fn remove_tag(&self) -> bool {
        let mut state = self.shared.lock();
        let any = !state.field.is_empty();
        state.field.clear();
        any
    }

    /// Takes one tag out of the field, leaving the others readable.
    pub fn remove_tag_uid(&self, uid: &[u8]) -> bool {
        self.shared.lock().field.remove(uid).is_some()
    }

    pub fn tag_contents(&self, uid: &[u8]) -> Option<Vec<NdefRecord>> {
        self.shared.lock().contents.get(uid).cloned()
    }

    // Observations /////////////////////////////////////////////////

    pub fn connect_calls(&self) -> usize {
        self.shared.counters.connects.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.shared.counters.writes.load(Ordering::SeqCst)
    }

    pub fn channels_opened(&self) -> usize {
        self.shared.counters.opened.load(Ordering::SeqCst)
    }

    /// Channels opened and not yet closed.
    pub fn open_channels(&self) -> usize {
        self.shared.counters.open_now.load(Ordering::SeqCst)
    }

    /// Highest number of channels that were open at the same time.
    pub fn peak_open_channels(&self) -> usize {
        self.shared.counters.open_peak.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    pub fn presence_detection_active(&self) -> bool {
        self.shared.lock().sink.is_some()
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.shared.lock().poll_interval
    }

    pub fn temp_offset(&self) -> f32 {
        self.shared.lock().temp_offset
    }
}

impl Transport for SimulatedTransport {
    type Channel = SimulatedChannel;

    fn adapter_state(&self) -> AdapterState {
        self.shared.lock().adapter
    }

    fn connect(&self, device_label: &str) -> Result<(), TransportError> {
        self.shared.counters.connects.fetch_add(1, Ordering::SeqCst);
        let mut state = self.shared.lock();
        if state.fail_connect {
            return Err(TransportError::Native(format!("cannot open '{device_label}'")));
        }
        state.connected = true;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.shared.lock().connected = false;
        Ok(())
    }

    fn read_data(&self) -> Result<Vec<u8>, TransportError> {
        let state = self.shared.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        let payload = state
            .last_seen
            .as_ref()
            .and_then(|uid| state.contents.get(uid))
            .and_then(|records| record::find_health_record(records))
            .map(|health| health.payload.clone());
        Ok(payload.unwrap_or_else(|| vec![0; HEALTH_PAYLOAD_LEN]))
    }

    fn update_config(&self, temp_offset: f32) -> Result<(), TransportError> {
        self.shared.lock().temp_offset = temp_offset;
        Ok(())
    }

    fn calibrate(&self) -> Result<bool, TransportError> {
        let state = self.shared.lock();
        Ok(state.connected && state.calibration_ok)
    }

    fn test_connection(&self) -> Result<bool, TransportError> {
        let state = self.shared.lock();
        Ok(state.connected && state.last_seen.is_some())
    }

    fn firmware_version(&self) -> Result<String, TransportError> {
        let state = self.shared.lock();
        if !state.connected {
            return Ok("NFC Not Connected".into());
        }
        Ok(match &state.last_seen {
            None => "NFC Ready - No Tag Detected".into(),
            Some(uid) => {
                let short: String = uid.iter().take(4).map(|b| format!("{b:02X}")).collect();
                format!("NFC Tag: {short}")
            }
        })
    }

    fn enable_presence_detection(&self, sink: TagSink, poll_interval: Duration) -> bool {
        let mut state = self.shared.lock();
        if !state.reader_mode_available {
            return false;
        }
        state.sink = Some(sink);
        state.poll_interval = Some(poll_interval);
        true
    }

    fn disable_presence_detection(&self) {
        let mut state = self.shared.lock();
        state.sink = None;
        state.poll_interval = None;
    }

    fn open_channel(&self, tag: &Tag) -> Result<SimulatedChannel, ChannelError> {
        let delay = self.shared.lock().io_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        ensure_present(&self.shared.lock(), tag.uid())?;
        let counters = &self.shared.counters;
        counters.opened.fetch_add(1, Ordering::SeqCst);
        let now = counters.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        counters.open_peak.fetch_max(now, Ordering::SeqCst);
        Ok(SimulatedChannel {
            shared: self.shared.clone(),
            uid: tag.uid().to_vec(),
            open: true,
        })
    }
}

fn ensure_present(state: &SimState, uid: &[u8]) -> Result<(), ChannelError> {
    if state.field.contains_key(uid) {
        Ok(())
    } else {
        Err(ChannelError::TagLost)
    }
}

pub struct SimulatedChannel {
    shared: Arc<Shared>,
    uid: Vec<u8>,
    open: bool,
}

impl SimulatedChannel {
    fn exchange(&self) -> Result<MutexGuard<'_, SimState>, ChannelError> {
        if !self.open {
            return Err(ChannelError::Io("channel closed".into()));
        }
        let state = self.shared.lock();
        if state.fail_io {
            return Err(ChannelError::Io("tag was lost".into()));
        }
        ensure_present(&state, &self.uid)?;
        Ok(state)
    }
}

impl TagChannel for SimulatedChannel {
    fn read_message(&mut self) -> Result<Vec<NdefRecord>, ChannelError> {
        let state = self.exchange()?;
        Ok(state.contents.get(&self.uid).cloned().unwrap_or_default())
    }

    fn write_message(&mut self, records: &[NdefRecord]) -> Result<(), ChannelError> {
        self.shared.counters.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.exchange()?;
        state.contents.insert(self.uid.clone(), records.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        if self.open {
            self.open = false;
            self.shared.counters.open_now.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
