use std::{sync::Arc, time::Duration};

use healthpatch_bridge::{
    AdapterState, BridgeError, ChannelError, ConnectionState, DecodeError, NdefRecord,
    SensorReading, Session, SessionConfig, SessionEvent, SimulatedTransport,
};
use serde_json::json;
use tokio::{sync::broadcast, time::timeout};

fn setup() -> (Arc<SimulatedTransport>, Arc<Session<SimulatedTransport>>) {
    let sim = Arc::new(SimulatedTransport::new());
    let session = Session::new(sim.clone());
    (sim, session)
}

fn reading(temperature_celsius: f32, ph: f32, glucose_mgdl: f32) -> SensorReading {
    SensorReading {
        temperature_celsius,
        ph,
        glucose_mgdl,
    }
}

/// Waits for the outcome of the next processed tag.
async fn next_outcome(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await.expect("event stream closed") {
                event @ (SessionEvent::Reading { .. } | SessionEvent::TagReadFailed { .. }) => {
                    return event;
                }
                _ => {}
            }
        }
    })
    .await
    .expect("no tag processed in time")
}

#[tokio::test]
async fn connect_enables_reader_mode() {
    let (sim, session) = setup();

    let state = session.connect(SessionConfig::default()).await.unwrap();

    assert_eq!(state, ConnectionState::ConnectedAndReading);
    assert_eq!(session.state().await, ConnectionState::ConnectedAndReading);
    assert!(sim.is_connected());
    assert!(sim.presence_detection_active());
    assert_eq!(sim.poll_interval(), Some(Duration::from_millis(250)));
    assert_eq!(sim.connect_calls(), 1);
}

#[tokio::test]
async fn connect_without_reader_loop_stays_connected() {
    let (sim, session) = setup();
    sim.set_reader_mode_available(false);

    let state = session.connect(SessionConfig::default()).await.unwrap();

    assert_eq!(state, ConnectionState::Connected);
    assert!(!sim.presence_detection_active());
}

#[tokio::test]
async fn second_connect_is_rejected_without_transport_call() {
    let (sim, session) = setup();
    session.connect(SessionConfig::default()).await.unwrap();

    let err = session.connect(SessionConfig::default()).await.unwrap_err();

    assert_eq!(err, BridgeError::AlreadyConnected);
    assert_eq!(sim.connect_calls(), 1);
    assert_eq!(session.state().await, ConnectionState::ConnectedAndReading);
}

#[tokio::test]
async fn adapter_problems_are_reported_separately() {
    let (sim, session) = setup();

    sim.set_adapter_state(AdapterState::Unsupported);
    assert_eq!(
        session.connect(SessionConfig::default()).await.unwrap_err(),
        BridgeError::NotSupported
    );

    sim.set_adapter_state(AdapterState::Disabled);
    assert_eq!(
        session.connect(SessionConfig::default()).await.unwrap_err(),
        BridgeError::NotEnabled
    );

    assert_eq!(sim.connect_calls(), 0);
    assert_eq!(session.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn failed_transport_connect_leaves_no_state() {
    let (sim, session) = setup();
    sim.set_connect_failure(true);

    let err = session.connect(SessionConfig::default()).await.unwrap_err();

    assert!(matches!(
        err,
        BridgeError::TransportFailure { operation: "connect", .. }
    ));
    assert_eq!(session.state().await, ConnectionState::Disconnected);
    assert!(!sim.presence_detection_active());

    sim.set_connect_failure(false);
    assert!(session.connect(SessionConfig::default()).await.is_ok());
}

#[tokio::test]
async fn disconnect_while_disconnected_is_noop() {
    let (sim, session) = setup();

    session.disconnect().await;

    assert_eq!(session.state().await, ConnectionState::Disconnected);
    assert_eq!(sim.connect_calls(), 0);
}

#[tokio::test]
async fn disconnect_stops_reader_then_transport() {
    let (sim, session) = setup();
    session.connect(SessionConfig::default()).await.unwrap();

    session.disconnect().await;

    assert_eq!(session.state().await, ConnectionState::Disconnected);
    assert!(!sim.presence_detection_active());
    assert!(!sim.is_connected());

    // Tags arriving after teardown are not processed
    sim.present_reading(vec![1], &reading(30.0, 7.0, 100.0));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.last_reading().await, None);

    session.connect(SessionConfig::default()).await.unwrap();
    assert_eq!(sim.connect_calls(), 2);
}

#[tokio::test]
async fn device_operations_require_connection() {
    let (_sim, session) = setup();

    assert_eq!(session.read_raw_data().await.unwrap_err(), BridgeError::NotConnected);
    assert_eq!(session.calibrate().await.unwrap_err(), BridgeError::NotConnected);
    assert_eq!(session.test_connection().await.unwrap_err(), BridgeError::NotConnected);
    assert_eq!(session.firmware_version().await.unwrap_err(), BridgeError::NotConnected);
    assert_eq!(
        session.update_config(&json!({"temp_offset": 0.5})).await.unwrap_err(),
        BridgeError::NotConnected
    );
}

#[tokio::test]
async fn device_operations_pass_through() {
    let (sim, session) = setup();
    session.connect(SessionConfig::default()).await.unwrap();

    assert_eq!(session.firmware_version().await.unwrap(), "NFC Ready - No Tag Detected");
    assert!(!session.test_connection().await.unwrap());
    assert_eq!(session.read_raw_data().await.unwrap(), vec![0; 6]);
    session.calibrate().await.unwrap();

    session.update_config(&json!({"temp_offset": 1.5})).await.unwrap();
    assert_eq!(sim.temp_offset(), 1.5);

    sim.set_calibration_result(false);
    assert!(matches!(
        session.calibrate().await.unwrap_err(),
        BridgeError::TransportFailure { operation: "calibrate", .. }
    ));
}

#[tokio::test]
async fn update_config_requires_numeric_offset() {
    let (sim, session) = setup();
    session.connect(SessionConfig::default()).await.unwrap();

    for params in [
        json!({}),
        json!({"temp_offset": "warm"}),
        json!(3.0),
        json!({"temp_offset": 1e300}),
    ] {
        assert!(matches!(
            session.update_config(&params).await.unwrap_err(),
            BridgeError::InvalidConfig(_)
        ));
    }
    assert_eq!(sim.temp_offset(), 0.0);
}

#[tokio::test]
async fn discovered_health_tag_becomes_last_reading() {
    let (sim, session) = setup();
    let mut events = session.subscribe();
    session.connect(SessionConfig::default()).await.unwrap();

    sim.present_tag(
        vec![0x04, 0xA1],
        vec![NdefRecord::health(vec![0x01, 0x2C, 0x02, 0xBC, 0x00, 0x64])],
    );

    let expected = reading(30.0, 7.0, 100.0);
    assert_eq!(
        next_outcome(&mut events).await,
        SessionEvent::Reading {
            uid: "04A1".into(),
            reading: expected
        }
    );
    assert_eq!(session.last_reading().await, Some(expected));

    let status = session.status().await;
    assert_eq!(status.current_tag.as_deref(), Some("04A1"));
    assert_eq!(status.last_reading, Some(expected));
    assert_eq!(sim.open_channels(), 0);
    assert!(session.test_connection().await.unwrap());
}

#[tokio::test]
async fn tags_are_processed_in_arrival_order() {
    let (sim, session) = setup();
    let mut events = session.subscribe();
    session.connect(SessionConfig::default()).await.unwrap();
    // Slow channel setup keeps the first tag in flight while the second queues up
    sim.set_io_delay(Some(Duration::from_millis(50)));

    sim.present_reading(vec![1], &reading(36.5, 7.4, 90.0));
    sim.present_reading(vec![2], &reading(37.0, 7.2, 120.0));

    let SessionEvent::Reading { uid: first, .. } = next_outcome(&mut events).await else {
        panic!("first tag failed");
    };
    let SessionEvent::Reading { uid: second, .. } = next_outcome(&mut events).await else {
        panic!("second tag failed");
    };
    assert_eq!((first.as_str(), second.as_str()), ("01", "02"));
    assert_eq!(session.last_reading().await, Some(reading(37.0, 7.2, 120.0)));
    assert_eq!(sim.channels_opened(), 2);
    assert_eq!(sim.peak_open_channels(), 1);
}

#[tokio::test]
async fn non_health_records_leave_last_reading_alone() {
    let (sim, session) = setup();

    let tag = sim.present_tag(vec![9], vec![NdefRecord::well_known(b"X", vec![0x01, 0x2C, 0, 0, 0, 0])]);
    assert_eq!(session.handle_tag(tag).await.unwrap(), None);
    assert_eq!(session.last_reading().await, None);

    let first = reading(36.0, 7.0, 95.0);
    let tag = sim.present_reading(vec![9], &first);
    session.handle_tag(tag).await.unwrap();

    let tag = sim.present_tag(vec![9], vec![NdefRecord::well_known(b"X", vec![0xFF; 6])]);
    assert_eq!(session.handle_tag(tag).await.unwrap(), None);
    assert_eq!(session.last_reading().await, Some(first));
}

#[tokio::test]
async fn first_health_record_is_decoded() {
    let (sim, session) = setup();
    let tag = sim.present_tag(
        vec![3],
        vec![
            NdefRecord::well_known(b"U", vec![0x03]),
            NdefRecord::health(reading(20.0, 6.5, 80.0).to_payload().to_vec()),
            NdefRecord::health(reading(40.0, 8.0, 200.0).to_payload().to_vec()),
        ],
    );

    let decoded = session.handle_tag(tag).await.unwrap();

    assert_eq!(decoded, Some(reading(20.0, 6.5, 80.0)));
}

#[tokio::test]
async fn tag_io_failure_leaves_state_unchanged() {
    let (sim, session) = setup();
    sim.set_reader_mode_available(false);
    session.connect(SessionConfig::default()).await.unwrap();
    let good = reading(36.6, 7.1, 101.0);
    session.handle_tag(sim.present_reading(vec![5], &good)).await.unwrap();

    sim.set_io_failure(true);
    let err = session
        .handle_tag(sim.present_reading(vec![6], &reading(0.0, 0.0, 0.0)))
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::ChannelIo(ChannelError::Io(_))));
    assert_eq!(session.last_reading().await, Some(good));
    assert_eq!(session.state().await, ConnectionState::Connected);
    assert_eq!(sim.open_channels(), 0);
}

#[tokio::test]
async fn short_health_payload_is_reported() {
    let (sim, session) = setup();
    let tag = sim.present_tag(vec![4], vec![NdefRecord::health(vec![0x01, 0x2C, 0x02])]);

    let err = session.handle_tag(tag).await.unwrap_err();

    assert_eq!(err, BridgeError::Decode(DecodeError::TooShort { len: 3 }));
    assert_eq!(session.last_reading().await, None);
    assert_eq!(sim.open_channels(), 0);
}

#[tokio::test]
async fn calibration_write_needs_a_discovered_tag() {
    let (sim, session) = setup();

    let err = session.write_calibration_to_tag(&[1, 2, 3]).await.unwrap_err();

    assert_eq!(err, BridgeError::NoTagPresent);
    assert_eq!(sim.write_calls(), 0);
    assert_eq!(sim.channels_opened(), 0);
}

#[tokio::test]
async fn calibration_is_written_as_single_c_record() {
    let (sim, session) = setup();
    let tag = sim.present_reading(vec![0x0A], &reading(36.0, 7.0, 90.0));
    session.handle_tag(tag).await.unwrap();

    session.write_calibration_to_tag(&[0xCA, 0xFE]).await.unwrap();

    assert_eq!(
        sim.tag_contents(&[0x0A]).unwrap(),
        vec![NdefRecord::calibration(vec![0xCA, 0xFE])]
    );
    assert_eq!(sim.tag_contents(&[0x0A]).unwrap()[0].record_type, b"C".to_vec());
    assert_eq!(sim.write_calls(), 1);
    assert_eq!(sim.open_channels(), 0);
}

#[tokio::test]
async fn calibration_write_to_departed_tag_fails() {
    let (sim, session) = setup();
    let tag = sim.present_reading(vec![0x0B], &reading(36.0, 7.0, 90.0));
    session.handle_tag(tag).await.unwrap();
    sim.remove_tag();

    let err = session.write_calibration_to_tag(&[1]).await.unwrap_err();

    assert_eq!(err, BridgeError::TagLost);
    assert_eq!(sim.write_calls(), 0);
    assert_eq!(session.status().await.current_tag, None);
}

#[tokio::test]
async fn unresponsive_tag_times_out() {
    let (sim, session) = setup();
    sim.set_reader_mode_available(false);
    let config = SessionConfig {
        tag_timeout_ms: 50,
        ..SessionConfig::default()
    };
    session.connect(config).await.unwrap();
    sim.set_io_delay(Some(Duration::from_millis(300)));

    let err = session
        .handle_tag(sim.present_reading(vec![0x0C], &reading(36.0, 7.0, 90.0)))
        .await
        .unwrap_err();

    assert_eq!(err, BridgeError::TagTimeout);
    assert_eq!(session.last_reading().await, None);

    // The stalled exchange still releases its channel once it returns
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(sim.open_channels(), 0);
}

#[tokio::test]
async fn timed_out_calibration_write_leaves_tag_untouched() {
    let (sim, session) = setup();
    let original = reading(36.0, 7.0, 90.0);
    session.handle_tag(sim.present_reading(vec![0x0D], &original)).await.unwrap();
    session
        .connect(SessionConfig {
            tag_timeout_ms: 50,
            ..SessionConfig::default()
        })
        .await
        .unwrap();
    sim.set_io_delay(Some(Duration::from_millis(200)));

    let err = session.write_calibration_to_tag(&[0xCA]).await.unwrap_err();
    assert_eq!(err, BridgeError::TagTimeout);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        sim.tag_contents(&[0x0D]).unwrap(),
        vec![NdefRecord::health(original.to_payload().to_vec())]
    );
    assert_eq!(sim.write_calls(), 0);
    assert_eq!(sim.open_channels(), 0);
}

#[tokio::test]
async fn status_stays_available_during_calibration_write() {
    let (sim, session) = setup();
    session
        .handle_tag(sim.present_reading(vec![0x0E], &reading(36.0, 7.0, 90.0)))
        .await
        .unwrap();
    sim.set_io_delay(Some(Duration::from_millis(300)));

    let writer = {
        let session = session.clone();
        tokio::spawn(async move { session.write_calibration_to_tag(&[0x01]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = timeout(Duration::from_millis(100), session.status())
        .await
        .expect("status blocked by tag write");
    assert_eq!(status.current_tag.as_deref(), Some("0E"));

    writer.await.unwrap().unwrap();
    assert_eq!(sim.write_calls(), 1);
}
