use super::*;
use crate::config::{DeviceIdentity, TopicSet};
use crate::mqtt::session::Online;
use crate::mqtt::{BrokerError, BrokerSession, ConnectPolicy, StatusAnnouncer};
use crate::network::NetworkUp;
use crate::sensor::{Reading, SensorError};
use crate::testing::{connection_lost, Call, RecordingClient, ScriptedSensor};
use std::time::Duration;
use tokio::time::Instant;

const TEMPERATURE: &str = "greenhouse/temperature";
const HUMIDITY: &str = "greenhouse/humidity";

fn topics() -> TopicSet {
    TopicSet {
        status: "greenhouse/status".to_string(),
        temperature: TEMPERATURE.to_string(),
        humidity: HUMIDITY.to_string(),
    }
}

async fn session(client: &RecordingClient) -> BrokerSession<Online> {
    let identity = DeviceIdentity {
        client_id: "sensor01".to_string(),
    };
    let announcer = StatusAnnouncer::new(&identity, "greenhouse/status").unwrap();
    let will = announcer.offline_will();
    let network = NetworkUp {
        polls: 1,
        elapsed: Duration::ZERO,
    };

    let session = BrokerSession::create(Box::new(client.clone()), announcer, ConnectPolicy::default())
        .arm_last_will(will)
        .connect(&network)
        .await
        .unwrap();
    client.clear();
    session
}

async fn telemetry_loop(
    sensor: ScriptedSensor,
    client: &RecordingClient,
) -> TelemetryLoop<ScriptedSensor> {
    TelemetryLoop::new(
        sensor,
        session(client).await,
        topics(),
        LoopSettings::default(),
        Watchdog::disabled(),
    )
}

fn payloads(client: &RecordingClient, topic: &str) -> Vec<String> {
    client
        .published_to(topic)
        .into_iter()
        .map(|m| String::from_utf8(m.payload).unwrap())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_publishes_reading_as_plain_text() {
    let client = RecordingClient::default();
    let sensor = ScriptedSensor::new(Reading::new(22.5, 47.0));
    let mut telemetry = telemetry_loop(sensor, &client).await;

    let report = telemetry.run_once().await;

    assert!(report.outcome.is_published());
    assert_eq!(report.reading, Some(Reading::new(22.5, 47.0)));
    assert_eq!(
        client.published(),
        vec![
            crate::mqtt::OutboundMessage::new(TEMPERATURE, "22.5", false),
            crate::mqtt::OutboundMessage::new(HUMIDITY, "47.0", false),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_survives_consecutive_sensor_faults() {
    const FAULTS: usize = 3;
    let client = RecordingClient::default();
    let sensor = ScriptedSensor::new(Reading::new(20.0, 50.0))
        .then_fail(FAULTS, || SensorError::Checksum {
            expected: 0xB8,
            actual: 0xB9,
        })
        .then_read(Reading::new(22.5, 47.0));
    let mut telemetry = telemetry_loop(sensor, &client).await;

    let started = Instant::now();
    for _ in 0..FAULTS {
        let report = telemetry.run_once().await;
        assert!(matches!(report.outcome, CycleOutcome::SensorFault(_)));
        assert!(client.published().is_empty());
    }
    let report = telemetry.run_once().await;

    assert!(report.outcome.is_published());
    assert_eq!(payloads(&client, TEMPERATURE), vec!["22.5"]);
    assert_eq!(payloads(&client, HUMIDITY), vec!["47.0"]);
    // one full sleep per iteration, faulty or not
    assert_eq!(started.elapsed(), Duration::from_secs(10 * (FAULTS as u64 + 1)));
    assert_eq!(telemetry.stats().sensor_faults, FAULTS as u64);
    assert_eq!(telemetry.stats().published, 1);
}

#[tokio::test(start_paused = true)]
async fn test_survives_publish_fault() {
    let client = RecordingClient::default();
    let sensor = ScriptedSensor::new(Reading::new(22.5, 47.0));
    let mut telemetry = telemetry_loop(sensor, &client).await;

    client.fail_next_publish(BrokerError::Timeout(Duration::from_secs(10)));
    let first = telemetry.run_once().await;
    assert!(matches!(
        first.outcome,
        CycleOutcome::PublishFault {
            temperature: Some(_),
            ..
        }
    ));

    let second = telemetry.run_once().await;
    assert!(second.outcome.is_published());
    assert_eq!(telemetry.stats().publish_faults, 1);
    assert_eq!(telemetry.stats().published, 1);
    assert!(telemetry.stats().last_publish.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_humidity_still_attempted_after_temperature_fault() {
    let client = RecordingClient::default();
    let sensor = ScriptedSensor::new(Reading::new(22.5, 47.0));
    let mut telemetry = telemetry_loop(sensor, &client).await;

    // A refused request does not take the connection down.
    client.fail_next_publish(BrokerError::Encode(
        serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
    ));
    let report = telemetry.run_once().await;

    match report.outcome {
        CycleOutcome::PublishFault {
            temperature,
            humidity,
        } => {
            assert!(temperature.is_some());
            assert!(humidity.is_none());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(client.published().len(), 2);
    assert_eq!(payloads(&client, HUMIDITY), vec!["47.0"]);
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_connection_loss() {
    let client = RecordingClient::default();
    let sensor = ScriptedSensor::new(Reading::new(22.5, 47.0));
    let mut telemetry = telemetry_loop(sensor, &client).await;

    client.fail_next_publish(connection_lost());
    let first = telemetry.run_once().await;
    match first.outcome {
        CycleOutcome::PublishFault {
            temperature,
            humidity,
        } => {
            assert!(matches!(temperature, Some(BrokerError::Connection(_))));
            assert!(matches!(humidity, Some(BrokerError::NotConnected)));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!telemetry.session().is_connected());
    client.clear();

    let second = telemetry.run_once().await;

    assert!(second.outcome.is_published());
    assert!(telemetry.session().is_connected());
    assert_eq!(telemetry.session().reconnects(), 1);
    let calls = client.calls();
    assert_eq!(calls[0], Call::Connect);
    assert_eq!(
        calls[1],
        Call::Publish(crate::mqtt::OutboundMessage::retained(
            "greenhouse/status",
            r#"{"client_id":"sensor01","status":"online"}"#
        ))
    );
    assert_eq!(calls.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_session_down_skips_publish() {
    let client = RecordingClient::default();
    let sensor = ScriptedSensor::new(Reading::new(22.5, 47.0));
    let mut telemetry = telemetry_loop(sensor, &client).await;

    client.fail_next_publish(connection_lost());
    telemetry.run_once().await;
    client.fail_next_connects(1);
    client.clear();

    let report = telemetry.run_once().await;

    assert!(matches!(report.outcome, CycleOutcome::SessionDown(_)));
    assert_eq!(client.calls(), vec![Call::Connect]);
}

#[tokio::test(start_paused = true)]
async fn test_publish_cadence_matches_interval() {
    let client = RecordingClient::default();
    let sensor = ScriptedSensor::new(Reading::new(21.0, 40.0));
    let mut telemetry = telemetry_loop(sensor, &client).await;

    for _ in 0..5 {
        telemetry.run_once().await;
    }

    let times = client.publish_times(TEMPERATURE);
    assert_eq!(times.len(), 5);
    for pair in times.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(10));
    }
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_fed_every_iteration() {
    let device = tempfile::NamedTempFile::new().unwrap();
    let client = RecordingClient::default();
    let sensor = ScriptedSensor::new(Reading::new(21.0, 40.0))
        .then_fail(1, || SensorError::NoResponse);
    let mut telemetry = TelemetryLoop::new(
        sensor,
        session(&client).await,
        topics(),
        LoopSettings::default(),
        Watchdog::open(device.path()).unwrap(),
    );

    telemetry.run_once().await;
    telemetry.run_once().await;

    assert_eq!(std::fs::read(device.path()).unwrap().len(), 2);
}

#[test]
fn test_settings_from_config() {
    let config = crate::config::TelemetryConfig {
        interval_secs: 15,
        stats_every: 0,
    };

    let settings = LoopSettings::from(&config);
    assert_eq!(settings.interval, Duration::from_secs(15));
    assert_eq!(settings.stats_every, 0);
}
