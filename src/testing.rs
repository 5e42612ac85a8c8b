//! Scriptable stand-ins for the sensor, the wireless link and the broker client.

use crate::mqtt::{BrokerClient, BrokerError, OutboundMessage};
use crate::network::{NetworkError, WirelessLink};
use crate::sensor::{Reading, Sensor, SensorError};
use futures::future::{BoxFuture, FutureExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// A call made on [`RecordingClient`], in order
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    SetLastWill(OutboundMessage),
    Connect,
    Publish(OutboundMessage),
}

#[derive(Default)]
struct Recorder {
    calls: Vec<Call>,
    publish_times: Vec<(String, Instant)>,
    connect_failures: u32,
    publish_failures: VecDeque<BrokerError>,
}

/// Broker client that records every call. Clones share the same record, so a
/// test keeps one handle while the session owns another.
#[derive(Clone, Default)]
pub struct RecordingClient {
    inner: Arc<Mutex<Recorder>>,
}

impl RecordingClient {
    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Publish(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn published_to(&self, topic: &str) -> Vec<OutboundMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    /// Instants of successful publishes to `topic`
    pub fn publish_times(&self, topic: &str) -> Vec<Instant> {
        self.inner
            .lock()
            .unwrap()
            .publish_times
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.inner.lock().unwrap().connect_failures = count;
    }

    /// Queues a failure for the next publish
    pub fn fail_next_publish(&self, error: BrokerError) {
        self.inner.lock().unwrap().publish_failures.push_back(error);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.clear();
        inner.publish_times.clear();
    }
}

impl BrokerClient for RecordingClient {
    fn set_last_will(&mut self, will: OutboundMessage) {
        self.inner.lock().unwrap().calls.push(Call::SetLastWill(will));
    }

    fn connect(&mut self) -> BoxFuture<'_, Result<(), BrokerError>> {
        let result = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(Call::Connect);
            if inner.connect_failures > 0 {
                inner.connect_failures -= 1;
                Err(BrokerError::Timeout(Duration::from_secs(1)))
            } else {
                Ok(())
            }
        };
        async move { result }.boxed()
    }

    fn publish(&mut self, message: OutboundMessage) -> BoxFuture<'_, Result<(), BrokerError>> {
        let result = {
            let mut inner = self.inner.lock().unwrap();
            let topic = message.topic.clone();
            inner.calls.push(Call::Publish(message));
            match inner.publish_failures.pop_front() {
                Some(error) => Err(error),
                None => {
                    inner.publish_times.push((topic, Instant::now()));
                    Ok(())
                }
            }
        };
        async move { result }.boxed()
    }
}

/// A connection-loss error as the real client would report it
pub fn connection_lost() -> BrokerError {
    BrokerError::Connection(rumqttc::ConnectionError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    )))
}

/// Sensor replaying a script; once exhausted it keeps returning `fallback`
pub struct ScriptedSensor {
    script: VecDeque<Result<Reading, SensorError>>,
    fallback: Reading,
    pub calls: u32,
}

impl ScriptedSensor {
    pub fn new(fallback: Reading) -> Self {
        Self {
            script: VecDeque::new(),
            fallback,
            calls: 0,
        }
    }

    pub fn then_fail(mut self, count: usize, error: fn() -> SensorError) -> Self {
        for _ in 0..count {
            self.script.push_back(Err(error()));
        }
        self
    }

    pub fn then_read(mut self, reading: Reading) -> Self {
        self.script.push_back(Ok(reading));
        self
    }
}

impl Sensor for ScriptedSensor {
    fn measure(&mut self) -> Result<Reading, SensorError> {
        self.calls += 1;
        self.script.pop_front().unwrap_or(Ok(self.fallback))
    }
}

/// Wireless link that comes up after a number of polls
#[derive(Default)]
pub struct ScriptedLink {
    pub polls_until_up: Option<u32>,
    pub activated: bool,
    pub connect_requests: Vec<(String, String)>,
    pub polls: u32,
}

impl ScriptedLink {
    pub fn up_after(polls: u32) -> Self {
        Self {
            polls_until_up: Some(polls),
            ..Self::default()
        }
    }

    pub fn never_up() -> Self {
        Self::default()
    }
}

impl WirelessLink for ScriptedLink {
    async fn activate(&mut self) -> Result<(), NetworkError> {
        self.activated = true;
        Ok(())
    }

    async fn connect(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        self.connect_requests
            .push((ssid.to_string(), password.to_string()));
        Ok(())
    }

    async fn is_connected(&mut self) -> Result<bool, NetworkError> {
        self.polls += 1;
        Ok(matches!(self.polls_until_up, Some(n) if self.polls >= n))
    }
}
