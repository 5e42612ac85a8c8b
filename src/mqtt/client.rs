//! Broker client seam and its `rumqttc` implementation.
//!
//! `rumqttc` splits a connection into an [`AsyncClient`] that queues requests and
//! an [`EventLoop`] that does the network I/O. The agent never runs the event
//! loop in the background: [`RumqttcClient`] polls it itself, until CONNACK during
//! a handshake and until the PUBLISH has gone out during a publish. Keepalive
//! pings are sent from those same polls.

use super::BrokerError;
use crate::config::{BrokerConfig, DeviceIdentity};
use futures::future::{BoxFuture, FutureExt};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
    QoS,
};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Capacity of the request queue between client and event loop
const REQUEST_CAPACITY: usize = 10;

/// A message as handed to the broker
#[derive(Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl OutboundMessage {
    pub fn new(topic: &str, payload: impl Into<Vec<u8>>, retain: bool) -> Self {
        Self {
            topic: topic.to_string(),
            payload: payload.into(),
            retain,
        }
    }

    pub fn retained(topic: &str, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(topic, payload, true)
    }
}

impl fmt::Debug for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} <- {}{}",
            self.topic,
            String::from_utf8_lossy(&self.payload),
            if self.retain { " (retained)" } else { "" }
        )
    }
}

/// What the session needs from an MQTT client library.
///
/// Futures are boxed so the session can hold the client as a trait object.
pub trait BrokerClient: Send {
    /// Sets the message the broker publishes when this client disappears without
    /// a clean disconnect. Only takes effect on the next [`connect`](Self::connect).
    fn set_last_will(&mut self, will: OutboundMessage);

    /// Opens a fresh connection and completes the handshake. Any previous
    /// connection is dropped first.
    fn connect(&mut self) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Publishes at QoS 0 and returns once the packet is on the wire.
    fn publish(&mut self, message: OutboundMessage) -> BoxFuture<'_, Result<(), BrokerError>>;
}

/// [`BrokerClient`] backed by `rumqttc`
pub struct RumqttcClient {
    options: MqttOptions,
    timeout: Duration,
    connection: Option<(AsyncClient, EventLoop)>,
}

impl RumqttcClient {
    pub fn new(identity: &DeviceIdentity, config: &BrokerConfig) -> Self {
        let mut options = MqttOptions::new(
            identity.client_id.clone(),
            config.host.clone(),
            config.port,
        );
        options
            .set_keep_alive(Duration::from_secs(config.keepalive_secs))
            .set_clean_session(true);
        if !config.user.is_empty() {
            options.set_credentials(config.user.clone(), config.password.clone());
        }

        Self {
            options,
            timeout: Duration::from_secs(config.timeout_secs),
            connection: None,
        }
    }

    async fn handshake(&mut self) -> Result<(), BrokerError> {
        // Dropping the old event loop closes its socket.
        self.connection = None;

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        debug!(
            "Connecting to {}:{}",
            self.options.broker_address().0,
            self.options.broker_address().1
        );

        let session_present = tokio::time::timeout(self.timeout, await_connack(&mut eventloop))
            .await
            .map_err(|_| BrokerError::Timeout(self.timeout))??;

        info!("Broker accepted connection (session present: {})", session_present);
        self.connection = Some((client, eventloop));
        Ok(())
    }

    async fn send(&mut self, message: OutboundMessage) -> Result<(), BrokerError> {
        let timeout = self.timeout;
        let (client, eventloop) = self.connection.as_mut().ok_or(BrokerError::NotConnected)?;

        client
            .publish(message.topic, QoS::AtMostOnce, message.retain, message.payload)
            .await?;

        let result = match tokio::time::timeout(timeout, await_publish_sent(eventloop)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(timeout)),
        };

        if let Err(e) = &result {
            warn!("Dropping broker connection after failed publish: {}", e);
            self.connection = None;
        }
        result
    }
}

/// Polls until the broker answers the CONNECT. Returns the session-present flag.
async fn await_connack(eventloop: &mut EventLoop) -> Result<bool, BrokerError> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(ack.session_present),
                    code => Err(BrokerError::Refused(code)),
                };
            }
            event => trace!("Broker event during handshake: {:?}", event),
        }
    }
}

async fn await_publish_sent(eventloop: &mut EventLoop) -> Result<(), BrokerError> {
    loop {
        match eventloop.poll().await? {
            Event::Outgoing(Outgoing::Publish(_)) => return Ok(()),
            event => trace!("Broker event during publish: {:?}", event),
        }
    }
}

impl BrokerClient for RumqttcClient {
    fn set_last_will(&mut self, will: OutboundMessage) {
        debug!("Registering last will {:?}", will);
        self.options.set_last_will(LastWill::new(
            will.topic,
            will.payload,
            QoS::AtMostOnce,
            will.retain,
        ));
    }

    fn connect(&mut self) -> BoxFuture<'_, Result<(), BrokerError>> {
        self.handshake().boxed()
    }

    fn publish(&mut self, message: OutboundMessage) -> BoxFuture<'_, Result<(), BrokerError>> {
        self.send(message).boxed()
    }
}
