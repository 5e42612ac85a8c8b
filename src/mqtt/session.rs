//! Broker session lifecycle with compile-time ordering via statum
//!
//! # State Machine
//!
//! ```text
//! Idle ──arm_last_will──► WillArmed ──connect──► Online
//!                                                 │  ▲
//!                                    publish fails│  │ensure_connected
//!                                                 ▼  │
//!                                            (Disconnected)
//! ```
//!
//! `Online` keeps tracking whether the underlying connection is alive. A lost
//! connection is re-established by [`BrokerSession::ensure_connected`], which
//! reuses the registered last-will and announces "online" again.

use super::{BrokerClient, BrokerError, OutboundMessage, StatusAnnouncer};
use crate::config::BrokerConfig;
use crate::network::NetworkUp;
use statum::{machine, state};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Cap for the doubling backoff between handshake attempts
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Lifecycle states of a broker session
#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Idle,      // Client configured, nothing registered yet
    WillArmed, // Last-will registered, handshake pending
    Online,    // Handshake done, online status announced
}

/// Observable state of the broker connection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Retry policy for the startup handshake
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::from_secs(2),
        }
    }
}

impl From<&BrokerConfig> for ConnectPolicy {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            attempts: config.connect_attempts.max(1),
            backoff: Duration::from_secs(config.retry_backoff_secs),
        }
    }
}

/// The single owner of the broker connection
#[machine]
pub struct BrokerSession<S: SessionState> {
    client: Box<dyn BrokerClient>,
    announcer: StatusAnnouncer,
    policy: ConnectPolicy,
    connection: ConnectionState,
    reconnects: u32,
}

impl<S: SessionState> BrokerSession<S> {
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }
}

impl BrokerSession<Idle> {
    pub fn create(
        client: Box<dyn BrokerClient>,
        announcer: StatusAnnouncer,
        policy: ConnectPolicy,
    ) -> Self {
        Self::new(
            client,
            announcer,
            policy,
            ConnectionState::Disconnected,
            0, // reconnects
        )
    }

    /// Registers `will` with the client ahead of the handshake.
    pub fn arm_last_will(mut self, will: OutboundMessage) -> BrokerSession<WillArmed> {
        info!("Registering last will on '{}'", will.topic);
        self.client.set_last_will(will);
        self.transition()
    }
}

impl BrokerSession<WillArmed> {
    /// Performs the handshake, retrying per [`ConnectPolicy`], then announces
    /// "online" retained.
    ///
    /// Takes the [`NetworkUp`] token so the broker is never contacted before the
    /// link is up.
    pub async fn connect(mut self, _network: &NetworkUp) -> Result<BrokerSession<Online>, BrokerError> {
        let mut backoff = self.policy.backoff;
        let mut attempt = 1;

        loop {
            info!(
                "Connecting to MQTT broker (attempt {}/{})",
                attempt, self.policy.attempts
            );
            match self.client.connect().await {
                Ok(()) => break,
                Err(e) if attempt < self.policy.attempts => {
                    warn!("Broker connect failed: {}, retrying in {:?}", e, backoff);
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                Err(e) => {
                    error!("Broker connect failed after {} attempt(s): {}", attempt, e);
                    return Err(e);
                }
            }
        }

        self.connection = ConnectionState::Connected;
        let mut online: BrokerSession<Online> = self.transition();
        online.announce_online().await?;
        Ok(online)
    }
}

impl BrokerSession<Online> {
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// How often the connection had to be re-established
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    /// Publishes at QoS 0. Fails fast with [`BrokerError::NotConnected`] while
    /// the connection is down.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        retain: bool,
    ) -> Result<(), BrokerError> {
        self.send(OutboundMessage::new(topic, payload, retain)).await
    }

    /// Re-runs the handshake and re-announces "online" if the connection was lost.
    pub async fn ensure_connected(&mut self) -> Result<(), BrokerError> {
        if self.is_connected() {
            return Ok(());
        }

        info!("Reconnecting to MQTT broker");
        self.client.connect().await?;
        self.connection = ConnectionState::Connected;
        self.reconnects += 1;
        self.announce_online().await
    }

    async fn announce_online(&mut self) -> Result<(), BrokerError> {
        let online = self.announcer.online();
        info!("Announcing online status on '{}'", online.topic);
        self.send(online).await
    }

    async fn send(&mut self, message: OutboundMessage) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }

        let result = self.client.publish(message).await;
        if let Err(e) = &result {
            if e.is_connection_loss() {
                warn!("Broker connection lost: {}", e);
                self.connection = ConnectionState::Disconnected;
            }
        }
        result
    }
}
