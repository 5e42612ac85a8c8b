//! # MQTT Session Module
//!
//! Owns everything the agent says to the broker: the retained status messages,
//! the connection with its last-will, and the plain-text telemetry publishes.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── status.rs   - online/offline status payloads (pure)
//! ├── client.rs   - BrokerClient trait and the rumqttc implementation
//! └── session.rs  - Idle → WillArmed → Online lifecycle (statum)
//! ```
//!
//! ## Ordering
//!
//! The broker binds a last-will when the connection is opened, so the will has to
//! be registered first and the online announcement can only follow a completed
//! handshake. [`session::BrokerSession`] encodes that order in its type: only a
//! `BrokerSession<WillArmed>` can connect and only a `BrokerSession<Online>` can
//! publish.
//!
//! ## Delivery
//!
//! Everything is published with QoS 0. A publish counts as done once the packet
//! has been written to the connection; there is no acknowledgement to wait for.

pub mod client;
pub mod session;
pub mod status;


pub use client::{BrokerClient, OutboundMessage, RumqttcClient};
pub use session::{BrokerSession, ConnectPolicy, ConnectionState};
pub use status::{build_status_message, Status, StatusAnnouncer};

use std::time::Duration;

/// Broker connection and publish failures.
///
/// During startup these end the process; inside the telemetry loop they are
/// reported and the loop carries on.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    Connection(#[source] rumqttc::ConnectionError),

    #[error("Broker refused the connection: {0:?}")]
    Refused(rumqttc::ConnectReturnCode),

    #[error("Broker did not respond within {0:?}")]
    Timeout(Duration),

    #[error("MQTT client rejected the request: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Failed to encode status message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<rumqttc::ConnectionError> for BrokerError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        match err {
            rumqttc::ConnectionError::ConnectionRefused(code) => BrokerError::Refused(code),
            other => BrokerError::Connection(other),
        }
    }
}

impl BrokerError {
    /// Whether the connection has to be re-established before the next publish
    pub fn is_connection_loss(&self) -> bool {
        !matches!(self, BrokerError::Encode(_))
    }
}
