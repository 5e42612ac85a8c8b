//! Retained online/offline status messages.

use super::{BrokerError, OutboundMessage};
use crate::config::DeviceIdentity;
use serde::Serialize;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Offline,
}

// Field order is the wire order.
#[derive(Serialize)]
struct StatusMessage<'a> {
    client_id: &'a str,
    status: Status,
}

/// Serializes `{"client_id":..,"status":..}` as compact JSON.
///
/// Deterministic: the same arguments always give the same bytes.
pub fn build_status_message(client_id: &str, status: Status) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&StatusMessage { client_id, status })
}

/// Both status messages of one device, built once at startup
#[derive(Clone, Debug)]
pub struct StatusAnnouncer {
    topic: String,
    online: Vec<u8>,
    offline: Vec<u8>,
}

impl StatusAnnouncer {
    pub fn new(identity: &DeviceIdentity, topic: &str) -> Result<Self, BrokerError> {
        Ok(Self {
            topic: topic.to_string(),
            online: build_status_message(&identity.client_id, Status::Online)?,
            offline: build_status_message(&identity.client_id, Status::Offline)?,
        })
    }

    /// The retained "offline" message to register as last-will
    pub fn offline_will(&self) -> OutboundMessage {
        OutboundMessage::retained(&self.topic, self.offline.clone())
    }

    /// The retained "online" message published after every handshake
    pub fn online(&self) -> OutboundMessage {
        OutboundMessage::retained(&self.topic, self.online.clone())
    }
}
