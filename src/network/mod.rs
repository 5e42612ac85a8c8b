//! # Network Bring-up
//!
//! Brings the wireless interface up once at startup and waits until it reports a
//! link. Nothing else in the agent touches the interface afterwards.
//!
//! ```text
//! network/
//! ├── link.rs     - WirelessLink trait, sysfs and nmcli backends
//! └── bring_up.rs - activate → connect → poll until connected
//! ```
//!
//! [`bring_up_network`] hands back a [`NetworkUp`] token. The broker session asks
//! for that token when connecting, which keeps the startup order honest.

pub mod bring_up;
pub mod link;


pub use bring_up::{bring_up_network, BringUpPolicy, NetworkUp};
pub use link::{NmcliLink, SysfsLink, WirelessLink};

use crate::config::{LinkBackend, WifiConfig};

/// Errors raised while bringing the wireless link up
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Failed to run {command}: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read link state of {interface}: {source}")]
    LinkState {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Link did not come up within {0:?}")]
    Timeout(std::time::Duration),
}

/// Link backend chosen in the configuration
pub enum Link {
    Nmcli(NmcliLink),
    System(SysfsLink),
}

impl Link {
    pub fn from_config(config: &WifiConfig) -> Self {
        match config.backend {
            LinkBackend::Nmcli => Link::Nmcli(NmcliLink::new(&config.interface)),
            LinkBackend::System => Link::System(SysfsLink::new(&config.interface)),
        }
    }
}

impl WirelessLink for Link {
    async fn activate(&mut self) -> Result<(), NetworkError> {
        match self {
            Link::Nmcli(link) => link.activate().await,
            Link::System(link) => link.activate().await,
        }
    }

    async fn connect(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        match self {
            Link::Nmcli(link) => link.connect(ssid, password).await,
            Link::System(link) => link.connect(ssid, password).await,
        }
    }

    async fn is_connected(&mut self) -> Result<bool, NetworkError> {
        match self {
            Link::Nmcli(link) => link.is_connected().await,
            Link::System(link) => link.is_connected().await,
        }
    }
}
