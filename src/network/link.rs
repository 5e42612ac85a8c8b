//! Wireless link backends.
//!
//! Link state always comes from `/sys/class/net/<iface>/operstate`, whichever tool
//! did the association.

use super::NetworkError;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// The operations network bring-up needs from a wireless interface.
#[allow(async_fn_in_trait)]
pub trait WirelessLink {
    /// Powers the radio / interface on.
    async fn activate(&mut self) -> Result<(), NetworkError>;

    /// Issues a single association request. Does not wait for the link.
    async fn connect(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError>;

    /// Reports whether the interface currently has a link.
    async fn is_connected(&mut self) -> Result<bool, NetworkError>;
}

/// Interface managed by the operating system; only its state is observed.
#[derive(Clone, Debug)]
pub struct SysfsLink {
    interface: String,
    operstate: PathBuf,
}

impl SysfsLink {
    pub fn new(interface: &str) -> Self {
        Self::with_sysfs_root(interface, "/sys/class/net")
    }

    /// Reads link state below `root` instead of `/sys/class/net`.
    pub fn with_sysfs_root(interface: &str, root: impl Into<PathBuf>) -> Self {
        let mut operstate = root.into();
        operstate.push(interface);
        operstate.push("operstate");
        Self {
            interface: interface.to_string(),
            operstate,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl WirelessLink for SysfsLink {
    async fn activate(&mut self) -> Result<(), NetworkError> {
        debug!("{} is managed by the system, nothing to activate", self.interface);
        Ok(())
    }

    async fn connect(&mut self, _ssid: &str, _password: &str) -> Result<(), NetworkError> {
        debug!("{} is managed by the system, waiting for link", self.interface);
        Ok(())
    }

    async fn is_connected(&mut self) -> Result<bool, NetworkError> {
        match tokio::fs::read_to_string(&self.operstate).await {
            Ok(state) => Ok(state.trim() == "up"),
            // The interface may not exist yet while the driver loads.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(NetworkError::LinkState {
                interface: self.interface.clone(),
                source,
            }),
        }
    }
}

/// Associates through NetworkManager's command line client.
#[derive(Clone, Debug)]
pub struct NmcliLink {
    state: SysfsLink,
}

impl NmcliLink {
    pub fn new(interface: &str) -> Self {
        Self {
            state: SysfsLink::new(interface),
        }
    }

    async fn nmcli(&self, args: &[&str], shown: &str) -> Result<bool, NetworkError> {
        let output = Command::new("nmcli")
            .args(args)
            .output()
            .await
            .map_err(|source| NetworkError::Command {
                command: format!("nmcli {}", shown),
                source,
            })?;

        if output.status.success() {
            Ok(true)
        } else {
            warn!(
                "nmcli {} exited with {}: {}",
                shown,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            Ok(false)
        }
    }
}

impl WirelessLink for NmcliLink {
    async fn activate(&mut self) -> Result<(), NetworkError> {
        if self.nmcli(&["radio", "wifi", "on"], "radio wifi on").await? {
            info!("Wifi radio on");
        }
        Ok(())
    }

    async fn connect(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        let interface = self.state.interface().to_string();
        let args = [
            "device", "wifi", "connect", ssid, "password", password, "ifname", interface.as_str(),
        ];
        // The password stays out of the logs.
        let shown = format!("device wifi connect {} ifname {}", ssid, interface);

        // A refused request is not final: the link state decides.
        if self.nmcli(&args, &shown).await? {
            info!("Connect request for '{}' accepted", ssid);
        }
        Ok(())
    }

    async fn is_connected(&mut self) -> Result<bool, NetworkError> {
        self.state.is_connected().await
    }
}
