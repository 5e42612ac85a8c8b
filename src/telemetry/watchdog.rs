//! Hardware watchdog feeder.
//!
//! Once `/dev/watchdog` is opened the kernel expects a write before the watchdog
//! timeout elapses, otherwise the board resets. The magic close character 'V' is
//! never written, so the timer stays armed when the agent crashes or hangs.

use crate::config::WatchdogConfig;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct Watchdog {
    device: Option<(PathBuf, File)>,
    feeds: u64,
}

impl Watchdog {
    pub fn disabled() -> Self {
        Self {
            device: None,
            feeds: 0,
        }
    }

    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().write(true).open(path)?;
        info!("Watchdog armed on {}", path.display());
        Ok(Self {
            device: Some((path.to_path_buf(), file)),
            feeds: 0,
        })
    }

    pub fn from_config(config: &WatchdogConfig) -> std::io::Result<Self> {
        match &config.device {
            Some(path) => Self::open(path),
            None => {
                debug!("No watchdog device configured");
                Ok(Self::disabled())
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.device.is_some()
    }

    pub fn feeds(&self) -> u64 {
        self.feeds
    }

    /// Writes one keepalive byte. Failures are logged, never returned.
    pub fn feed(&mut self) {
        let Some((path, file)) = self.device.as_mut() else {
            return;
        };

        match file.write_all(b"\0").and_then(|_| file.flush()) {
            Ok(()) => self.feeds += 1,
            Err(e) => warn!("Failed to feed watchdog {}: {}", path.display(), e),
        }
    }
}
