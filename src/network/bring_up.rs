use super::{NetworkError, WirelessLink};
use crate::config::WifiConfig;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// How long and how often bring-up polls the link
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BringUpPolicy {
    pub poll_interval: Duration,
    /// `None` keeps polling forever
    pub timeout: Option<Duration>,
}

impl Default for BringUpPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: None,
        }
    }
}

impl From<&WifiConfig> for BringUpPolicy {
    fn from(config: &WifiConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Proof that the wireless link was up when bring-up returned
#[derive(Debug)]
pub struct NetworkUp {
    pub polls: u32,
    pub elapsed: Duration,
}

/// Activates the link, requests association once, then polls until connected.
///
/// Without a timeout in `policy` this blocks until the link comes up, however
/// long that takes.
pub async fn bring_up_network<L: WirelessLink>(
    link: &mut L,
    ssid: &str,
    password: &str,
    policy: BringUpPolicy,
) -> Result<NetworkUp, NetworkError> {
    info!("Connecting to WiFi '{}'", ssid);
    let started = Instant::now();

    link.activate().await?;
    link.connect(ssid, password).await?;

    let mut polls = 0u32;
    loop {
        polls += 1;
        if link.is_connected().await? {
            let elapsed = started.elapsed();
            info!("WiFi connected after {:?} ({} polls)", elapsed, polls);
            return Ok(NetworkUp { polls, elapsed });
        }

        if let Some(timeout) = policy.timeout {
            if started.elapsed() >= timeout {
                return Err(NetworkError::Timeout(timeout));
            }
        }

        if polls % 50 == 0 {
            debug!("Still waiting for link after {:?}", started.elapsed());
        }
        sleep(policy.poll_interval).await;
    }
}
