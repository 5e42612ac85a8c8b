pub mod config;
pub mod mqtt;
pub mod network;
pub mod sensor;
pub mod telemetry;

#[cfg(test)]
mod testing;

use crate::config::AgentConfig;
use crate::mqtt::{BrokerSession, ConnectPolicy, RumqttcClient, StatusAnnouncer};
use crate::network::{bring_up_network, BringUpPolicy, Link};
use crate::telemetry::{LoopSettings, TelemetryLoop, Watchdog};
use color_eyre::{eyre::WrapErr, Result};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup()?;

    let config_path = AgentConfig::default_path();
    let config = AgentConfig::load(&config_path)
        .await
        .wrap_err_with(|| format!("Failed to load configuration from {}", config_path.display()))?;
    setup_logging(config.log_level()?);
    info!(
        "climate-beacon starting as '{}' (config {})",
        config.device.client_id,
        config_path.display()
    );

    let identity = config.identity();
    let topics = config.topics.resolve()?;

    // Sensor wiring problems should show up before anything touches the network.
    let sensor = sensor::from_config(&config.sensor).wrap_err("Failed to initialize sensor")?;

    let mut link = Link::from_config(&config.wifi);
    let network = bring_up_network(
        &mut link,
        &config.wifi.ssid,
        &config.wifi.password,
        BringUpPolicy::from(&config.wifi),
    )
    .await
    .wrap_err("Network bring-up failed")?;

    info!("Connecting to MQTT server {}", config.broker);
    let announcer = StatusAnnouncer::new(&identity, &topics.status)?;
    let will = announcer.offline_will();
    let session = BrokerSession::create(
        Box::new(RumqttcClient::new(&identity, &config.broker)),
        announcer,
        ConnectPolicy::from(&config.broker),
    )
    .arm_last_will(will)
    .connect(&network)
    .await
    .wrap_err("Broker connection failed")?;
    info!("Connected to MQTT server");

    // Armed only now: startup waits are bounded by their own timeouts.
    let watchdog =
        Watchdog::from_config(&config.watchdog).wrap_err("Failed to open watchdog device")?;

    TelemetryLoop::new(
        sensor,
        session,
        topics,
        LoopSettings::from(&config.telemetry),
        watchdog,
    )
    .run()
    .await;

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}
