use super::Watchdog;
use crate::config::{TelemetryConfig, TopicSet};
use crate::mqtt::session::Online;
use crate::mqtt::{BrokerError, BrokerSession};
use crate::sensor::{Reading, Sensor, SensorError};
use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Cadence settings of the loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopSettings {
    /// Pause after every iteration, successful or not
    pub interval: Duration,
    /// Log a statistics summary every this many iterations (0 disables it)
    pub stats_every: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            stats_every: 60,
        }
    }
}

impl From<&TelemetryConfig> for LoopSettings {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            stats_every: config.stats_every,
        }
    }
}

/// How one iteration ended
#[derive(Debug)]
pub enum CycleOutcome {
    /// Both values went out
    Published,
    /// The sensor failed; nothing was published
    SensorFault(SensorError),
    /// The broker connection was down and could not be re-established
    SessionDown(BrokerError),
    /// At least one of the two publishes failed. Both were attempted.
    PublishFault {
        temperature: Option<BrokerError>,
        humidity: Option<BrokerError>,
    },
}

impl CycleOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, CycleOutcome::Published)
    }
}

#[derive(Debug)]
pub struct CycleReport {
    pub iteration: u64,
    pub reading: Option<Reading>,
    pub outcome: CycleOutcome,
}

/// Running counters, kept for the periodic summary
#[derive(Clone, Debug, Default)]
pub struct LoopStats {
    pub iterations: u64,
    pub published: u64,
    pub sensor_faults: u64,
    pub publish_faults: u64,
    pub last_publish: Option<DateTime<Local>>,
}

/// Owns the sensor and the broker session for the rest of the process
pub struct TelemetryLoop<S: Sensor> {
    sensor: S,
    session: BrokerSession<Online>,
    topics: TopicSet,
    settings: LoopSettings,
    watchdog: Watchdog,
    stats: LoopStats,
}

impl<S: Sensor> TelemetryLoop<S> {
    pub fn new(
        sensor: S,
        session: BrokerSession<Online>,
        topics: TopicSet,
        settings: LoopSettings,
        watchdog: Watchdog,
    ) -> Self {
        Self {
            sensor,
            session,
            topics,
            settings,
            watchdog,
            stats: LoopStats::default(),
        }
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn session(&self) -> &BrokerSession<Online> {
        &self.session
    }

    /// Runs iterations forever.
    pub async fn run(mut self) {
        info!(
            "Starting telemetry loop, publishing every {:?}",
            self.settings.interval
        );
        loop {
            self.run_once().await;
        }
    }

    /// Reads, publishes, feeds the watchdog and sleeps once.
    pub async fn run_once(&mut self) -> CycleReport {
        self.stats.iterations += 1;
        let iteration = self.stats.iterations;

        let report = match self.sensor.measure() {
            Ok(reading) => CycleReport {
                iteration,
                reading: Some(reading),
                outcome: self.publish(&reading).await,
            },
            Err(e) => CycleReport {
                iteration,
                reading: None,
                outcome: CycleOutcome::SensorFault(e),
            },
        };

        self.record(&report);
        self.watchdog.feed();
        sleep(self.settings.interval).await;
        report
    }

    async fn publish(&mut self, reading: &Reading) -> CycleOutcome {
        if let Err(e) = self.session.ensure_connected().await {
            return CycleOutcome::SessionDown(e);
        }

        // Independent messages: a failed temperature publish does not skip humidity.
        let temperature = self
            .session
            .publish(&self.topics.temperature, reading.temperature_payload(), false)
            .await
            .err();
        let humidity = self
            .session
            .publish(&self.topics.humidity, reading.humidity_payload(), false)
            .await
            .err();

        if temperature.is_none() && humidity.is_none() {
            CycleOutcome::Published
        } else {
            CycleOutcome::PublishFault {
                temperature,
                humidity,
            }
        }
    }

    fn record(&mut self, report: &CycleReport) {
        match &report.outcome {
            CycleOutcome::Published => {
                self.stats.published += 1;
                self.stats.last_publish = Some(Local::now());
                if let Some(reading) = &report.reading {
                    info!(
                        "Updated! temperature: {} °C, humidity: {} %",
                        reading.temperature, reading.humidity
                    );
                }
            }
            CycleOutcome::SensorFault(e) => {
                self.stats.sensor_faults += 1;
                warn!("Iteration {}: sensor read failed: {}", report.iteration, e);
            }
            CycleOutcome::SessionDown(e) => {
                self.stats.publish_faults += 1;
                error!("Iteration {}: broker unavailable: {}", report.iteration, e);
            }
            CycleOutcome::PublishFault {
                temperature,
                humidity,
            } => {
                self.stats.publish_faults += 1;
                if let Some(e) = temperature {
                    error!(
                        "Iteration {}: temperature publish failed: {}",
                        report.iteration, e
                    );
                }
                if let Some(e) = humidity {
                    error!(
                        "Iteration {}: humidity publish failed: {}",
                        report.iteration, e
                    );
                }
            }
        }

        debug!("Loop stats: {:?}", self.stats);
        if self.settings.stats_every > 0 && report.iteration % self.settings.stats_every == 0 {
            info!(
                "{} iterations: {} published, {} sensor faults, {} publish faults, {} reconnects, last publish {}",
                self.stats.iterations,
                self.stats.published,
                self.stats.sensor_faults,
                self.stats.publish_faults,
                self.session.reconnects(),
                self.stats
                    .last_publish
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string())
            );
        }
    }
}
