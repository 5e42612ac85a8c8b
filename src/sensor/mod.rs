//! # Sensor Module
//!
//! Temperature/humidity acquisition behind the [`Sensor`] trait.
//!
//! The telemetry loop only ever calls [`Sensor::measure`]; a failed measurement is
//! an ordinary value ([`SensorError`]) that the loop turns into a skipped iteration.
//!
//! ```text
//! sensor/
//! ├── mod.rs    - Reading, SensorError, Sensor trait, FixedSensor
//! └── dht22.rs  - DHT22 single-wire driver over rppal GPIO
//! ```

pub mod dht22;

use crate::config::{SensorConfig, SensorKind};
use tracing::info;

/// One temperature/humidity sample. Produced fresh on each iteration and
/// never stored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    /// Degrees Celsius
    pub temperature: f32,
    /// Relative humidity in percent
    pub humidity: f32,
}

impl Reading {
    pub fn new(temperature: f32, humidity: f32) -> Self {
        Self {
            temperature,
            humidity,
        }
    }

    /// Temperature as published: plain decimal text such as `22.5`
    pub fn temperature_payload(&self) -> String {
        decimal_text(self.temperature)
    }

    /// Humidity as published: plain decimal text such as `47.0`
    pub fn humidity_payload(&self) -> String {
        decimal_text(self.humidity)
    }
}

// Whole numbers keep one decimal so consumers always see a float ("47.0", not "47").
fn decimal_text(value: f32) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// Transient sensor faults. None of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    #[error("Timing fault while waiting for {phase}")]
    Timeout { phase: &'static str },

    #[error("Sensor did not respond to start signal")]
    NoResponse,

    #[error("GPIO error: {0}")]
    Gpio(String),
}

/// A source of readings
pub trait Sensor {
    /// Triggers a read cycle and returns the resulting sample.
    fn measure(&mut self) -> Result<Reading, SensorError>;
}

/// Always reports the same values
#[derive(Clone, Debug)]
pub struct FixedSensor {
    reading: Reading,
}

impl FixedSensor {
    pub fn new(reading: Reading) -> Self {
        Self { reading }
    }
}

impl Sensor for FixedSensor {
    fn measure(&mut self) -> Result<Reading, SensorError> {
        Ok(self.reading)
    }
}

/// Builds the sensor selected in the configuration.
pub fn from_config(config: &SensorConfig) -> Result<Box<dyn Sensor>, SensorError> {
    match config.kind {
        SensorKind::Dht22 => {
            info!("Using DHT22 on GPIO {}", config.gpio_pin);
            Ok(Box::new(dht22::Dht22::new(config.gpio_pin)?))
        }
        SensorKind::Fixed => {
            info!(
                "Using fixed sensor values {} °C / {} %",
                config.fixed_temperature, config.fixed_humidity
            );
            Ok(Box::new(FixedSensor::new(Reading::new(
                config.fixed_temperature,
                config.fixed_humidity,
            ))))
        }
    }
}

impl<S: Sensor + ?Sized> Sensor for Box<S> {
    fn measure(&mut self) -> Result<Reading, SensorError> {
        (**self).measure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_text() {
        let reading = Reading::new(22.5, 47.0);
        assert_eq!(reading.temperature_payload(), "22.5");
        assert_eq!(reading.humidity_payload(), "47.0");
    }

    #[test]
    fn test_payload_negative() {
        let reading = Reading::new(-3.2, 100.0);
        assert_eq!(reading.temperature_payload(), "-3.2");
        assert_eq!(reading.humidity_payload(), "100.0");
    }

    #[test]
    fn test_fixed_sensor() {
        let mut sensor = from_config(&SensorConfig {
            kind: SensorKind::Fixed,
            ..SensorConfig::default()
        })
        .unwrap();

        assert_eq!(sensor.measure().unwrap(), Reading::new(21.0, 45.0));
    }
}
