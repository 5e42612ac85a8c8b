//! DHT22 / AM2302 driver over a single GPIO line.
//!
//! The sensor answers a start signal with a 40 bit frame:
//!
//! ```text
//! byte 0..1  humidity × 10
//! byte 2..3  temperature × 10, bit 15 = sign
//! byte 4     checksum = (b0 + b1 + b2 + b3) & 0xFF
//! ```
//!
//! Bits are encoded in the length of the high pulse that follows a ~50 µs low
//! phase: ~26 µs means 0, ~70 µs means 1. Timing is captured by busy waiting on
//! the pin, so a busy CPU can corrupt a frame; the checksum catches that and the
//! caller simply tries again next cycle.

use super::{Reading, Sensor, SensorError};
use rppal::gpio::{Gpio, IoPin, Level, Mode};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// The sensor delivers at most one fresh sample every two seconds
const MIN_SAMPLE_PERIOD: Duration = Duration::from_secs(2);

/// High pulses longer than this are a 1 bit
const ONE_THRESHOLD_US: u32 = 40;

const FRAME_BITS: usize = 40;

pub struct Dht22 {
    pin: IoPin,
    last: Option<(Instant, Reading)>,
}

impl Dht22 {
    /// Claims the BCM pin `bcm_pin` for the sensor's data line.
    pub fn new(bcm_pin: u8) -> Result<Self, SensorError> {
        let gpio = Gpio::new().map_err(|e| SensorError::Gpio(e.to_string()))?;
        let pin = gpio
            .get(bcm_pin)
            .map_err(|e| SensorError::Gpio(e.to_string()))?
            .into_io(Mode::Output);

        Ok(Self { pin, last: None })
    }

    /// Spins while the line is at `level`, returning how long that took in µs.
    fn wait_while(&self, level: Level, max_us: u32, phase: &'static str) -> Result<u32, SensorError> {
        let start = Instant::now();
        loop {
            let elapsed = start.elapsed().as_micros() as u32;
            if self.pin.read() != level {
                return Ok(elapsed);
            }
            if elapsed > max_us {
                return Err(SensorError::Timeout { phase });
            }
        }
    }

    fn read_frame(&mut self) -> Result<[u8; 5], SensorError> {
        // Wake up: hold the line low, then release it and listen.
        self.pin.set_mode(Mode::Output);
        self.pin.set_low();
        std::thread::sleep(Duration::from_millis(3));
        self.pin.set_high();
        let release = Instant::now();
        while release.elapsed() < Duration::from_micros(25) {}
        self.pin.set_mode(Mode::Input);

        self.wait_while(Level::High, 200, "response")
            .map_err(|_| SensorError::NoResponse)?;
        self.wait_while(Level::Low, 100, "response low")?;
        self.wait_while(Level::High, 100, "response high")?;

        let mut pulses = [0u32; FRAME_BITS];
        for pulse in pulses.iter_mut() {
            self.wait_while(Level::Low, 80, "bit start")?;
            *pulse = self.wait_while(Level::High, 100, "bit")?;
        }
        trace!("DHT22 pulses: {:?}", pulses);

        Ok(frame_from_pulses(&pulses))
    }
}

impl Sensor for Dht22 {
    fn measure(&mut self) -> Result<Reading, SensorError> {
        if let Some((at, reading)) = self.last {
            if at.elapsed() < MIN_SAMPLE_PERIOD {
                debug!("DHT22 sampled {:?} ago, reusing last reading", at.elapsed());
                return Ok(reading);
            }
        }

        let frame = self.read_frame()?;
        let reading = decode_frame(frame)?;
        self.last = Some((Instant::now(), reading));
        Ok(reading)
    }
}

/// Packs 40 high-pulse lengths (µs, MSB first) into the raw frame.
pub fn frame_from_pulses(pulses: &[u32; FRAME_BITS]) -> [u8; 5] {
    let mut frame = [0u8; 5];
    for (i, &pulse) in pulses.iter().enumerate() {
        if pulse > ONE_THRESHOLD_US {
            frame[i / 8] |= 1 << (7 - i % 8);
        }
    }
    frame
}

/// Verifies the checksum and converts a raw frame into a reading.
pub fn decode_frame(frame: [u8; 5]) -> Result<Reading, SensorError> {
    let expected = frame[0]
        .wrapping_add(frame[1])
        .wrapping_add(frame[2])
        .wrapping_add(frame[3]);
    if frame[4] != expected {
        return Err(SensorError::Checksum {
            expected,
            actual: frame[4],
        });
    }

    let humidity = u16::from_be_bytes([frame[0], frame[1]]) as f32 / 10.0;
    let mut temperature = u16::from_be_bytes([frame[2] & 0x7F, frame[3]]) as f32 / 10.0;
    if frame[2] & 0x80 != 0 {
        temperature = -temperature;
    }

    Ok(Reading::new(temperature, humidity))
}
