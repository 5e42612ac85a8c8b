//! # Telemetry Loop
//!
//! The supervisory loop of the agent. Every iteration walks the same three
//! phases and never terminates the process:
//!
//! ```text
//!   ┌──────────► Reading ──(fault)──┐
//!   │               │               │
//!   │            Publishing         │
//!   │               │               │
//!   └── Sleeping ◄──┴───────────────┘
//! ```
//!
//! Each phase returns an explicit outcome instead of raising: a sensor fault ends
//! the iteration early, a publish fault is recorded, and in both cases the loop
//! sleeps for the full interval and tries again. The watchdog is fed once per
//! iteration just before the sleep.

pub mod cycle;
pub mod watchdog;

#[cfg(test)]
mod tests;

pub use cycle::{CycleOutcome, CycleReport, LoopSettings, LoopStats, TelemetryLoop};
pub use watchdog::Watchdog;
