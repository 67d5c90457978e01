//! `vitalwatch-monitor` library crate.
//!
//! Async orchestration around the pure logic in `vitalwatch-core`: the
//! entity registry, the live telemetry poller, the simulation tick loop and
//! the [`Monitor`](monitor::Monitor) facade consumed by a display layer. The
//! daemon entrypoint lives in `main.rs`.

pub mod config;
pub mod events;
pub mod feed;
pub mod http_feed;
pub mod monitor;
pub mod poller;
pub mod registry;
pub mod simulator;

pub use monitor::{Monitor, MonitorError};
