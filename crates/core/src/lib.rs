//! `vitalwatch-core` -- pure domain logic for patient telemetry monitoring.
//!
//! Nothing in this crate performs I/O. Classification, backoff bookkeeping,
//! simulated series and view projection all live here so they can be tested
//! in isolation; the async orchestration shell lives in `vitalwatch-monitor`.

pub mod backoff;
pub mod error;
pub mod reading;
pub mod record;
pub mod risk;
pub mod simulation;
pub mod types;
pub mod view;
