//! # SD Dumper Library
//!
//! Throughput monitor for FX3-based USB3 capture boards that stream samples
//! onto SD storage.
//!
//! This library decodes the board's debug info register snapshot, turns
//! successive snapshots into receive/write speeds and per-channel loss, and
//! runs the periodic sampling loop alongside the control path.

pub mod config;
pub mod error;
pub mod fx3;
pub mod device;
pub mod telemetry;
