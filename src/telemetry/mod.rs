//! # Telemetry Module
//!
//! Throughput and loss monitoring of the capture board.
//!
//! This module handles:
//! - Converting decoded register counters into GB, speeds and loss ratios
//! - Polling the board on a fixed period in a background task
//! - Emitting reports as console text, JSON lines or log events

pub mod engine;
pub mod sink;
pub mod monitor;
