//! # FX3 Protocol Module
//!
//! Wire formats of the FX3 streamer firmware.
//!
//! This module handles:
//! - The 19-word debug info register snapshot and its field offsets
//! - Decoding snapshots into sector/DMA sizes and per-channel counters
//! - Decoding SD device info blocks

pub mod protocol;
pub mod decoder;
