//! # FX3 Response Decoder
//!
//! Decodes the debug info register snapshot and SD device info blocks.

use bytes::Buf;

use super::protocol::*;
use crate::error::{Result, SdDumperError};

/// Decode the semantic fields of a register snapshot
///
/// Pure and total: only extracts words at fixed offsets. Zero sector or
/// DMA sizes (board not ready yet) are passed through unchanged, unit
/// conversion happens in the throughput engine.
///
/// # Arguments
///
/// * `raw` - Snapshot as fetched from the board
///
/// # Returns
///
/// * `DecodedTelemetry` - Sector size, DMA block size and per-channel counters
pub fn decode_telemetry(raw: &RawTelemetrySnapshot) -> DecodedTelemetry {
    let words = &raw.words;

    let mut channels = [ChannelCounters::default(); CHANNEL_COUNT];
    for (i, channel) in channels.iter_mut().enumerate() {
        *channel = ChannelCounters {
            skipped_transfer_units: words[OFFSET_SKIPPED_UNITS[i]],
            written_sector_count: words[OFFSET_WRITTEN_SECTORS[i]],
            max_sector_count: words[OFFSET_MAX_SECTORS[i]],
        };
    }

    DecodedTelemetry {
        sector_size: words[OFFSET_SECTOR_SIZE],
        dma_block_size: words[OFFSET_DMA_BLOCK_SIZE],
        channels,
    }
}

/// Parse a debug info response into a snapshot
///
/// # Arguments
///
/// * `payload` - Response bytes (19 little-endian words)
/// * `diagnostics_only` - Mode flag the request was issued with
///
/// # Returns
///
/// * `Result<RawTelemetrySnapshot>` - Snapshot, or error on a short transfer
pub fn parse_snapshot(payload: &[u8], diagnostics_only: bool) -> Result<RawTelemetrySnapshot> {
    if payload.len() < SNAPSHOT_SIZE_BYTES {
        return Err(SdDumperError::Protocol(format!(
            "Debug info response too short: expected {} bytes, got {}",
            SNAPSHOT_SIZE_BYTES,
            payload.len()
        )));
    }

    let mut buf = &payload[..SNAPSHOT_SIZE_BYTES];
    let words: Vec<u32> = (0..SNAPSHOT_WORD_COUNT).map(|_| buf.get_u32_le()).collect();

    Ok(RawTelemetrySnapshot::from_words(&words, diagnostics_only))
}

/// Decode an SD device info block
///
/// # Arguments
///
/// * `payload` - Response of `CMD_SDDEV0_INFO` / `CMD_SDDEV1_INFO`
///
/// # Returns
///
/// * `Result<SdDeviceInfo>` - Decoded block, or error if too short
pub fn decode_sd_device_info(payload: &[u8]) -> Result<SdDeviceInfo> {
    if payload.len() < SD_INFO_PAYLOAD_SIZE {
        return Err(SdDumperError::Protocol(format!(
            "SD info payload too short: {} bytes",
            payload.len()
        )));
    }

    let mut buf = payload;

    Ok(SdDeviceInfo {
        card_type: buf.get_u32_le(),
        clk_rate: buf.get_u32_le(),
        num_blocks: buf.get_u32_le(),
        erase_size: buf.get_u32_le(),
        block_len: buf.get_u16_le(),
        ccc: buf.get_u16_le(),
        removable: buf.get_u8(),
        writeable: buf.get_u8(),
        locked: buf.get_u8(),
        ddr_mode: buf.get_u8(),
        op_voltage: buf.get_u8(),
        bus_width: buf.get_u8(),
        num_units: buf.get_u8(),
    })
}
