//! # FX3 Protocol Constants and Types
//!
//! Register snapshot layout and SD device info layout reported by the
//! FX3 streamer firmware.

/// Number of 32-bit words in a debug info snapshot
pub const SNAPSHOT_WORD_COUNT: usize = 19;

/// Size of a debug info snapshot on the wire (19 little-endian words)
pub const SNAPSHOT_SIZE_BYTES: usize = SNAPSHOT_WORD_COUNT * 4;

/// Word offset: bytes per DMA transfer unit
pub const OFFSET_DMA_BLOCK_SIZE: usize = 4;

/// Word offset: bytes per storage sector
pub const OFFSET_SECTOR_SIZE: usize = 10;

/// Word offsets of the per-channel counters, indexed by channel
pub const OFFSET_SKIPPED_UNITS: [usize; CHANNEL_COUNT] = [12, 15];
pub const OFFSET_WRITTEN_SECTORS: [usize; CHANNEL_COUNT] = [13, 16];
pub const OFFSET_MAX_SECTORS: [usize; CHANNEL_COUNT] = [14, 17];

/// Number of independently tracked storage channels (SD LUNs)
pub const CHANNEL_COUNT: usize = 2;

/// Snapshot status reported when the fetch succeeded
pub const STATUS_OK: u32 = 0;

/// Bytes per GB used for every capacity and throughput figure (2^30)
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Converts GB/s into the MB/s-equivalent units shown as "Mbps"
pub const MBPS_SCALE: f64 = 1024.0;

/// Vendor request: read the debug info register snapshot
pub const CMD_GET_DEBUG_INFO: u8 = 0xB0;

/// Vendor request: read SD device 0 info block
pub const CMD_SDDEV0_INFO: u8 = 0xB5;

/// Vendor request: read SD device 1 info block
pub const CMD_SDDEV1_INFO: u8 = 0xB6;

/// Response size of the SD device info commands
pub const SD_INFO_RESPONSE_SIZE: usize = 32;

/// Bytes of the SD info response that carry fields
pub const SD_INFO_PAYLOAD_SIZE: usize = 27;

/// `card_type` value the firmware uses to flag an error report
pub const SD_INFO_ERROR_CARD_TYPE: u32 = 1111;

/// One raw debug info read from the board.
///
/// Created fresh on every poll and discarded after decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTelemetrySnapshot {
    /// Transport status, `STATUS_OK` on success
    pub status: u32,

    /// Register words, reserved words are zero
    pub words: [u32; SNAPSHOT_WORD_COUNT],

    /// Transfer size increment hint in MB
    pub size_tx_mb_inc: f64,

    /// Whether only the diagnostic subset was requested
    pub diagnostics_only: bool,
}

impl Default for RawTelemetrySnapshot {
    fn default() -> Self {
        Self {
            status: STATUS_OK,
            words: [0; SNAPSHOT_WORD_COUNT],
            size_tx_mb_inc: 0.0,
            diagnostics_only: true,
        }
    }
}

impl RawTelemetrySnapshot {
    /// Build a snapshot from a word slice
    ///
    /// Entry point for anything holding decoded words, including
    /// [`parse_snapshot`](crate::fx3::decoder::parse_snapshot).
    ///
    /// # Panics
    ///
    /// Panics if `words` does not hold exactly `SNAPSHOT_WORD_COUNT` words.
    /// A wrong length here is a caller bug, never a device condition.
    pub fn from_words(words: &[u32], diagnostics_only: bool) -> Self {
        assert_eq!(
            words.len(),
            SNAPSHOT_WORD_COUNT,
            "telemetry snapshot must hold exactly {} words",
            SNAPSHOT_WORD_COUNT
        );

        let mut fixed = [0u32; SNAPSHOT_WORD_COUNT];
        fixed.copy_from_slice(words);

        Self {
            status: STATUS_OK,
            words: fixed,
            size_tx_mb_inc: 0.0,
            diagnostics_only,
        }
    }

    /// Whether the transport reported success for this read
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Counters of one storage channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelCounters {
    /// DMA units dropped instead of written
    pub skipped_transfer_units: u32,

    /// Sectors actually written
    pub written_sector_count: u32,

    /// Channel capacity in sectors
    pub max_sector_count: u32,
}

/// Semantic view over the snapshot words, still in device units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodedTelemetry {
    /// Bytes per storage sector
    pub sector_size: u32,

    /// Bytes per DMA transfer unit
    pub dma_block_size: u32,

    /// Per-channel counters
    pub channels: [ChannelCounters; CHANNEL_COUNT],
}

/// SD card properties reported by the storage interface block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdDeviceInfo {
    pub card_type: u32,
    pub clk_rate: u32,
    pub num_blocks: u32,
    pub erase_size: u32,
    pub block_len: u16,
    pub ccc: u16,
    pub removable: u8,
    pub writeable: u8,
    pub locked: u8,
    pub ddr_mode: u8,
    pub op_voltage: u8,
    pub bus_width: u8,
    pub num_units: u8,
}

impl SdDeviceInfo {
    /// Firmware error code if this block is an error report
    ///
    /// The firmware reuses `clk_rate` to carry the code.
    pub fn error_code(&self) -> Option<u32> {
        if self.card_type == SD_INFO_ERROR_CARD_TYPE {
            Some(self.clk_rate)
        } else {
            None
        }
    }

    /// Card capacity in GB, zero for error reports
    pub fn capacity_gb(&self) -> f64 {
        if self.error_code().is_some() {
            return 0.0;
        }
        self.num_blocks as f64 * self.block_len as f64 / BYTES_PER_GB
    }
}
