//! # Throughput Engine
//!
//! Turns successive decoded snapshots into bandwidth and loss figures.
//!
//! The engine keeps the cumulative written/skipped totals of the previous
//! tick. Rates are deltas between two ticks divided by the tick period, so
//! the very first tick only primes the totals and produces no report.
//!
//! Counter resets on the board show up as negative rates; they are passed
//! through unchanged.

use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::fx3::protocol::{DecodedTelemetry, BYTES_PER_GB, CHANNEL_COUNT, MBPS_SCALE};

/// Figures of one storage channel for one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelReport {
    /// Data dropped so far, in GB
    pub skipped_gb: f64,

    /// Data written so far, in GB
    pub written_gb: f64,

    /// Channel capacity, in GB
    pub max_gb: f64,

    /// Share of dropped data in percent (0 when nothing moved yet)
    pub loss_percent: f64,
}

/// Throughput figures produced by every tick after the first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputReport {
    /// Incoming data rate (written + skipped), MB/s-equivalent
    pub receive_speed_mbps: f64,

    /// Rate of data reaching storage, MB/s-equivalent
    pub write_speed_mbps: f64,

    pub total_written_gb: f64,
    pub total_skipped_gb: f64,
    pub delta_written_gb: f64,
    pub delta_total_gb: f64,

    /// Time base the speeds were computed over
    pub elapsed_secs: f64,

    pub channels: [ChannelReport; CHANNEL_COUNT],
}

/// Stateful throughput accumulator
///
/// Owned by exactly one sampling loop; ticks are strictly sequential.
#[derive(Debug, Clone)]
pub struct ThroughputEngine {
    period: Duration,
    previous_written_gb: f64,
    previous_skipped_gb: f64,
    is_first_tick: bool,
}

impl ThroughputEngine {
    /// Create an engine for a fixed tick period
    ///
    /// # Arguments
    ///
    /// * `period` - Nominal time between two ticks
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            previous_written_gb: 0.0,
            previous_skipped_gb: 0.0,
            is_first_tick: true,
        }
    }

    /// Nominal tick period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Process one snapshot assuming the nominal period elapsed
    ///
    /// # Returns
    ///
    /// * `Option<ThroughputReport>` - `None` on the first tick, a report afterwards
    pub fn tick(&mut self, decoded: &DecodedTelemetry) -> Option<ThroughputReport> {
        self.tick_with_elapsed(decoded, self.period)
    }

    /// Process one snapshot with a measured elapsed time
    ///
    /// A zero `elapsed` falls back to the nominal period.
    pub fn tick_with_elapsed(
        &mut self,
        decoded: &DecodedTelemetry,
        elapsed: Duration,
    ) -> Option<ThroughputReport> {
        let sector_size = decoded.sector_size as f64;
        let dma_block_size = decoded.dma_block_size as f64;

        let mut channels = [ChannelReport {
            skipped_gb: 0.0,
            written_gb: 0.0,
            max_gb: 0.0,
            loss_percent: 0.0,
        }; CHANNEL_COUNT];

        for (report, counters) in channels.iter_mut().zip(decoded.channels.iter()) {
            let written_gb = counters.written_sector_count as f64 * sector_size / BYTES_PER_GB;
            let skipped_gb = counters.skipped_transfer_units as f64 * dma_block_size / BYTES_PER_GB;
            let max_gb = counters.max_sector_count as f64 * sector_size / BYTES_PER_GB;

            *report = ChannelReport {
                skipped_gb,
                written_gb,
                max_gb,
                loss_percent: loss_percent(skipped_gb, written_gb),
            };
        }

        let total_written_gb: f64 = channels.iter().map(|c| c.written_gb).sum();
        let total_skipped_gb: f64 = channels.iter().map(|c| c.skipped_gb).sum();

        let delta_written_gb = total_written_gb - self.previous_written_gb;
        let delta_total_gb = (total_written_gb + total_skipped_gb)
            - (self.previous_written_gb + self.previous_skipped_gb);

        let first = self.is_first_tick;
        self.previous_written_gb = total_written_gb;
        self.previous_skipped_gb = total_skipped_gb;
        self.is_first_tick = false;

        if first {
            debug!(
                "First sample primed: written {:.3} GB, skipped {:.3} GB",
                total_written_gb, total_skipped_gb
            );
            return None;
        }

        if delta_total_gb < 0.0 {
            debug!("Board counters went backwards by {:.3} GB", -delta_total_gb);
        }

        let elapsed = if elapsed.is_zero() { self.period } else { elapsed };
        let elapsed_secs = elapsed.as_secs_f64();

        Some(ThroughputReport {
            receive_speed_mbps: MBPS_SCALE * delta_total_gb / elapsed_secs,
            write_speed_mbps: MBPS_SCALE * delta_written_gb / elapsed_secs,
            total_written_gb,
            total_skipped_gb,
            delta_written_gb,
            delta_total_gb,
            elapsed_secs,
            channels,
        })
    }
}

/// Percentage of skipped data, defined as 0 when nothing was moved
pub fn loss_percent(skipped_gb: f64, written_gb: f64) -> f64 {
    let moved = written_gb + skipped_gb;
    if moved == 0.0 {
        0.0
    } else {
        100.0 * skipped_gb / moved
    }
}
