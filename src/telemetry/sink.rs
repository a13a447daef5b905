//! # Report Sinks
//!
//! Presentation of throughput reports. The engine only produces numbers;
//! sinks decide how they reach the operator.

use serde::de::Error as _;
use serde::Serialize;
use std::io::Write;
use std::str::FromStr;
use tracing::info;

use super::engine::ThroughputReport;
use crate::error::{Result, SdDumperError};

/// Destination for throughput reports
pub trait ReportSink: Send {
    /// Emit one report
    fn emit(&mut self, report: &ThroughputReport) -> Result<()>;
}

/// Output format selected in the `[report]` config section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Classic one-line console summary
    Text,
    /// One JSON object per line
    JsonLines,
    /// Structured `tracing` event
    Log,
}

impl FromStr for ReportFormat {
    type Err = SdDumperError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "jsonl" => Ok(Self::JsonLines),
            "log" => Ok(Self::Log),
            other => Err(SdDumperError::Config(toml::de::Error::custom(format!(
                "unknown report format '{}' (expected text, jsonl or log)",
                other
            )))),
        }
    }
}

/// Build the stderr-backed sink for a format
pub fn stderr_sink(format: ReportFormat) -> Box<dyn ReportSink> {
    match format {
        ReportFormat::Text => Box::new(TextSink::new(std::io::stderr())),
        ReportFormat::JsonLines => Box::new(JsonLinesSink::new(std::io::stderr())),
        ReportFormat::Log => Box::new(TracingSink),
    }
}

/// Writes the console line operators of the capture board are used to:
///
/// ```text
/// SR 84.2, wr 84.1  [0] 0.000 / 1.250 (29.721)  lost  0.000%     [1] ...
/// ```
pub struct TextSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> TextSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ReportSink for TextSink<W> {
    fn emit(&mut self, report: &ThroughputReport) -> Result<()> {
        let mut line = format!(
            "SR {:.1}, wr {:.1}  ",
            report.receive_speed_mbps, report.write_speed_mbps
        );

        for (i, channel) in report.channels.iter().enumerate() {
            line.push_str(&format!(
                "[{}] {:.3} / {:.3} ({:.3})  lost {:6.3}%     ",
                i, channel.skipped_gb, channel.written_gb, channel.max_gb, channel.loss_percent
            ));
        }

        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    timestamp: String,
    #[serde(flatten)]
    report: &'a ThroughputReport,
}

/// Writes each report as a JSON line stamped with the emission time
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ReportSink for JsonLinesSink<W> {
    fn emit(&mut self, report: &ThroughputReport) -> Result<()> {
        let record = JsonRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            report,
        };

        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Logs each report as a structured `tracing` event
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn emit(&mut self, report: &ThroughputReport) -> Result<()> {
        let [ch0, ch1] = &report.channels;
        info!(
            receive_mbps = report.receive_speed_mbps,
            write_mbps = report.write_speed_mbps,
            ch0_written_gb = ch0.written_gb,
            ch0_skipped_gb = ch0.skipped_gb,
            ch0_max_gb = ch0.max_gb,
            ch0_loss_percent = ch0.loss_percent,
            ch1_written_gb = ch1.written_gb,
            ch1_skipped_gb = ch1.skipped_gb,
            ch1_max_gb = ch1.max_gb,
            ch1_loss_percent = ch1.loss_percent,
            "throughput"
        );
        Ok(())
    }
}
