//! # Error Types
//!
//! Custom error types for SD Dumper using `thiserror`.

use thiserror::Error;

/// Main error type for SD Dumper
#[derive(Debug, Error)]
pub enum SdDumperError {
    /// Device session errors (backend selection, unhealthy session)
    #[error("Device error: {0}")]
    Device(String),

    /// No matching USB device on the bus
    #[error("No FX3 device found (VID 0x{vendor_id:04X}, PID 0x{product_id:04X})")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    /// libusb transport errors
    #[error("USB transport error: {0}")]
    Usb(#[from] rusb::Error),

    /// Malformed responses from the board
    #[error("FX3 protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for SD Dumper
pub type Result<T> = std::result::Result<T, SdDumperError>;
