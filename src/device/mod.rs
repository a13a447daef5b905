//! # Device Module
//!
//! Connection to the FX3 capture board.
//!
//! This module handles:
//! - The `DeviceSession` interface consumed by the monitor and control path
//! - Selecting the driver backend once at startup
//! - The native libusb backend

pub mod session;
pub mod usb;

use serde::de::Error as _;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::DeviceConfig;
use crate::error::{Result, SdDumperError};
use session::DeviceSession;
use usb::UsbSession;

/// Driver backend named in the `[device]` config section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// libusb, available on every host
    NativeUsb,
    /// Cypress vendor API (CyAPI), a closed Windows-only driver
    VendorApi,
}

impl FromStr for DriverKind {
    type Err = SdDumperError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "libusb" => Ok(Self::NativeUsb),
            "cypress" => Ok(Self::VendorApi),
            other => Err(SdDumperError::Config(toml::de::Error::custom(format!(
                "unknown driver '{}' (expected libusb or cypress)",
                other
            )))),
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NativeUsb => write!(f, "libusb"),
            Self::VendorApi => write!(f, "cypress"),
        }
    }
}

/// Backend that will actually serve a requested driver kind
///
/// There are no CyAPI bindings, so the vendor driver always resolves to
/// the native backend.
pub fn effective_driver(requested: DriverKind) -> DriverKind {
    match requested {
        DriverKind::NativeUsb => DriverKind::NativeUsb,
        DriverKind::VendorApi => {
            warn!("The cypress driver is not available here, falling back to libusb");
            DriverKind::NativeUsb
        }
    }
}

/// Open a device session with the configured driver
///
/// # Errors
///
/// Returns error if the driver name is unknown or the board cannot be opened
pub fn open_session(config: &DeviceConfig) -> Result<Arc<dyn DeviceSession>> {
    let requested: DriverKind = config.driver.parse()?;
    info!("Requested driver: {}", requested);

    match effective_driver(requested) {
        DriverKind::NativeUsb => Ok(Arc::new(UsbSession::open(config)?)),
        DriverKind::VendorApi => Err(SdDumperError::Device(
            "cypress driver is not supported".to_string(),
        )),
    }
}
