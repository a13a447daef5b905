//! # Native USB Backend
//!
//! Talks to the FX3 streamer firmware through libusb vendor control
//! transfers. libusb calls block, so each transfer runs on the blocking
//! thread pool.

use async_trait::async_trait;
use rusb::{Context, DeviceHandle, Direction, Recipient, RequestType, UsbContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::session::{DeviceEvent, DeviceSession, EventHandler, SessionHealth};
use crate::config::DeviceConfig;
use crate::error::{Result, SdDumperError};
use crate::fx3::decoder::{decode_sd_device_info, parse_snapshot};
use crate::fx3::protocol::{
    RawTelemetrySnapshot, SdDeviceInfo, CMD_GET_DEBUG_INFO, CMD_SDDEV0_INFO, CMD_SDDEV1_INFO,
    SD_INFO_RESPONSE_SIZE, SNAPSHOT_SIZE_BYTES,
};

/// Session over a libusb device handle
pub struct UsbSession {
    handle: Arc<DeviceHandle<Context>>,
    interface: u8,
    timeout: Duration,
    vendor_id: u16,
    product_id: u16,
    health: SessionHealth,
}

impl std::fmt::Debug for UsbSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbSession")
            .field("vendor_id", &self.vendor_id)
            .field("product_id", &self.product_id)
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

impl UsbSession {
    /// Open the first board matching the configured VID/PID
    ///
    /// # Errors
    ///
    /// - `Usb`: libusb could not be initialised or the interface could not be claimed
    /// - `DeviceNotFound`: no matching device on the bus
    pub fn open(config: &DeviceConfig) -> Result<Self> {
        debug!(
            "Looking for FX3 device {:04X}:{:04X}",
            config.vendor_id, config.product_id
        );

        let context = Context::new()?;
        let mut handle = context
            .open_device_with_vid_pid(config.vendor_id, config.product_id)
            .ok_or(SdDumperError::DeviceNotFound {
                vendor_id: config.vendor_id,
                product_id: config.product_id,
            })?;

        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", e);
        }
        handle.claim_interface(config.interface)?;

        info!(
            "Opened FX3 device {:04X}:{:04X}, interface {}",
            config.vendor_id, config.product_id, config.interface
        );

        Ok(Self {
            handle: Arc::new(handle),
            interface: config.interface,
            timeout: Duration::from_millis(config.timeout_ms),
            vendor_id: config.vendor_id,
            product_id: config.product_id,
            health: SessionHealth::default(),
        })
    }

    /// Issue a vendor IN control request and return the received bytes
    ///
    /// There is no retry. Whether a failure marks the session unhealthy
    /// depends on `kind`.
    async fn control_in(
        &self,
        kind: Transfer,
        request: u8,
        value: u16,
        length: usize,
    ) -> Result<Vec<u8>> {
        let handle = Arc::clone(&self.handle);
        let timeout = self.timeout;

        let transfer = tokio::task::spawn_blocking(move || {
            let request_type =
                rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
            let mut buf = vec![0u8; length];
            let received = handle.read_control(request_type, request, value, 0, &mut buf, timeout)?;
            buf.truncate(received);
            Ok::<_, rusb::Error>(buf)
        })
        .await
        .map_err(|e| SdDumperError::Device(format!("USB transfer task failed: {}", e)))?;

        match transfer {
            Ok(buf) => {
                debug!("Request 0x{:02X}: received {} bytes", request, buf.len());
                Ok(buf)
            }
            Err(e) => Err(transfer_failed(&self.health, kind, request, e)),
        }
    }
}

/// Purpose of a control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    /// Periodic debug info read
    Telemetry,
    /// One-off SD device info read at startup
    SdInfo,
}

impl Transfer {
    /// Only telemetry reads take the session down; SD info is informational
    fn marks_unhealthy(self) -> bool {
        matches!(self, Transfer::Telemetry)
    }
}

/// Record a failed transfer and turn it into the crate error
fn transfer_failed(
    health: &SessionHealth,
    transfer: Transfer,
    request: u8,
    error: rusb::Error,
) -> SdDumperError {
    if transfer.marks_unhealthy() {
        let event = if error == rusb::Error::NoDevice {
            DeviceEvent::Disconnected
        } else {
            DeviceEvent::TransportError(format!("request 0x{:02X}: {}", request, error))
        };
        health.fail(event);
    } else {
        debug!("Request 0x{:02X} failed: {}", request, error);
    }

    error.into()
}

#[async_trait]
impl DeviceSession for UsbSession {
    async fn fetch_snapshot(&self, diagnostics_only: bool) -> Result<RawTelemetrySnapshot> {
        let payload = self
            .control_in(
                Transfer::Telemetry,
                CMD_GET_DEBUG_INFO,
                diagnostics_only as u16,
                SNAPSHOT_SIZE_BYTES,
            )
            .await?;
        parse_snapshot(&payload, diagnostics_only)
    }

    fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    fn set_event_handler(&self, handler: Option<EventHandler>) {
        self.health.set_handler(handler);
    }

    async fn read_sd_info(&self, lun: u8) -> Result<SdDeviceInfo> {
        let request = sd_info_request(lun)?;
        let payload = self
            .control_in(Transfer::SdInfo, request, 0, SD_INFO_RESPONSE_SIZE)
            .await?;
        decode_sd_device_info(&payload)
    }

    fn description(&self) -> String {
        format!("libusb {:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}

impl Drop for UsbSession {
    fn drop(&mut self) {
        if let Some(handle) = Arc::get_mut(&mut self.handle) {
            if let Err(e) = handle.release_interface(self.interface) {
                debug!("Failed to release interface {}: {}", self.interface, e);
            }
        }
    }
}

/// Vendor request reading the info block of SD device `lun`
fn sd_info_request(lun: u8) -> Result<u8> {
    match lun {
        0 => Ok(CMD_SDDEV0_INFO),
        1 => Ok(CMD_SDDEV1_INFO),
        other => Err(SdDumperError::Device(format!(
            "SD device index {} out of range (0-1)",
            other
        ))),
    }
}
