//! Trait abstraction for the device session to enable testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use crate::error::Result;
use crate::fx3::protocol::{RawTelemetrySnapshot, SdDeviceInfo};

/// Asynchronous notifications raised by a device backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A transfer failed, the session is no longer healthy
    TransportError(String),
    /// The board went away
    Disconnected,
}

/// Callback invoked from whichever task observed the event
pub type EventHandler = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// Operations the monitor and the control path need from a connected board
///
/// Shared between the sampling task and the foreground task, so every
/// method takes `&self`; backends serialize access to the transport
/// themselves.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Read one debug info register snapshot
    async fn fetch_snapshot(&self, diagnostics_only: bool) -> Result<RawTelemetrySnapshot>;

    /// Cheap, non-blocking health probe
    fn is_healthy(&self) -> bool;

    /// Register or clear (`None`) the event handler
    fn set_event_handler(&self, handler: Option<EventHandler>);

    /// Read the info block of SD device `lun` (0 or 1)
    async fn read_sd_info(&self, lun: u8) -> Result<SdDeviceInfo>;

    /// Human readable backend description for logs
    fn description(&self) -> String;
}

/// Health flag plus optional event handler, shared by backends
pub struct SessionHealth {
    healthy: AtomicBool,
    handler: Mutex<Option<EventHandler>>,
}

impl Default for SessionHealth {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            handler: Mutex::new(None),
        }
    }
}

impl SessionHealth {
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_handler(&self, handler: Option<EventHandler>) {
        match self.handler.lock() {
            Ok(mut slot) => *slot = handler,
            Err(poisoned) => *poisoned.into_inner() = handler,
        }
    }

    /// Mark the session failed and notify the handler, if any
    pub fn fail(&self, event: DeviceEvent) {
        self.healthy.store(false, Ordering::Release);
        warn!("Device session failed: {:?}", event);

        let handler = match self.handler.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use crate::error::SdDumperError;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Scripted device session for testing
    ///
    /// Serves queued fetch results in order, then keeps returning the
    /// fallback snapshot (or an error if none is set).
    #[derive(Clone)]
    pub struct ScriptedSession {
        pub script: Arc<Mutex<VecDeque<Result<RawTelemetrySnapshot>>>>,
        pub fallback: Arc<Mutex<Option<RawTelemetrySnapshot>>>,
        pub fetch_count: Arc<AtomicUsize>,
        pub health: Arc<SessionHealth>,
    }

    impl ScriptedSession {
        pub fn new() -> Self {
            Self {
                script: Arc::new(Mutex::new(VecDeque::new())),
                fallback: Arc::new(Mutex::new(None)),
                fetch_count: Arc::new(AtomicUsize::new(0)),
                health: Arc::new(SessionHealth::default()),
            }
        }

        pub fn repeating(snapshot: RawTelemetrySnapshot) -> Self {
            let session = Self::new();
            *session.fallback.lock().unwrap() = Some(snapshot);
            session
        }

        pub fn push(&self, result: Result<RawTelemetrySnapshot>) {
            self.script.lock().unwrap().push_back(result);
        }

        pub fn fetches(&self) -> usize {
            self.fetch_count.load(Ordering::SeqCst)
        }

        pub fn set_unhealthy(&self) {
            self.health.fail(DeviceEvent::Disconnected);
        }
    }

    #[async_trait]
    impl DeviceSession for ScriptedSession {
        async fn fetch_snapshot(&self, _diagnostics_only: bool) -> Result<RawTelemetrySnapshot> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            if let Some(result) = self.script.lock().unwrap().pop_front() {
                return result;
            }
            match self.fallback.lock().unwrap().clone() {
                Some(snapshot) => Ok(snapshot),
                None => Err(SdDumperError::Device("script exhausted".to_string())),
            }
        }

        fn is_healthy(&self) -> bool {
            self.health.is_healthy()
        }

        fn set_event_handler(&self, handler: Option<EventHandler>) {
            self.health.set_handler(handler);
        }

        async fn read_sd_info(&self, lun: u8) -> Result<SdDeviceInfo> {
            Err(SdDumperError::Device(format!("no SD device {}", lun)))
        }

        fn description(&self) -> String {
            "scripted".to_string()
        }
    }
}
