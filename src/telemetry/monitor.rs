//! # Sampling Loop
//!
//! Background task that polls the board on a fixed period, feeds the
//! throughput engine and hands reports to a sink.
//!
//! ## Lifecycle
//!
//! `Idle` → `Running` on [`Monitor::spawn`]. The task leaves `Running` when
//! the stop signal is raised, when the session reports itself unhealthy, or
//! after the first failed fetch. It then passes through `Stopping` and ends
//! in `Stopped`. Shutdown from the control path is two-phase: call
//! [`MonitorHandle::stop`], then await [`MonitorHandle::join`] before
//! dropping the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::engine::ThroughputEngine;
use super::sink::ReportSink;
use crate::config::MonitorConfig;
use crate::device::session::DeviceSession;
use crate::error::{Result, SdDumperError};
use crate::fx3::decoder::decode_telemetry;

/// Externally visible phase of the sampling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Why the sampling loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Stop requested by the control path
    Cancelled,
    /// The session reported itself unhealthy
    DeviceUnhealthy,
    /// A snapshot fetch failed
    FetchFailed(String),
}

/// Summary returned by the sampling task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorExit {
    pub reason: ExitReason,
    pub reports_emitted: u64,
}

struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

/// Cancellation flag shared between the control path and the sampling task
///
/// Raising it also wakes a sampling task that is sleeping out its period.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Request the sampling task to stop
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Sleep for `period` unless stopped first
    ///
    /// # Returns
    ///
    /// * `bool` - `true` if the signal was raised before or during the sleep
    pub async fn sleep(&self, period: Duration) -> bool {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent stop() is not missed
        notified.as_mut().enable();

        if self.is_stopped() {
            return true;
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => self.is_stopped(),
            _ = notified => true,
        }
    }
}

/// Sampling loop parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Time between two snapshots
    pub period: Duration,

    /// Request only the diagnostic subset of the snapshot
    pub diagnostics_only: bool,

    /// Compute speeds over measured instead of nominal elapsed time
    pub measured_elapsed: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
            diagnostics_only: false,
            measured_elapsed: false,
        }
    }
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            period: Duration::from_millis(config.period_ms),
            diagnostics_only: config.diagnostics_only,
            measured_elapsed: config.measured_elapsed,
        }
    }
}

/// Sampling loop, owning its engine and sink
pub struct Monitor {
    session: Arc<dyn DeviceSession>,
    engine: ThroughputEngine,
    sink: Box<dyn ReportSink>,
    settings: MonitorSettings,
    stop: StopSignal,
    state: watch::Sender<MonitorState>,
}

impl Monitor {
    /// Create an idle monitor
    ///
    /// # Arguments
    ///
    /// * `session` - Board to poll, shared with the control path
    /// * `sink` - Destination of the reports
    /// * `settings` - Period and fetch mode
    pub fn new(
        session: Arc<dyn DeviceSession>,
        sink: Box<dyn ReportSink>,
        settings: MonitorSettings,
    ) -> Self {
        let (state, _) = watch::channel(MonitorState::Idle);
        Self {
            session,
            engine: ThroughputEngine::new(settings.period),
            sink,
            settings,
            stop: StopSignal::new(),
            state,
        }
    }

    /// Stop signal observed by this monitor
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    /// Start the sampling task
    pub fn spawn(self) -> MonitorHandle {
        self.state.send_replace(MonitorState::Running);
        let stop = self.stop.clone();
        let state = self.state.subscribe();
        let task = tokio::spawn(self.run());

        MonitorHandle { stop, state, task }
    }

    async fn run(mut self) -> MonitorExit {
        info!(
            "Poller started (period {:?}, diagnostics only: {})",
            self.settings.period, self.settings.diagnostics_only
        );

        let mut reports_emitted: u64 = 0;
        let mut last_sample = Instant::now();

        let reason = loop {
            if self.stop.sleep(self.settings.period).await {
                break ExitReason::Cancelled;
            }

            if !self.session.is_healthy() {
                warn!("Device session is unhealthy, stopping poller");
                break ExitReason::DeviceUnhealthy;
            }

            let snapshot = match self.session.fetch_snapshot(self.settings.diagnostics_only).await {
                Ok(snapshot) if snapshot.is_ok() => snapshot,
                Ok(snapshot) => {
                    error!("Board returned debug info status {}", snapshot.status);
                    break ExitReason::FetchFailed(format!("status {}", snapshot.status));
                }
                Err(e) => {
                    error!("Failed to fetch debug info: {}", e);
                    break ExitReason::FetchFailed(e.to_string());
                }
            };

            let now = Instant::now();
            let elapsed = now - last_sample;
            last_sample = now;

            let decoded = decode_telemetry(&snapshot);
            debug!("Decoded telemetry: {:?}", decoded);

            let report = if self.settings.measured_elapsed {
                self.engine.tick_with_elapsed(&decoded, elapsed)
            } else {
                self.engine.tick(&decoded)
            };

            if let Some(report) = report {
                match self.sink.emit(&report) {
                    Ok(()) => reports_emitted += 1,
                    Err(e) => warn!("Failed to emit throughput report: {}", e),
                }
            }
        };

        self.state.send_replace(MonitorState::Stopping);
        info!("Poller finished: {:?}, {} reports", reason, reports_emitted);
        self.state.send_replace(MonitorState::Stopped);

        MonitorExit {
            reason,
            reports_emitted,
        }
    }
}

/// Control-path handle of a running sampling task
pub struct MonitorHandle {
    stop: StopSignal,
    state: watch::Receiver<MonitorState>,
    task: JoinHandle<MonitorExit>,
}

impl MonitorHandle {
    /// Phase one of shutdown: raise the stop signal
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    /// Resolve once the task has reached `Stopped` (or vanished)
    pub async fn finished(&self) {
        let mut state = self.state.clone();
        // Err means the task dropped its sender, which also means it ended
        let _ = state.wait_for(|s| *s == MonitorState::Stopped).await;
    }

    /// Phase two of shutdown: wait for the task to exit
    ///
    /// No timeout is applied.
    pub async fn join(self) -> Result<MonitorExit> {
        self.task
            .await
            .map_err(|e| SdDumperError::Device(format!("Poller task failed: {}", e)))
    }
}
