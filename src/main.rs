//! # SD Dumper
//!
//! Throughput monitor for FX3-based USB3 SD capture boards.
//!
//! Opens the board, reports both SD devices, then prints receive/write
//! speed and per-channel loss every sampling period until stopped.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use sd_dumper::config::Config;
use sd_dumper::device::open_session;
use sd_dumper::device::session::{DeviceEvent, DeviceSession};
use sd_dumper::fx3::protocol::{SdDeviceInfo, CHANNEL_COUNT};
use sd_dumper::telemetry::monitor::{
    ExitReason, Monitor, MonitorExit, MonitorHandle, MonitorSettings,
};
use sd_dumper::telemetry::sink::stderr_sink;

/// Settle time between opening the board and querying it
const DEVICE_SETTLE_MS: u64 = 500;

/// Main entry point for SD Dumper
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Set up logging with tracing subscriber
///    - Load configuration (optional path argument)
///    - Open the board with the configured driver and log SD device info
///
/// 2. **Monitoring**
///    - Spawn the sampling loop (one report per period after the first)
///    - Wait for Enter, Ctrl+C, a device failure, or the loop ending
///
/// 3. **Graceful Shutdown**
///    - Unregister the device event handler
///    - Signal the loop to stop and wait until it has exited
///    - Release the device
///
/// # Errors
///
/// Returns error if the configuration is invalid, the board cannot be
/// opened, or monitoring ended because of a device failure.
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/sd-dumper.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let (log_writer, _log_guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::fmt()
        .with_writer(log_writer)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .init();

    info!("SD Dumper v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => {
            info!("No configuration file given, using defaults");
            Config::default()
        }
    };

    info!("Wait while device is being initialized...");
    let session = open_session(&config.device).context("Problems with hardware or driver type")?;
    info!("Device was initialized: {}", session.description());

    tokio::time::sleep(Duration::from_millis(DEVICE_SETTLE_MS)).await;
    report_sd_devices(session.as_ref()).await;

    session.set_event_handler(Some(Arc::new(|event: DeviceEvent| {
        warn!("Device event: {:?}", event);
    })));

    let monitor = Monitor::new(
        Arc::clone(&session),
        stderr_sink(config.report_format()?),
        MonitorSettings::from(&config.monitor),
    );
    let handle = monitor.spawn();

    let mut keypress = spawn_keypress_listener()?;
    let health_poll = Duration::from_millis(config.monitor.health_poll_ms);

    info!("Press Enter or Ctrl+C to stop");
    let cause = wait_for_stop(session.as_ref(), &handle, &mut keypress, health_poll).await;

    session.set_event_handler(None);

    handle.stop();
    let exit = handle.join().await?;
    info!("Poller thread finished ({} reports)", exit.reports_emitted);

    drop(session);
    info!("Done");

    shutdown_outcome(cause, &exit)
}

/// What ended the foreground wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopCause {
    /// Enter or Ctrl+C
    UserRequest,
    /// The health poll found the session unhealthy
    DeviceUnhealthy,
    /// The sampling task stopped by itself
    PollerEnded,
}

/// Block the control path until a stop is requested or monitoring ends
async fn wait_for_stop(
    session: &dyn DeviceSession,
    handle: &MonitorHandle,
    keypress: &mut mpsc::UnboundedReceiver<()>,
    health_poll: Duration,
) -> StopCause {
    let mut health_poll = interval(health_poll);

    loop {
        tokio::select! {
            Some(()) = keypress.recv() => {
                info!("Key pressed, shutting down...");
                break StopCause::UserRequest;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break StopCause::UserRequest;
            }

            _ = health_poll.tick() => {
                if !session.is_healthy() {
                    warn!("Device is not healthy, shutting down...");
                    break StopCause::DeviceUnhealthy;
                }
            }

            _ = handle.finished() => {
                debug!("Poller ended on its own");
                break StopCause::PollerEnded;
            }
        }
    }
}

/// Map how monitoring ended onto the process result
///
/// Only a user stop with a cleanly cancelled poller is a success. A failed
/// health poll fails the run even though the poller itself saw a cancel.
fn shutdown_outcome(cause: StopCause, exit: &MonitorExit) -> Result<()> {
    match (&exit.reason, cause) {
        (ExitReason::FetchFailed(reason), _) => {
            error!("Monitoring stopped: {}", reason);
            bail!("failed to read debug info: {}", reason)
        }
        (ExitReason::DeviceUnhealthy, _) | (ExitReason::Cancelled, StopCause::DeviceUnhealthy) => {
            error!("Monitoring stopped: device failure");
            bail!("device failure")
        }
        (ExitReason::Cancelled, _) => Ok(()),
    }
}

/// Log the info blocks of both SD devices
///
/// A failed read is only a warning; monitoring still starts.
async fn report_sd_devices(session: &dyn DeviceSession) {
    for lun in 0..CHANNEL_COUNT as u8 {
        match session.read_sd_info(lun).await {
            Ok(info) => log_sd_info(lun, &info),
            Err(e) => warn!("Failed to read SD device {} info: {}", lun, e),
        }
    }
}

fn log_sd_info(lun: u8, info: &SdDeviceInfo) {
    if let Some(code) = info.error_code() {
        warn!("SD device {}: error 0x{:02X}", lun, code);
        return;
    }

    info!(
        card_type = info.card_type,
        clk_rate = info.clk_rate,
        num_blocks = info.num_blocks,
        erase_size = info.erase_size,
        block_len = info.block_len,
        ccc = info.ccc,
        removable = info.removable,
        writeable = info.writeable,
        locked = info.locked,
        ddr_mode = info.ddr_mode,
        op_voltage = info.op_voltage,
        bus_width = info.bus_width,
        num_units = info.num_units,
        "SD device {}: {:.3} GB",
        lun,
        info.capacity_gb()
    );
}

/// Forward each line typed on stdin as a stop request
///
/// Runs on a plain thread because a blocking stdin read would otherwise
/// hold up runtime shutdown. The channel closes on EOF.
fn spawn_keypress_listener() -> Result<mpsc::UnboundedReceiver<()>> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::Builder::new()
        .name("sd-dumper-stdin".into())
        .spawn(move || {
            let mut line = String::new();
            while let Ok(n) = std::io::stdin().read_line(&mut line) {
                if n == 0 || tx.send(()).is_err() {
                    break;
                }
                line.clear();
            }
        })
        .context("Failed to spawn stdin listener")?;

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sd_dumper::device::session::EventHandler;
    use sd_dumper::error::SdDumperError;
    use sd_dumper::fx3::protocol::RawTelemetrySnapshot;
    use sd_dumper::telemetry::engine::ThroughputReport;
    use sd_dumper::telemetry::sink::ReportSink;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubSession {
        healthy: Arc<AtomicBool>,
        fail_fetch: bool,
    }

    impl StubSession {
        fn new(fail_fetch: bool) -> Self {
            Self {
                healthy: Arc::new(AtomicBool::new(true)),
                fail_fetch,
            }
        }
    }

    #[async_trait]
    impl DeviceSession for StubSession {
        async fn fetch_snapshot(
            &self,
            diagnostics_only: bool,
        ) -> sd_dumper::error::Result<RawTelemetrySnapshot> {
            if self.fail_fetch {
                return Err(SdDumperError::Protocol("short read".to_string()));
            }
            Ok(RawTelemetrySnapshot {
                diagnostics_only,
                ..Default::default()
            })
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        fn set_event_handler(&self, _handler: Option<EventHandler>) {}

        async fn read_sd_info(&self, lun: u8) -> sd_dumper::error::Result<SdDeviceInfo> {
            Err(SdDumperError::Device(format!("no SD device {}", lun)))
        }

        fn description(&self) -> String {
            "stub".to_string()
        }
    }

    struct NullSink;

    impl ReportSink for NullSink {
        fn emit(&mut self, _report: &ThroughputReport) -> sd_dumper::error::Result<()> {
            Ok(())
        }
    }

    const HEALTH_POLL: Duration = Duration::from_millis(100);

    fn spawn_monitor(session: &Arc<StubSession>) -> MonitorHandle {
        let session: Arc<dyn DeviceSession> = Arc::clone(session) as Arc<dyn DeviceSession>;
        Monitor::new(session, Box::new(NullSink), MonitorSettings::default()).spawn()
    }

    fn exit(reason: ExitReason) -> MonitorExit {
        MonitorExit {
            reason,
            reports_emitted: 0,
        }
    }

    #[test]
    fn test_user_stop_with_cancelled_poller_succeeds() {
        assert!(shutdown_outcome(StopCause::UserRequest, &exit(ExitReason::Cancelled)).is_ok());
        assert!(shutdown_outcome(StopCause::PollerEnded, &exit(ExitReason::Cancelled)).is_ok());
    }

    #[test]
    fn test_health_poll_stop_fails_even_when_poller_cancelled() {
        let result = shutdown_outcome(StopCause::DeviceUnhealthy, &exit(ExitReason::Cancelled));
        assert_eq!(result.unwrap_err().to_string(), "device failure");
    }

    #[test]
    fn test_unhealthy_poller_fails_for_any_cause() {
        for cause in [StopCause::UserRequest, StopCause::DeviceUnhealthy, StopCause::PollerEnded] {
            let result = shutdown_outcome(cause, &exit(ExitReason::DeviceUnhealthy));
            assert!(result.is_err(), "{:?} should fail", cause);
        }
    }

    #[test]
    fn test_failed_fetch_fails_with_reason() {
        let result = shutdown_outcome(
            StopCause::PollerEnded,
            &exit(ExitReason::FetchFailed("status 5".to_string())),
        );
        assert!(result.unwrap_err().to_string().contains("status 5"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keypress_stops_cleanly() {
        let session = Arc::new(StubSession::new(false));
        let handle = spawn_monitor(&session);
        let (tx, mut keypress) = mpsc::unbounded_channel();
        tx.send(()).unwrap();

        let cause = wait_for_stop(session.as_ref(), &handle, &mut keypress, HEALTH_POLL).await;
        assert_eq!(cause, StopCause::UserRequest);

        handle.stop();
        let exit = handle.join().await.unwrap();
        assert_eq!(exit.reason, ExitReason::Cancelled);
        assert!(shutdown_outcome(cause, &exit).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_session_stops_with_failure() {
        let session = Arc::new(StubSession::new(false));
        let handle = spawn_monitor(&session);
        let (_tx, mut keypress) = mpsc::unbounded_channel();

        let healthy = Arc::clone(&session.healthy);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            healthy.store(false, Ordering::SeqCst);
        });

        let cause = wait_for_stop(session.as_ref(), &handle, &mut keypress, HEALTH_POLL).await;
        assert_eq!(cause, StopCause::DeviceUnhealthy);

        handle.stop();
        let exit = handle.join().await.unwrap();
        assert!(shutdown_outcome(cause, &exit).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_ending_on_its_own_is_reported() {
        let session = Arc::new(StubSession::new(true));
        let handle = spawn_monitor(&session);
        let (_tx, mut keypress) = mpsc::unbounded_channel();

        let cause = wait_for_stop(session.as_ref(), &handle, &mut keypress, HEALTH_POLL).await;
        assert_eq!(cause, StopCause::PollerEnded);

        handle.stop();
        let exit = handle.join().await.unwrap();
        assert!(matches!(exit.reason, ExitReason::FetchFailed(_)));
        assert!(shutdown_outcome(cause, &exit).is_err());
    }

    #[test]
    fn test_device_settle_constant() {
        assert_eq!(DEVICE_SETTLE_MS, 500);
    }

    #[test]
    fn test_default_monitor_settings() {
        let settings = MonitorSettings::from(&Config::default().monitor);
        assert_eq!(settings.period, Duration::from_secs(5));
        assert!(!settings.diagnostics_only);
        assert!(!settings.measured_elapsed);
    }

    #[test]
    fn test_log_sd_info_error_block_does_not_panic() {
        let info = SdDeviceInfo {
            card_type: 1111,
            clk_rate: 0x4A,
            num_blocks: 0,
            erase_size: 0,
            block_len: 0,
            ccc: 0,
            removable: 0,
            writeable: 0,
            locked: 0,
            ddr_mode: 0,
            op_voltage: 0,
            bus_width: 0,
            num_units: 0,
        };
        log_sd_info(0, &info);
    }
}
