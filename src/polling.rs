//! Background polling of the hardware error report.
//!
//! A dedicated thread reads the error-report control once per second,
//! decodes the code through a model-specific table and pushes a notification
//! to the sink whenever the code changes. A failed poll is logged at debug
//! and swallowed; the loop keeps running. Runtime enable/disable flips a
//! flag without touching the thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::controls::Control;
use crate::error::{Error, Result};
use crate::types::{Notification, NotificationCategory, NotificationSeverity, OptionRange};

/// Interval between polls of the error report.
pub const POLLING_PERIOD: Duration = Duration::from_millis(1000);

/// Sink receiving decoded notifications.
pub type NotificationSink = Arc<dyn Fn(Notification) + Send + Sync>;

/// Model-specific decoding of a raw error-report code.
pub trait NotificationDecoder: Send + Sync {
    fn decode(&self, code: i32) -> Notification;
}

/// Error-report table of the stereo depth module.
///
/// The code-0 entry reads "Success" at error severity; that is the table the
/// firmware ships and consumers key off it, so it stays as-is.
pub struct DepthNotificationDecoder;

impl NotificationDecoder for DepthNotificationDecoder {
    fn decode(&self, code: i32) -> Notification {
        match code {
            0 => Notification::new(
                NotificationCategory::HardwareError,
                code,
                NotificationSeverity::Error,
                "Success",
            ),
            1 => Notification::new(
                NotificationCategory::HardwareError,
                code,
                NotificationSeverity::Error,
                "Hot laser power reduce",
            ),
            2 => Notification::new(
                NotificationCategory::HardwareError,
                code,
                NotificationSeverity::Error,
                "Hot laser disable",
            ),
            3 => Notification::new(
                NotificationCategory::HardwareError,
                code,
                NotificationSeverity::Error,
                "Flag B laser disable",
            ),
            _ => Notification::new(
                NotificationCategory::HardwareError,
                code,
                NotificationSeverity::None,
                "Unknown error!",
            ),
        }
    }
}

// =============================================================================
// Poller
// =============================================================================

/// Background error-report poller.
///
/// `stop` joins the thread; dropping the handler stops it. The enable flag
/// only gates the reads, so flipping it is cheap and immediate.
pub struct PollingErrorHandler {
    enabled: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PollingErrorHandler {
    /// Spawns the polling thread with the default one-second period.
    pub fn start(
        report: Arc<dyn Control>,
        decoder: Arc<dyn NotificationDecoder>,
        sink: NotificationSink,
    ) -> Self {
        Self::start_with_period(report, decoder, sink, POLLING_PERIOD)
    }

    /// Spawns the polling thread with a caller-chosen period.
    pub fn start_with_period(
        report: Arc<dyn Control>,
        decoder: Arc<dyn NotificationDecoder>,
        sink: NotificationSink,
        period: Duration,
    ) -> Self {
        let enabled = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let thread_enabled = enabled.clone();
        let thread_stop = stop.clone();

        let handle = thread::spawn(move || {
            let slice = period.min(Duration::from_millis(25));
            let mut last_code = 0i32;
            let mut elapsed = Duration::ZERO;
            while !thread_stop.load(Ordering::SeqCst) {
                thread::sleep(slice);
                elapsed += slice;
                if elapsed < period {
                    continue;
                }
                elapsed = Duration::ZERO;
                if !thread_enabled.load(Ordering::SeqCst) {
                    continue;
                }
                match report.get() {
                    Ok(value) => {
                        let code = value as i32;
                        if code != last_code {
                            last_code = code;
                            sink(decoder.decode(code));
                        }
                    }
                    Err(err) => {
                        log::debug!("error-report poll failed: {}", err);
                    }
                }
            }
        });

        Self {
            enabled,
            stop,
            handle: Some(handle),
        }
    }

    /// Enables or disables polling without touching the thread.
    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Shared handle to the run flag, for the option view.
    pub fn enabled_flag(&self) -> Arc<AtomicBool> {
        self.enabled.clone()
    }

    /// Stops the thread and joins it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("error-report polling thread panicked");
            }
        }
    }
}

impl Drop for PollingErrorHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Option view over the poller's run flag.
pub struct PollingEnabledControl {
    enabled: Arc<AtomicBool>,
}

impl PollingEnabledControl {
    pub fn new(enabled: Arc<AtomicBool>) -> Self {
        Self { enabled }
    }
}

impl Control for PollingEnabledControl {
    fn set(&self, value: f32) -> Result<()> {
        if value != 0.0 && value != 1.0 {
            return Err(Error::invalid_value(format!(
                "{} is not a valid error-polling toggle",
                value
            )));
        }
        self.enabled.store(value != 0.0, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self) -> Result<f32> {
        Ok(if self.enabled.load(Ordering::SeqCst) {
            1.0
        } else {
            0.0
        })
    }

    fn range(&self) -> Result<OptionRange> {
        Ok(OptionRange::new(0.0, 1.0, 1.0, 1.0))
    }

    fn description(&self) -> &str {
        "Enable/disable polling of camera internal errors"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedReport {
        codes: Mutex<Vec<f32>>,
        reads: Arc<Mutex<usize>>,
        fail: bool,
    }

    impl Control for ScriptedReport {
        fn set(&self, _value: f32) -> Result<()> {
            Err(Error::not_implemented("report"))
        }
        fn get(&self) -> Result<f32> {
            *self.reads.lock().unwrap() += 1;
            if self.fail {
                return Err(Error::transport("link down"));
            }
            let mut codes = self.codes.lock().unwrap();
            Ok(if codes.len() > 1 {
                codes.remove(0)
            } else {
                codes[0]
            })
        }
        fn range(&self) -> Result<OptionRange> {
            Ok(OptionRange::new(0.0, 3.0, 1.0, 0.0))
        }
        fn description(&self) -> &str {
            "Error report"
        }
    }

    fn collecting_sink() -> (NotificationSink, Arc<Mutex<Vec<Notification>>>) {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let inner = collected.clone();
        let sink: NotificationSink = Arc::new(move |n| inner.lock().unwrap().push(n));
        (sink, collected)
    }

    #[test]
    fn test_decoder_table_matches_firmware_contract() {
        let decoder = DepthNotificationDecoder;
        let zero = decoder.decode(0);
        assert_eq!(zero.category, NotificationCategory::HardwareError);
        assert_eq!(zero.severity, NotificationSeverity::Error);
        assert_eq!(zero.description, "Success");

        assert_eq!(decoder.decode(1).description, "Hot laser power reduce");
        assert_eq!(decoder.decode(2).description, "Hot laser disable");
        assert_eq!(decoder.decode(3).description, "Flag B laser disable");

        // Unknown codes keep the hardware-error category at no severity.
        let unknown = decoder.decode(42);
        assert_eq!(unknown.category, NotificationCategory::HardwareError);
        assert_eq!(unknown.severity, NotificationSeverity::None);
        assert_eq!(unknown.description, "Unknown error!");
        assert_eq!(unknown.code, 42);
    }

    #[test]
    fn test_poller_emits_only_on_changed_code() {
        let reads = Arc::new(Mutex::new(0));
        let report = Arc::new(ScriptedReport {
            codes: Mutex::new(vec![0.0, 0.0, 2.0, 2.0, 2.0]),
            reads: reads.clone(),
            fail: false,
        });
        let (sink, collected) = collecting_sink();
        let mut poller = PollingErrorHandler::start_with_period(
            report,
            Arc::new(DepthNotificationDecoder),
            sink,
            Duration::from_millis(5),
        );
        poller.set_enabled(true);
        thread::sleep(Duration::from_millis(150));
        poller.stop();

        let notifications = collected.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].code, 2);
        assert_eq!(notifications[0].description, "Hot laser disable");
        assert!(*reads.lock().unwrap() >= 3);
    }

    #[test]
    fn test_disabled_poller_never_reads() {
        let reads = Arc::new(Mutex::new(0));
        let report = Arc::new(ScriptedReport {
            codes: Mutex::new(vec![3.0]),
            reads: reads.clone(),
            fail: false,
        });
        let (sink, collected) = collecting_sink();
        let mut poller = PollingErrorHandler::start_with_period(
            report,
            Arc::new(DepthNotificationDecoder),
            sink,
            Duration::from_millis(5),
        );
        thread::sleep(Duration::from_millis(60));
        poller.stop();

        assert_eq!(*reads.lock().unwrap(), 0);
        assert!(collected.lock().unwrap().is_empty());
    }

    #[test]
    fn test_poll_failures_are_swallowed() {
        let reads = Arc::new(Mutex::new(0));
        let report = Arc::new(ScriptedReport {
            codes: Mutex::new(vec![1.0]),
            reads: reads.clone(),
            fail: true,
        });
        let (sink, collected) = collecting_sink();
        let mut poller = PollingErrorHandler::start_with_period(
            report,
            Arc::new(DepthNotificationDecoder),
            sink,
            Duration::from_millis(5),
        );
        poller.set_enabled(true);
        thread::sleep(Duration::from_millis(80));
        poller.stop();

        // The thread kept polling through the failures and emitted nothing.
        assert!(*reads.lock().unwrap() >= 2);
        assert!(collected.lock().unwrap().is_empty());
    }

    #[test]
    fn test_enabled_control_flips_the_run_flag() {
        let reads = Arc::new(Mutex::new(0));
        let report = Arc::new(ScriptedReport {
            codes: Mutex::new(vec![0.0]),
            reads,
            fail: false,
        });
        let (sink, _) = collecting_sink();
        let mut poller = PollingErrorHandler::start_with_period(
            report,
            Arc::new(DepthNotificationDecoder),
            sink,
            Duration::from_millis(5),
        );
        let ctrl = PollingEnabledControl::new(poller.enabled_flag());
        assert_eq!(ctrl.get().unwrap(), 0.0);
        ctrl.set(1.0).unwrap();
        assert!(poller.is_enabled());
        assert!(ctrl.set(2.0).unwrap_err().is_invalid_value());
        poller.stop();
    }
}
