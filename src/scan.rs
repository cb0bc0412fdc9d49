// ============================================================================
// SCAN CONTROLLER & WINDOW LOOP
// ============================================================================
// Each collector owns one controller. A controller admits at most one window
// at a time, tracks how far into it we are, and folds finished windows into
// the collector's total runtime. The loop that drains an event stream for a
// window runs as a spawned task behind a `ScanHandle`.
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AuditError, AuditResult};
use crate::helpers::ClockTime;
use crate::source::EventStream;
use crate::types::Envelope;

// ----------------------------------------------------------------------------
// Scan Window
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct ScanWindow {
    requested: Duration,
    started_at: Option<Instant>,
    running: bool,
    total_runtime: Duration,
    elapsed: Duration,
}

/// Point-in-time view of a collector's window bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanStatus {
    pub collector: String,
    pub running: bool,
    pub elapsed: Duration,
    pub requested: Duration,
    pub total_runtime: Duration,
}

impl Display for ScanStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.running {
            write!(
                f,
                "{:<20} {}|{} ",
                self.collector,
                ClockTime(self.elapsed),
                ClockTime(self.requested)
            )?;
        } else {
            write!(f, "{:<20} -- -- --|-- -- -- ", self.collector)?;
        }
        write!(f, "({} total)", ClockTime(self.total_runtime + self.elapsed))
    }
}

// ----------------------------------------------------------------------------
// Scan Controller
// ----------------------------------------------------------------------------

/// Lifecycle state machine for one collector: `Idle -> Running -> Idle`.
#[derive(Debug)]
pub struct ScanController {
    name: String,
    window: Mutex<ScanWindow>,
}

impl ScanController {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            window: Mutex::new(ScanWindow::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Admit a new window. Rejects with `AlreadyRunning` and leaves the active
    /// window untouched if one is in progress.
    pub fn begin(&self, requested: Duration) -> AuditResult<()> {
        let mut w = self.window.lock();
        if w.running {
            return Err(AuditError::AlreadyRunning {
                collector: self.name.clone(),
                elapsed: ClockTime(w.elapsed),
                requested: ClockTime(w.requested),
            });
        }
        w.running = true;
        w.requested = requested;
        w.started_at = Some(Instant::now());
        w.elapsed = Duration::ZERO;
        Ok(())
    }

    /// Back out of a window whose source never opened. Nothing is added to
    /// the total runtime.
    pub fn abort(&self) {
        let mut w = self.window.lock();
        w.running = false;
        w.requested = Duration::ZERO;
        w.started_at = None;
        w.elapsed = Duration::ZERO;
    }

    /// Refresh elapsed-so-far. Called once per consumed event.
    #[inline]
    pub fn tick(&self) {
        let mut w = self.window.lock();
        if let (true, Some(start)) = (w.running, w.started_at) {
            w.elapsed = start.elapsed();
        }
    }

    /// Close the active window and fold its actual runtime into the total.
    /// Returns the runtime that was added.
    pub fn stop(&self) -> Duration {
        let mut w = self.window.lock();
        if !w.running {
            return Duration::ZERO;
        }
        let ran = w.started_at.map(|s| s.elapsed()).unwrap_or(w.elapsed);
        w.total_runtime += ran;
        w.running = false;
        w.started_at = None;
        w.elapsed = Duration::ZERO;
        w.requested = Duration::ZERO;
        ran
    }

    pub fn is_running(&self) -> bool {
        self.window.lock().running
    }

    pub fn status(&self) -> ScanStatus {
        let w = self.window.lock();
        ScanStatus {
            collector: self.name.clone(),
            running: w.running,
            elapsed: w.elapsed,
            requested: w.requested,
            total_runtime: w.total_runtime,
        }
    }

    /// Forget all bookkeeping, including the accumulated total.
    pub fn reset(&self) {
        *self.window.lock() = ScanWindow::default();
    }
}

// ----------------------------------------------------------------------------
// Event Sink
// ----------------------------------------------------------------------------

/// Receives every envelope a window consumes, in delivery order.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn accept(&self, envelope: Envelope);
}

// ----------------------------------------------------------------------------
// Scan Handle
// ----------------------------------------------------------------------------

/// Why a window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanEnd {
    /// The requested duration elapsed
    Elapsed,
    /// The handle was cancelled
    Cancelled,
    /// The event source ran dry
    SourceClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanOutcome {
    pub collector: String,
    pub end: ScanEnd,
    pub events: u64,
    pub runtime: Duration,
}

/// A running window: its task plus the token that cancels it.
#[derive(Debug)]
pub struct ScanHandle {
    cancel: CancellationToken,
    join: JoinHandle<ScanOutcome>,
}

impl ScanHandle {
    /// Spawn the window loop onto the current runtime.
    pub fn spawn(
        controller: Arc<ScanController>,
        stream: EventStream,
        sink: Arc<dyn EventSink>,
        requested: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(run_window(controller, stream, sink, requested, cancel.clone()));
        Self { cancel, join }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that ends this window when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the window to end on its own.
    pub async fn wait(self) -> AuditResult<ScanOutcome> {
        self.join
            .await
            .map_err(|e| AuditError::Internal(format!("scan task failed: {e}")))
    }

    pub async fn cancel_and_wait(self) -> AuditResult<ScanOutcome> {
        self.cancel();
        self.wait().await
    }
}

/// Marks the window idle however the task ends, including a panic in a sink.
struct WindowGuard(Arc<ScanController>);

impl Drop for WindowGuard {
    fn drop(&mut self) {
        if self.0.is_running() {
            warn!(target: "auditnozzle::scan", collector = %self.0.name(), "Window task ended abnormally");
            self.0.stop();
        }
    }
}

async fn run_window(
    controller: Arc<ScanController>,
    mut stream: EventStream,
    sink: Arc<dyn EventSink>,
    requested: Duration,
    cancel: CancellationToken,
) -> ScanOutcome {
    let deadline = Instant::now() + requested;
    let mut events = 0u64;
    let _guard = WindowGuard(controller.clone());

    info!(
        target: "auditnozzle::scan",
        collector = %controller.name(),
        runtime = %humantime::format_duration(requested),
        "Started acquiring data"
    );

    let end = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break ScanEnd::Cancelled,
            _ = sleep_until(deadline) => break ScanEnd::Elapsed,
            next = stream.next() => match next {
                Some(envelope) => {
                    controller.tick();
                    events += 1;
                    sink.accept(envelope).await;
                }
                None => break ScanEnd::SourceClosed,
            },
        }
    };

    // Release the source before the window is marked idle.
    drop(stream);
    let runtime = controller.stop();

    info!(
        target: "auditnozzle::scan",
        collector = %controller.name(),
        end = ?end,
        events,
        runtime = %ClockTime(runtime),
        "Stopped"
    );
    debug!(target: "auditnozzle::scan", collector = %controller.name(), "Source released");

    ScanOutcome {
        collector: controller.name().to_string(),
        end,
        events,
        runtime,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingSink {
        seen: AtomicU64,
    }

    #[async_trait]
    impl EventSink for CountingSink {
        async fn accept(&self, _envelope: Envelope) {
            self.seen.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_while_running_changes_nothing() {
        let ctl = ScanController::new("Count Logs");
        ctl.begin(Duration::from_secs(600)).unwrap();
        tokio::time::advance(Duration::from_secs(65)).await;
        ctl.tick();
        let before = ctl.status();

        let err = ctl.begin(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, AuditError::AlreadyRunning { .. }));
        assert_eq!(
            err.to_string(),
            "Count Logs scanner already running, 00:01:05 into a run of 00:10:00"
        );
        assert_eq!(ctl.status(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_folds_actual_runtime() {
        let ctl = ScanController::new("Metric Audit");
        ctl.begin(Duration::from_secs(600)).unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(ctl.stop(), Duration::from_secs(30));
        assert!(!ctl.is_running());

        ctl.begin(Duration::from_secs(10)).unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        ctl.stop();
        assert_eq!(ctl.status().total_runtime, Duration::from_secs(40));
        assert_eq!(ctl.status().to_string(), "Metric Audit         -- -- --|-- -- -- (00:00:40 total)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_adds_no_runtime() {
        let ctl = ScanController::new("Count Tags");
        ctl.begin(Duration::from_secs(60)).unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        ctl.abort();
        assert!(!ctl.is_running());
        assert_eq!(ctl.status().total_runtime, Duration::ZERO);
        assert!(ctl.begin(Duration::from_secs(60)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_status_line() {
        let ctl = ScanController::new("Envelope Latency");
        ctl.begin(Duration::from_secs(120)).unwrap();
        tokio::time::advance(Duration::from_secs(7)).await;
        ctl.tick();
        assert_eq!(
            ctl.status().to_string(),
            "Envelope Latency     00:00:07|00:02:00 (00:00:07 total)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_ends_when_duration_elapses() {
        let ctl = Arc::new(ScanController::new("Count Logs"));
        let sink = Arc::new(CountingSink::default());
        let (tx, stream) = EventStream::channel(16);
        for _ in 0..3 {
            tx.send(Envelope::log("g", "APP", "m")).unwrap();
        }

        ctl.begin(Duration::from_secs(20)).unwrap();
        let handle = ScanHandle::spawn(ctl.clone(), stream, sink.clone(), Duration::from_secs(20));
        let outcome = handle.wait().await.unwrap();

        assert_eq!(outcome.end, ScanEnd::Elapsed);
        assert_eq!(outcome.events, 3);
        assert_eq!(outcome.runtime, Duration::from_secs(20));
        assert_eq!(sink.seen.load(Ordering::Relaxed), 3);
        assert!(!ctl.is_running());
        assert_eq!(ctl.status().total_runtime, Duration::from_secs(20));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_ends_window_early() {
        let ctl = Arc::new(ScanController::new("Count Tags"));
        let (_tx, stream) = EventStream::channel(16);

        ctl.begin(Duration::from_secs(600)).unwrap();
        let handle = ScanHandle::spawn(ctl.clone(), stream, Arc::new(CountingSink::default()), Duration::from_secs(600));
        tokio::time::advance(Duration::from_secs(5)).await;
        let outcome = handle.cancel_and_wait().await.unwrap();

        assert_eq!(outcome.end, ScanEnd::Cancelled);
        assert!(outcome.runtime < Duration::from_secs(600));
        assert!(!ctl.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_source_ends_window() {
        let ctl = Arc::new(ScanController::new("Log Length Histogram"));
        let (tx, stream) = EventStream::channel(16);
        tx.send(Envelope::log("g", "APP", "m")).unwrap();
        drop(tx);

        ctl.begin(Duration::from_secs(600)).unwrap();
        let outcome = ScanHandle::spawn(ctl.clone(), stream, Arc::new(CountingSink::default()), Duration::from_secs(600))
            .wait()
            .await
            .unwrap();
        assert_eq!(outcome.end, ScanEnd::SourceClosed);
        assert_eq!(outcome.events, 1);
    }

    struct PanickingSink;

    #[async_trait]
    impl EventSink for PanickingSink {
        async fn accept(&self, _envelope: Envelope) {
            panic!("sink failed");
        }
    }

    #[tokio::test]
    async fn test_panicking_window_leaves_collector_idle() {
        let ctl = Arc::new(ScanController::new("Envelope Latency"));
        let (tx, stream) = EventStream::channel(16);
        tx.send(Envelope::log("g", "APP", "m")).unwrap();

        ctl.begin(Duration::from_secs(30)).unwrap();
        let err = ScanHandle::spawn(ctl.clone(), stream, Arc::new(PanickingSink), Duration::from_secs(30))
            .wait()
            .await
            .unwrap_err();
        assert_eq!(err.category(), "internal");
        assert!(!ctl.is_running());
        assert!(ctl.begin(Duration::from_secs(30)).is_ok());
    }
}
