// ============================================================================
// NAME RESOLUTION PIPELINE
// ============================================================================
// Newly seen log keys are handed to a single worker through a bounded flume
// queue. The worker resolves display names off the ingestion path and
// publishes them back through a `NameSink`. Queue-full behaviour is an
// explicit policy: block for a bounded time, or drop and count.
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::helpers::TimingStats;
use crate::logs::LogKey;
use crate::resolver::NameResolver;
use crate::telemetry::Telemetry;

// ----------------------------------------------------------------------------
// Tasks & Policy
// ----------------------------------------------------------------------------

/// One pending resolution for a log record.
#[derive(Debug, Clone)]
pub struct NameLookupTask {
    pub key: LogKey,
    /// Name the record carried when it was created; empty means unresolved
    pub current_name: String,
    pub enqueued_at: Instant,
}

impl NameLookupTask {
    pub fn new(key: LogKey, current_name: impl Into<String>) -> Self {
        Self {
            key,
            current_name: current_name.into(),
            enqueued_at: Instant::now(),
        }
    }
}

/// What `submit` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFullPolicy {
    /// Wait for room, giving up after `timeout`
    Block { timeout: Duration },
    /// Drop the task immediately
    Drop,
}

impl Default for QueueFullPolicy {
    fn default() -> Self {
        QueueFullPolicy::Block {
            timeout: Duration::from_millis(crate::DEFAULT_LOOKUP_BLOCK_TIMEOUT_MS),
        }
    }
}

/// Label every unresolvable record falls back to.
pub fn synthetic_label(app_id: &str) -> String {
    format!("guid: {app_id}")
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupStats {
    /// Tasks the worker has finished
    pub resolved: u64,
    /// Tasks submitted but not yet finished
    pub in_flight: u64,
    /// Highest `in_flight` seen
    pub peak_in_flight: u64,
    pub queue_wait: TimingStats,
    pub processing: TimingStats,
    /// Finished tasks that ended on the synthetic label
    pub failures: u64,
    /// Tasks discarded because the queue stayed full
    pub queue_full_drops: u64,
}

impl LookupStats {
    fn enqueue(&mut self) {
        self.in_flight += 1;
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight);
    }

    fn abandon(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.queue_full_drops += 1;
    }

    fn finish(&mut self, queue_wait: Duration, processing: Duration, failed: bool) {
        self.resolved += 1;
        self.queue_wait.record(queue_wait);
        self.processing.record(processing);
        if failed {
            self.failures += 1;
        }
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// One-line summary used by the log report.
    pub fn summary(&self) -> String {
        let ms = |d: Option<Duration>| d.map_or(0, |d| d.as_millis());
        format!(
            "{} names, ave lookup {} max/min {} {} ave queue {} max/min {} {} queued {} max {}",
            self.resolved,
            ms(self.processing.average()),
            self.processing.max.as_millis(),
            ms(self.processing.min),
            ms(self.queue_wait.average()),
            self.queue_wait.max.as_millis(),
            ms(self.queue_wait.min),
            self.in_flight,
            self.peak_in_flight,
        )
    }
}

/// Shared handle to the pipeline counters.
#[derive(Debug, Clone, Default)]
pub struct SharedLookupStats(Arc<Mutex<LookupStats>>);

impl SharedLookupStats {
    pub fn snapshot(&self) -> LookupStats {
        *self.0.lock()
    }

    /// Clear history. Tasks still queued keep counting as in flight.
    pub fn reset(&self) {
        let mut s = self.0.lock();
        let in_flight = s.in_flight;
        *s = LookupStats {
            in_flight,
            peak_in_flight: in_flight,
            ..LookupStats::default()
        };
    }
}

// ----------------------------------------------------------------------------
// Name Sink
// ----------------------------------------------------------------------------

/// Where the worker publishes resolved names.
pub trait NameSink: Send + Sync {
    /// Store `name` on the record for `key` if it still exists and is still
    /// unnamed.
    fn publish(&self, key: &LogKey, name: String);
}

// ----------------------------------------------------------------------------
// Lookup Queue (producer side)
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LookupQueue {
    tx: flume::Sender<NameLookupTask>,
    policy: QueueFullPolicy,
    stats: SharedLookupStats,
    telemetry: Arc<Telemetry>,
}

impl LookupQueue {
    /// Create the queue and the receiver the worker drains.
    pub fn bounded(
        capacity: usize,
        policy: QueueFullPolicy,
        telemetry: Arc<Telemetry>,
    ) -> (Self, flume::Receiver<NameLookupTask>) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        let queue = Self {
            tx,
            policy,
            stats: SharedLookupStats::default(),
            telemetry,
        };
        (queue, rx)
    }

    pub fn stats(&self) -> &SharedLookupStats {
        &self.stats
    }

    pub fn depth(&self) -> usize {
        self.tx.len()
    }

    /// Hand a task to the worker. Returns `false` if it was dropped under the
    /// saturation policy.
    pub async fn submit(&self, task: NameLookupTask) -> bool {
        self.stats.0.lock().enqueue();

        let sent = match self.policy {
            QueueFullPolicy::Drop => self.tx.try_send(task).is_ok(),
            QueueFullPolicy::Block { timeout } => {
                match tokio::time::timeout(timeout, self.tx.send_async(task)).await {
                    Ok(result) => result.is_ok(),
                    Err(_) => false,
                }
            }
        };

        if sent {
            self.telemetry.set_queue_depth(self.tx.len());
        } else {
            self.stats.0.lock().abandon();
            self.telemetry.record_queue_full();
            warn!(target: "auditnozzle::engine", policy = ?self.policy, "Name lookup queue full, task dropped");
        }
        sent
    }
}

// ----------------------------------------------------------------------------
// Lookup Worker (consumer side)
// ----------------------------------------------------------------------------

/// Spawn the single resolution worker. It runs until `cancel` fires or every
/// queue sender is gone.
pub fn spawn_worker(
    rx: flume::Receiver<NameLookupTask>,
    resolver: Arc<dyn NameResolver>,
    sink: Arc<dyn NameSink>,
    stats: SharedLookupStats,
    telemetry: Arc<Telemetry>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(target: "auditnozzle::engine", "Name lookup worker started");
        loop {
            let task = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv_async() => match next {
                    Ok(task) => task,
                    Err(_) => break,
                },
            };
            telemetry.set_queue_depth(rx.len());
            process_task(task, resolver.as_ref(), sink.as_ref(), &stats, &telemetry).await;
        }
        info!(target: "auditnozzle::engine", "Name lookup worker stopped");
    })
}

async fn process_task(
    task: NameLookupTask,
    resolver: &dyn NameResolver,
    sink: &dyn NameSink,
    stats: &SharedLookupStats,
    telemetry: &Telemetry,
) {
    let started = Instant::now();
    let app_id = task.key.app_id.as_str();

    let (name, failed) = if task.current_name.is_empty() {
        match resolver.resolve(app_id).await {
            Ok(name) if !name.is_empty() => (name, false),
            Ok(_) => {
                debug!(target: "auditnozzle::engine", app_id, "Resolver returned no name");
                (synthetic_label(app_id), true)
            }
            Err(e) => {
                debug!(target: "auditnozzle::engine", app_id, error = %e, "Name resolution failed");
                (synthetic_label(app_id), true)
            }
        }
    } else {
        (task.current_name.clone(), false)
    };

    trace!(target: "auditnozzle::engine", app_id, name = %name, "Publishing name");
    sink.publish(&task.key, name);

    let finished = Instant::now();
    stats.0.lock().finish(
        started.duration_since(task.enqueued_at),
        finished.duration_since(started),
        failed,
    );
    telemetry.record_lookup(!failed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuditError, AuditResult};
    use crate::resolver::StaticResolver;
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingSink {
        names: Mutex<HashMap<LogKey, String>>,
    }

    impl NameSink for RecordingSink {
        fn publish(&self, key: &LogKey, name: String) {
            self.names.lock().insert(key.clone(), name);
        }
    }

    #[derive(Debug)]
    struct FailingResolver;

    #[async_trait]
    impl NameResolver for FailingResolver {
        async fn resolve(&self, app_id: &str) -> AuditResult<String> {
            Err(AuditError::resolution_failure(app_id, "boom"))
        }
    }

    fn telemetry() -> Arc<Telemetry> {
        Arc::new(Telemetry::new().unwrap())
    }

    #[tokio::test]
    async fn test_worker_resolves_and_falls_back() {
        let t = telemetry();
        let (queue, rx) = LookupQueue::bounded(16, QueueFullPolicy::default(), t.clone());
        let sink = Arc::new(RecordingSink::default());
        let resolver = Arc::new(StaticResolver::new([("g1", "billing")]));

        assert!(queue.submit(NameLookupTask::new(LogKey::new("g1", "APP"), "")).await);
        assert!(queue.submit(NameLookupTask::new(LogKey::new("g2", "RTR"), "")).await);
        assert!(queue.submit(NameLookupTask::new(LogKey::new("system", "==="), "system: unknown message")).await);
        assert_eq!(queue.stats().snapshot().peak_in_flight, 3);

        let stats = queue.stats().clone();
        let cancel = CancellationToken::new();
        let worker = spawn_worker(rx, resolver, sink.clone(), stats.clone(), t, cancel.clone());
        drop(queue);
        worker.await.unwrap();

        let names = sink.names.lock();
        assert_eq!(names[&LogKey::new("g1", "APP")], "billing");
        assert_eq!(names[&LogKey::new("g2", "RTR")], "guid: g2");
        assert_eq!(names[&LogKey::new("system", "===")], "system: unknown message");

        let s = stats.snapshot();
        assert_eq!(s.resolved, 3);
        assert_eq!(s.failures, 1);
        assert_eq!(s.in_flight, 0);
        assert_eq!(s.peak_in_flight, 3);
        assert_eq!(s.queue_wait.count, 3);
        assert_eq!(s.processing.count, 3);
    }

    #[tokio::test]
    async fn test_resolver_error_uses_synthetic_label() {
        let t = telemetry();
        let (queue, rx) = LookupQueue::bounded(4, QueueFullPolicy::Drop, t.clone());
        let sink = Arc::new(RecordingSink::default());
        queue.submit(NameLookupTask::new(LogKey::new("g9", "APP"), "")).await;
        let stats = queue.stats().clone();
        drop(queue);

        spawn_worker(rx, Arc::new(FailingResolver), sink.clone(), stats.clone(), t, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sink.names.lock()[&LogKey::new("g9", "APP")], "guid: g9");
        assert_eq!(stats.snapshot().failures, 1);
    }

    #[tokio::test]
    async fn test_drop_policy_counts_queue_full() {
        let t = telemetry();
        let (queue, _rx) = LookupQueue::bounded(1, QueueFullPolicy::Drop, t.clone());
        assert!(queue.submit(NameLookupTask::new(LogKey::new("a", "APP"), "")).await);
        assert!(!queue.submit(NameLookupTask::new(LogKey::new("b", "APP"), "")).await);

        let s = queue.stats().snapshot();
        assert_eq!(s.queue_full_drops, 1);
        assert_eq!(s.in_flight, 1);
        assert_eq!(s.peak_in_flight, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_policy_gives_up_after_timeout() {
        let t = telemetry();
        let policy = QueueFullPolicy::Block { timeout: Duration::from_millis(50) };
        let (queue, _rx) = LookupQueue::bounded(1, policy, t);
        assert!(queue.submit(NameLookupTask::new(LogKey::new("a", "APP"), "")).await);
        assert!(!queue.submit(NameLookupTask::new(LogKey::new("b", "APP"), "")).await);
        assert_eq!(queue.stats().snapshot().queue_full_drops, 1);
    }

    #[test]
    fn test_reset_keeps_in_flight() {
        let stats = SharedLookupStats::default();
        stats.0.lock().enqueue();
        stats.0.lock().enqueue();
        stats.0.lock().finish(Duration::from_millis(1), Duration::from_millis(2), false);
        stats.reset();
        let s = stats.snapshot();
        assert_eq!(s.in_flight, 1);
        assert_eq!(s.resolved, 0);
        assert_eq!(s.queue_wait.count, 0);
    }
}
