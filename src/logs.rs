// ============================================================================
// LOG AGGREGATOR
// ============================================================================
// Counts log lines per (application, source type), keeps run totals and a
// one-second ingestion rate, and hands newly seen keys to the name
// resolution pipeline. The table lock is never held across the hand-off.
// ============================================================================

use std::fmt::Write as _;
use std::time::Duration;

use ahash::AHashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::trace;

use crate::lookup::{LookupQueue, LookupStats, NameLookupTask, NameSink};

/// Application identifier reserved for platform diagnostics.
pub const SYSTEM_APP_ID: &str = "system";

/// Shown in place of an empty source type.
pub const EMPTY_SOURCE_TYPE: &str = "===";

static DROPPED_MESSAGES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Dropped (\d+) message\(s\) from MetronAgent to Doppler").expect("valid regex")
});

// ----------------------------------------------------------------------------
// Records
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LogKey {
    pub app_id: String,
    pub source_type: String,
}

impl LogKey {
    pub fn new(app_id: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            source_type: source_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub app_id: String,
    /// Empty until the resolution worker publishes a name
    pub name: String,
    pub source_type: String,
    pub count: u64,
}

/// Label for a diagnostic message plus any dropped-message count it reports.
fn classify_system_message(message: &str) -> (&'static str, u64) {
    match DROPPED_MESSAGES
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
    {
        Some(dropped) => ("system: dropped messages", dropped),
        None => ("system: unknown message", 0),
    }
}

// ----------------------------------------------------------------------------
// Rate Sampler
// ----------------------------------------------------------------------------

/// Ingestion rate at one-second resolution.
#[derive(Debug, Clone)]
struct RateSampler {
    last_sample_at: Instant,
    count_at_last_sample: u64,
    rate_last_second: u64,
}

impl RateSampler {
    fn new(now: Instant) -> Self {
        Self {
            last_sample_at: now,
            count_at_last_sample: 0,
            rate_last_second: 0,
        }
    }

    fn observe(&mut self, total: u64, now: Instant) {
        let since = now.saturating_duration_since(self.last_sample_at);
        if since > Duration::from_secs(1) {
            let counted = total.saturating_sub(self.count_at_last_sample);
            self.rate_last_second = (counted as f64 / since.as_secs_f64()) as u64;
            self.last_sample_at = now;
            self.count_at_last_sample = total;
        }
    }

    /// Restart the baseline without losing the last computed rate.
    fn rebase(&mut self, total: u64, now: Instant) {
        self.last_sample_at = now;
        self.count_at_last_sample = total;
    }
}

// ----------------------------------------------------------------------------
// Aggregator
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct LogState {
    records: AHashMap<LogKey, LogRecord>,
    total_logs: u64,
    total_app_logs: u64,
    dropped_messages: u64,
    rate: RateSampler,
}

impl LogState {
    fn new() -> Self {
        Self {
            records: AHashMap::new(),
            total_logs: 0,
            total_app_logs: 0,
            dropped_messages: 0,
            rate: RateSampler::new(Instant::now()),
        }
    }
}

/// Consistent copy of the log table and its totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogSnapshot {
    /// Sorted by count desc, then name, then source type
    pub rows: Vec<LogRecord>,
    pub total_logs: u64,
    pub total_app_logs: u64,
    pub dropped_messages: u64,
    pub rate_last_second: u64,
}

#[derive(Debug)]
pub struct LogAggregator {
    state: Mutex<LogState>,
    lookups: LookupQueue,
}

impl LogAggregator {
    pub fn new(lookups: LookupQueue) -> Self {
        Self {
            state: Mutex::new(LogState::new()),
            lookups,
        }
    }

    pub fn lookups(&self) -> &LookupQueue {
        &self.lookups
    }

    /// Restart the rate baseline at the start of a window.
    pub fn begin_window(&self) {
        let mut s = self.state.lock();
        let total = s.total_logs;
        s.rate.rebase(total, Instant::now());
    }

    /// Count one log line. Returns `true` when the key was new and a name
    /// lookup was submitted.
    pub async fn ingest(&self, app_id: &str, source_type: &str, message: &str) -> bool {
        let source_type = if source_type.is_empty() {
            EMPTY_SOURCE_TYPE
        } else {
            source_type
        };
        let (name, dropped) = if app_id == SYSTEM_APP_ID {
            classify_system_message(message)
        } else {
            ("", 0)
        };

        let task = {
            let mut s = self.state.lock();
            s.total_logs += 1;
            let total = s.total_logs;
            s.rate.observe(total, Instant::now());
            if source_type == "APP" {
                s.total_app_logs += 1;
            }
            s.dropped_messages += dropped;

            let key = LogKey::new(app_id, source_type);
            match s.records.get_mut(&key) {
                Some(record) => {
                    record.count += 1;
                    None
                }
                None => {
                    s.records.insert(
                        key.clone(),
                        LogRecord {
                            app_id: app_id.to_string(),
                            name: name.to_string(),
                            source_type: source_type.to_string(),
                            count: 1,
                        },
                    );
                    Some(NameLookupTask::new(key, name))
                }
            }
        };

        match task {
            Some(task) => {
                trace!(target: "auditnozzle::engine", app_id, source_type, "New log key");
                self.lookups.submit(task).await;
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    pub fn snapshot(&self) -> LogSnapshot {
        let (mut rows, total_logs, total_app_logs, dropped_messages, rate_last_second) = {
            let s = self.state.lock();
            (
                s.records.values().cloned().collect::<Vec<_>>(),
                s.total_logs,
                s.total_app_logs,
                s.dropped_messages,
                s.rate.rate_last_second,
            )
        };
        rows.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.source_type.cmp(&b.source_type))
                .then_with(|| a.app_id.cmp(&b.app_id))
        });
        LogSnapshot {
            rows,
            total_logs,
            total_app_logs,
            dropped_messages,
            rate_last_second,
        }
    }

    /// Clear the table, totals and lookup history.
    pub fn reset(&self) {
        *self.state.lock() = LogState::new();
        self.lookups.stats().reset();
    }
}

impl NameSink for LogAggregator {
    fn publish(&self, key: &LogKey, name: String) {
        if let Some(record) = self.state.lock().records.get_mut(key) {
            if record.name.is_empty() {
                record.name = name;
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Report
// ----------------------------------------------------------------------------

/// Render the log table. `counter_lines` is the counter integrity section,
/// already formatted.
pub fn render_report(snapshot: &LogSnapshot, counter_lines: &str, lookups: &LookupStats, show_ids: bool) -> String {
    let mut out = String::new();
    if snapshot.rows.is_empty() {
        out.push_str("No log data collected\n");
        return out;
    }

    let _ = writeln!(
        out,
        "Total logs messages: {:>8} APP messages: {:>8}",
        snapshot.total_logs, snapshot.total_app_logs
    );
    out.push_str(counter_lines);
    let _ = writeln!(out, "{}", lookups.summary());
    let _ = writeln!(
        out,
        "rate last second {:>5} total dropped messages {}",
        snapshot.rate_last_second, snapshot.dropped_messages
    );

    for row in &snapshot.rows {
        let _ = write!(out, "{:>8} {:>5} {}", row.count, row.source_type, row.name);
        if show_ids {
            let _ = write!(out, "| {}", row.app_id);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::QueueFullPolicy;
    use crate::telemetry::Telemetry;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn aggregator(capacity: usize) -> (LogAggregator, flume::Receiver<NameLookupTask>) {
        let telemetry = Arc::new(Telemetry::new().unwrap());
        let (queue, rx) = LookupQueue::bounded(capacity, QueueFullPolicy::Drop, telemetry);
        (LogAggregator::new(queue), rx)
    }

    #[tokio::test]
    async fn test_same_key_counts_once_and_enqueues_once() {
        let (agg, rx) = aggregator(64);
        for _ in 0..25 {
            agg.ingest("g1", "APP", "hello").await;
        }
        let snap = agg.snapshot();
        assert_eq!(snap.rows.len(), 1);
        assert_eq!(snap.rows[0].count, 25);
        assert_eq!(snap.total_logs, 25);
        assert_eq!(snap.total_app_logs, 25);
        assert_eq!(rx.len(), 1);
    }

    #[tokio::test]
    async fn test_system_dropped_messages() {
        let (agg, rx) = aggregator(64);
        agg.ingest("system", "", "Dropped 3 message(s) from MetronAgent to Doppler").await;
        agg.ingest("system", "", "Dropped 4 message(s) from MetronAgent to Doppler").await;
        agg.ingest("system", "MET", "something else").await;

        let snap = agg.snapshot();
        assert_eq!(snap.dropped_messages, 7);
        let dropped = snap.rows.iter().find(|r| r.source_type == "===").unwrap();
        assert_eq!(dropped.name, "system: dropped messages");
        assert_eq!(dropped.count, 2);
        let unknown = snap.rows.iter().find(|r| r.source_type == "MET").unwrap();
        assert_eq!(unknown.name, "system: unknown message");

        let task = rx.try_recv().unwrap();
        assert_eq!(task.current_name, "system: dropped messages");
    }

    #[tokio::test]
    async fn test_report_sort_order() {
        let (agg, _rx) = aggregator(64);
        for (app, src, n) in [("a", "APP", 2), ("b", "RTR", 5), ("c", "APP", 2), ("d", "STG", 2)] {
            for _ in 0..n {
                agg.ingest(app, src, "m").await;
            }
        }
        agg.publish(&LogKey::new("a", "APP"), "zeta".into());
        agg.publish(&LogKey::new("c", "APP"), "alpha".into());
        agg.publish(&LogKey::new("d", "STG"), "alpha".into());

        let order: Vec<_> = agg.snapshot().rows.iter().map(|r| r.app_id.clone()).collect();
        assert_eq!(order, vec!["b", "c", "d", "a"]);
    }

    #[tokio::test]
    async fn test_publish_never_overwrites() {
        let (agg, _rx) = aggregator(64);
        agg.ingest("g1", "APP", "m").await;
        agg.publish(&LogKey::new("g1", "APP"), "first".into());
        agg.publish(&LogKey::new("g1", "APP"), "second".into());
        agg.publish(&LogKey::new("gone", "APP"), "ignored".into());
        let snap = agg.snapshot();
        assert_eq!(snap.rows.len(), 1);
        assert_eq!(snap.rows[0].name, "first");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_over_one_second() {
        let (agg, _rx) = aggregator(64);
        agg.begin_window();
        for _ in 0..10 {
            agg.ingest("g", "APP", "m").await;
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        agg.ingest("g", "APP", "m").await;
        assert_eq!(agg.snapshot().rate_last_second, 5);
    }

    #[tokio::test]
    async fn test_render_report() {
        let (agg, _rx) = aggregator(64);
        agg.ingest("g1", "APP", "m").await;
        agg.ingest("g1", "APP", "m").await;
        agg.publish(&LogKey::new("g1", "APP"), "billing".into());

        let text = render_report(&agg.snapshot(), "", &LookupStats::default(), true);
        let expected = "\
Total logs messages:        2 APP messages:        2
0 names, ave lookup 0 max/min 0 0 ave queue 0 max/min 0 0 queued 0 max 0
rate last second     0 total dropped messages 0
       2   APP billing| g1
";
        assert_eq!(text, expected);
    }

    #[tokio::test]
    async fn test_empty_report_and_reset() {
        let (agg, _rx) = aggregator(64);
        assert_eq!(
            render_report(&agg.snapshot(), "", &LookupStats::default(), false),
            "No log data collected\n"
        );
        agg.ingest("g1", "APP", "m").await;
        agg.reset();
        assert!(agg.is_empty());
        assert_eq!(agg.snapshot().total_logs, 0);
    }
}
