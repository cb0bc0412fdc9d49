// ============================================================================
// AUDIT ENGINE
// ============================================================================
// Owns the aggregators, one scan slot per collector, and the name resolution
// worker. Every control-surface operation lands here.
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};
use uuid::Uuid;

use crate::config::{AuditConfig, ResolverKind};
use crate::counters::{self, CounterTracker};
use crate::dispatch::{route, CollectorKind, Route};
use crate::error::AuditResult;
use crate::histogram::SharedHistogram;
use crate::logs::{self, LogAggregator};
use crate::lookup::{self, LookupQueue, LookupStats};
use crate::manifest::Manifest;
use crate::resolver::{HttpResolver, NameResolver, NoopResolver, StaticResolver};
use crate::scan::{EventSink, ScanController, ScanHandle, ScanOutcome, ScanStatus};
use crate::source::{EventSource, ReplaySource};
use crate::tags::{self, TagAggregator};
use crate::telemetry::Telemetry;
use crate::timing::{self, MetricTimingAuditor};
use crate::types::{Envelope, Timestamp};
use crate::SUBSCRIPTION_PREFIX;

// ----------------------------------------------------------------------------
// Aggregators
// ----------------------------------------------------------------------------

/// Every aggregator family, each behind its own lock.
#[derive(Debug)]
pub struct Aggregators {
    pub logs: Arc<LogAggregator>,
    pub counters: CounterTracker,
    pub tags: TagAggregator,
    pub timing: MetricTimingAuditor,
    pub latency: SharedHistogram,
    pub log_length: SharedHistogram,
}

impl Aggregators {
    fn clear(&self, kind: CollectorKind) {
        match kind {
            CollectorKind::Logs => {
                self.logs.reset();
                self.counters.reset();
            }
            CollectorKind::Tags => self.tags.reset(),
            CollectorKind::Metrics => self.timing.reset(),
            CollectorKind::Latency => self.latency.reset(),
            CollectorKind::LogLength => self.log_length.reset(),
        }
    }
}

/// Feeds one collector's window into the aggregators.
#[derive(Debug)]
struct CollectorSink {
    kind: CollectorKind,
    aggregators: Arc<Aggregators>,
    telemetry: Arc<Telemetry>,
}

#[async_trait]
impl EventSink for CollectorSink {
    async fn accept(&self, envelope: Envelope) {
        let Some(target) = route(self.kind, envelope.event_type) else {
            self.telemetry.record_dropped(self.kind);
            return;
        };
        self.telemetry.record_routed(self.kind, target);
        trace!(target: "auditnozzle::scan", collector = %self.kind, route = target.as_str(), origin = %envelope.origin);

        let agg = &self.aggregators;
        match target {
            Route::LogCount => {
                if let Some(log) = &envelope.log_message {
                    agg.logs.ingest(&log.app_id, &log.source_type, &log.message).await;
                }
            }
            Route::CounterIntegrity => {
                agg.counters.ingest_envelope(&envelope);
            }
            Route::TagCount => agg.tags.ingest(&envelope.origin, &envelope.job, &envelope.tags),
            Route::MetricTiming => {
                agg.timing.ingest(&envelope);
            }
            Route::Latency => {
                if let Some(sent) = envelope.timestamp {
                    let latency_ms = Timestamp::now().millis_since(Timestamp::from_nanos(sent)).max(0);
                    agg.latency.insert(latency_ms as u64);
                }
            }
            Route::LogLength => {
                if let Some(log) = &envelope.log_message {
                    agg.log_length.insert(log.message.len() as u64);
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Report Options
// ----------------------------------------------------------------------------

/// Per-collector report switches. Each collector reads only its own flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    /// Log report: append application identifiers
    pub show_ids: bool,
    /// Tag report: keep the job dimension
    pub show_jobs: bool,
    /// Metric interval report: merge across index and job
    pub consolidated: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            show_ids: false,
            show_jobs: false,
            consolidated: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct ScanSlot {
    kind: CollectorKind,
    controller: Arc<ScanController>,
    handle: Mutex<Option<ScanHandle>>,
}

#[derive(Debug)]
pub struct AuditEngine {
    config: AuditConfig,
    source: Arc<dyn EventSource>,
    aggregators: Arc<Aggregators>,
    slots: Vec<ScanSlot>,
    telemetry: Arc<Telemetry>,
    worker_cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Resolver selected by the `[resolver]` section.
pub fn build_resolver(config: &AuditConfig) -> AuditResult<Arc<dyn NameResolver>> {
    let r = &config.resolver;
    Ok(match r.kind {
        ResolverKind::None => Arc::new(NoopResolver),
        ResolverKind::Static => Arc::new(StaticResolver::new(r.names.clone())),
        ResolverKind::Http => Arc::new(HttpResolver::new(
            r.endpoint.clone().unwrap_or_default(),
            r.token.clone(),
            r.timeout,
        )?),
    })
}

impl AuditEngine {
    /// Build an engine from configuration alone: the replay source and the
    /// configured resolver. Must be called inside a Tokio runtime.
    pub fn from_config(config: AuditConfig) -> AuditResult<Self> {
        let source = Arc::new(ReplaySource::new(&config.source.path).with_capacity(config.source.channel_capacity));
        let resolver = build_resolver(&config)?;
        Self::new(config, source, resolver)
    }

    /// Build an engine and start its name resolution worker. Must be called
    /// inside a Tokio runtime.
    pub fn new(
        config: AuditConfig,
        source: Arc<dyn EventSource>,
        resolver: Arc<dyn NameResolver>,
    ) -> AuditResult<Self> {
        let telemetry = Arc::new(Telemetry::new()?);

        let (queue, rx) = LookupQueue::bounded(
            config.name_lookup.queue_capacity,
            config.name_lookup.queue_full_policy(),
            telemetry.clone(),
        );
        let stats = queue.stats().clone();
        let logs = Arc::new(LogAggregator::new(queue));

        let h = &config.histograms;
        let aggregators = Arc::new(Aggregators {
            logs: logs.clone(),
            counters: CounterTracker::new(),
            tags: TagAggregator::new(),
            timing: MetricTimingAuditor::new(),
            latency: SharedHistogram::new(h.latency_bucket_ms, h.latency_max_ms),
            log_length: SharedHistogram::new(h.log_length_bucket_bytes, h.log_length_max_bytes),
        });

        let worker_cancel = CancellationToken::new();
        let worker = lookup::spawn_worker(rx, resolver, logs, stats, telemetry.clone(), worker_cancel.clone());

        let slots = CollectorKind::ALL
            .into_iter()
            .map(|kind| ScanSlot {
                kind,
                controller: Arc::new(ScanController::new(kind.display_name())),
                handle: Mutex::new(None),
            })
            .collect();

        info!(
            target: "auditnozzle::engine",
            source = source.name(),
            queue_capacity = config.name_lookup.queue_capacity,
            "Audit engine ready"
        );

        Ok(Self {
            config,
            source,
            aggregators,
            slots,
            telemetry,
            worker_cancel,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn aggregators(&self) -> &Aggregators {
        &self.aggregators
    }

    pub fn default_runtime(&self) -> Duration {
        self.config.scan.default_runtime
    }

    fn slot(&self, kind: CollectorKind) -> &ScanSlot {
        // Slots are built from CollectorKind::ALL, in order.
        &self.slots[kind as usize]
    }

    // ------------------------------------------------------------------------
    // Scan lifecycle
    // ------------------------------------------------------------------------

    /// Start a window. Returns the acknowledgement line for the operator.
    pub async fn start_scan(&self, kind: CollectorKind, requested: Duration) -> AuditResult<String> {
        let slot = self.slot(kind);
        slot.controller.begin(requested)?;

        // Gaps measured against last-seen times from an earlier run would be
        // meaningless, so the metric audit always starts clean.
        if kind == CollectorKind::Metrics {
            self.aggregators.timing.reset();
        }

        let subscription = format!(
            "{}-{}-{}",
            SUBSCRIPTION_PREFIX,
            kind.display_name().replace(' ', "-"),
            Uuid::new_v4()
        );
        let stream = match self.source.open(&subscription).await {
            Ok(stream) => stream,
            Err(e) => {
                slot.controller.abort();
                error!(
                    target: "auditnozzle::engine",
                    collector = %kind,
                    source = self.source.name(),
                    error = %e,
                    "Event source unavailable"
                );
                return Err(e);
            }
        };

        if kind == CollectorKind::Logs {
            self.aggregators.logs.begin_window();
        }

        let sink = Arc::new(CollectorSink {
            kind,
            aggregators: self.aggregators.clone(),
            telemetry: self.telemetry.clone(),
        });
        let handle = ScanHandle::spawn(slot.controller.clone(), stream, sink, requested);
        *slot.handle.lock() = Some(handle);
        self.telemetry.record_scan_started(kind);

        let runtime = humantime::format_duration(requested);
        info!(
            target: "auditnozzle::engine",
            collector = %kind,
            subscription = %subscription,
            runtime = %runtime,
            "Scan started"
        );
        Ok(format!("{kind}: runtime {runtime}"))
    }

    /// Cancel a running window and wait for it to wind down. `None` if the
    /// collector had no window task.
    pub async fn stop_scan(&self, kind: CollectorKind) -> AuditResult<Option<ScanOutcome>> {
        let handle = self.slot(kind).handle.lock().take();
        match handle {
            Some(handle) => {
                let outcome = handle.cancel_and_wait().await?;
                info!(target: "auditnozzle::engine", collector = %kind, "Scan stopped");
                Ok(Some(outcome))
            }
            None => Ok(None),
        }
    }

    /// Token that cancels the current window, if one was started.
    pub fn scan_cancellation(&self, kind: CollectorKind) -> Option<CancellationToken> {
        self.slot(kind).handle.lock().as_ref().map(ScanHandle::cancellation)
    }

    /// Wait for the current window to end on its own.
    pub async fn wait_scan(&self, kind: CollectorKind) -> AuditResult<Option<ScanOutcome>> {
        let handle = self.slot(kind).handle.lock().take();
        match handle {
            Some(handle) => Ok(Some(handle.wait().await?)),
            None => Ok(None),
        }
    }

    /// Cancel any running window, then clear the collector's bookkeeping and
    /// data.
    pub async fn reset(&self, kind: CollectorKind) -> AuditResult<()> {
        self.stop_scan(kind).await?;
        self.slot(kind).controller.reset();
        self.aggregators.clear(kind);
        info!(target: "auditnozzle::engine", collector = %kind, "Collector reset");
        Ok(())
    }

    pub async fn reset_all(&self) -> AuditResult<()> {
        for kind in CollectorKind::ALL {
            self.reset(kind).await?;
        }
        Ok(())
    }

    pub fn status(&self) -> Vec<ScanStatus> {
        self.slots.iter().map(|s| s.controller.status()).collect()
    }

    pub fn status_text(&self) -> String {
        self.status().iter().map(|s| format!("{s}\n")).collect()
    }

    pub fn lookup_stats(&self) -> LookupStats {
        self.aggregators.logs.lookups().stats().snapshot()
    }

    // ------------------------------------------------------------------------
    // Reports
    // ------------------------------------------------------------------------

    /// Status line for the collector followed by its report body.
    pub fn report(&self, kind: CollectorKind, options: ReportOptions) -> String {
        let mut out = format!("{}\n", self.slot(kind).controller.status());
        let agg = &self.aggregators;
        let body = match kind {
            CollectorKind::Logs => logs::render_report(
                &agg.logs.snapshot(),
                &counters::render_summaries(&agg.counters.summaries()),
                &self.lookup_stats(),
                options.show_ids,
            ),
            CollectorKind::Tags => tags::render_report(&agg.tags.snapshot(options.show_jobs)),
            CollectorKind::Metrics => {
                timing::render_intervals(&agg.timing.rows(options.consolidated), agg.timing.len())
            }
            CollectorKind::Latency => agg.latency.render(),
            CollectorKind::LogLength => agg.log_length.render(),
        };
        out.push_str(&body);
        out
    }

    /// Observed metrics against the configured documentation manifest.
    pub async fn report_manifest(&self) -> AuditResult<String> {
        let mut out = format!("{}\n", self.slot(CollectorKind::Metrics).controller.status());
        let timing = &self.aggregators.timing;
        if timing.is_empty() {
            out.push_str("No metric data collected\n");
            return Ok(out);
        }
        let manifest = Manifest::load(&self.config.manifest.path).await?;
        let report = timing::cross_reference(&timing.observed(), &manifest);
        out.push_str(&timing::render_manifest_report(&report));
        Ok(out)
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Stop every window and the resolution worker.
    pub async fn shutdown(&self) {
        for slot in &self.slots {
            if let Err(e) = self.stop_scan(slot.kind).await {
                error!(target: "auditnozzle::engine", collector = %slot.kind, error = %e, "Scan did not stop cleanly");
            }
        }
        self.worker_cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(target: "auditnozzle::engine", error = %e, "Name lookup worker ended abnormally");
            }
        }
        info!(target: "auditnozzle::engine", "Audit engine stopped");
    }
}

impl Drop for AuditEngine {
    fn drop(&mut self) {
        for slot in &self.slots {
            if let Some(handle) = slot.handle.lock().as_ref() {
                handle.cancel();
            }
        }
        self.worker_cancel.cancel();
    }
}
