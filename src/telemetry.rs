// ============================================================================
// SELF-TELEMETRY
// ============================================================================
// Prometheus counters describing the engine itself. Each engine owns its own
// registry so tests and multiple engines in one process never collide.
// ============================================================================

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::dispatch::{CollectorKind, Route};
use crate::error::{AuditError, AuditResult};
use crate::ENGINE_NAME;

#[derive(Debug, Clone)]
pub struct Telemetry {
    registry: Registry,
    events_routed: IntCounterVec,
    events_dropped: IntCounterVec,
    scans_started: IntCounterVec,
    lookup_queue_depth: IntGauge,
    lookups_resolved: IntCounter,
    lookups_failed: IntCounter,
    lookups_queue_full: IntCounter,
}

impl Telemetry {
    pub fn new() -> AuditResult<Self> {
        let registry = Registry::new_custom(Some(ENGINE_NAME.into()), None)?;

        let events_routed = IntCounterVec::new(
            Opts::new("events_routed_total", "Envelopes routed to an aggregator"),
            &["collector", "route"],
        )?;
        let events_dropped = IntCounterVec::new(
            Opts::new("events_dropped_total", "Envelopes a collector does not consume"),
            &["collector"],
        )?;
        let scans_started = IntCounterVec::new(
            Opts::new("scans_started_total", "Measurement windows started"),
            &["collector"],
        )?;
        let lookup_queue_depth = IntGauge::new("lookup_queue_depth", "Name lookups waiting for the worker")?;
        let lookups_resolved = IntCounter::new("lookups_resolved_total", "Name lookups completed")?;
        let lookups_failed = IntCounter::new("lookups_failed_total", "Name lookups that fell back to the synthetic label")?;
        let lookups_queue_full = IntCounter::new("lookups_queue_full_total", "Name lookups dropped on a saturated queue")?;

        registry.register(Box::new(events_routed.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(scans_started.clone()))?;
        registry.register(Box::new(lookup_queue_depth.clone()))?;
        registry.register(Box::new(lookups_resolved.clone()))?;
        registry.register(Box::new(lookups_failed.clone()))?;
        registry.register(Box::new(lookups_queue_full.clone()))?;

        Ok(Self {
            registry,
            events_routed,
            events_dropped,
            scans_started,
            lookup_queue_depth,
            lookups_resolved,
            lookups_failed,
            lookups_queue_full,
        })
    }

    #[inline]
    pub fn record_routed(&self, collector: CollectorKind, route: Route) {
        self.events_routed
            .with_label_values(&[collector.slug(), route.as_str()])
            .inc();
    }

    #[inline]
    pub fn record_dropped(&self, collector: CollectorKind) {
        self.events_dropped.with_label_values(&[collector.slug()]).inc();
    }

    pub fn record_scan_started(&self, collector: CollectorKind) {
        self.scans_started.with_label_values(&[collector.slug()]).inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.lookup_queue_depth.set(depth as i64);
    }

    pub fn record_lookup(&self, resolved: bool) {
        self.lookups_resolved.inc();
        if !resolved {
            self.lookups_failed.inc();
        }
    }

    pub fn record_queue_full(&self) {
        self.lookups_queue_full.inc();
    }

    pub fn routed_count(&self, collector: CollectorKind, route: Route) -> u64 {
        self.events_routed
            .with_label_values(&[collector.slug(), route.as_str()])
            .get()
    }

    /// Prometheus text exposition of every metric in this registry.
    pub fn encode(&self) -> AuditResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| AuditError::Internal(format!("metrics are not UTF-8: {e}")))
    }
}
