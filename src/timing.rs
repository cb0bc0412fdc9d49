// ============================================================================
// METRIC TIMING AUDITOR
// ============================================================================
// Tracks how regularly every (index, metric) pair is emitted: the gaps
// between consecutive sightings, their sum and extremes. Reports can fold the
// per-index records into one per (origin, metric) and cross-reference the
// result against the documentation manifest.
// ============================================================================

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::helpers::TimingStats;
use crate::manifest::{Manifest, MetricId};
use crate::types::Envelope;

// ----------------------------------------------------------------------------
// Records
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub index: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct MetricTimingRecord {
    pub name: String,
    pub origin: String,
    pub job: String,
    pub index: String,
    pub ip: String,
    pub last_seen: Instant,
    /// One sample per gap between consecutive sightings
    pub gaps: TimingStats,
}

impl MetricTimingRecord {
    /// Sightings so far; always one more than the number of gaps.
    pub fn occurrences(&self) -> u64 {
        self.gaps.count + 1
    }

    fn observe(&mut self, now: Instant) {
        let gap = now.saturating_duration_since(self.last_seen);
        self.gaps.record(gap);
        self.last_seen = now;
    }

    /// Fold a record for the same (origin, name) into this one.
    fn absorb(&mut self, other: &MetricTimingRecord) {
        self.gaps.merge(&other.gaps);
    }

    fn row(&self) -> TimingRow {
        TimingRow {
            origin: self.origin.clone(),
            job: self.job.clone(),
            index: self.index.clone(),
            ip: self.ip.clone(),
            name: self.name.clone(),
            occurrences: self.occurrences(),
            average: self.gaps.average(),
            longest: self.gaps.max,
            shortest: self.gaps.min,
        }
    }
}

/// One line of the interval report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimingRow {
    pub origin: String,
    /// Empty for consolidated rows, along with `index` and `ip`
    pub job: String,
    pub index: String,
    pub ip: String,
    pub name: String,
    pub occurrences: u64,
    /// `None` when only one sighting was recorded
    pub average: Option<Duration>,
    pub longest: Duration,
    pub shortest: Option<Duration>,
}

// ----------------------------------------------------------------------------
// Auditor
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MetricTimingAuditor {
    records: Mutex<AHashMap<MetricKey, MetricTimingRecord>>,
}

impl MetricTimingAuditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting of a value metric or counter event. Returns `false`
    /// for envelopes with no metric name.
    pub fn ingest(&self, envelope: &Envelope) -> bool {
        self.ingest_at(envelope, Instant::now())
    }

    pub fn ingest_at(&self, envelope: &Envelope, now: Instant) -> bool {
        let Some(name) = envelope.metric_name() else {
            return false;
        };
        let key = MetricKey {
            index: envelope.index.clone(),
            name: name.to_string(),
        };
        let mut records = self.records.lock();
        match records.get_mut(&key) {
            Some(record) => record.observe(now),
            None => {
                records.insert(
                    key,
                    MetricTimingRecord {
                        name: name.to_string(),
                        origin: envelope.origin.clone(),
                        job: envelope.job.clone(),
                        index: envelope.index.clone(),
                        ip: envelope.ip.clone(),
                        last_seen: now,
                        gaps: TimingStats::new(),
                    },
                );
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Interval rows sorted by origin then name, optionally consolidated
    /// across index and job.
    pub fn rows(&self, consolidated: bool) -> Vec<TimingRow> {
        let records: Vec<MetricTimingRecord> = self.records.lock().values().cloned().collect();
        let mut rows: Vec<TimingRow> = if consolidated {
            consolidate(records).iter().map(MetricTimingRecord::row).collect()
        } else {
            records.iter().map(MetricTimingRecord::row).collect()
        };
        rows.sort_by(|a, b| {
            a.origin
                .cmp(&b.origin)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.index.cmp(&b.index))
        });
        rows
    }

    /// Distinct (origin, name) pairs observed so far.
    pub fn observed(&self) -> BTreeSet<MetricId> {
        self.records
            .lock()
            .values()
            .map(|r| MetricId::new(r.origin.clone(), r.name.clone()))
            .collect()
    }

    pub fn reset(&self) {
        self.records.lock().clear();
    }
}

/// Merge records sharing (origin, name). Index, job and address are dropped.
pub fn consolidate(records: Vec<MetricTimingRecord>) -> Vec<MetricTimingRecord> {
    let mut merged: AHashMap<MetricId, MetricTimingRecord> = AHashMap::new();
    for record in records {
        let id = MetricId::new(record.origin.clone(), record.name.clone());
        match merged.get_mut(&id) {
            Some(existing) => existing.absorb(&record),
            None => {
                merged.insert(
                    id,
                    MetricTimingRecord {
                        job: String::new(),
                        index: String::new(),
                        ip: String::new(),
                        ..record
                    },
                );
            }
        }
    }
    merged.into_values().collect()
}

// ----------------------------------------------------------------------------
// Reports
// ----------------------------------------------------------------------------

fn secs(d: Duration) -> String {
    format!("{:5.1}", d.as_secs_f64())
}

pub fn render_intervals(rows: &[TimingRow], recorded: usize) -> String {
    let mut out = String::new();
    if rows.is_empty() {
        out.push_str("No metric data collected\n");
        return out;
    }

    let _ = writeln!(out, "-Have recorded {recorded} metrics");
    let _ = writeln!(out, "{}", "_".repeat(109));
    let _ = writeln!(
        out,
        "\t          Source      |                 Name                               |   num  | ave | max | min |"
    );

    for row in rows {
        let _ = write!(out, "{:<28}|", row.origin);
        if !row.index.is_empty() {
            let _ = write!(out, "{:<32}|", row.job);
        }
        let _ = write!(out, "{:<52}|{:>8}|", row.name, row.occurrences);
        match row.average {
            Some(avg) => {
                let _ = write!(out, "{}|", secs(avg));
            }
            None => out.push_str("   --|"),
        }
        let _ = write!(out, "{}|", secs(row.longest));
        match row.shortest {
            Some(min) => {
                let _ = write!(out, "{}|", secs(min));
            }
            None => out.push_str("   --|"),
        }
        if !row.index.is_empty() {
            let _ = write!(out, "   {}", row.ip);
        }
        out.push('\n');
    }
    out
}

/// Observed metrics split against the documentation manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestReport {
    pub observed: usize,
    pub documented: usize,
    pub documented_observed: Vec<MetricId>,
    pub undocumented: Vec<MetricId>,
    pub unobserved: Vec<MetricId>,
}

pub fn cross_reference(observed: &BTreeSet<MetricId>, manifest: &Manifest) -> ManifestReport {
    let (documented_observed, undocumented): (Vec<MetricId>, Vec<MetricId>) =
        observed.iter().cloned().partition(|id| manifest.contains(id));
    let unobserved = manifest
        .iter()
        .filter(|id| !observed.contains(*id))
        .cloned()
        .collect();
    ManifestReport {
        observed: observed.len(),
        documented: manifest.len(),
        documented_observed,
        undocumented,
        unobserved,
    }
}

pub fn render_manifest_report(report: &ManifestReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n\n===============> Read: {} metrics from firehose, {} metrics from CSV",
        report.observed, report.documented
    );
    let sections = [
        ("Documented Firehose Metrics:", "<", &report.documented_observed),
        ("Undocumented Firehose Metrics:", ">", &report.undocumented),
        ("Unemitted Documented Metrics:", "*", &report.unobserved),
    ];
    for (label, prefix, ids) in sections {
        let _ = writeln!(out, "\n\n===============> {} {}", ids.len(), label);
        for id in ids.iter() {
            let _ = writeln!(out, "{} {:<28}| {}", prefix, id.origin, id.name);
        }
    }
    out
}
