//! Collector identities and the pure event classifier.
//!
//! Every window belongs to exactly one collector. For each envelope the
//! window consumes, [`route`] decides which aggregator entry point (if any)
//! sees it.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::types::EventType;

/// The five collectors an operator can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorKind {
    Logs,
    Tags,
    Metrics,
    Latency,
    LogLength,
}

impl CollectorKind {
    pub const ALL: [CollectorKind; 5] = [
        CollectorKind::Logs,
        CollectorKind::Tags,
        CollectorKind::Metrics,
        CollectorKind::Latency,
        CollectorKind::LogLength,
    ];

    /// Display name used in status lines and subscription ids.
    pub fn display_name(&self) -> &'static str {
        match self {
            CollectorKind::Logs => "Count Logs",
            CollectorKind::Tags => "Count Tags",
            CollectorKind::Metrics => "Metric Audit",
            CollectorKind::Latency => "Envelope Latency",
            CollectorKind::LogLength => "Log Length Histogram",
        }
    }

    /// Short identifier accepted by `/stop?collector=` and the CLI.
    pub fn slug(&self) -> &'static str {
        match self {
            CollectorKind::Logs => "logs",
            CollectorKind::Tags => "tags",
            CollectorKind::Metrics => "metrics",
            CollectorKind::Latency => "latency",
            CollectorKind::LogLength => "loghist",
        }
    }
}

impl Display for CollectorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for CollectorKind {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        CollectorKind::ALL
            .into_iter()
            .find(|k| k.slug() == wanted || k.display_name().eq_ignore_ascii_case(&wanted))
            .or(match wanted.as_str() {
                "loglength" | "log-length" => Some(CollectorKind::LogLength),
                _ => None,
            })
            .ok_or_else(|| AuditError::UnknownCollector(s.to_string()))
    }
}

/// Aggregator entry point for one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Route {
    LogCount,
    CounterIntegrity,
    TagCount,
    MetricTiming,
    Latency,
    LogLength,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::LogCount => "log_count",
            Route::CounterIntegrity => "counter_integrity",
            Route::TagCount => "tag_count",
            Route::MetricTiming => "metric_timing",
            Route::Latency => "latency",
            Route::LogLength => "log_length",
        }
    }
}

/// Classify an envelope for a collector. `None` means drop silently.
pub const fn route(collector: CollectorKind, event_type: EventType) -> Option<Route> {
    match (collector, event_type) {
        (CollectorKind::Logs, EventType::LogMessage) => Some(Route::LogCount),
        (CollectorKind::Logs, EventType::CounterEvent) => Some(Route::CounterIntegrity),
        (CollectorKind::Logs, _) => None,

        (CollectorKind::Tags, _) => Some(Route::TagCount),

        (CollectorKind::Metrics, EventType::ValueMetric | EventType::CounterEvent) => {
            Some(Route::MetricTiming)
        }
        (CollectorKind::Metrics, _) => None,

        (CollectorKind::Latency, _) => Some(Route::Latency),

        (CollectorKind::LogLength, EventType::LogMessage) => Some(Route::LogLength),
        (CollectorKind::LogLength, _) => None,
    }
}
