// ============================================================================
// CORE TYPE SYSTEM
// ============================================================================
// The envelope model every collector consumes. Envelopes arrive as
// newline-delimited JSON from a replay file or are built in memory by tests;
// field names follow the firehose's camelCase wire form.
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Timestamp - Nanosecond Precision
// ----------------------------------------------------------------------------

/// Wall-clock timestamp in nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a new timestamp from nanoseconds since Unix epoch
    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Create a new timestamp from milliseconds since Unix epoch
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Get the current timestamp with nanosecond precision
    #[inline]
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_nanos() as i64)
    }

    #[inline]
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0 / 1_000_000
    }

    /// Signed distance to an earlier timestamp, in whole milliseconds.
    /// Negative when `earlier` is actually later (clock skew).
    #[inline]
    pub const fn millis_since(&self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0) / 1_000_000
    }

    /// Duration since an earlier timestamp, saturating at zero.
    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        let delta = self.0.saturating_sub(earlier.0);
        if delta <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(delta as u64)
        }
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let dt = DateTime::<Utc>::from_timestamp(
            self.0.div_euclid(1_000_000_000),
            self.0.rem_euclid(1_000_000_000) as u32,
        );
        match dt {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            None => write!(f, "{}ns", self.0),
        }
    }
}

// ----------------------------------------------------------------------------
// Event Types
// ----------------------------------------------------------------------------

/// Declared type of an envelope.
///
/// `HttpStartStop`, `Error` and `ContainerMetric` are part of the stream but
/// no collector consumes them beyond the type-agnostic tag and latency views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    HttpStartStop,
    LogMessage,
    ValueMetric,
    CounterEvent,
    Error,
    ContainerMetric,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::HttpStartStop,
        EventType::LogMessage,
        EventType::ValueMetric,
        EventType::CounterEvent,
        EventType::Error,
        EventType::ContainerMetric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::HttpStartStop => "HttpStartStop",
            EventType::LogMessage => "LogMessage",
            EventType::ValueMetric => "ValueMetric",
            EventType::CounterEvent => "CounterEvent",
            EventType::Error => "Error",
            EventType::ContainerMetric => "ContainerMetric",
        }
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Payloads
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMessage {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub source_instance: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMetric {
    pub name: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub unit: String,
}

/// Monotonic counter sample, reported as a running total plus the increment
/// since the previous sample from the same emitter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterEvent {
    pub name: String,
    #[serde(default)]
    pub delta: u64,
    #[serde(default)]
    pub total: u64,
}

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// One unit from the telemetry stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub origin: String,
    pub event_type: EventType,
    /// Emission time in nanoseconds since the epoch
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub deployment: String,
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_message: Option<LogMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_metric: Option<ValueMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_event: Option<CounterEvent>,
}

impl Envelope {
    /// Bare envelope of the given type with no payload.
    pub fn new(origin: impl Into<String>, event_type: EventType) -> Self {
        Self {
            origin: origin.into(),
            event_type,
            timestamp: None,
            deployment: String::new(),
            job: String::new(),
            index: String::new(),
            ip: String::new(),
            tags: BTreeMap::new(),
            log_message: None,
            value_metric: None,
            counter_event: None,
        }
    }

    pub fn log(app_id: impl Into<String>, source_type: impl Into<String>, message: impl Into<String>) -> Self {
        let mut env = Self::new("", EventType::LogMessage);
        env.log_message = Some(LogMessage {
            message: message.into(),
            message_type: Some("OUT".into()),
            app_id: app_id.into(),
            source_type: source_type.into(),
            ..Default::default()
        });
        env
    }

    pub fn counter(origin: impl Into<String>, name: impl Into<String>, total: u64, delta: u64) -> Self {
        let mut env = Self::new(origin, EventType::CounterEvent);
        env.counter_event = Some(CounterEvent {
            name: name.into(),
            delta,
            total,
        });
        env
    }

    pub fn value_metric(origin: impl Into<String>, name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        let mut env = Self::new(origin, EventType::ValueMetric);
        env.value_metric = Some(ValueMetric {
            name: name.into(),
            value,
            unit: unit.into(),
        });
        env
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, ts: Timestamp) -> Self {
        self.timestamp = Some(ts.as_nanos());
        self
    }

    /// Metric name carried by a value-metric or counter-event payload.
    pub fn metric_name(&self) -> Option<&str> {
        match self.event_type {
            EventType::ValueMetric => self.value_metric.as_ref().map(|m| m.name.as_str()),
            EventType::CounterEvent => self.counter_event.as_ref().map(|c| c.name.as_str()),
            _ => None,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}
