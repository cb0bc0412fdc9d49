//! # Audit Nozzle - Firehose Auditing Engine
//!
//! Runs time-boxed measurement windows against a platform telemetry firehose
//! and turns what it sees into operator reports.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              AUDIT NOZZLE                                    │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  EVENT SOURCE → SCAN WINDOW → DISPATCH → AGGREGATORS → REPORTS              │
//! │                                             │                               │
//! │                                             └──→ NAME RESOLUTION WORKER     │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Collectors
//!
//! - **Count Logs**: log lines per (app, source type), ingestion rate, and
//!   counter integrity for the log-carrying components
//! - **Count Tags**: envelope tag usage per origin/job
//! - **Metric Audit**: inter-arrival intervals per metric, cross-referenced
//!   against a documentation manifest
//! - **Envelope Latency**: end-to-end latency histogram
//! - **Log Length Histogram**: log message size histogram

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod counters;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod helpers;
pub mod histogram;
pub mod logging;
pub mod logs;
pub mod lookup;
pub mod manifest;
pub mod resolver;
pub mod scan;
pub mod server;
pub mod source;
pub mod tags;
pub mod telemetry;
pub mod timing;
pub mod types;

pub use config::AuditConfig;
pub use dispatch::{route, CollectorKind, Route};
pub use engine::{AuditEngine, ReportOptions};
pub use error::{AuditError, AuditResult, ConfigError};
pub use types::{CounterEvent, Envelope, EventType, LogMessage, Timestamp, ValueMetric};

// ============================================================================
// CONSTANTS & VERSION INFORMATION
// ============================================================================

/// Engine version - follows semantic versioning
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ENGINE_NAME: &str = "auditnozzle";
pub const ENGINE_FULL_NAME: &str = "Audit Nozzle";

// ----------------------------------------------------------------------------
// Buffer & Queue Sizes
// ----------------------------------------------------------------------------

/// Name lookups that can wait for the resolution worker before the
/// saturation policy applies
pub const NAME_LOOKUP_QUEUE_CAPACITY: usize = 20_000;

/// Envelopes buffered between an event source and the scan loop
pub const SOURCE_CHANNEL_CAPACITY: usize = 65_536;

// ----------------------------------------------------------------------------
// Timing & Intervals
// ----------------------------------------------------------------------------

/// Window length used when a start request carries no usable runtime
pub const DEFAULT_SCAN_RUNTIME_SECS: u64 = 600;

/// Longest an ingesting scan waits on a saturated lookup queue
pub const DEFAULT_LOOKUP_BLOCK_TIMEOUT_MS: u64 = 5_000;

/// Per-request timeout for the HTTP name resolver
pub const DEFAULT_RESOLVER_TIMEOUT_SECS: u64 = 30;

// ----------------------------------------------------------------------------
// Histogram Geometry
// ----------------------------------------------------------------------------

/// Envelope latency histogram: bucket width and ceiling in milliseconds
pub const LATENCY_BUCKET_MS: u64 = 20;
pub const LATENCY_MAX_MS: u64 = 200;

/// Log length histogram: bucket width and ceiling in bytes
pub const LOG_LENGTH_BUCKET_BYTES: u64 = 200;
pub const LOG_LENGTH_MAX_BYTES: u64 = 10_000;

// ----------------------------------------------------------------------------
// Network
// ----------------------------------------------------------------------------

/// Default control surface port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Prefix of every firehose subscription id this engine opens
pub const SUBSCRIPTION_PREFIX: &str = "auditnozzle";

/// Default location of the metric documentation manifest
pub const DEFAULT_MANIFEST_PATH: &str = "/app/resources/metrics.list.example.csv";
