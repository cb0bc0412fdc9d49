// ============================================================================
// EVENT SOURCES
// ============================================================================
// An `EventSource` opens a fresh subscription per window and hands back an
// `EventStream`. The stream owns the producer task feeding it; dropping the
// stream releases the subscription.
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AuditError, AuditResult};
use crate::types::Envelope;
use crate::SOURCE_CHANNEL_CAPACITY;

// ----------------------------------------------------------------------------
// Event Stream
// ----------------------------------------------------------------------------

/// Receiving end of one subscription.
#[derive(Debug)]
pub struct EventStream {
    rx: flume::Receiver<Envelope>,
    producer: Option<JoinHandle<()>>,
}

impl EventStream {
    pub fn new(rx: flume::Receiver<Envelope>, producer: Option<JoinHandle<()>>) -> Self {
        Self { rx, producer }
    }

    /// A stream fed directly through the returned sender.
    pub fn channel(capacity: usize) -> (flume::Sender<Envelope>, Self) {
        let (tx, rx) = flume::bounded(capacity);
        (tx, Self::new(rx, None))
    }

    /// Next envelope in delivery order, `None` once the source is exhausted.
    pub async fn next(&mut self) -> Option<Envelope> {
        self.rx.recv_async().await.ok()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Event Source Trait
// ----------------------------------------------------------------------------

#[async_trait]
pub trait EventSource: Send + Sync + std::fmt::Debug {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    /// Open a new subscription. Fails with `SourceUnavailable` when the
    /// upstream cannot be reached; no envelopes are produced in that case.
    async fn open(&self, subscription_id: &str) -> AuditResult<EventStream>;
}

// ----------------------------------------------------------------------------
// Replay Source - NDJSON file
// ----------------------------------------------------------------------------

/// Replays newline-delimited JSON envelopes from a file, once per window.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    path: PathBuf,
    capacity: usize,
}

impl ReplaySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            capacity: SOURCE_CHANNEL_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

#[async_trait]
impl EventSource for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    async fn open(&self, subscription_id: &str) -> AuditResult<EventStream> {
        let file = File::open(&self.path).await.map_err(|e| {
            AuditError::source_unavailable(self.name(), format!("{}: {e}", self.path.display()))
        })?;

        info!(
            target: "auditnozzle::engine",
            path = %self.path.display(),
            subscription = %subscription_id,
            "Replay source opened"
        );

        let (tx, rx) = flume::bounded(self.capacity);
        let path = self.path.clone();
        let producer = tokio::spawn(async move {
            let mut lines = BufReader::new(file).lines();
            let mut line_no = 0u64;
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(target: "auditnozzle::engine", path = %path.display(), error = %e, "Replay read failed");
                        break;
                    }
                };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Envelope>(&line) {
                    Ok(envelope) => {
                        if tx.send_async(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(target: "auditnozzle::engine", line = line_no, error = %e, "Skipping malformed envelope");
                    }
                }
            }
            debug!(target: "auditnozzle::engine", lines = line_no, "Replay exhausted");
        });

        Ok(EventStream::new(rx, Some(producer)))
    }
}

// ----------------------------------------------------------------------------
// Memory Source
// ----------------------------------------------------------------------------

/// Serves a fixed set of envelopes. With `keep_open` the stream stays open
/// after the last envelope, so windows end on their timer.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    events: Arc<Vec<Envelope>>,
    keep_open: bool,
}

impl MemorySource {
    pub fn new(events: Vec<Envelope>) -> Self {
        Self {
            events: Arc::new(events),
            keep_open: false,
        }
    }

    pub fn keep_open(mut self) -> Self {
        self.keep_open = true;
        self
    }
}

#[async_trait]
impl EventSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self, _subscription_id: &str) -> AuditResult<EventStream> {
        let (tx, rx) = flume::unbounded();
        for envelope in self.events.iter() {
            tx.send(envelope.clone())
                .map_err(|_| AuditError::Internal("memory source receiver dropped".into()))?;
        }
        let producer = if self.keep_open {
            Some(tokio::spawn(async move {
                // Holding the sender keeps the stream open until aborted.
                std::future::pending::<()>().await;
                drop(tx);
            }))
        } else {
            None
        };
        Ok(EventStream::new(rx, producer))
    }
}

/// A source that can never be opened.
#[derive(Debug, Clone, Default)]
pub struct UnavailableSource {
    pub reason: String,
}

#[async_trait]
impl EventSource for UnavailableSource {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn open(&self, _subscription_id: &str) -> AuditResult<EventStream> {
        Err(AuditError::source_unavailable(self.name(), self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_replay_skips_malformed_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"origin":"rep","eventType":"ValueMetric","valueMetric":{{"name":"cpu","value":1.0,"unit":"%"}}}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"eventType":"LogMessage","logMessage":{{"message":"hi","appId":"g","sourceType":"APP"}}}}"#).unwrap();
        file.flush().unwrap();

        let source = ReplaySource::new(file.path());
        let mut stream = source.open("auditnozzle-test").await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.metric_name(), Some("cpu"));
        let second = stream.next().await.unwrap();
        assert_eq!(second.log_message.unwrap().app_id, "g");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_replay_missing_file_is_unavailable() {
        let source = ReplaySource::new("/definitely/not/here.ndjson");
        let err = source.open("auditnozzle-test").await.unwrap_err();
        assert_eq!(err.category(), "source_unavailable");
    }

    #[tokio::test]
    async fn test_memory_source_closes_after_last_event() {
        let source = MemorySource::new(vec![Envelope::log("g", "APP", "m")]);
        let mut stream = source.open("sub").await.unwrap();
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }
}
