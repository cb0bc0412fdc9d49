// ============================================================================
// COUNTER INTEGRITY TRACKER
// ============================================================================
// Follows the log-count counters emitted by the log pipeline components.
// Each counter sample carries a running total and the increment since the
// emitter's previous sample. A sample whose total disagrees with the tracked
// previous value plus its delta is counted as a mismatch.
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter, Write as _};

use ahash::AHashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::types::Envelope;

/// Component family a tracked counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CounterFamily {
    Diego,
    Metron,
    Doppler,
}

impl CounterFamily {
    /// Report order.
    pub const ALL: [CounterFamily; 3] = [CounterFamily::Diego, CounterFamily::Metron, CounterFamily::Doppler];

    /// Which family, if any, tracks this counter.
    ///
    /// Diego cells do not tag their counters, so `rep` is matched on name and
    /// origin alone. The others must be tagged as log-message counts.
    pub fn classify(name: &str, origin: &str, event_type_tag: Option<&str>) -> Option<Self> {
        if name == "logSenderTotalMessagesRead" && origin == "rep" {
            return Some(CounterFamily::Diego);
        }
        if event_type_tag != Some("LogMessage") {
            return None;
        }
        match (name, origin) {
            ("listeners.receivedEnvelopes", "DopplerServer") => Some(CounterFamily::Doppler),
            ("dropsondeMarshaller.sentEnvelopes", "MetronAgent") => Some(CounterFamily::Metron),
            _ => None,
        }
    }
}

impl Display for CounterFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            CounterFamily::Diego => "Diego",
            CounterFamily::Metron => "Metron",
            CounterFamily::Doppler => "Doppler",
        };
        f.write_str(s)
    }
}

// ----------------------------------------------------------------------------
// Per-index Tracking
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterTrack {
    pub start: u64,
    pub previous: u64,
    pub current: u64,
    pub mismatches: u64,
    pub messages: u64,
}

impl CounterTrack {
    fn seed(total: u64) -> Self {
        Self {
            start: total,
            previous: total,
            current: total,
            mismatches: 0,
            messages: 1,
        }
    }

    /// Fold in the next sample. The check adds the delta to `previous`, which
    /// lags the latest total by one sample, then rolls both values forward.
    fn observe(&mut self, total: u64, delta: u64) {
        if self.previous.checked_add(delta) != Some(total) {
            self.mismatches += 1;
        }
        self.messages += 1;
        self.previous = self.current;
        self.current = total;
    }

    /// Growth of the counter over the tracked span.
    pub fn increase(&self) -> u64 {
        self.current.saturating_sub(self.start)
    }
}

/// Totals for one family across all of its indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FamilySummary {
    pub family: CounterFamily,
    pub indices: usize,
    pub current: u64,
    pub increase: u64,
    pub mismatches: u64,
    pub messages: u64,
}

// ----------------------------------------------------------------------------
// Tracker
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct CounterTracker {
    families: Mutex<AHashMap<CounterFamily, BTreeMap<String, CounterTrack>>>,
}

impl CounterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a counter envelope into its family table. Returns `false` for
    /// counters nobody tracks.
    pub fn ingest_envelope(&self, envelope: &Envelope) -> bool {
        let Some(counter) = envelope.counter_event.as_ref() else {
            return false;
        };
        self.ingest(
            &envelope.index,
            &counter.name,
            &envelope.origin,
            envelope.tag("event_type"),
            counter.total,
            counter.delta,
        )
    }

    pub fn ingest(
        &self,
        index: &str,
        name: &str,
        origin: &str,
        event_type_tag: Option<&str>,
        total: u64,
        delta: u64,
    ) -> bool {
        let Some(family) = CounterFamily::classify(name, origin, event_type_tag) else {
            return false;
        };
        let mut families = self.families.lock();
        let tracks = families.entry(family).or_default();
        match tracks.get_mut(index) {
            Some(track) => track.observe(total, delta),
            None => {
                tracks.insert(index.to_string(), CounterTrack::seed(total));
            }
        }
        true
    }

    pub fn track(&self, family: CounterFamily, index: &str) -> Option<CounterTrack> {
        self.families.lock().get(&family).and_then(|t| t.get(index).copied())
    }

    /// Per-family totals, in report order, for families seen so far.
    pub fn summaries(&self) -> Vec<FamilySummary> {
        let families = self.families.lock();
        CounterFamily::ALL
            .iter()
            .filter_map(|family| {
                let tracks = families.get(family)?;
                Some(tracks.values().fold(
                    FamilySummary {
                        family: *family,
                        indices: tracks.len(),
                        current: 0,
                        increase: 0,
                        mismatches: 0,
                        messages: 0,
                    },
                    |mut acc, t| {
                        acc.current += t.current;
                        acc.increase += t.increase();
                        acc.mismatches += t.mismatches;
                        acc.messages += t.messages;
                        acc
                    },
                ))
            })
            .collect()
    }

    pub fn reset(&self) {
        self.families.lock().clear();
    }
}

/// One line per family seen: `name [indices]: increase [mismatches|messages]`.
pub fn render_summaries(summaries: &[FamilySummary]) -> String {
    let mut out = String::new();
    for s in summaries {
        let _ = writeln!(
            out,
            "{:>8} [{:>2}]: {:>8} [{:>2}|{:>8}] total {}",
            s.family.to_string(),
            s.indices,
            s.increase,
            s.mismatches,
            s.messages,
            s.current
        );
    }
    out
}
