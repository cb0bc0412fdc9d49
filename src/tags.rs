// ============================================================================
// TAG AGGREGATOR
// ============================================================================
// Counts tag usage per (origin, job, key, value). The consolidated view drops
// the job dimension by summing counts.
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::Write as _;

use ahash::AHashMap;
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TagKey {
    pub origin: String,
    /// Empty in the consolidated view
    pub job: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagRecord {
    pub key: TagKey,
    pub count: u64,
}

#[derive(Debug, Default)]
struct TagState {
    records: AHashMap<TagKey, u64>,
    total_msgs: u64,
    tagged_msgs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagSnapshot {
    pub rows: Vec<TagRecord>,
    pub total_msgs: u64,
    pub tagged_msgs: u64,
    pub consolidated: bool,
}

#[derive(Debug, Default)]
pub struct TagAggregator {
    state: Mutex<TagState>,
}

impl TagAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count every tag pair on one envelope. Untagged envelopes only bump
    /// the message total.
    pub fn ingest(&self, origin: &str, job: &str, tags: &BTreeMap<String, String>) {
        let mut s = self.state.lock();
        s.total_msgs += 1;
        if tags.is_empty() {
            return;
        }
        s.tagged_msgs += 1;
        for (k, v) in tags {
            let key = TagKey {
                origin: origin.to_string(),
                job: job.to_string(),
                key: k.clone(),
                value: v.clone(),
            };
            *s.records.entry(key).or_insert(0) += 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    /// Sorted copy of the table, consolidated across jobs unless
    /// `show_jobs` is set.
    pub fn snapshot(&self, show_jobs: bool) -> TagSnapshot {
        let (records, total_msgs, tagged_msgs) = {
            let s = self.state.lock();
            let records: Vec<TagRecord> = s
                .records
                .iter()
                .map(|(key, count)| TagRecord {
                    key: key.clone(),
                    count: *count,
                })
                .collect();
            (records, s.total_msgs, s.tagged_msgs)
        };

        let mut rows = if show_jobs { records } else { consolidate(records) };
        sort_rows(&mut rows);
        TagSnapshot {
            rows,
            total_msgs,
            tagged_msgs,
            consolidated: !show_jobs,
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = TagState::default();
    }
}

/// Merge records sharing (origin, key, value), summing counts.
pub fn consolidate<I>(records: I) -> Vec<TagRecord>
where
    I: IntoIterator<Item = TagRecord>,
{
    let mut merged: AHashMap<TagKey, u64> = AHashMap::new();
    for record in records {
        let key = TagKey {
            job: String::new(),
            ..record.key
        };
        *merged.entry(key).or_insert(0) += record.count;
    }
    merged
        .into_iter()
        .map(|(key, count)| TagRecord { key, count })
        .collect()
}

/// Job desc, origin desc, key asc, value asc. Consolidated rows all carry an
/// empty job, so job drops out of the ordering.
fn sort_rows(rows: &mut [TagRecord]) {
    rows.sort_by(|a, b| {
        b.key
            .job
            .cmp(&a.key.job)
            .then_with(|| b.key.origin.cmp(&a.key.origin))
            .then_with(|| a.key.key.cmp(&b.key.key))
            .then_with(|| a.key.value.cmp(&b.key.value))
    });
}

pub fn render_report(snapshot: &TagSnapshot) -> String {
    let mut out = String::new();
    if snapshot.rows.is_empty() {
        out.push_str("No tag data collected\n");
        return out;
    }
    let show_jobs = !snapshot.consolidated;

    let _ = writeln!(
        out,
        "Tags map {:>3}, tagged messages {:>8} out of {:>8} messages",
        snapshot.rows.len(),
        snapshot.tagged_msgs,
        snapshot.total_msgs
    );
    if show_jobs {
        out.push_str(&"_".repeat(30));
    }
    let _ = writeln!(out, "{}", "_".repeat(69));
    if show_jobs {
        out.push_str("               Job              |");
    }
    out.push_str("            Origin          |     Key   |        Value     |Count|\n");

    for row in &snapshot.rows {
        if show_jobs {
            let _ = write!(out, "{:<32}|", row.key.job);
        }
        let _ = writeln!(
            out,
            "{:<28}|{:<11}|{:<18}|{:>4}|",
            row.key.origin, row.key.key, row.key.value, row.count
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn record(origin: &str, job: &str, key: &str, value: &str, count: u64) -> TagRecord {
        TagRecord {
            key: TagKey {
                origin: origin.into(),
                job: job.into(),
                key: key.into(),
                value: value.into(),
            },
            count,
        }
    }

    fn counts(mut rows: Vec<TagRecord>) -> Vec<(TagKey, u64)> {
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows.into_iter().map(|r| (r.key, r.count)).collect()
    }

    #[test]
    fn test_ingest_and_totals() {
        let agg = TagAggregator::new();
        agg.ingest("gorouter", "router", &tags(&[("event_type", "LogMessage"), ("zone", "z1")]));
        agg.ingest("gorouter", "router", &tags(&[("zone", "z1")]));
        agg.ingest("gorouter", "router", &BTreeMap::new());

        let snap = agg.snapshot(true);
        assert_eq!(snap.total_msgs, 3);
        assert_eq!(snap.tagged_msgs, 2);
        assert_eq!(snap.rows.len(), 2);
        let zone = snap.rows.iter().find(|r| r.key.key == "zone").unwrap();
        assert_eq!(zone.count, 2);
    }

    #[test]
    fn test_consolidation_drops_job() {
        let agg = TagAggregator::new();
        agg.ingest("rep", "cell_z1", &tags(&[("zone", "z1")]));
        agg.ingest("rep", "cell_z2", &tags(&[("zone", "z1")]));
        let snap = agg.snapshot(false);
        assert_eq!(snap.rows, vec![record("rep", "", "zone", "z1", 2)]);
    }

    #[test]
    fn test_sort_order_with_jobs() {
        let agg = TagAggregator::new();
        agg.ingest("a", "job1", &tags(&[("k", "v")]));
        agg.ingest("b", "job2", &tags(&[("k", "v"), ("a", "z")]));
        agg.ingest("c", "job1", &tags(&[("k", "v")]));
        let order: Vec<_> = agg
            .snapshot(true)
            .rows
            .into_iter()
            .map(|r| format!("{}/{}/{}", r.key.job, r.key.origin, r.key.key))
            .collect();
        assert_eq!(order, vec!["job2/b/a", "job2/b/k", "job1/c/k", "job1/a/k"]);
    }

    #[test]
    fn test_render_consolidated() {
        let agg = TagAggregator::new();
        agg.ingest("rep", "cell", &tags(&[("zone", "z1")]));
        let text = render_report(&agg.snapshot(false));
        let expected = format!(
            "Tags map   1, tagged messages        1 out of        1 messages\n{}\n{}\n{:<28}|{:<11}|{:<18}|{:>4}|\n",
            "_".repeat(69),
            "            Origin          |     Key   |        Value     |Count|",
            "rep",
            "zone",
            "z1",
            1
        );
        assert_eq!(text, expected);
        assert_eq!(render_report(&TagAggregator::new().snapshot(false)), "No tag data collected\n");
    }

    proptest! {
        #[test]
        fn prop_consolidation_is_associative(
            a in proptest::collection::vec((0u8..3, 0u8..3, 1u64..10), 0..20),
            b in proptest::collection::vec((0u8..3, 0u8..3, 1u64..10), 0..20),
            c in proptest::collection::vec((0u8..3, 0u8..3, 1u64..10), 0..20),
        ) {
            let build = |job: &str, rows: &[(u8, u8, u64)]| -> Vec<TagRecord> {
                rows.iter()
                    .map(|(o, v, n)| record(&format!("o{o}"), job, "k", &format!("v{v}"), *n))
                    .collect()
            };
            let (ra, rb, rc) = (build("A", &a), build("B", &b), build("C", &c));

            let ab = consolidate(ra.iter().cloned().chain(rb.iter().cloned()));
            let staged = consolidate(ab.into_iter().chain(rc.iter().cloned()));
            let all = consolidate(ra.into_iter().chain(rb).chain(rc));
            prop_assert_eq!(counts(staged), counts(all));
        }
    }
}
