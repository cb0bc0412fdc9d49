// ============================================================================
// HISTOGRAM ACCUMULATOR
// ============================================================================
// Fixed-width bucket histogram over [0, max) with an overflow counter for
// samples at or above max. Used for envelope latency (ms) and log length
// (bytes).
// ============================================================================

use std::fmt::Write as _;

use parking_lot::Mutex;
use serde::Serialize;

use crate::helpers::percent;

// ----------------------------------------------------------------------------
// Histogram Bin
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramBin {
    width: u64,
    max: u64,
    bins: Vec<u64>,
    overflow: u64,
    count: u64,
    sum: u64,
    min: Option<u64>,
    highest: u64,
}

/// Copy of a histogram's counters for reports and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramSnapshot {
    pub width: u64,
    pub max: u64,
    pub bins: Vec<u64>,
    pub overflow: u64,
    pub count: u64,
    pub sum: u64,
    pub min: Option<u64>,
    pub max_seen: u64,
}

impl HistogramBin {
    /// Create a histogram with `ceil(max / width)` buckets.
    ///
    /// A zero width is treated as one.
    pub fn new(width: u64, max: u64) -> Self {
        let width = width.max(1);
        let num_bins = max.div_ceil(width) as usize;
        Self {
            width,
            max,
            bins: vec![0; num_bins],
            overflow: 0,
            count: 0,
            sum: 0,
            min: None,
            highest: 0,
        }
    }

    #[inline]
    pub fn insert_sample(&mut self, sample: u64) {
        self.count += 1;
        self.sum = self.sum.saturating_add(sample);
        self.min = Some(self.min.map_or(sample, |m| m.min(sample)));
        if sample > self.highest {
            self.highest = sample;
        }

        if sample >= self.max {
            self.overflow += 1;
            return;
        }
        self.bins[(sample / self.width) as usize] += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn average(&self) -> Option<u64> {
        (self.count > 0).then(|| self.sum / self.count)
    }

    pub fn clear(&mut self) {
        *self = Self::new(self.width, self.max);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            width: self.width,
            max: self.max,
            bins: self.bins.clone(),
            overflow: self.overflow,
            count: self.count,
            sum: self.sum,
            min: self.min,
            max_seen: self.highest,
        }
    }

    /// Text table of every bucket followed by the overflow line and summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let Some(average) = self.average() else {
            out.push_str("No histogram data recorded\n");
            return out;
        };

        let rule = "_".repeat(40);
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "|  low   |  high  |  count  | percent |");
        let _ = writeln!(out, "{rule}");
        for (i, n) in self.bins.iter().enumerate() {
            let low = i as u64 * self.width;
            let high = (low + self.width).min(self.max);
            let _ = writeln!(
                out,
                "|{:>7} |{:>7} |{:>8} |{:>8} |",
                low,
                high,
                n,
                percent(*n, self.count)
            );
        }
        let _ = writeln!(
            out,
            "Num greater than max of {}: {} ({})",
            self.max,
            self.overflow,
            percent(self.overflow, self.count)
        );
        let _ = writeln!(out, "Max {}", self.highest);
        let _ = writeln!(out, "Min {}", self.min.unwrap_or_default());
        let _ = writeln!(out, "Average {}", average);
        let _ = writeln!(out, "N {}", self.count);
        out
    }
}

// ----------------------------------------------------------------------------
// Shared Histogram
// ----------------------------------------------------------------------------

/// A histogram behind its own lock, owned by one collector.
#[derive(Debug)]
pub struct SharedHistogram {
    inner: Mutex<HistogramBin>,
}

impl SharedHistogram {
    pub fn new(width: u64, max: u64) -> Self {
        Self {
            inner: Mutex::new(HistogramBin::new(width, max)),
        }
    }

    #[inline]
    pub fn insert(&self, sample: u64) {
        self.inner.lock().insert_sample(sample);
    }

    pub fn render(&self) -> String {
        let copy = self.inner.lock().clone();
        copy.render()
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn reset(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_latency_scenario() {
        let mut h = HistogramBin::new(20, 200);
        for s in [5, 25, 45, 205] {
            h.insert_sample(s);
        }
        let snap = h.snapshot();
        assert_eq!(snap.bins.len(), 10);
        assert_eq!(&snap.bins[..3], &[1, 1, 1]);
        assert_eq!(snap.overflow, 1);
        assert_eq!(snap.count, 4);
        assert_eq!(h.average(), Some((5 + 25 + 45 + 205) / 4));
        assert_eq!(snap.min, Some(5));
        assert_eq!(snap.max_seen, 205);
    }

    #[test]
    fn test_sample_at_max_overflows() {
        let mut h = HistogramBin::new(20, 200);
        h.insert_sample(199);
        h.insert_sample(200);
        let snap = h.snapshot();
        assert_eq!(snap.bins[9], 1);
        assert_eq!(snap.overflow, 1);
    }

    #[test]
    fn test_uneven_geometry_has_partial_last_bucket() {
        let mut h = HistogramBin::new(30, 100);
        h.insert_sample(95);
        let snap = h.snapshot();
        assert_eq!(snap.bins.len(), 4);
        assert_eq!(snap.bins[3], 1);
        assert!(h.render().contains("|     90 |    100 |"));
    }

    #[test]
    fn test_empty_render_reports_no_data() {
        let h = HistogramBin::new(200, 10_000);
        assert_eq!(h.render(), "No histogram data recorded\n");
    }

    #[test]
    fn test_render_layout() {
        let mut h = HistogramBin::new(50, 100);
        h.insert_sample(10);
        h.insert_sample(60);
        h.insert_sample(60);
        h.insert_sample(500);
        let expected = "\
________________________________________
|  low   |  high  |  count  | percent |
________________________________________
|      0 |     50 |       1 |      25 |
|     50 |    100 |       2 |      50 |
Num greater than max of 100: 1 (25)
Max 500
Min 10
Average 157
N 4
";
        assert_eq!(h.render(), expected);
    }

    #[test]
    fn test_shared_reset() {
        let h = SharedHistogram::new(20, 200);
        h.insert(3);
        assert_eq!(h.snapshot().count, 1);
        h.reset();
        assert_eq!(h.snapshot().count, 0);
        assert_eq!(h.snapshot().min, None);
    }

    proptest! {
        #[test]
        fn prop_every_sample_lands_once(
            width in 1u64..100,
            max in 1u64..2_000,
            samples in proptest::collection::vec(0u64..5_000, 0..200),
        ) {
            let mut h = HistogramBin::new(width, max);
            for s in &samples {
                h.insert_sample(*s);
            }
            let snap = h.snapshot();
            let binned: u64 = snap.bins.iter().sum();
            prop_assert_eq!(binned + snap.overflow, samples.len() as u64);

            let expected_overflow = samples.iter().filter(|s| **s >= max).count() as u64;
            prop_assert_eq!(snap.overflow, expected_overflow);
            for (i, n) in snap.bins.iter().enumerate() {
                let in_bucket = samples
                    .iter()
                    .filter(|s| **s < max && (**s / width) as usize == i)
                    .count() as u64;
                prop_assert_eq!(*n, in_bucket);
            }
        }
    }
}
