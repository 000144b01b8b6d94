//! Per-sensor history with bounded retention and downsampling
//!
//! Recent samples are kept at native resolution in a ring per sensor. As
//! raw samples age past the raw window (or get evicted by the capacity cap)
//! they fold into fixed-width buckets carrying (min, max, mean, count),
//! which are retained far longer. Buckets only ever absorb each raw sample
//! once, so repeated maintenance passes are idempotent.

use crate::sensors::{Sample, SensorId, Timestamp};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::collections::VecDeque;

/// One downsampled window of raw samples
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    /// Window start (aligned to the bucket width)
    pub start: Timestamp,
    pub min: f64,
    pub max: f64,
    sum: f64,
    pub count: u64,
}

impl Bucket {
    fn seed(start: Timestamp, value: f64) -> Self {
        Self {
            start,
            min: value,
            max: value,
            sum: value,
            count: 1,
        }
    }

    fn absorb(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }

    /// Mean of the raw samples folded into this bucket
    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

#[derive(Default)]
struct Series {
    raw: VecDeque<Sample>,
    buckets: VecDeque<Bucket>,
}

/// Bounded in-memory time series for all sensors
///
/// Writes are expected from a single owner (the evaluation loop); reads go
/// through `history` and `buckets`. The `_at` variants take an explicit
/// clock for deterministic tests.
pub struct HistoryBuffer {
    raw_window: Duration,
    max_raw: usize,
    bucket_width: Duration,
    bucket_retention: Duration,
    series: HashMap<SensorId, Series>,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        // 1 hour raw, 1-minute buckets for 24 hours
        Self::new(Duration::hours(1), 4096, Duration::minutes(1), Duration::hours(24))
    }
}

impl HistoryBuffer {
    pub fn new(
        raw_window: Duration,
        max_raw: usize,
        bucket_width: Duration,
        bucket_retention: Duration,
    ) -> Self {
        Self {
            raw_window,
            max_raw: max_raw.max(1),
            bucket_width: std::cmp::max(bucket_width, Duration::seconds(1)),
            bucket_retention,
            series: HashMap::new(),
        }
    }

    /// Insert a sample, pruning with the current wall clock
    pub fn insert(&mut self, sample: Sample) {
        self.insert_at(sample, Utc::now());
    }

    /// Insert a sample with an explicit clock
    ///
    /// Samples land in timestamp order regardless of insertion order; a
    /// sample whose (sensor, timestamp) already exists is dropped, keeping
    /// the series duplicate-free.
    pub fn insert_at(&mut self, sample: Sample, now: Timestamp) {
        let sensor_id = sample.sensor_id.clone();
        let series = self.series.entry(sensor_id).or_default();

        // Find the insertion point from the back; samples usually arrive
        // in order so this is O(1) on the hot path
        let mut index = series.raw.len();
        while index > 0 {
            let existing = &series.raw[index - 1];
            if existing.timestamp < sample.timestamp {
                break;
            }
            if existing.timestamp == sample.timestamp {
                return;
            }
            index -= 1;
        }
        series.raw.insert(index, sample);

        let bucket_width = self.bucket_width;
        while series.raw.len() > self.max_raw {
            let evicted = series.raw.pop_front().expect("non-empty after length check");
            Self::fold(&mut series.buckets, evicted, bucket_width);
        }

        self.prune_at(now);
    }

    /// Evict aged raw samples into buckets and drop expired buckets
    pub fn prune_at(&mut self, now: Timestamp) {
        let raw_cutoff = now - self.raw_window;
        let bucket_cutoff = now - self.bucket_retention;
        let bucket_width = self.bucket_width;

        for series in self.series.values_mut() {
            while let Some(front) = series.raw.front() {
                if front.timestamp < raw_cutoff {
                    let evicted = series.raw.pop_front().expect("front exists");
                    Self::fold(&mut series.buckets, evicted, bucket_width);
                } else {
                    break;
                }
            }

            while let Some(front) = series.buckets.front() {
                if front.start < bucket_cutoff {
                    series.buckets.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Fold one evicted raw sample into its bucket
    ///
    /// Evictions usually come off the front of a sorted ring in time order,
    /// so the scan from the back is O(1) on the hot path; a late-arriving
    /// old sample still merges into (or creates) the right window. Invalid
    /// samples are dropped here: a flagged spike must not distort
    /// min/max/mean.
    fn fold(buckets: &mut VecDeque<Bucket>, sample: Sample, width: Duration) {
        if !sample.valid {
            return;
        }
        let width_secs = width.num_seconds();
        let window_secs = sample.timestamp.timestamp().div_euclid(width_secs) * width_secs;
        let start = DateTime::from_timestamp(window_secs, 0).expect("aligned window timestamp");

        let mut index = buckets.len();
        while index > 0 {
            if buckets[index - 1].start == start {
                buckets[index - 1].absorb(sample.value);
                return;
            }
            if buckets[index - 1].start < start {
                break;
            }
            index -= 1;
        }
        buckets.insert(index, Bucket::seed(start, sample.value));
    }

    /// Raw samples for a sensor at or after `since`, time-ascending
    pub fn history(&self, sensor_id: &str, since: Timestamp) -> Vec<Sample> {
        self.series
            .get(sensor_id)
            .map(|series| {
                series
                    .raw
                    .iter()
                    .filter(|sample| sample.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Downsampled buckets for a sensor starting at or after `since`,
    /// time-ascending
    pub fn buckets(&self, sensor_id: &str, since: Timestamp) -> Vec<Bucket> {
        self.series
            .get(sensor_id)
            .map(|series| {
                series
                    .buckets
                    .iter()
                    .filter(|bucket| bucket.start >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of raw samples currently held for a sensor
    pub fn raw_len(&self, sensor_id: &str) -> usize {
        self.series
            .get(sensor_id)
            .map(|series| series.raw.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(sensor_id: &str, timestamp: Timestamp, value: f64) -> Sample {
        Sample {
            sensor_id: sensor_id.to_string(),
            timestamp,
            value,
            valid: true,
        }
    }

    fn epoch() -> Timestamp {
        DateTime::from_timestamp(0, 0).unwrap()
    }

    #[test]
    fn test_history_round_trip_ascending_no_duplicates() {
        let mut buffer = HistoryBuffer::default();
        let now = Utc::now();

        for i in 0..10 {
            buffer.insert_at(
                sample_at("cpu0", now - Duration::seconds(60 - i), 50.0 + i as f64),
                now,
            );
        }

        let history = buffer.history("cpu0", epoch());
        assert_eq!(history.len(), 10);
        for pair in history.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
        assert_eq!(history[0].value, 50.0);
        assert_eq!(history[9].value, 59.0);
    }

    #[test]
    fn test_out_of_order_insert_lands_sorted() {
        let mut buffer = HistoryBuffer::default();
        let now = Utc::now();

        buffer.insert_at(sample_at("cpu0", now - Duration::seconds(10), 2.0), now);
        buffer.insert_at(sample_at("cpu0", now - Duration::seconds(30), 1.0), now);
        buffer.insert_at(sample_at("cpu0", now - Duration::seconds(20), 3.0), now);

        let history = buffer.history("cpu0", epoch());
        let values: Vec<f64> = history.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 3.0, 2.0]);
    }

    #[test]
    fn test_duplicate_timestamp_dropped() {
        let mut buffer = HistoryBuffer::default();
        let now = Utc::now();
        let ts = now - Duration::seconds(5);

        buffer.insert_at(sample_at("cpu0", ts, 42.0), now);
        buffer.insert_at(sample_at("cpu0", ts, 43.0), now);

        let history = buffer.history("cpu0", epoch());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].value, 42.0);
    }

    #[test]
    fn test_since_filtering() {
        let mut buffer = HistoryBuffer::default();
        let now = Utc::now();

        buffer.insert_at(sample_at("cpu0", now - Duration::seconds(40), 1.0), now);
        buffer.insert_at(sample_at("cpu0", now - Duration::seconds(10), 2.0), now);

        let recent = buffer.history("cpu0", now - Duration::seconds(20));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].value, 2.0);
    }

    #[test]
    fn test_capacity_evicts_into_buckets() {
        let mut buffer = HistoryBuffer::new(
            Duration::hours(1),
            5,
            Duration::minutes(1),
            Duration::hours(24),
        );
        let now = Utc::now();

        for i in 0..8 {
            buffer.insert_at(
                sample_at("cpu0", now - Duration::seconds(50 - i), 10.0 + i as f64),
                now,
            );
        }

        assert_eq!(buffer.raw_len("cpu0"), 5);
        // The three oldest samples were folded, not lost
        let buckets = buffer.buckets("cpu0", epoch());
        let folded: u64 = buckets.iter().map(|b| b.count).sum();
        assert_eq!(folded, 3);
    }

    #[test]
    fn test_aged_samples_fold_with_min_max_mean() {
        let mut buffer = HistoryBuffer::new(
            Duration::seconds(60),
            1024,
            Duration::minutes(1),
            Duration::hours(24),
        );
        let base = DateTime::from_timestamp(1_000_200, 0).unwrap();

        // Three samples within one minute window, already older than the
        // raw window relative to `now`
        for (offset, value) in [(0, 10.0), (10, 30.0), (20, 20.0)] {
            buffer.insert_at(
                sample_at("cpu0", base + Duration::seconds(offset), value),
                base + Duration::seconds(offset),
            );
        }
        let now = base + Duration::seconds(300);
        buffer.prune_at(now);

        assert_eq!(buffer.raw_len("cpu0"), 0);
        let buckets = buffer.buckets("cpu0", epoch());
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].min, 10.0);
        assert_eq!(buckets[0].max, 30.0);
        assert_eq!(buckets[0].mean(), 20.0);
        assert_eq!(buckets[0].count, 3);
    }

    #[test]
    fn test_downsampling_is_idempotent() {
        let mut buffer = HistoryBuffer::new(
            Duration::seconds(60),
            1024,
            Duration::minutes(1),
            Duration::hours(24),
        );
        let base = DateTime::from_timestamp(2_000_400, 0).unwrap();

        for (offset, value) in [(0, 55.0), (15, 65.0), (30, 60.0)] {
            buffer.insert_at(
                sample_at("cpu0", base + Duration::seconds(offset), value),
                base + Duration::seconds(offset),
            );
        }

        let now = base + Duration::seconds(600);
        buffer.prune_at(now);
        let first = buffer.buckets("cpu0", epoch());

        // Further passes over the same input change nothing
        buffer.prune_at(now);
        buffer.prune_at(now + Duration::seconds(60));
        let second = buffer.buckets("cpu0", epoch());

        assert_eq!(first, second);
        assert_eq!(first[0].min, 55.0);
        assert_eq!(first[0].max, 65.0);
        assert_eq!(first[0].mean(), 60.0);
    }

    #[test]
    fn test_invalid_samples_kept_raw_but_not_folded() {
        let mut buffer = HistoryBuffer::new(
            Duration::seconds(60),
            1024,
            Duration::minutes(1),
            Duration::hours(24),
        );
        let base = DateTime::from_timestamp(3_000_000, 0).unwrap();

        let mut spike = sample_at("cpu0", base, 95.0);
        spike.valid = false;
        buffer.insert_at(spike, base);
        buffer.insert_at(sample_at("cpu0", base + Duration::seconds(5), 50.0), base);

        // Both visible in raw history, flag preserved
        let history = buffer.history("cpu0", epoch());
        assert_eq!(history.len(), 2);
        assert!(!history[0].valid);

        // Only the valid one reaches the bucket tier
        buffer.prune_at(base + Duration::seconds(300));
        let buckets = buffer.buckets("cpu0", epoch());
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets[0].max, 50.0);
    }

    #[test]
    fn test_bucket_retention_expires() {
        let mut buffer = HistoryBuffer::new(
            Duration::seconds(60),
            1024,
            Duration::minutes(1),
            Duration::hours(24),
        );
        let base = DateTime::from_timestamp(4_000_800, 0).unwrap();

        buffer.insert_at(sample_at("cpu0", base, 42.0), base);
        buffer.prune_at(base + Duration::seconds(300));
        assert_eq!(buffer.buckets("cpu0", epoch()).len(), 1);

        buffer.prune_at(base + Duration::hours(25));
        assert!(buffer.buckets("cpu0", epoch()).is_empty());
    }

    #[test]
    fn test_sensors_are_independent() {
        let mut buffer = HistoryBuffer::default();
        let now = Utc::now();

        buffer.insert_at(sample_at("cpu0", now - Duration::seconds(5), 50.0), now);
        buffer.insert_at(sample_at("gpu0", now - Duration::seconds(5), 60.0), now);

        assert_eq!(buffer.history("cpu0", epoch()).len(), 1);
        assert_eq!(buffer.history("gpu0", epoch()).len(), 1);
        assert_eq!(buffer.history("cpu0", epoch())[0].value, 50.0);
    }
}
