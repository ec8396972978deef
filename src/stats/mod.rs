//! Metrics aggregation: per-request samples in, point-in-time snapshots out.
//!
//! Samples are distributed across shards keyed by VU id to keep lock
//! contention bounded at high concurrency; snapshots merge the shards into a
//! single immutable view, either for the full run or for a trailing window.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

pub mod thresholds;

/// HDR histogram sized for request latencies: 1µs to 1h, 2 significant figures.
fn latency_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(1, 60 * 60 * 1000 * 1000, 2).unwrap()
}

/// Seconds of per-second window cells each shard retains for trailing-window
/// snapshots.
const WINDOW_RETENTION_SECS: u64 = 300;

/// The result of one scripted request by one VU. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct RequestOutcome {
    pub step: String,
    pub url: String,
    /// HTTP status, or 0 when the request never completed (transport failure).
    pub status: u16,
    pub duration: Duration,
    pub checks_passed: bool,
    /// True on transport failure or when any check failed.
    pub failed: bool,
    pub error: Option<String>,
    pub timestamp: SystemTime,
}

/// One unit of ingestion for the aggregator.
#[derive(Debug, Clone)]
pub enum Sample {
    Request(RequestOutcome),
    /// A named assertion result, reported as labeled pass/fail counts.
    Check { name: String, passed: bool },
}

struct WindowCell {
    start_sec: u64,
    count: u64,
    failed: u64,
    histogram: Histogram<u64>,
}

/// Single-shard accumulator. All mutation happens under the owning shard lock.
pub struct StatsAggregator {
    epoch: Instant,
    pub total: u64,
    pub failed: u64,
    pub transport_failures: u64,
    pub check_failures: u64,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Duration,
    pub status_codes: HashMap<u16, u64>,
    pub errors: HashMap<String, u64>,
    /// check name -> (total, passes)
    pub checks: HashMap<String, (u64, u64)>,
    pub histogram: Histogram<u64>,
    windows: VecDeque<WindowCell>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::with_epoch(Instant::now())
    }

    fn with_epoch(epoch: Instant) -> Self {
        Self {
            epoch,
            total: 0,
            failed: 0,
            transport_failures: 0,
            check_failures: 0,
            total_duration: Duration::ZERO,
            min_duration: None,
            max_duration: Duration::ZERO,
            status_codes: HashMap::new(),
            errors: HashMap::new(),
            checks: HashMap::new(),
            histogram: latency_histogram(),
            windows: VecDeque::new(),
        }
    }

    pub fn add(&mut self, sample: Sample) {
        match sample {
            Sample::Request(outcome) => {
                self.total += 1;
                self.total_duration += outcome.duration;
                if self.min_duration.is_none_or(|min| outcome.duration < min) {
                    self.min_duration = Some(outcome.duration);
                }
                if outcome.duration > self.max_duration {
                    self.max_duration = outcome.duration;
                }
                let micros = (outcome.duration.as_micros() as u64).max(1);
                let _ = self.histogram.record(micros);
                *self.status_codes.entry(outcome.status).or_insert(0) += 1;

                if outcome.failed {
                    self.failed += 1;
                    if let Some(err) = &outcome.error {
                        self.transport_failures += 1;
                        *self.errors.entry(err.clone()).or_insert(0) += 1;
                    } else {
                        self.check_failures += 1;
                    }
                }

                let sec = self.epoch.elapsed().as_secs();
                let cell = match self.windows.back_mut() {
                    Some(cell) if cell.start_sec == sec => cell,
                    _ => {
                        self.windows.push_back(WindowCell {
                            start_sec: sec,
                            count: 0,
                            failed: 0,
                            histogram: latency_histogram(),
                        });
                        while self.windows.len() as u64 > WINDOW_RETENTION_SECS {
                            self.windows.pop_front();
                        }
                        self.windows.back_mut().unwrap()
                    }
                };
                cell.count += 1;
                if outcome.failed {
                    cell.failed += 1;
                }
                let _ = cell.histogram.record(micros);
            }
            Sample::Check { name, passed } => {
                let entry = self.checks.entry(name).or_insert((0, 0));
                entry.0 += 1;
                if passed {
                    entry.1 += 1;
                }
            }
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Labeled check totals in a snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CheckStats {
    pub total: u64,
    pub passes: u64,
}

/// An immutable point-in-time view of the run's metrics.
///
/// Each snapshot is a fresh copy; concurrent snapshot calls observe per-sample
/// atomicity (a `Request` sample is fully counted or not at all), not a frozen
/// global state.
///
/// In a trailing-window snapshot only `count`, `failed`, `failure_rate` and
/// the histogram-backed percentiles cover the window; every other field
/// (averages, min/max, code/error/check breakdowns) stays cumulative, since
/// the per-second cells retain only counts and a latency histogram.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSnapshot {
    pub count: u64,
    pub failed: u64,
    pub transport_failures: u64,
    pub check_failures: u64,
    pub failure_rate: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub status_codes: BTreeMap<u16, u64>,
    pub errors: BTreeMap<String, u64>,
    pub checks: BTreeMap<String, CheckStats>,
    /// Iterations cut off by the grace-window expiry; never sampled above.
    pub abandoned_iterations: u64,
    /// Covered interval as seconds since run start.
    pub window_secs: (f64, f64),
    #[serde(skip)]
    histogram: Histogram<u64>,
}

impl MetricSnapshot {
    /// Latency at an arbitrary percentile in [0, 100], in milliseconds.
    pub fn percentile_ms(&self, percentile: f64) -> f64 {
        if self.histogram.is_empty() {
            return 0.0;
        }
        self.histogram.value_at_quantile(percentile / 100.0) as f64 / 1000.0
    }
}

/// Sharded, concurrently writable aggregator: the run's single logical sink.
pub struct ShardedAggregator {
    shards: Vec<Mutex<StatsAggregator>>,
    abandoned: AtomicU64,
    epoch: Instant,
}

impl ShardedAggregator {
    pub fn new(num_shards: usize) -> Self {
        let epoch = Instant::now();
        let shards = (0..num_shards.max(1))
            .map(|_| Mutex::new(StatsAggregator::with_epoch(epoch)))
            .collect();
        Self {
            shards,
            abandoned: AtomicU64::new(0),
            epoch,
        }
    }

    /// Shard count sized for the planned VU population: roughly one shard per
    /// hundred VUs, clamped to [16, 256].
    pub fn for_vus(total_vus: usize) -> Self {
        let num_shards = (total_vus / 100).clamp(16, 256);
        Self::new(num_shards)
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Ingest one sample. O(1) under the shard lock; applies backpressure by
    /// making the caller wait for the lock rather than dropping the sample.
    pub fn record(&self, vu_id: u64, sample: Sample) {
        let shard = (vu_id as usize) % self.shards.len();
        self.shards[shard].lock().add(sample);
    }

    /// Count one iteration abandoned at forced shutdown.
    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Snapshot of the whole run so far.
    pub fn snapshot(&self) -> MetricSnapshot {
        self.build_snapshot(None)
    }

    /// Snapshot of the trailing `window`, at one-second cell resolution.
    /// Count, failure rate and percentiles are windowed; the remaining fields
    /// are cumulative (see `MetricSnapshot`).
    pub fn snapshot_window(&self, window: Duration) -> MetricSnapshot {
        self.build_snapshot(Some(window))
    }

    fn build_snapshot(&self, window: Option<Duration>) -> MetricSnapshot {
        let now_sec = self.epoch.elapsed().as_secs_f64();
        let mut merged = StatsAggregator::with_epoch(self.epoch);
        let mut window_count = 0u64;
        let mut window_failed = 0u64;
        let mut window_hist = latency_histogram();
        let cutoff_sec = window.map(|w| self.epoch.elapsed().saturating_sub(w).as_secs());

        for shard in &self.shards {
            let shard = shard.lock();
            merged.total += shard.total;
            merged.failed += shard.failed;
            merged.transport_failures += shard.transport_failures;
            merged.check_failures += shard.check_failures;
            merged.total_duration += shard.total_duration;
            if let Some(shard_min) = shard.min_duration {
                if merged.min_duration.is_none_or(|min| shard_min < min) {
                    merged.min_duration = Some(shard_min);
                }
            }
            if shard.max_duration > merged.max_duration {
                merged.max_duration = shard.max_duration;
            }
            for (code, count) in &shard.status_codes {
                *merged.status_codes.entry(*code).or_insert(0) += count;
            }
            for (err, count) in &shard.errors {
                *merged.errors.entry(err.clone()).or_insert(0) += count;
            }
            for (name, (total, passes)) in &shard.checks {
                let entry = merged.checks.entry(name.clone()).or_insert((0, 0));
                entry.0 += total;
                entry.1 += passes;
            }
            merged.histogram.add(&shard.histogram).ok();

            if let Some(cutoff) = cutoff_sec {
                for cell in shard.windows.iter().filter(|c| c.start_sec >= cutoff) {
                    window_count += cell.count;
                    window_failed += cell.failed;
                    window_hist.add(&cell.histogram).ok();
                }
            }
        }

        let (count, failed, histogram, window_start) = match window {
            Some(w) => (
                window_count,
                window_failed,
                window_hist,
                (now_sec - w.as_secs_f64()).max(0.0),
            ),
            None => (merged.total, merged.failed, merged.histogram, 0.0),
        };

        let pct = |q: f64| -> f64 {
            if histogram.is_empty() {
                0.0
            } else {
                histogram.value_at_quantile(q) as f64 / 1000.0
            }
        };
        let failure_rate = if count > 0 {
            failed as f64 / count as f64
        } else {
            0.0
        };
        let avg_ms = if merged.total > 0 {
            merged.total_duration.as_secs_f64() * 1000.0 / merged.total as f64
        } else {
            0.0
        };

        MetricSnapshot {
            count,
            failed,
            transport_failures: merged.transport_failures,
            check_failures: merged.check_failures,
            failure_rate,
            avg_ms,
            min_ms: merged.min_duration.unwrap_or_default().as_secs_f64() * 1000.0,
            max_ms: merged.max_duration.as_secs_f64() * 1000.0,
            p50_ms: pct(0.50),
            p90_ms: pct(0.90),
            p95_ms: pct(0.95),
            p99_ms: pct(0.99),
            status_codes: merged.status_codes.into_iter().collect(),
            errors: merged.errors.into_iter().collect(),
            checks: merged
                .checks
                .into_iter()
                .map(|(name, (total, passes))| (name, CheckStats { total, passes }))
                .collect(),
            abandoned_iterations: self.abandoned(),
            window_secs: (window_start, now_sec),
            histogram,
        }
    }
}
