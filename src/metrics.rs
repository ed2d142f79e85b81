//! Performance metrics for the live feed.

use crate::types::score::RiskLevel;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Step latency samples kept for percentile reporting
const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Counters and latency samples for the feed producer and its consumers
pub struct FeedMetrics {
    /// Successful engine steps
    pub steps: AtomicU64,
    /// Engine steps that failed
    pub step_failures: AtomicU64,
    /// Items handed to the push channel
    pub items_published: AtomicU64,
    /// Items skipped by slow push subscribers
    pub lagged_items: AtomicU64,
    /// Items mirrored to NATS
    pub items_mirrored: AtomicU64,
    /// Step latencies (in microseconds)
    step_times: RwLock<Vec<u64>>,
    /// Items by risk level
    by_level: RwLock<HashMap<RiskLevel, u64>>,
    start_time: Instant,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self {
            steps: AtomicU64::new(0),
            step_failures: AtomicU64::new(0),
            items_published: AtomicU64::new(0),
            lagged_items: AtomicU64::new(0),
            items_mirrored: AtomicU64::new(0),
            step_times: RwLock::new(Vec::with_capacity(1000)),
            by_level: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a committed step
    pub fn record_step(&self, elapsed: Duration, risk_level: RiskLevel) {
        self.steps.fetch_add(1, Ordering::Relaxed);

        {
            let mut times = self.step_times.write();
            times.push(elapsed.as_micros() as u64);
            if times.len() > MAX_LATENCY_SAMPLES {
                times.drain(0..MAX_LATENCY_SAMPLES / 2);
            }
        }

        *self.by_level.write().entry(risk_level).or_insert(0) += 1;
    }

    pub fn record_step_failure(&self) {
        self.step_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.items_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lagged(&self, skipped: u64) {
        self.lagged_items.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn record_mirrored(&self) {
        self.items_mirrored.fetch_add(1, Ordering::Relaxed);
    }

    /// Step latency statistics
    pub fn step_stats(&self) -> LatencyStats {
        let times = self.step_times.read();
        if times.is_empty() {
            return LatencyStats::default();
        }

        let mut sorted = times.clone();
        drop(times);
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let percentile = |p: f64| sorted[((count as f64 * p) as usize).min(count - 1)];

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: percentile(0.50),
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Steps per second since startup
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.steps.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn by_level(&self) -> HashMap<RiskLevel, u64> {
        self.by_level.read().clone()
    }

    /// Log summary statistics
    pub fn print_summary(&self) {
        let steps = self.steps.load(Ordering::Relaxed);
        let latency = self.step_stats();
        let by_level = self.by_level();

        info!(
            steps = steps,
            failures = self.step_failures.load(Ordering::Relaxed),
            published = self.items_published.load(Ordering::Relaxed),
            lagged = self.lagged_items.load(Ordering::Relaxed),
            mirrored = self.items_mirrored.load(Ordering::Relaxed),
            throughput = format!("{:.2} steps/s", self.throughput()),
            "Feed summary"
        );
        info!(
            mean_us = latency.mean_us,
            p50_us = latency.p50_us,
            p95_us = latency.p95_us,
            p99_us = latency.p99_us,
            max_us = latency.max_us,
            "Step latency"
        );
        for level in RiskLevel::ALL {
            let count = by_level.get(&level).copied().unwrap_or(0);
            let pct = if steps > 0 {
                count as f64 / steps as f64 * 100.0
            } else {
                0.0
            };
            info!("  {:8}: {:>6} ({:>5.1}%)", level.as_str(), count, pct);
        }
    }
}

impl Default for FeedMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Prints a periodic metrics summary
pub struct MetricsReporter {
    metrics: Arc<FeedMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<FeedMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Run until the task is aborted
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // first tick fires immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
