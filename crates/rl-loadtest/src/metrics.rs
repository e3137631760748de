//! Run statistics
//!
//! Every request outcome lands here. Totals are atomics, the latency
//! distribution is an HDR histogram, and the per-archetype / per-endpoint
//! breakdown is mirrored into Prometheus counters for text exposition.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::RequestOutcome;
use crate::error::{LoadTestError, Result};
use crate::profile::Archetype;

/// Request counts for one slice of traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    pub requests: u64,
    pub failures: u64,
    pub throttled: u64,
}

impl RequestCounts {
    fn record(&mut self, outcome: &RequestOutcome) {
        self.requests += 1;
        if !outcome.is_success() {
            self.failures += 1;
        }
        if outcome.is_throttled() {
            self.throttled += 1;
        }
    }

    /// Share of requests rejected by the limiter, in percent
    pub fn throttled_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.throttled as f64 / self.requests as f64 * 100.0
        }
    }
}

/// Shared statistics sink for one run
pub struct LoadTestMetrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    throttled_requests: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,

    /// Latency histogram (microseconds)
    latency_histogram: RwLock<Histogram<u64>>,
    error_counts: RwLock<HashMap<String, u64>>,
    by_archetype: RwLock<HashMap<Archetype, RequestCounts>>,
    by_endpoint: RwLock<HashMap<String, RequestCounts>>,
    users_spawned: RwLock<HashMap<Archetype, u64>>,
    start_time: RwLock<Option<Instant>>,

    registry: Registry,
    requests_counter: IntCounterVec,
    users_counter: IntCounterVec,
}

impl LoadTestMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_counter = IntCounterVec::new(
            Opts::new("rl_requests_total", "Requests issued by virtual users"),
            &["archetype", "endpoint", "outcome"],
        )?;
        let users_counter = IntCounterVec::new(
            Opts::new("rl_users_spawned_total", "Virtual users spawned"),
            &["archetype"],
        )?;
        registry.register(Box::new(requests_counter.clone()))?;
        registry.register(Box::new(users_counter.clone()))?;

        // 1µs to 60s at 3 significant figures
        let histogram = Histogram::new_with_bounds(1, 60_000_000, 3)
            .map_err(|e| LoadTestError::Metrics(e.to_string()))?;

        Ok(Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            throttled_requests: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            latency_histogram: RwLock::new(histogram),
            error_counts: RwLock::new(HashMap::new()),
            by_archetype: RwLock::new(HashMap::new()),
            by_endpoint: RwLock::new(HashMap::new()),
            users_spawned: RwLock::new(HashMap::new()),
            start_time: RwLock::new(None),
            registry,
            requests_counter,
            users_counter,
        })
    }

    /// Mark the beginning of the measured run
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    /// Record one request outcome
    pub fn record(&self, archetype: Archetype, endpoint: &str, outcome: &RequestOutcome) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(outcome.bytes_sent, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(outcome.bytes_received, Ordering::Relaxed);

        let label = if outcome.is_throttled() {
            self.throttled_requests.fetch_add(1, Ordering::Relaxed);
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            "throttled"
        } else if outcome.is_success() {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
            "success"
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            "failure"
        };

        if let Some(kind) = outcome.failure_kind() {
            *self.error_counts.write().entry(kind).or_insert(0) += 1;
        }

        self.by_archetype
            .write()
            .entry(archetype)
            .or_default()
            .record(outcome);
        self.by_endpoint
            .write()
            .entry(endpoint.to_string())
            .or_default()
            .record(outcome);

        self.requests_counter
            .with_label_values(&[archetype.as_str(), endpoint, label])
            .inc();

        if let Err(e) = self
            .latency_histogram
            .write()
            .record(outcome.latency_us.max(1))
        {
            warn!("Failed to record latency: {}", e);
        }
    }

    /// Record a spawned virtual user
    pub fn record_user(&self, archetype: Archetype) {
        *self.users_spawned.write().entry(archetype).or_insert(0) += 1;
        self.users_counter
            .with_label_values(&[archetype.as_str()])
            .inc();
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Render all counters in the Prometheus text format
    pub fn export_prometheus(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Get summary statistics
    pub fn summary(&self) -> MetricsSummary {
        let hist = self.latency_histogram.read();
        let duration = self
            .start_time
            .read()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);

        let by_archetype = self
            .by_archetype
            .read()
            .iter()
            .map(|(a, c)| (a.as_str().to_string(), *c))
            .collect();
        let users_spawned = self
            .users_spawned
            .read()
            .iter()
            .map(|(a, n)| (a.as_str().to_string(), *n))
            .collect();
        let by_endpoint = self
            .by_endpoint
            .read()
            .iter()
            .map(|(e, c)| (e.clone(), *c))
            .collect();

        MetricsSummary {
            total_requests: total,
            successful_requests: successful,
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            throttled_requests: self.throttled_requests.load(Ordering::Relaxed),
            success_rate: if total > 0 {
                (successful as f64 / total as f64) * 100.0
            } else {
                0.0
            },
            avg_rps: if duration > 0.0 {
                total as f64 / duration
            } else {
                0.0
            },
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            latency_p50_us: hist.value_at_quantile(0.50),
            latency_p90_us: hist.value_at_quantile(0.90),
            latency_p99_us: hist.value_at_quantile(0.99),
            latency_max_us: hist.max(),
            latency_min_us: hist.min(),
            latency_mean_us: hist.mean() as u64,
            duration_secs: duration,
            error_counts: self.error_counts.read().clone().into_iter().collect(),
            users_spawned,
            by_archetype,
            by_endpoint,
        }
    }
}

/// Metrics summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub throttled_requests: u64,
    pub success_rate: f64,
    pub avg_rps: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub latency_p50_us: u64,
    pub latency_p90_us: u64,
    pub latency_p99_us: u64,
    pub latency_max_us: u64,
    pub latency_min_us: u64,
    pub latency_mean_us: u64,
    pub duration_secs: f64,
    pub error_counts: BTreeMap<String, u64>,
    pub users_spawned: BTreeMap<String, u64>,
    pub by_archetype: BTreeMap<String, RequestCounts>,
    pub by_endpoint: BTreeMap<String, RequestCounts>,
}

impl MetricsSummary {
    /// Print formatted report
    pub fn print_report(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║               RATE LIMIT LOAD TEST RESULTS                   ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!(
            "║ Duration:          {:>10.2} seconds                        ║",
            self.duration_secs
        );
        println!(
            "║ Total Requests:    {:>10}                                 ║",
            self.total_requests
        );
        println!(
            "║ Successful:        {:>10}                                 ║",
            self.successful_requests
        );
        println!(
            "║ Failed:            {:>10}                                 ║",
            self.failed_requests
        );
        println!(
            "║ Throttled (429):   {:>10}                                 ║",
            self.throttled_requests
        );
        println!(
            "║ Success Rate:      {:>10.2}%                               ║",
            self.success_rate
        );
        println!(
            "║ Avg RPS:           {:>10.2}                                ║",
            self.avg_rps
        );
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ LATENCY (microseconds)                                       ║");
        println!(
            "║   p50:             {:>10}                                 ║",
            self.latency_p50_us
        );
        println!(
            "║   p90:             {:>10}                                 ║",
            self.latency_p90_us
        );
        println!(
            "║   p99:             {:>10}                                 ║",
            self.latency_p99_us
        );
        println!(
            "║   max:             {:>10}                                 ║",
            self.latency_max_us
        );
        println!(
            "║   mean:            {:>10}                                 ║",
            self.latency_mean_us
        );
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ BY ARCHETYPE          users   requests  throttled            ║");
        for (archetype, counts) in &self.by_archetype {
            let users = self.users_spawned.get(archetype).copied().unwrap_or(0);
            println!(
                "║   {:<15} {:>9} {:>10} {:>10}             ║",
                archetype, users, counts.requests, counts.throttled
            );
        }
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ BY ENDPOINT                        requests  throttled%      ║");
        for (endpoint, counts) in &self.by_endpoint {
            println!(
                "║   {:<30} {:>10} {:>10.2}       ║",
                endpoint,
                counts.requests,
                counts.throttled_rate()
            );
        }

        if !self.error_counts.is_empty() {
            println!("╠══════════════════════════════════════════════════════════════╣");
            println!("║ ERRORS                                                       ║");
            for (error_type, count) in &self.error_counts {
                println!("║   {:20}: {:>10}                         ║", error_type, count);
            }
        }

        println!("╚══════════════════════════════════════════════════════════════╝\n");
    }
}
