//! # Rate Limit Load Testing
//!
//! Simulates heterogeneous client populations against a rate-limited HTTP
//! endpoint to validate the admission-control layer under varying traffic
//! intensities.
//!
//! ## Features
//!
//! - **Traffic Profiles**: Normal, Aggressive and Hacker archetypes weighted 100:10:1
//! - **Virtual Users**: per-user identifier sent as `Rate-Limit-Identifier`
//! - **Swarm Runner**: spawn-rate controlled user population on tokio
//! - **Metrics Collection**: per-archetype and per-endpoint counts, Prometheus text export
//! - **HDR Histograms**: High-precision latency distribution
//!
//! ## Usage
//!
//! ```bash
//! # Default population against a local service
//! cargo run --package rl-loadtest -- --target http://localhost:8080 --users 111 --duration 300
//!
//! # Exercise the resilience4j buckets instead of bucket4j
//! cargo run --package rl-loadtest -- --family resilience4j
//!
//! # Show the traffic profiles
//! cargo run --package rl-loadtest -- --profiles
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod profile;
pub mod runner;
pub mod user;
pub mod weighted;

pub use client::{DryRunClient, HttpClient, RecordedRequest, RequestClient, RequestOutcome};
pub use config::LoadTestConfig;
pub use error::{LoadTestError, Result};
pub use identity::{generate_identifier, is_valid_identifier, SUFFIX_LEN};
pub use metrics::{LoadTestMetrics, MetricsSummary, RequestCounts};
pub use profile::{
    Archetype, EndpointFamily, TaskKind, UserProfile, WaitInterval, RATE_LIMIT_HEADER,
};
pub use runner::{Swarm, SwarmReport};
pub use user::{TaskReport, UserReport, VirtualUser};
pub use weighted::WeightedTable;
