//! Swarm runner
//!
//! Spawns virtual users at the configured rate, picking each user's
//! archetype from the 100:10:1 population table, lets them run until the
//! test duration elapses, then signals every user to stop.

use std::sync::Arc;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{interval_at, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::client::{HttpClient, RequestClient};
use crate::config::LoadTestConfig;
use crate::error::Result;
use crate::metrics::{LoadTestMetrics, MetricsSummary};
use crate::profile::Archetype;
use crate::user::{UserReport, VirtualUser};

/// Result of one swarm run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmReport {
    pub config: LoadTestConfig,
    pub summary: MetricsSummary,
    pub users: Vec<UserReport>,
}

/// Main load test runner
pub struct Swarm {
    config: LoadTestConfig,
    client: Arc<dyn RequestClient>,
    metrics: Arc<LoadTestMetrics>,
}

impl Swarm {
    /// Create a swarm that talks to the target through `client`
    pub fn new(config: LoadTestConfig, client: Arc<dyn RequestClient>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            client,
            metrics: Arc::new(LoadTestMetrics::new()?),
        })
    }

    /// Create a swarm with a `reqwest` client for `config.target_url`
    pub fn with_http_client(config: LoadTestConfig) -> Result<Self> {
        config.validate()?;
        let client = HttpClient::new(&config.target_url, config.request_timeout(), config.users)?;
        Self::new(config, Arc::new(client))
    }

    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<LoadTestMetrics> {
        self.metrics.clone()
    }

    /// Run the load test to completion
    pub async fn run(&self) -> Result<SwarmReport> {
        let config = &self.config;
        info!(
            "Starting swarm against {}: {} users at {}/s for {}s ({:?} endpoints)",
            config.target_url, config.users, config.spawn_rate, config.duration_secs, config.family
        );

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let population = Archetype::population();

        self.metrics.start();
        let deadline = Instant::now() + config.duration();
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(config.users);

        // Spawn phase
        let mut next_spawn = Instant::now();
        for spawned in 0..config.users {
            if Instant::now() >= deadline {
                warn!(
                    "Test duration elapsed after spawning {}/{} users",
                    spawned, config.users
                );
                break;
            }

            let archetype = *population.choose(&mut rng);
            let user = VirtualUser::new(
                archetype.profile(),
                config.family,
                self.client.clone(),
                self.metrics.clone(),
                StdRng::seed_from_u64(rng.gen()),
            );
            self.metrics.record_user(archetype);
            debug!("Spawning {} user #{}", archetype, spawned + 1);
            handles.push(tokio::spawn(user.run(stop_rx.clone())));

            next_spawn += config.spawn_interval();
            sleep_until(next_spawn.min(deadline)).await;
        }
        info!("Spawned {} users", handles.len());

        // Steady phase
        self.wait_for_deadline(deadline).await;

        info!("Test duration elapsed, stopping users");
        let _ = stop_tx.send(true);

        let mut users = Vec::with_capacity(handles.len());
        for result in join_all(handles).await {
            match result {
                Ok(Ok(report)) => users.push(report),
                Ok(Err(e)) => warn!("Virtual user failed: {}", e),
                Err(e) => warn!("Virtual user task aborted: {}", e),
            }
        }

        let summary = self.metrics.summary();
        info!(
            "Load test complete: {} requests, {} throttled",
            summary.total_requests, summary.throttled_requests
        );
        Ok(SwarmReport {
            config: self.config.clone(),
            summary,
            users,
        })
    }

    async fn wait_for_deadline(&self, deadline: Instant) {
        let period = self.config.progress_interval_secs;
        if period == 0 {
            sleep_until(deadline).await;
            return;
        }

        let period = std::time::Duration::from_secs(period);
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return,
                _ = ticker.tick() => {
                    let summary = self.metrics.summary();
                    info!(
                        "Progress: {} requests, {:.2}% success, {} throttled, {:.2} RPS",
                        summary.total_requests,
                        summary.success_rate,
                        summary.throttled_requests,
                        summary.avg_rps
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DryRunClient;
    use crate::identity::{archetype_of, is_valid_identifier};
    use crate::profile::{EndpointFamily, RATE_LIMIT_HEADER};
    use std::collections::HashSet;

    fn config(users: usize, duration_secs: u64, seed: u64) -> LoadTestConfig {
        LoadTestConfig {
            users,
            spawn_rate: 50.0,
            duration_secs,
            seed: Some(seed),
            progress_interval_secs: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = LoadTestConfig { users: 0, ..Default::default() };
        assert!(Swarm::new(config, Arc::new(DryRunClient::new())).is_err());

        // Values that would overflow the run deadline or the spawn interval
        for config in [
            LoadTestConfig { duration_secs: u64::MAX, ..Default::default() },
            LoadTestConfig { spawn_rate: 1e-20, ..Default::default() },
        ] {
            assert!(matches!(
                Swarm::new(config, Arc::new(DryRunClient::new())),
                Err(crate::error::LoadTestError::InvalidConfig(_))
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_swarm_spawns_every_user() {
        let client = Arc::new(DryRunClient::new());
        let swarm = Swarm::new(config(111, 300, 42), client.clone()).unwrap();

        let report = swarm.run().await.unwrap();
        let spawned: u64 = report.summary.users_spawned.values().sum();
        assert_eq!(spawned, 111);
        assert_eq!(report.users.len(), 111);

        let identifiers: HashSet<_> = report.users.iter().map(|u| u.identifier.clone()).collect();
        assert_eq!(identifiers.len(), 111);
        assert!(identifiers.iter().all(|id| is_valid_identifier(id)));

        let sent: u64 = report.users.iter().map(|u| u.requests).sum();
        assert!(sent > 0);
        assert_eq!(report.summary.total_requests as usize, client.request_count());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hackers_never_hit_admin() {
        let client = Arc::new(DryRunClient::new());
        let swarm = Swarm::new(config(200, 600, 7), client.clone()).unwrap();
        swarm.run().await.unwrap();

        for request in client.requests() {
            let id = request.header(RATE_LIMIT_HEADER).unwrap();
            if archetype_of(id) == Some(Archetype::Hacker) {
                assert_eq!(request.path, "/rl-general/b4j-public");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_runs_spawn_same_population() {
        let first = Swarm::new(config(50, 5, 99), Arc::new(DryRunClient::new()))
            .unwrap()
            .run()
            .await
            .unwrap();
        let second = Swarm::new(config(50, 5, 99), Arc::new(DryRunClient::new()))
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(first.summary.users_spawned, second.summary.users_spawned);
        let mut a: Vec<_> = first.users.iter().map(|u| u.identifier.clone()).collect();
        let mut b: Vec<_> = second.users.iter().map(|u| u.identifier.clone()).collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_duration_cuts_spawning() {
        let config = LoadTestConfig {
            users: 100,
            spawn_rate: 1.0,
            duration_secs: 10,
            seed: Some(3),
            progress_interval_secs: 0,
            ..Default::default()
        };
        let report = Swarm::new(config, Arc::new(DryRunClient::new()))
            .unwrap()
            .run()
            .await
            .unwrap();

        assert!(report.users.len() <= 11);
        assert!(report.users.len() >= 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resilience4j_family_paths() {
        let client = Arc::new(DryRunClient::new());
        let config = LoadTestConfig {
            family: EndpointFamily::Resilience4j,
            ..config(20, 60, 1)
        };
        Swarm::new(config, client.clone()).unwrap().run().await.unwrap();

        let requests = client.requests();
        assert!(!requests.is_empty());
        assert!(requests.iter().all(|r| r.path.starts_with("/rl-general/r4j-")));
    }
}
