//! Virtual users
//!
//! A [`VirtualUser`] runs one profile in a loop:
//!
//! ```text
//! Idle ─► WaitBetweenTasks ─► SelectTask ─► Execute{Admin,Public}Check ─┐
//!              ▲                                                        │
//!              └────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop ends only when the stop signal fires. Both the wait and any
//! in-flight request race against it, so a stopped user abandons whatever it
//! was doing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, trace};

use crate::client::{RequestClient, RequestOutcome};
use crate::error::{LoadTestError, Result};
use crate::identity::generate_identifier;
use crate::metrics::LoadTestMetrics;
use crate::profile::{Archetype, EndpointFamily, TaskKind, UserProfile, RATE_LIMIT_HEADER};

/// What one task execution did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskReport {
    pub task: TaskKind,
    pub requests: u32,
    pub failures: u32,
}

/// Activity of one user over its lifetime.
///
/// `admin_checks` and `public_checks` count completed tasks only, while
/// `requests` and `failures` count every request that got an outcome,
/// including those of a burst cut short by the stop signal. They match what
/// the user recorded in [`LoadTestMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReport {
    pub identifier: String,
    pub admin_checks: u64,
    pub public_checks: u64,
    pub requests: u64,
    pub failures: u64,
}

impl UserReport {
    fn add(&mut self, report: TaskReport) {
        match report.task {
            TaskKind::AdminCheck => self.admin_checks += 1,
            TaskKind::PublicCheck => self.public_checks += 1,
        }
    }
}

/// One simulated client
pub struct VirtualUser<R> {
    profile: UserProfile,
    family: EndpointFamily,
    identifier: Option<String>,
    rng: R,
    client: Arc<dyn RequestClient>,
    metrics: Arc<LoadTestMetrics>,
    requests_sent: AtomicU64,
    requests_failed: AtomicU64,
}

impl<R: Rng + Send> VirtualUser<R> {
    pub fn new(
        profile: UserProfile,
        family: EndpointFamily,
        client: Arc<dyn RequestClient>,
        metrics: Arc<LoadTestMetrics>,
        rng: R,
    ) -> Self {
        Self {
            profile,
            family,
            identifier: None,
            rng,
            client,
            metrics,
            requests_sent: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        }
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn archetype(&self) -> Archetype {
        self.profile.archetype
    }

    /// Identifier assigned by [`on_start`](Self::on_start)
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// Assign the session identifier. May run once per user.
    pub fn on_start(&mut self) -> Result<&str> {
        if let Some(existing) = &self.identifier {
            return Err(LoadTestError::AlreadyStarted(existing.clone()));
        }
        let identifier = generate_identifier(&self.profile.identifier_prefix, &mut self.rng);
        debug!("Virtual user started: {}", identifier);
        Ok(self.identifier.insert(identifier).as_str())
    }

    /// Choose the next task from the profile's task weights
    pub fn select_task(&mut self) -> TaskKind {
        *self.profile.task_weights.choose(&mut self.rng)
    }

    /// Sample the next think-time without sleeping
    pub fn next_wait(&mut self) -> Duration {
        self.profile.wait_interval.sample(&mut self.rng)
    }

    /// Sleep for a sampled think-time; returns the time slept
    pub async fn wait_between_tasks(&mut self) -> Duration {
        let wait = self.next_wait();
        trace!("{:?} waiting {:?}", self.identifier, wait);
        sleep(wait).await;
        wait
    }

    /// One GET against the admin endpoint
    pub async fn execute_admin_check(&self) -> Result<TaskReport> {
        let outcome = self.send(TaskKind::AdminCheck).await?;
        Ok(TaskReport {
            task: TaskKind::AdminCheck,
            requests: 1,
            failures: u32::from(!outcome.is_success()),
        })
    }

    /// `call_count` back-to-back GETs against the public endpoint.
    ///
    /// A failed request does not abort the burst.
    pub async fn execute_public_check(&self) -> Result<TaskReport> {
        let mut failures = 0;
        for _ in 0..self.profile.call_count {
            let outcome = self.send(TaskKind::PublicCheck).await?;
            if !outcome.is_success() {
                failures += 1;
            }
        }
        Ok(TaskReport {
            task: TaskKind::PublicCheck,
            requests: self.profile.call_count,
            failures,
        })
    }

    pub async fn execute(&self, task: TaskKind) -> Result<TaskReport> {
        match task {
            TaskKind::AdminCheck => self.execute_admin_check().await,
            TaskKind::PublicCheck => self.execute_public_check().await,
        }
    }

    async fn send(&self, task: TaskKind) -> Result<RequestOutcome> {
        let identifier = self.identifier.as_deref().ok_or(LoadTestError::NotStarted)?;
        let path = self.family.path_for(task);

        let outcome = self
            .client
            .request(Method::GET, &path, &[(RATE_LIMIT_HEADER, identifier)])
            .await;
        self.metrics.record(self.profile.archetype, &path, &outcome);
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        if !outcome.is_success() {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(kind) = outcome.failure_kind() {
            trace!("{} {} failed: {}", identifier, path, kind);
        }
        Ok(outcome)
    }

    /// Run the task loop until `stop` turns true or its sender is dropped
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Result<UserReport> {
        if self.identifier.is_none() {
            self.on_start()?;
        }
        let mut report = UserReport {
            identifier: self.identifier.clone().unwrap_or_default(),
            ..Default::default()
        };

        loop {
            tokio::select! {
                _ = stopped(&mut stop) => break,
                _ = self.wait_between_tasks() => {}
            }

            let task = self.select_task();
            tokio::select! {
                _ = stopped(&mut stop) => break,
                result = self.execute(task) => report.add(result?),
            }
        }

        report.requests = self.requests_sent.load(Ordering::Relaxed);
        report.failures = self.requests_failed.load(Ordering::Relaxed);
        debug!(
            "Virtual user {} stopped after {} requests",
            report.identifier, report.requests
        );
        Ok(report)
    }
}

/// Resolve once the stop flag is set or the sender is gone
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DryRunClient;
    use crate::identity::is_valid_identifier;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn user(archetype: Archetype, client: Arc<DryRunClient>, seed: u64) -> VirtualUser<StdRng> {
        VirtualUser::new(
            archetype.profile(),
            EndpointFamily::Bucket4j,
            client,
            Arc::new(LoadTestMetrics::new().unwrap()),
            StdRng::seed_from_u64(seed),
        )
    }

    #[test]
    fn test_on_start_assigns_identifier_once() {
        let mut user = user(Archetype::Aggressive, Arc::new(DryRunClient::new()), 1);
        assert_eq!(user.identifier(), None);

        let id = user.on_start().unwrap().to_string();
        assert!(id.starts_with("aggressive"));
        assert!(is_valid_identifier(&id));

        let err = user.on_start().unwrap_err();
        assert!(matches!(err, LoadTestError::AlreadyStarted(_)));
        assert_eq!(user.identifier(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_task_before_start_is_rejected() {
        let client = Arc::new(DryRunClient::new());
        let user = user(Archetype::Normal, client.clone(), 1);
        let err = user.execute_admin_check().await.unwrap_err();
        assert!(matches!(err, LoadTestError::NotStarted));
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn test_public_check_call_counts() {
        for (archetype, expected) in [
            (Archetype::Normal, 1),
            (Archetype::Aggressive, 5),
            (Archetype::Hacker, 400),
        ] {
            let client = Arc::new(DryRunClient::new());
            let mut user = user(archetype, client.clone(), 11);
            user.on_start().unwrap();

            let report = user.execute_public_check().await.unwrap();
            assert_eq!(report.requests, expected);
            assert_eq!(report.failures, 0);

            let requests = client.requests();
            assert_eq!(requests.len(), expected as usize);
            assert!(requests.iter().all(|r| r.path == "/rl-general/b4j-public"));
        }
    }

    #[tokio::test]
    async fn test_admin_check_sends_identifier() {
        let client = Arc::new(DryRunClient::new());
        let mut user = user(Archetype::Normal, client.clone(), 3);
        let id = user.on_start().unwrap().to_string();

        let report = user.execute_admin_check().await.unwrap();
        assert_eq!(report.requests, 1);

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::GET);
        assert_eq!(requests[0].path, "/rl-general/b4j-admin");
        assert_eq!(requests[0].header(RATE_LIMIT_HEADER), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_burst_continues_after_failures() {
        // Every tenth request times out, every other one is throttled.
        let client = Arc::new(DryRunClient::with_status_fn(|seq| match seq {
            s if s % 10 == 9 => None,
            s if s % 2 == 0 => Some(429),
            _ => Some(200),
        }));
        let mut user = user(Archetype::Hacker, client.clone(), 5);
        user.on_start().unwrap();

        let report = user.execute_public_check().await.unwrap();
        assert_eq!(report.requests, 400);
        assert_eq!(client.request_count(), 400);
        assert_eq!(report.failures, 240);
    }

    #[test]
    fn test_task_selection_ratios() {
        let samples = 42_000;
        for (archetype, public_weight, admin_weight) in [
            (Archetype::Normal, 10.0, 1.0),
            (Archetype::Aggressive, 20.0, 1.0),
        ] {
            let mut user = user(archetype, Arc::new(DryRunClient::new()), 77);
            let admin = (0..samples)
                .filter(|_| user.select_task() == TaskKind::AdminCheck)
                .count();

            let expected = samples as f64 * admin_weight / (public_weight + admin_weight);
            let deviation = (admin as f64 - expected).abs() / expected;
            assert!(deviation < 0.1, "{}: {} admin picks, expected ~{}", archetype, admin, expected);
        }

        let mut hacker = user(Archetype::Hacker, Arc::new(DryRunClient::new()), 77);
        assert!((0..samples).all(|_| hacker.select_task() == TaskKind::PublicCheck));
    }

    #[test]
    fn test_next_wait_in_profile_bounds() {
        for archetype in Archetype::ALL {
            let mut user = user(archetype, Arc::new(DryRunClient::new()), 13);
            let interval = user.profile().wait_interval;
            for _ in 0..500 {
                assert!(interval.contains(user.next_wait()));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_before_first_task() {
        let client = Arc::new(DryRunClient::new());
        let user = user(Archetype::Hacker, client.clone(), 21);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(user.run(stop_rx));

        // Hacker waits at least 60s before its first burst.
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(client.request_count(), 0);

        tokio::time::sleep(Duration::from_millis(61_500)).await;
        let sent = client.request_count();
        assert!(sent >= 400 && sent % 400 == 0, "sent {}", sent);

        stop_tx.send(true).unwrap();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.public_checks as usize, sent / 400);
        assert_eq!(report.admin_checks, 0);
        assert_eq!(report.requests as usize, sent);

        let requests = client.requests();
        let id = report.identifier.as_str();
        assert!(requests.iter().all(|r| r.header(RATE_LIMIT_HEADER) == Some(id)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_sender_dropped() {
        let client = Arc::new(DryRunClient::new());
        let user = user(Archetype::Normal, client.clone(), 8);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(user.run(stop_rx));

        tokio::time::sleep(Duration::from_secs(600)).await;
        drop(stop_tx);

        let report = handle.await.unwrap().unwrap();
        // At most one task every 2s over 600s.
        assert!(report.requests > 0);
        assert!(report.requests <= 300);
        assert_eq!(report.requests as usize, client.request_count());
    }

    /// Answers like [`DryRunClient`] after a fixed per-request delay
    struct SlowClient {
        inner: DryRunClient,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl RequestClient for SlowClient {
        async fn request(
            &self,
            method: Method,
            path: &str,
            headers: &[(&str, &str)],
        ) -> RequestOutcome {
            sleep(self.delay).await;
            self.inner.request(method, path, headers).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_public_check_has_no_delay_between_requests() {
        let client = Arc::new(DryRunClient::new());
        let mut user = user(Archetype::Hacker, client.clone(), 17);
        user.on_start().unwrap();

        let before = tokio::time::Instant::now();
        let report = user.execute_public_check().await.unwrap();
        let after = tokio::time::Instant::now();

        assert_eq!(report.requests, 400);
        assert_eq!(client.request_count(), 400);
        assert_eq!(after, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_burst_keeps_report_in_sync_with_metrics() {
        let client = Arc::new(SlowClient {
            inner: DryRunClient::new(),
            delay: Duration::from_millis(10),
        });
        let metrics = Arc::new(LoadTestMetrics::new().unwrap());
        let user = VirtualUser::new(
            Archetype::Hacker.profile(),
            EndpointFamily::Bucket4j,
            client.clone(),
            metrics.clone(),
            StdRng::seed_from_u64(29),
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(user.run(stop_rx));

        // Wait for the first burst to start, then stop it about 100 requests in.
        while client.inner.request_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop_tx.send(true).unwrap();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.public_checks, 0);
        assert!(report.requests > 0 && report.requests < 400, "{} requests", report.requests);
        assert_eq!(report.requests, metrics.total_requests());
        assert_eq!(report.requests as usize, client.inner.request_count());
        assert_eq!(report.failures, 0);
    }
}
