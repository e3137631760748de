//! Traffic profiles
//!
//! The three client archetypes differ only in parameters, so they are plain
//! data: [`Archetype::profile`] returns the [`UserProfile`] record for each.
//!
//! | Archetype  | weight | wait (s)  | calls | Public:Admin |
//! |------------|--------|-----------|-------|--------------|
//! | Normal     | 100    | [2, 8]    | 1     | 10:1         |
//! | Aggressive | 10     | [2, 4]    | 5     | 20:1         |
//! | Hacker     | 1      | [60, 120] | 400   | public only  |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{LoadTestError, Result};
use crate::weighted::WeightedTable;

/// Header carrying the virtual user's identifier
pub const RATE_LIMIT_HEADER: &str = "Rate-Limit-Identifier";

// ============================================================================
// TASKS & ENDPOINTS
// ============================================================================

/// One discrete action a virtual user performs per cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Single GET against the admin-scoped endpoint
    AdminCheck,
    /// Burst of `call_count` GETs against the public-scoped endpoint
    PublicCheck,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdminCheck => "admin_check",
            Self::PublicCheck => "public_check",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limiter implementation whose buckets are exercised.
///
/// The rate-limited controller exposes the same admin/public buckets once per
/// limiter library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointFamily {
    #[default]
    Bucket4j,
    Resilience4j,
}

impl EndpointFamily {
    fn path_prefix(&self) -> &'static str {
        match self {
            Self::Bucket4j => "/rl-general/b4j",
            Self::Resilience4j => "/rl-general/r4j",
        }
    }

    /// Request path hit by `task`
    pub fn path_for(&self, task: TaskKind) -> String {
        let bucket = match task {
            TaskKind::AdminCheck => "admin",
            TaskKind::PublicCheck => "public",
        };
        format!("{}-{}", self.path_prefix(), bucket)
    }
}

impl FromStr for EndpointFamily {
    type Err = LoadTestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bucket4j" | "b4j" => Ok(Self::Bucket4j),
            "resilience4j" | "r4j" => Ok(Self::Resilience4j),
            other => Err(LoadTestError::InvalidConfig(format!(
                "unknown endpoint family '{}': use 'bucket4j' or 'resilience4j'",
                other
            ))),
        }
    }
}

// ============================================================================
// WAIT INTERVAL
// ============================================================================

/// Think-time bounds in seconds, sampled uniformly
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaitInterval {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl WaitInterval {
    pub fn new(min_secs: f64, max_secs: f64) -> Result<Self> {
        let valid = min_secs.is_finite()
            && max_secs.is_finite()
            && min_secs >= 0.0
            && min_secs <= max_secs;
        if !valid {
            return Err(LoadTestError::InvalidWaitInterval {
                min: min_secs,
                max: max_secs,
            });
        }
        Ok(Self { min_secs, max_secs })
    }

    /// Sample a wait duration in `[min_secs, max_secs]`
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let secs = rng.gen_range(self.min_secs..=self.max_secs);
        Duration::from_secs_f64(secs)
    }

    pub fn contains(&self, wait: Duration) -> bool {
        let secs = wait.as_secs_f64();
        secs >= self.min_secs && secs <= self.max_secs
    }
}

// ============================================================================
// ARCHETYPES
// ============================================================================

/// Named client archetype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    Normal,
    Aggressive,
    Hacker,
}

impl Archetype {
    pub const ALL: [Archetype; 3] = [Self::Normal, Self::Aggressive, Self::Hacker];

    /// Stable label, also used as the identifier prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Aggressive => "aggressive",
            Self::Hacker => "hacker",
        }
    }

    /// Profile record for this archetype
    pub fn profile(&self) -> UserProfile {
        // The literals below are valid by construction.
        let (weight, min, max, call_count, tasks) = match self {
            // 1 request every 2 to 8 seconds
            Self::Normal => (
                100,
                2.0,
                8.0,
                1,
                vec![(TaskKind::PublicCheck, 10), (TaskKind::AdminCheck, 1)],
            ),
            // 5 requests every 2 to 4 seconds
            Self::Aggressive => (
                10,
                2.0,
                4.0,
                5,
                vec![(TaskKind::PublicCheck, 20), (TaskKind::AdminCheck, 1)],
            ),
            // 400 requests every 1 to 2 minutes
            Self::Hacker => (1, 60.0, 120.0, 400, vec![(TaskKind::PublicCheck, 1)]),
        };

        UserProfile {
            archetype: *self,
            weight,
            wait_interval: WaitInterval {
                min_secs: min,
                max_secs: max,
            },
            call_count,
            identifier_prefix: self.as_str().to_string(),
            task_weights: WeightedTable::new(tasks)
                .unwrap_or_else(|e| unreachable!("static task table rejected: {}", e)),
        }
    }

    /// Population table weighting archetypes 100:10:1
    pub fn population() -> WeightedTable<Archetype> {
        WeightedTable::new(Self::ALL.iter().map(|a| (*a, a.profile().weight)).collect())
            .unwrap_or_else(|e| unreachable!("static population table rejected: {}", e))
    }
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// USER PROFILE
// ============================================================================

/// One class of simulated client
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub archetype: Archetype,
    /// Relative probability of being spawned
    pub weight: u32,
    pub wait_interval: WaitInterval,
    /// Requests per public check
    pub call_count: u32,
    pub identifier_prefix: String,
    /// Distribution over the next task; unlisted tasks never run
    pub task_weights: WeightedTable<TaskKind>,
}

impl UserProfile {
    /// Build a custom profile, validating every parameter
    pub fn new(
        archetype: Archetype,
        weight: u32,
        wait_interval: WaitInterval,
        call_count: u32,
        task_weights: Vec<(TaskKind, u32)>,
    ) -> Result<Self> {
        if weight == 0 {
            return Err(LoadTestError::InvalidWeight {
                key: archetype.to_string(),
                weight,
            });
        }
        if call_count == 0 {
            return Err(LoadTestError::InvalidCallCount);
        }
        let wait_interval = WaitInterval::new(wait_interval.min_secs, wait_interval.max_secs)?;

        Ok(Self {
            archetype,
            weight,
            wait_interval,
            call_count,
            identifier_prefix: archetype.as_str().to_string(),
            task_weights: WeightedTable::new(task_weights)?,
        })
    }

    /// Whether `task` is registered for this profile at all
    pub fn runs(&self, task: TaskKind) -> bool {
        self.task_weights.weight_of(&task).is_some()
    }

    /// One-line description used by `--profiles`
    pub fn describe(&self) -> String {
        let public = self.task_weights.weight_of(&TaskKind::PublicCheck);
        let admin = self.task_weights.weight_of(&TaskKind::AdminCheck);
        let tasks = match (public, admin) {
            (Some(p), Some(a)) => format!("{}:{}", p, a),
            (Some(_), None) => "public only".to_string(),
            (None, Some(_)) => "admin only".to_string(),
            (None, None) => "-".to_string(),
        };
        format!(
            "{:<11} weight {:>4}  wait [{}, {}]s  calls {:>4}  public:admin {}",
            self.archetype.as_str(),
            self.weight,
            self.wait_interval.min_secs,
            self.wait_interval.max_secs,
            self.call_count,
            tasks
        )
    }
}
