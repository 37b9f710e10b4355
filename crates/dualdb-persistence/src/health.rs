//! # Health Checks
//!
//! Liveness probes for the dependencies of a client: each database target
//! and the cache store. Probes always bypass the read cache and are bounded
//! by a timeout so a hung dependency reports unhealthy instead of blocking
//! the caller.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::SharedCacheStore;
use crate::driver::{Driver, SharedDriver};
use crate::error::{PersistenceError, Result};
use crate::types::QueryOptions;

pub const DB_PRIMARY: &str = "db_primary";
pub const DB_SECONDARY: &str = "db_secondary";
pub const CACHE_STORE: &str = "cache_store";

/// Statement issued against database targets.
pub const PROBE_STATEMENT: &str = "SELECT 1";

// =============================================================================
// REPORT TYPES
// =============================================================================

/// Health status for one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Not yet checked
    Unknown,
}

/// Result of probing one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub component: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub response_time_ms: Option<u64>,
}

impl HealthCheck {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            response_time_ms: None,
        }
    }

    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            response_time_ms: None,
        }
    }

    pub fn unknown(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unknown,
            message: None,
            response_time_ms: None,
        }
    }

    #[must_use]
    pub const fn with_response_time(mut self, ms: u64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Results of one round of probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub checks: Vec<HealthCheck>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Ready when every dependency answered its last probe.
    pub fn is_ready(&self) -> bool {
        self.checks.iter().all(HealthCheck::is_healthy)
    }

    pub fn get(&self, component: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.component == component)
    }
}

// =============================================================================
// TARGETS
// =============================================================================

/// A dependency that can be probed.
#[derive(Clone)]
pub enum HealthTarget {
    Driver(SharedDriver),
    CacheStore(SharedCacheStore),
}

impl fmt::Debug for HealthTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Driver(driver) => write!(f, "Driver({})", driver.dialect()),
            Self::CacheStore(store) => write!(f, "CacheStore({})", store.name()),
        }
    }
}

// =============================================================================
// CHECKER
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct HealthChecker {
    timeout: Duration,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl HealthChecker {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe one database target with the cache bypassed.
    pub async fn check(&self, name: &str, driver: &dyn Driver) -> Result<()> {
        let opts = QueryOptions::bypass().with_timeout(self.timeout);
        match driver.query(PROBE_STATEMENT, &[], &opts).await {
            Ok(_) => {
                debug!(db = name, "Health probe ok");
                Ok(())
            }
            Err(e) => {
                warn!(db = name, error = %e, "Health probe failed");
                Err(e)
            }
        }
    }

    /// Probe any target and report the outcome with its latency.
    pub async fn check_target(&self, name: &str, target: &HealthTarget) -> HealthCheck {
        let started = Instant::now();
        let outcome = match target {
            HealthTarget::Driver(driver) => self.check(name, driver.as_ref()).await,
            HealthTarget::CacheStore(store) => self.ping_store(name, store).await,
        };
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let check = match outcome {
            Ok(()) => HealthCheck::healthy(name),
            Err(e) => HealthCheck::unhealthy(name, e.to_string()),
        };
        check.with_response_time(elapsed)
    }

    /// Probe every target in order.
    pub async fn check_all(&self, targets: &[(String, HealthTarget)]) -> HealthReport {
        let mut checks = Vec::with_capacity(targets.len());
        for (name, target) in targets {
            checks.push(self.check_target(name, target).await);
        }
        HealthReport {
            checks,
            checked_at: Utc::now(),
        }
    }

    /// Probe `targets` every `every` and publish each report until
    /// `shutdown` fires. The receiver starts with every target `Unknown`.
    pub fn spawn_periodic(
        self,
        targets: Vec<(String, HealthTarget)>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> (watch::Receiver<HealthReport>, JoinHandle<()>) {
        let initial = HealthReport {
            checks: targets
                .iter()
                .map(|(name, _)| HealthCheck::unknown(name.as_str()))
                .collect(),
            checked_at: Utc::now(),
        };
        let (tx, rx) = watch::channel(initial);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.check_all(&targets).await;
                        if !report.is_ready() {
                            warn!(
                                unhealthy = report.checks.iter().filter(|c| !c.is_healthy()).count(),
                                "Dependencies unhealthy"
                            );
                        }
                        if tx.send(report).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Health monitor stopped");
        });

        (rx, handle)
    }

    async fn ping_store(&self, name: &str, store: &SharedCacheStore) -> Result<()> {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let result = tokio::time::timeout(self.timeout, store.ping())
            .await
            .map_err(|_| PersistenceError::Timeout { timeout_ms })
            .and_then(|r| r);
        if let Err(e) = &result {
            warn!(component = name, store = store.name(), error = %e, "Cache store probe failed");
        }
        result
    }
}
