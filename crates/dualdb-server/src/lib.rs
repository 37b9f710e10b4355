//! # dualdb Server
//!
//! Runs the data-access layer's startup sequence outside of any HTTP
//! surface: connect, migrate, assemble, monitor health, then shut down
//! gracefully.
//!
//! - `serve`: build the client, probe dependencies periodically and wait
//!   for a shutdown signal
//! - `migrate`: apply pending migrations (or report them) on every target
//! - `check`: probe every dependency once

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};

use dualdb_persistence::cache::{MemoryStore, RedisConfig, RedisStore};
use dualdb_persistence::health::{DB_PRIMARY, DB_SECONDARY};
use dualdb_persistence::{
    Client, ClientFactory, ConnectionFactory, Driver, HealthChecker, HealthReport, MigrationReport,
    MigrationStatus, SchemaMigrator, SharedCacheStore,
};

pub use config::{Config, ConfigError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often the in-process cache drops expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Build a client with the configured cache store.
///
/// # Errors
///
/// Returns an error if the cache store or a database target is unreachable,
/// or a migration fails.
pub async fn open(config: &Config) -> anyhow::Result<Client> {
    let store = cache_store(config).await?;
    let client = ClientFactory::new(config.db.clone())
        .with_cache_store(Arc::clone(&store.shared))
        .build()
        .await
        .context("failed to initialise database client")?;

    if let Some(memory) = store.memory {
        memory.spawn_sweeper(SWEEP_INTERVAL, client.shutdown_token());
    }
    Ok(client)
}

struct Store {
    shared: SharedCacheStore,
    memory: Option<Arc<MemoryStore>>,
}

async fn cache_store(config: &Config) -> anyhow::Result<Store> {
    match &config.redis_url {
        Some(url) => {
            info!("Connecting to Redis cache store");
            let redis = RedisStore::new(RedisConfig::new(url.as_str()))
                .await
                .context("failed to connect to Redis")?;
            Ok(Store {
                shared: Arc::new(redis),
                memory: None,
            })
        }
        None => {
            let memory = Arc::new(MemoryStore::new());
            Ok(Store {
                shared: Arc::clone(&memory) as SharedCacheStore,
                memory: Some(memory),
            })
        }
    }
}

/// Open the client, monitor dependencies until `shutdown` resolves, then
/// drain in-flight calls and close the connections.
///
/// # Errors
///
/// Returns an error if startup fails or the connections cannot be closed
/// cleanly.
pub async fn serve<S>(config: Config, shutdown: S) -> anyhow::Result<()>
where
    S: Future<Output = ()>,
{
    let client = open(&config).await?;
    info!(
        multi_write = client.is_multi_write(),
        cache_store = client.cache_store().name(),
        "Data-access layer ready"
    );

    let checker = HealthChecker::new(config.health_timeout);
    let (mut reports, monitor) = checker.spawn_periodic(
        client.health_targets(),
        config.health_interval,
        client.shutdown_token(),
    );

    let mut ready = true;
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            changed = reports.changed() => {
                if changed.is_err() {
                    break;
                }
                let now_ready = reports.borrow_and_update().is_ready();
                if now_ready != ready {
                    info!(ready = now_ready, "Readiness changed");
                    ready = now_ready;
                }
            }
        }
    }

    info!(
        grace_secs = config.shutdown_grace.as_secs(),
        replication_failures = client.replication_failures(),
        "Shutting down"
    );
    client
        .shutdown(config.shutdown_grace)
        .await
        .context("failed to close database connections")?;
    if let Err(e) = monitor.await {
        warn!(error = %e, "Health monitor task failed");
    }
    Ok(())
}

/// Migration outcome for one target.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MigrationOutcome {
    Applied(MigrationReport),
    Status {
        target: String,
        #[serde(flatten)]
        status: MigrationStatus,
    },
}

/// Apply pending migrations to every enabled target, or only report them
/// when `status_only` is set.
///
/// # Errors
///
/// Returns an error if a target is unreachable or a migration fails.
pub async fn migrate(config: &Config, status_only: bool) -> anyhow::Result<Vec<MigrationOutcome>> {
    let connector = ConnectionFactory::new(config.db.pool.clone());
    let migrator = SchemaMigrator::builtin();
    let replication = &config.db.replication;

    let mut targets = vec![(DB_PRIMARY, replication.primary())];
    if let Some(secondary) = replication.secondary() {
        targets.push((DB_SECONDARY, secondary));
    }

    let mut outcomes = Vec::with_capacity(targets.len());
    for (name, target) in targets {
        let driver = connector
            .connect(name, target)
            .await
            .with_context(|| format!("failed to connect to {name}"))?;

        let outcome = if status_only {
            migrator
                .status(&driver)
                .await
                .map(|status| MigrationOutcome::Status {
                    target: name.to_string(),
                    status,
                })
        } else {
            migrator.run(name, &driver).await.map(MigrationOutcome::Applied)
        };

        if let Err(e) = driver.close().await {
            warn!(db = name, error = %e, "Failed to close connection");
        }
        outcomes.push(outcome.with_context(|| format!("migration failed on {name}"))?);
    }
    Ok(outcomes)
}

/// Probe every dependency once.
///
/// # Errors
///
/// Returns an error if the client cannot be opened.
pub async fn check(config: &Config) -> anyhow::Result<HealthReport> {
    let client = open(config).await?;
    let report = HealthChecker::new(config.health_timeout)
        .check_all(&client.health_targets())
        .await;
    client.shutdown(Duration::ZERO).await?;
    Ok(report)
}
