//! Behaviour of the assembled driver chain against stub backends.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use dualdb_persistence::cache::MemoryStore;
use dualdb_persistence::health::{CACHE_STORE, DB_PRIMARY, DB_SECONDARY};
use dualdb_persistence::testing::{StubDriver, StubFailure};
use dualdb_persistence::{
    CacheConfig, CachingDriver, Client, ClientFactory, DbConfig, Driver, HealthChecker,
    PersistenceError, QueryOptions, ReplicationConfig, ResultSet, SchemaMigrator,
    TargetConfig, Value,
};

const SELECT: &str = "SELECT id, name, description FROM todo WHERE id = ?";
const INSERT: &str = "INSERT INTO todo (id, name) VALUES (?, ?)";

fn config(ttl: Duration) -> DbConfig {
    DbConfig::new(ReplicationConfig::new(
        TargetConfig::new("sqlite", "primary.db"),
        Some(TargetConfig::new("sqlite", "secondary.db")),
    ))
    .with_cache(CacheConfig::new(ttl))
}

fn stubs() -> (StubDriver, StubDriver) {
    let row = ResultSet::new(["id", "name", "description"]).with_row(vec![
        "1".into(),
        "buy milk".into(),
        Value::Null,
    ]);
    (
        StubDriver::new().with_name(DB_PRIMARY).with_result(SELECT, row),
        StubDriver::new().with_name(DB_SECONDARY),
    )
}

fn client(primary: &StubDriver, secondary: Option<&StubDriver>, ttl: Duration) -> Client {
    ClientFactory::new(config(ttl)).assemble(
        Arc::new(primary.clone()),
        secondary.map(|s| Arc::new(s.clone()) as Arc<dyn Driver>),
    )
}

/// Counts WARN events carrying `message`.
struct WarnCounter {
    message: &'static str,
    hits: Arc<AtomicUsize>,
}

struct MessageField(Option<String>);

impl Visit for MessageField {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::WARN {
            return;
        }
        let mut field = MessageField(None);
        event.record(&mut field);
        if field.0.as_deref() == Some(self.message) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// =============================================================================
// READ CACHE
// =============================================================================

#[tokio::test(start_paused = true)]
async fn ttl_window_controls_backend_reads() {
    let (primary, _) = stubs();
    let client = client(&primary, None, Duration::from_secs(5));
    let args: [Value; 1] = ["1".into()];
    let opts = QueryOptions::new();

    let first = assert_ok!(client.query(SELECT, &args, &opts).await);
    assert_eq!(primary.query_count(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let second = assert_ok!(client.query(SELECT, &args, &opts).await);
    assert_eq!(primary.query_count(), 1);
    assert_eq!(first, second);

    tokio::time::advance(Duration::from_secs(4)).await;
    assert_ok!(client.query(SELECT, &args, &opts).await);
    assert_eq!(primary.query_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn cached_read_is_served_until_expiry() {
    let (primary, _) = stubs();
    let client = client(&primary, None, Duration::from_secs(5));
    let opts = QueryOptions::new();

    let before = assert_ok!(client.query(SELECT, &["1".into()], &opts).await);
    primary.set_result(SELECT, ResultSet::new(["id"]));

    let stale = assert_ok!(client.query(SELECT, &["1".into()], &opts).await);
    let fresh = assert_ok!(client.query(SELECT, &["1".into()], &QueryOptions::bypass()).await);

    assert_eq!(stale, before);
    assert!(fresh.is_empty());
}

#[tokio::test(start_paused = true)]
async fn bypass_always_reaches_backend() {
    let (primary, _) = stubs();
    let client = client(&primary, None, Duration::from_secs(60));

    for _ in 0..3 {
        assert_ok!(
            client
                .query(SELECT, &["1".into()], &QueryOptions::bypass())
                .await
        );
    }
    assert_eq!(primary.query_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn disabled_cache_reaches_backend_every_time() {
    let (primary, _) = stubs();
    let config = config(Duration::from_secs(5)).with_cache(CacheConfig::from_secs_signed(-1));
    let client = ClientFactory::new(config).assemble(Arc::new(primary.clone()), None);

    for _ in 0..3 {
        assert_ok!(client.query(SELECT, &["1".into()], &QueryOptions::new()).await);
    }
    assert_eq!(primary.query_count(), 3);
}

#[tokio::test]
async fn targets_sharing_a_store_do_not_collide() {
    let store = Arc::new(MemoryStore::new());
    let (a, b) = stubs();
    b.set_result(SELECT, ResultSet::new(["id"]).with_row(vec!["2".into()]));
    let ttl = Duration::from_secs(60);

    let cached_a = CachingDriver::with_store(DB_PRIMARY, Arc::new(a), store.clone(), ttl);
    let cached_b = CachingDriver::with_store(DB_SECONDARY, Arc::new(b.clone()), store.clone(), ttl);
    let opts = QueryOptions::new();

    let from_a = assert_ok!(cached_a.query(SELECT, &["1".into()], &opts).await);
    let from_b = assert_ok!(cached_b.query(SELECT, &["1".into()], &opts).await);

    assert_ne!(from_a, from_b);
    assert_eq!(b.query_count(), 1);
    assert_eq!(store.len(), 2);
}

// =============================================================================
// REPLICATION
// =============================================================================

#[tokio::test]
async fn insert_is_recorded_by_both_targets() {
    let (primary, secondary) = stubs();
    let client = client(&primary, Some(&secondary), Duration::from_secs(5));
    let args: [Value; 2] = ["1".into(), "buy milk".into()];

    assert_ok!(client.execute(INSERT, &args, &QueryOptions::new()).await);

    assert_eq!(primary.executed().len(), 1);
    assert_eq!(secondary.executed().len(), 1);
    assert_eq!(secondary.executed()[0].args, args.to_vec());
    assert_eq!(client.replication_failures(), 0);
}

#[tokio::test]
async fn secondary_connection_error_is_swallowed_once() {
    let warnings = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter {
        message: "Replication to secondary failed",
        hits: warnings.clone(),
    });
    let _guard = tracing::subscriber::set_default(subscriber);

    let (primary, secondary) = stubs();
    secondary.fail_writes(Some(StubFailure::Connection));
    let client = client(&primary, Some(&secondary), Duration::from_secs(5));

    let result = assert_ok!(
        client
            .execute(INSERT, &["1".into(), "buy milk".into()], &QueryOptions::new())
            .await
    );

    assert_eq!(result.rows_affected, 1);
    assert_eq!(primary.executed().len(), 1);
    assert_eq!(client.replication_failures(), 1);
    assert_eq!(warnings.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn primary_error_leaves_secondary_untouched() {
    let (primary, secondary) = stubs();
    primary.fail_writes(Some(StubFailure::Statement));
    let client = client(&primary, Some(&secondary), Duration::from_secs(5));

    let err = assert_err!(client.execute(INSERT, &[], &QueryOptions::new()).await);

    assert!(matches!(err, PersistenceError::Exec(_)));
    assert_eq!(secondary.execute_count(), 0);
    assert_eq!(client.replication_failures(), 0);
}

#[tokio::test]
async fn reads_never_reach_secondary() {
    let (primary, secondary) = stubs();
    let client = client(&primary, Some(&secondary), Duration::from_secs(5));

    assert_ok!(client.query(SELECT, &["1".into()], &QueryOptions::bypass()).await);
    assert_ok!(client.query(SELECT, &["1".into()], &QueryOptions::new()).await);

    assert_eq!(secondary.query_count(), 0);
}

// =============================================================================
// MIGRATIONS, CANCELLATION, SHUTDOWN
// =============================================================================

#[tokio::test]
async fn migrations_bypass_the_cache() {
    let stub = StubDriver::new();
    let store = Arc::new(MemoryStore::new());
    let cached = CachingDriver::with_store(
        DB_PRIMARY,
        Arc::new(stub.clone()),
        store.clone(),
        Duration::from_secs(60),
    );
    let migrator = SchemaMigrator::builtin();

    assert_ok!(migrator.run(DB_PRIMARY, &cached).await);
    assert_ok!(migrator.status(&cached).await);

    assert!(store.is_empty());
    assert_eq!(stub.query_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_returns_promptly() {
    let (primary, _) = stubs();
    let slow = primary.with_latency(Duration::from_secs(60));
    let client = client(&slow, None, Duration::from_secs(5));

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let started = tokio::time::Instant::now();
    let err = assert_err!(
        client
            .query(SELECT, &["1".into()], &QueryOptions::new().with_cancel(token))
            .await
    );

    assert!(matches!(err, PersistenceError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn timeout_is_reported() {
    let (primary, _) = stubs();
    let slow = primary.with_latency(Duration::from_secs(60));
    let client = client(&slow, None, Duration::from_secs(5));

    let err = assert_err!(
        client
            .execute(
                INSERT,
                &[],
                &QueryOptions::new().with_timeout(Duration::from_millis(250))
            )
            .await
    );

    assert!(matches!(err, PersistenceError::Timeout { timeout_ms: 250 }));
}

#[tokio::test]
async fn shutdown_closes_secondary_before_primary() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (primary, secondary) = stubs();
    let primary = primary.with_close_log(log.clone());
    let secondary = secondary.with_close_log(log.clone());
    let client = client(&primary, Some(&secondary), Duration::from_secs(5));

    assert_ok!(client.shutdown(Duration::from_secs(10)).await);

    assert_eq!(*log.lock(), vec![DB_SECONDARY, DB_PRIMARY]);
    assert_eq!(primary.close_count(), 1);
    assert_eq!(secondary.close_count(), 1);
}

#[tokio::test]
async fn health_reports_each_dependency() {
    let (primary, secondary) = stubs();
    secondary.fail_queries(Some(StubFailure::Connection));
    let client = client(&primary, Some(&secondary), Duration::from_secs(5));

    let report = HealthChecker::default()
        .check_all(&client.health_targets())
        .await;

    assert!(!report.is_ready());
    assert!(report.get(DB_PRIMARY).unwrap().is_healthy());
    assert!(!report.get(DB_SECONDARY).unwrap().is_healthy());
    assert!(report.get(CACHE_STORE).unwrap().is_healthy());
}
