//! End-to-end behaviour against in-memory SQLite targets.

#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::time::Duration;

use fake::Fake;
use fake::faker::lorem::en::Sentence;

use dualdb_domain::Todo;
use dualdb_persistence::health::{DB_PRIMARY, DB_SECONDARY};
use dualdb_persistence::{
    CacheConfig, ClientFactory, ConnectionFactory, DbConfig, Driver, PersistenceError,
    PoolConfig, QueryOptions, ReplicationConfig, SchemaMigrator, SharedDriver,
    SqlTodoRepository, TargetConfig, TodoRepository,
};

// One connection per pool keeps each `:memory:` database alive and private.
fn pool() -> PoolConfig {
    PoolConfig::default()
        .with_max_connections(1)
        .with_min_connections(1)
}

fn memory_target() -> TargetConfig {
    TargetConfig::new("sqlite", ":memory:")
}

fn single(ttl: Duration) -> DbConfig {
    DbConfig::new(ReplicationConfig::single(memory_target()))
        .with_cache(CacheConfig::new(ttl))
        .with_pool(pool())
}

#[tokio::test]
async fn repository_crud_over_migrated_database() {
    let client = Arc::new(ClientFactory::new(single(Duration::ZERO)).build().await.unwrap());
    let repo = SqlTodoRepository::new(client.clone());

    let description: String = Sentence(3..6).fake();
    let todo = Todo::with_id("t-1", "buy milk")
        .unwrap()
        .with_description(description.clone());
    repo.create(&todo).await.unwrap();
    repo.create(&Todo::with_id("t-2", "answer mail").unwrap())
        .await
        .unwrap();

    let loaded = repo.get_by_id("t-1").await.unwrap().unwrap();
    assert_eq!(loaded.name, "buy milk");
    assert_eq!(loaded.description.as_deref(), Some(description.as_str()));

    let names: Vec<String> = repo.list().await.unwrap().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["answer mail", "buy milk"]);

    let mut renamed = loaded.clone();
    renamed.name = "buy oat milk".to_string();
    renamed.description = None;
    repo.update(&renamed).await.unwrap();
    let reloaded = repo.get_by_id("t-1").await.unwrap().unwrap();
    assert_eq!(reloaded.name, "buy oat milk");
    assert!(reloaded.description.is_none());

    assert!(repo.delete("t-1").await.unwrap());
    assert!(!repo.delete("t-1").await.unwrap());
    assert!(repo.get_by_id("t-1").await.unwrap().is_none());

    client.close().await.unwrap();
}

#[tokio::test]
async fn cached_read_is_stale_until_bypassed() {
    let client = Arc::new(
        ClientFactory::new(single(Duration::from_secs(60)))
            .build()
            .await
            .unwrap(),
    );
    let cached = SqlTodoRepository::new(client.clone());
    let fresh = SqlTodoRepository::new(client.clone()).with_options(QueryOptions::bypass());

    cached
        .create(&Todo::with_id("t-1", "buy milk").unwrap())
        .await
        .unwrap();
    assert_eq!(cached.get_by_id("t-1").await.unwrap().unwrap().name, "buy milk");

    cached
        .update(&Todo::with_id("t-1", "buy bread").unwrap())
        .await
        .unwrap();

    assert_eq!(cached.get_by_id("t-1").await.unwrap().unwrap().name, "buy milk");
    assert_eq!(fresh.get_by_id("t-1").await.unwrap().unwrap().name, "buy bread");
}

#[tokio::test]
async fn duplicate_name_is_an_exec_error() {
    let client = Arc::new(ClientFactory::new(single(Duration::ZERO)).build().await.unwrap());
    let repo = SqlTodoRepository::new(client);

    repo.create(&Todo::with_id("t-1", "buy milk").unwrap())
        .await
        .unwrap();
    let err = repo
        .create(&Todo::with_id("t-2", "buy milk").unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, PersistenceError::Exec(_)));
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let driver = ConnectionFactory::new(pool())
        .connect(DB_PRIMARY, &memory_target())
        .await
        .unwrap();
    let migrator = SchemaMigrator::builtin();

    let first = migrator.run(DB_PRIMARY, &driver).await.unwrap();
    let second = migrator.run(DB_PRIMARY, &driver).await.unwrap();

    assert_eq!(first.applied, vec![1, 2]);
    assert!(second.applied.is_empty());
    assert_eq!(second.already_applied, 2);
    assert!(migrator.status(&driver).await.unwrap().is_current());
    assert_eq!(migrator.current_version(&driver).await.unwrap(), Some(2));
}

#[tokio::test]
async fn writes_reach_both_databases() {
    let connector = ConnectionFactory::new(pool());
    let migrator = SchemaMigrator::builtin();
    let primary = Arc::new(connector.connect(DB_PRIMARY, &memory_target()).await.unwrap());
    let secondary = Arc::new(connector.connect(DB_SECONDARY, &memory_target()).await.unwrap());
    migrator.run(DB_PRIMARY, primary.as_ref()).await.unwrap();
    migrator.run(DB_SECONDARY, secondary.as_ref()).await.unwrap();

    let config = DbConfig::new(ReplicationConfig::new(memory_target(), Some(memory_target())));
    let mirror: SharedDriver = secondary.clone();
    let client = Arc::new(ClientFactory::new(config).assemble(primary.clone(), Some(mirror)));
    assert!(client.is_multi_write());

    SqlTodoRepository::new(client.clone())
        .create(&Todo::with_id("t-1", "buy milk").unwrap())
        .await
        .unwrap();

    let mirrored = SqlTodoRepository::new(secondary.clone())
        .get_by_id("t-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mirrored.name, "buy milk");
    assert_eq!(client.replication_failures(), 0);

    client.close().await.unwrap();
    assert!(primary.is_closed());
    assert!(secondary.is_closed());
}

#[tokio::test]
async fn unknown_driver_is_rejected() {
    let config = DbConfig::new(ReplicationConfig::single(TargetConfig::new(
        "oracle",
        "oracle://localhost/xe",
    )));

    let Err(err) = ClientFactory::new(config).build().await else {
        panic!("an unknown driver name must not connect");
    };

    assert!(matches!(err, PersistenceError::UnsupportedDialect(_)));
    assert!(err.is_startup_fatal());
}
