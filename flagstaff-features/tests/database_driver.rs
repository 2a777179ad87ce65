//! Database driver tests against an in-memory SQLite database.

#![cfg(feature = "database")]

use flagstaff_features::prelude::*;
use flagstaff_features::{DatabaseDriver, Driver, DriverContext, EventDispatcher, FeatureRegistry};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

async fn driver() -> (DatabaseDriver, Arc<FeatureRegistry>) {
    let registry = Arc::new(FeatureRegistry::new());
    let context = DriverContext::new("database", registry.clone(), EventDispatcher::default());

    // A single connection keeps every query on the same in-memory database
    let driver = DatabaseDriver::connect(context, "sqlite::memory:", "features", 1)
        .await
        .unwrap();
    driver.create_table().await.unwrap();

    (driver, registry)
}

#[tokio::test]
async fn resolves_and_persists_on_first_get() {
    let (driver, registry) = driver().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let count = calls.clone();
    registry.define("foo", move |_: &Scope| {
        count.fetch_add(1, Ordering::SeqCst);
        "blue"
    });

    assert_eq!(driver.get("foo", &Scope::from("tim")).await.unwrap(), json!("blue"));
    assert_eq!(driver.get("foo", &Scope::from("tim")).await.unwrap(), json!("blue"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let raw: String = sqlx::query_scalar("SELECT value FROM features WHERE name = 'foo'")
        .fetch_one(driver.pool())
        .await
        .unwrap();
    assert_eq!(raw, "\"blue\"");
}

#[tokio::test]
async fn unknown_features_are_not_persisted() {
    let (driver, _) = driver().await;

    assert_eq!(driver.get("missing", &Scope::Null).await.unwrap(), json!(false));
    assert!(driver.stored().await.unwrap().is_empty());
}

#[tokio::test]
async fn null_and_empty_scopes_are_separate_rows() {
    let (driver, _) = driver().await;

    driver.set("foo", &Scope::Null, json!(true)).await.unwrap();
    driver.set("foo", &Scope::from(""), json!(false)).await.unwrap();

    assert_eq!(driver.get("foo", &Scope::Null).await.unwrap(), json!(true));
    assert_eq!(driver.get("foo", &Scope::from("")).await.unwrap(), json!(false));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM features")
        .fetch_one(driver.pool())
        .await
        .unwrap();
    assert_eq!(rows, 2);
}

#[tokio::test]
async fn set_updates_in_place() {
    let (driver, _) = driver().await;

    driver.set("foo", &Scope::Null, json!(1)).await.unwrap();
    driver.set("foo", &Scope::Null, json!(2)).await.unwrap();

    assert_eq!(driver.get("foo", &Scope::Null).await.unwrap(), json!(2));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM features")
        .fetch_one(driver.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn get_all_mixes_stored_and_resolved_values() {
    let (driver, registry) = driver().await;
    registry.define("foo", |scope: &Scope| scope.as_str() == Some("a"));
    registry.define_value("bar", "resolved");

    driver.set("foo", &Scope::from("b"), json!("stored")).await.unwrap();

    let values = driver
        .get_all(&vec![
            (
                "foo".to_string(),
                vec![Scope::from("a"), Scope::from("b"), Scope::from("c")],
            ),
            ("bar".to_string(), vec![Scope::Null]),
            ("missing".to_string(), vec![Scope::Null]),
        ])
        .await
        .unwrap();

    assert_eq!(values["foo"], vec![json!(true), json!("stored"), json!(false)]);
    assert_eq!(values["bar"], vec![json!("resolved")]);
    assert_eq!(values["missing"], vec![json!(false)]);

    assert_eq!(driver.stored().await.unwrap(), vec!["bar", "foo"]);
}

#[tokio::test]
async fn set_for_all_scopes_delete_and_purge() {
    let (driver, registry) = driver().await;
    registry.define_value("foo", "fresh");

    driver.set("foo", &Scope::from("a"), json!(false)).await.unwrap();
    driver.set("foo", &Scope::from("b"), json!(false)).await.unwrap();
    driver.set("bar", &Scope::Null, json!(true)).await.unwrap();

    driver.set_for_all_scopes("foo", json!("everyone")).await.unwrap();
    assert_eq!(driver.get("foo", &Scope::from("a")).await.unwrap(), json!("everyone"));
    assert_eq!(driver.get("foo", &Scope::from("b")).await.unwrap(), json!("everyone"));

    driver.delete("foo", &Scope::from("a")).await.unwrap();
    assert_eq!(driver.get("foo", &Scope::from("a")).await.unwrap(), json!("fresh"));

    driver.purge(Some(&["foo".to_string()])).await.unwrap();
    assert_eq!(driver.stored().await.unwrap(), vec!["bar"]);

    driver.purge(None).await.unwrap();
    assert!(driver.stored().await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_stored_value_is_an_error() {
    let (driver, _) = driver().await;

    sqlx::query("INSERT INTO features (name, scope, value) VALUES ('foo', 'null', '{broken')")
        .execute(driver.pool())
        .await
        .unwrap();

    let error = driver.get("foo", &Scope::Null).await.unwrap_err();
    assert!(matches!(error, FeatureError::Serialization(_)));
    assert!(error.to_string().contains("stored value is not valid JSON"));
}

#[tokio::test]
async fn manager_creates_database_store_from_config() {
    let config = FeaturesConfig::new("database").with_store(
        "database",
        StoreConfig::Database {
            url: "sqlite::memory:".to_string(),
            table: "feature_flags".to_string(),
            max_connections: 1,
            create_table: true,
        },
    );
    let manager = FeatureManager::new(config).unwrap();
    manager.define_value("foo", false);

    let store = manager.driver().await.unwrap();
    store.for_scope("tim").activate("foo").await.unwrap();
    store.flush_cache();

    assert!(store.for_scope("tim").active("foo").await.unwrap());
    assert!(store.for_scope("taylor").inactive("foo").await.unwrap());
    assert_eq!(store.stored().await.unwrap(), vec!["foo"]);
}

#[tokio::test]
async fn rows_without_a_scope_match_no_scope() {
    let (driver, registry) = driver().await;
    registry.define_value("foo", "resolved");

    sqlx::query("INSERT INTO features (name, scope, value) VALUES ('foo', NULL, '\"legacy\"')")
        .execute(driver.pool())
        .await
        .unwrap();

    let values = driver
        .get_all(&vec![("foo".to_string(), vec![Scope::Null])])
        .await
        .unwrap();
    assert_eq!(values["foo"], vec![json!("resolved")]);
    assert_eq!(driver.get("foo", &Scope::Null).await.unwrap(), json!("resolved"));
}
