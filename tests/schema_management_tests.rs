//! Cached-schema management: list, get, pin, unpin, delete, clear.

mod common;

use tempfile::TempDir;

use common::{intent_filter_active, seed_users_database, sql_active_users, sqlite_config, ScriptedGenerator};
use nttp::cache::CacheError;
use nttp::{Error, Nttp, ResolveOptions};

async fn populated_nttp() -> (TempDir, Nttp, String) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("users.db");
    seed_users_database(&path).await;

    let generator = ScriptedGenerator::new(vec![intent_filter_active()], vec![sql_active_users()]);
    let nttp = Nttp::builder(sqlite_config(&path))
        .generator(generator)
        .build()
        .await
        .unwrap();

    let outcome = nttp
        .resolve("get all active users", ResolveOptions::default())
        .await
        .unwrap();
    (dir, nttp, outcome.fingerprint)
}

#[tokio::test]
async fn test_list_and_get_expose_the_cached_entry() {
    let (_dir, nttp, fingerprint) = populated_nttp().await;

    let all = nttp.list_schemas().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].fingerprint, fingerprint);
    assert_eq!(all[0].example_queries, vec!["get all active users"]);

    let entry = nttp.get_schema(&fingerprint).await.unwrap().unwrap();
    assert_eq!(entry.sql, "SELECT id, name, status FROM users WHERE status = ?");
    assert!(entry.result_schema.is_some());

    assert!(nttp.get_schema("0000000000000000").await.unwrap().is_none());
}

#[tokio::test]
async fn test_pinned_entries_refuse_deletion_until_unpinned() {
    let (_dir, nttp, fingerprint) = populated_nttp().await;

    assert!(nttp.pin_schema(&fingerprint).await.unwrap());
    let err = nttp.delete_schema(&fingerprint).await.unwrap_err();
    assert!(
        matches!(err, Error::Cache(CacheError::Pinned(_))),
        "got {err}"
    );

    assert!(nttp.unpin_schema(&fingerprint).await.unwrap());
    assert!(nttp.delete_schema(&fingerprint).await.unwrap());
    assert!(nttp.get_schema(&fingerprint).await.unwrap().is_none());

    // Deleting again reports absence rather than failing.
    assert!(!nttp.delete_schema(&fingerprint).await.unwrap());
}

#[tokio::test]
async fn test_pinning_an_unknown_fingerprint_reports_absence() {
    let (_dir, nttp, _fingerprint) = populated_nttp().await;
    assert!(!nttp.pin_schema("ffffffffffffffff").await.unwrap());
}

#[tokio::test]
async fn test_clear_cache_spares_pinned_entries() {
    let (_dir, nttp, fingerprint) = populated_nttp().await;

    nttp.pin_schema(&fingerprint).await.unwrap();
    nttp.clear_cache().await.unwrap();
    assert!(nttp.get_schema(&fingerprint).await.unwrap().is_some());

    nttp.unpin_schema(&fingerprint).await.unwrap();
    nttp.clear_cache().await.unwrap();
    assert!(nttp.list_schemas().await.unwrap().is_empty());
}
