use crate::store::*;
use crate::types::{AssetId, Entitlement};
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn sample_entitlement() -> Entitlement {
    Entitlement::new("token", "https://cdn.example.com/a1/index.m3u8").with_fairplay(
        "https://fps.example.com/cert",
        "https://fps.example.com/license",
    )
}

#[tokio::test]
async fn test_lookup_missing_record_returns_none() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteSessionStore::new(temp_file.path()).await.unwrap();

    let record = store.lookup(&AssetId::from("missing")).await.unwrap();
    assert!(record.is_none());
    assert!(!store.is_completed(&AssetId::from("missing")).await.unwrap());

    store.close().await;
}

#[tokio::test]
async fn test_placeholder_then_completed_replaces_whole_record() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteSessionStore::new(temp_file.path()).await.unwrap();
    let asset_id = AssetId::from("a1");

    // Placeholder: download underway, no location yet
    let placeholder = SessionRecord::in_progress(asset_id.clone(), sample_entitlement(), None);
    store.save(&placeholder).await.unwrap();

    let stored = store.lookup(&asset_id).await.unwrap().unwrap();
    assert_eq!(stored.entitlement, sample_entitlement());
    assert_eq!(stored.location, None);
    assert_eq!(stored.state, OfflineState::NotPlayable);
    assert!(!store.is_completed(&asset_id).await.unwrap());

    let mut refreshed = sample_entitlement();
    refreshed.play_token = "fresh".to_string();
    let completed =
        SessionRecord::completed(asset_id.clone(), refreshed.clone(), PathBuf::from("/media/a1"));
    store.save(&completed).await.unwrap();

    let stored = store.lookup(&asset_id).await.unwrap().unwrap();
    assert_eq!(stored.entitlement, refreshed);
    assert_eq!(stored.location, Some(PathBuf::from("/media/a1")));
    assert_eq!(stored.state, OfflineState::Completed);
    assert!(store.is_completed(&asset_id).await.unwrap());

    store.close().await;
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let temp_file = NamedTempFile::new().unwrap();
    let asset_id = AssetId::from("a1");

    {
        let store = SqliteSessionStore::new(temp_file.path()).await.unwrap();
        let record = SessionRecord::in_progress(
            asset_id.clone(),
            sample_entitlement(),
            Some(PathBuf::from("/media/a1.partial")),
        );
        store.save(&record).await.unwrap();
        store.close().await;
    }

    // Second session: migrations are not re-applied, record is intact
    let store = SqliteSessionStore::new(temp_file.path()).await.unwrap();
    let stored = store.lookup(&asset_id).await.unwrap().unwrap();
    assert_eq!(stored.location, Some(PathBuf::from("/media/a1.partial")));
    assert_eq!(stored.state, OfflineState::NotPlayable);

    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_all(store.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1]);

    store.close().await;
}

#[tokio::test]
async fn test_list_and_remove() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteSessionStore::new(temp_file.path()).await.unwrap();

    for id in ["b", "a"] {
        let record = SessionRecord::in_progress(AssetId::from(id), sample_entitlement(), None);
        store.save(&record).await.unwrap();
    }

    let ids: Vec<String> = store
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.asset_id.to_string())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);

    assert!(store.remove(&AssetId::from("a")).await.unwrap());
    assert!(!store.remove(&AssetId::from("a")).await.unwrap());
    assert_eq!(store.list().await.unwrap().len(), 1);

    store.close().await;
}

#[tokio::test]
async fn test_corrupt_entitlement_snapshot_is_reported() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteSessionStore::new(temp_file.path()).await.unwrap();

    sqlx::query(
        "INSERT INTO session_records (asset_id, entitlement, location, state, updated_at) VALUES ('x', 'not json', NULL, 0, 0)",
    )
    .execute(store.pool())
    .await
    .unwrap();

    let err = store.lookup(&AssetId::from("x")).await.unwrap_err();
    assert!(matches!(
        err,
        crate::Error::Database(crate::error::DatabaseError::CorruptRecord { .. })
    ));

    store.close().await;
}

#[tokio::test]
async fn test_memory_store_matches_contract() {
    let store = MemorySessionStore::new();
    let asset_id = AssetId::from("a1");

    assert!(store.lookup(&asset_id).await.unwrap().is_none());

    let record =
        SessionRecord::completed(asset_id.clone(), sample_entitlement(), PathBuf::from("/m"));
    store.save(&record).await.unwrap();
    assert!(store.is_completed(&asset_id).await.unwrap());
    assert_eq!(store.list().await.unwrap(), vec![record]);

    assert!(store.remove(&asset_id).await.unwrap());
    assert!(store.lookup(&asset_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unusable_database_directory_is_connection_error() {
    // a regular file where the database directory should be
    let blocker = NamedTempFile::new().unwrap();
    let path = blocker.path().join("sessions.db");

    let result = SqliteSessionStore::new(&path).await;
    assert!(matches!(
        result,
        Err(crate::Error::Database(crate::error::DatabaseError::ConnectionFailed(_)))
    ));
}
