//! Behavior shared by index backends, exercised through the trait, plus
//! file-backend staleness and table pruning.

use std::sync::Arc;

use larder_catalog::index::file::FileIndex;
use larder_catalog::index::sqlite::SqliteIndex;
use larder_catalog::schema::UploadItem;
use larder_catalog::{commit_basket, scan_basket, CommitRequest, Index, TableQuery};
use larder_core::{MemoryBackend, StorageBackend};

async fn seed_basket(storage: &MemoryBackend, id: &str, parents: &[&str]) -> String {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join(format!("{id}.txt"));
    std::fs::write(&file, id.as_bytes()).unwrap();

    let mut request = CommitRequest::new("raw");
    request.unique_id = Some(id.to_string());
    request.parent_ids = parents.iter().map(|p| p.to_string()).collect();
    request.upload_items = vec![UploadItem {
        path: file.to_string_lossy().into_owned(),
        stub: false,
    }];
    commit_basket(storage, "pantry", request)
        .await
        .unwrap()
        .address
}

/// The contract every backend satisfies: rescan finds the baskets,
/// read projections agree, untracked baskets disappear.
async fn exercise_backend(storage: Arc<MemoryBackend>, index: &mut dyn Index) {
    let report = index.generate_index().await.unwrap();
    assert_eq!(report.entries.len(), 3);
    assert!(report.warnings.is_empty());
    assert_eq!(index.len().await.unwrap(), 3);

    let table = index.to_table(TableQuery::default()).await.unwrap();
    assert_eq!(table.len(), 3);

    let page = index
        .to_table(TableQuery {
            max_rows: 2,
            offset: 2,
        })
        .await
        .unwrap();
    assert_eq!(page.len(), 1);

    let typed = index
        .get_baskets_of_type("raw", TableQuery::default())
        .await
        .unwrap();
    assert_eq!(typed.len(), 3);
    assert!(index
        .get_baskets_of_type("missing", TableQuery::default())
        .await
        .unwrap()
        .is_empty());

    let rows = index
        .get_rows(&["0002".to_string(), "pantry/raw/0003".to_string()])
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    let earliest = table.iter().map(|e| e.upload_time).min().unwrap();
    let latest = table.iter().map(|e| e.upload_time).max().unwrap();
    let hour = chrono::Duration::hours(1);
    assert_eq!(
        index
            .get_baskets_by_upload_time(None, None, TableQuery::default())
            .await
            .unwrap()
            .len(),
        3
    );
    // Bounds are inclusive on both ends.
    assert_eq!(
        index
            .get_baskets_by_upload_time(Some(earliest), Some(latest), TableQuery::default())
            .await
            .unwrap()
            .len(),
        3
    );
    assert_eq!(
        index
            .get_baskets_by_upload_time(Some(earliest), None, TableQuery::default())
            .await
            .unwrap()
            .len(),
        3
    );
    // Windows entirely before or after the uploads match nothing.
    assert!(index
        .get_baskets_by_upload_time(None, Some(earliest - hour), TableQuery::default())
        .await
        .unwrap()
        .is_empty());
    assert!(index
        .get_baskets_by_upload_time(Some(latest + hour), None, TableQuery::default())
        .await
        .unwrap()
        .is_empty());

    let children = index.lookup_edges_reverse("0001").await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].uuid, "0002");

    // Track a new basket without rescanning.
    let address = seed_basket(&storage, "0004", &[]).await;
    let entry = scan_basket(storage.as_ref(), &address).await.unwrap();
    index.track_baskets(vec![entry]).await.unwrap();
    assert_eq!(index.len().await.unwrap(), 4);

    assert_eq!(index.untrack_basket("0004").await.unwrap(), 1);
    assert_eq!(index.untrack_basket("0004").await.unwrap(), 0);
    assert_eq!(index.len().await.unwrap(), 3);
}

async fn seeded_storage() -> Arc<MemoryBackend> {
    let storage = Arc::new(MemoryBackend::new());
    seed_basket(&storage, "0001", &[]).await;
    seed_basket(&storage, "0002", &["0001"]).await;
    seed_basket(&storage, "0003", &["0002"]).await;
    storage
}

#[tokio::test]
async fn file_backend_satisfies_the_contract() {
    let storage = seeded_storage().await;
    let mut index = FileIndex::new(storage.clone(), "pantry");
    exercise_backend(storage, &mut index).await;
}

#[tokio::test]
async fn sqlite_backend_satisfies_the_contract() {
    let storage = seeded_storage().await;
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("index.db").display());
    let mut index = SqliteIndex::connect(storage.clone(), "pantry", &url)
        .await
        .unwrap();
    exercise_backend(storage, &mut index).await;
}

#[tokio::test]
async fn stale_file_index_reloads_before_reads() {
    let storage = seeded_storage().await;
    let mut writer = FileIndex::new(storage.clone(), "pantry");
    let mut reader = FileIndex::new(storage.clone(), "pantry");

    writer.generate_index().await.unwrap();
    assert_eq!(reader.len().await.unwrap(), 3);

    // A mutation through one handle is visible to the other.
    writer.untrack_basket("0003").await.unwrap();
    assert_eq!(reader.len().await.unwrap(), 2);
    assert!(reader.resolve_uuid("0003").await.unwrap().is_none());
}

#[tokio::test]
async fn file_index_versions_are_monotonic() {
    let storage = seeded_storage().await;
    let mut index = FileIndex::new(storage, "pantry");

    index.generate_index().await.unwrap();
    let first = index.version();
    index.untrack_basket("0003").await.unwrap();
    assert!(index.version() > first);
}

#[tokio::test]
async fn cleanup_prunes_old_table_documents() {
    let storage = seeded_storage().await;
    let mut index = FileIndex::new(storage.clone(), "pantry");

    index.generate_index().await.unwrap();
    index.untrack_basket("0002").await.unwrap();
    index.untrack_basket("0003").await.unwrap();

    let tables_before = storage.list("pantry/index/").await.unwrap().len();
    assert_eq!(tables_before, 3);

    let pruned = index.cleanup_index_tables(1).await.unwrap();
    assert_eq!(pruned, 2);
    assert_eq!(storage.list("pantry/index/").await.unwrap().len(), 1);

    // The surviving table is the newest one.
    let mut fresh = FileIndex::new(storage, "pantry");
    assert_eq!(fresh.len().await.unwrap(), 1);
    assert_eq!(
        fresh.resolve_uuid("0001").await.unwrap(),
        Some("0001".to_string())
    );
}
