use super::*;

#[tokio::test]
async fn put_overwrites_existing_value() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.put_value("selectedChatId", "c1").await.expect("put");
    storage.put_value("selectedChatId", "c2").await.expect("overwrite");

    let value = storage.get_value("selectedChatId").await.expect("get");
    assert_eq!(value.as_deref(), Some("c2"));
}

#[tokio::test]
async fn missing_key_reads_as_none() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert_eq!(storage.get_value("nope").await.expect("get"), None);
    assert!(!storage.delete_value("nope").await.expect("delete"));
}

#[tokio::test]
async fn batch_applies_puts_and_deletes_together() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.put_value("stale", "x").await.expect("seed");

    storage
        .apply_batch(&[("a", "1"), ("b", "2")], &["stale"])
        .await
        .expect("batch");

    assert_eq!(storage.get_value("a").await.expect("a").as_deref(), Some("1"));
    assert_eq!(storage.get_value("b").await.expect("b").as_deref(), Some("2"));
    assert_eq!(storage.get_value("stale").await.expect("stale"), None);
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[test]
fn sqlite_path_ignores_memory_and_query_suffix() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/chat.db?mode=rwc"),
        Some(PathBuf::from("./data/chat.db"))
    );
}
