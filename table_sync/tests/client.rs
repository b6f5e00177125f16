//! Full runs through `TableSyncClient` against SQLite database files

use std::path::Path;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use table_sync::data::MemorySink;
use table_sync::{ComparisonStatus, TableSyncClient};

fn write_config(dir: &Path) -> String {
    let url = |name: &str| format!("sqlite://{}?mode=rwc", dir.join(name).display());
    let config = format!(
        r#"
reference:
  driver: sqlite
  url: "{}"
  pool_size: 2
target:
  driver: sqlite
  url: "{}"
  pool_size: 2
data_diff:
  chunk_size: 4
output:
  include_banner: false
"#,
        url("reference.db"),
        url("target.db")
    );
    let path = dir.join("table_sync.yaml");
    std::fs::write(&path, config).unwrap();
    path.to_string_lossy().to_string()
}

async fn setup() -> (TempDir, TableSyncClient) {
    let dir = TempDir::new().unwrap();
    let client = table_sync::init(&write_config(dir.path())).await.unwrap();

    let create = "CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score INTEGER)";
    client.reference().execute(create).await.unwrap();
    client.target().execute(create).await.unwrap();

    for id in 1..=20 {
        client
            .reference()
            .execute(&format!("INSERT INTO person VALUES ({}, 'name{}', {})", id, id, id * 10))
            .await
            .unwrap();
    }
    for id in 3..=22 {
        let name = if id == 10 { "renamed".to_string() } else { format!("name{}", id) };
        client
            .target()
            .execute(&format!("INSERT INTO person VALUES ({}, '{}', {})", id, name, id * 10))
            .await
            .unwrap();
    }
    (dir, client)
}

async fn diff(client: &TableSyncClient) -> (table_sync::DataDiffReport, String, String) {
    let inserts = MemorySink::new();
    let updates = MemorySink::new();
    let report = client
        .data_diff(
            "person",
            "person",
            Box::new(inserts.clone()),
            Box::new(updates.clone()),
        )
        .await
        .unwrap();
    (report, inserts.text(), updates.text())
}

#[tokio::test]
async fn test_sqlite_round_trip() {
    let (_dir, client) = setup().await;

    let (report, inserts, updates) = diff(&client).await;
    assert_eq!(report.status, ComparisonStatus::Ok);
    assert_eq!(report.inserts, 2);
    assert_eq!(report.updates, 1);
    assert_eq!(report.rows_processed, 20);
    assert!(!report.cancelled);
    assert_eq!(
        updates,
        "UPDATE person SET name = 'name10' WHERE id = 10;\n\nCOMMIT;\n"
    );

    assert_eq!(client.apply_script(&inserts).await.unwrap(), 2);
    assert_eq!(client.apply_script(&updates).await.unwrap(), 1);

    let deletes = MemorySink::new();
    let report = client
        .delete_sync("person", "person", Some(Box::new(deletes.clone())))
        .await
        .unwrap();
    assert_eq!(report.deleted_rows, 2);
    assert_eq!(
        deletes.text(),
        "DELETE FROM person WHERE id = 21;\nDELETE FROM person WHERE id = 22;\n\nCOMMIT;\n"
    );
    assert_eq!(client.apply_script(&deletes.text()).await.unwrap(), 2);

    let (report, inserts, updates) = diff(&client).await;
    assert_eq!((report.inserts, report.updates), (0, 0));
    assert!(inserts.is_empty());
    assert!(updates.is_empty());
}

#[tokio::test]
async fn test_sqlite_table_lookup_is_case_insensitive() {
    let (_dir, client) = setup().await;
    let inserts = MemorySink::new();
    let report = client
        .data_diff("PERSON", "Person", Box::new(inserts.clone()), Box::new(MemorySink::new()))
        .await
        .unwrap();
    assert_eq!(report.status, ComparisonStatus::Ok);
    assert_eq!(report.inserts, 2);
}

#[tokio::test]
async fn test_sqlite_missing_table_report() {
    let (_dir, client) = setup().await;
    let report = client
        .data_diff("nobody", "nobody", Box::new(MemorySink::new()), Box::new(MemorySink::new()))
        .await
        .unwrap();
    assert_eq!(report.status, ComparisonStatus::ReferenceTableNotFound);
    assert_eq!(report.rows_processed, 0);
    assert_eq!(report.errors.len(), 1);
}

#[tokio::test]
async fn test_sqlite_schema_diff_creates_missing_table() {
    let (_dir, client) = setup().await;
    client
        .reference()
        .execute("CREATE TABLE audit (id INTEGER PRIMARY KEY, entry TEXT)")
        .await
        .unwrap();

    let diff = client.schema_diff().await.unwrap();
    let created: Vec<&str> = diff.tables_to_create.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(created, vec!["audit"]);
    assert!(diff.tables_to_drop.is_empty());

    let statements = client.generate_migrations(&diff).unwrap();
    assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS \"audit\""));
    client.apply_script(&statements.join("\n")).await.unwrap();

    let diff = client.schema_diff().await.unwrap();
    assert!(diff.tables_to_create.is_empty());
}

#[tokio::test]
async fn test_failing_script_rolls_back_earlier_scripts() {
    let (_dir, client) = setup().await;
    let (_, inserts, _) = diff(&client).await;

    let broken = "UPDATE person SET no_such_column = 1 WHERE id = 10;\n";
    assert!(client.apply_scripts(&[inserts.as_str(), broken]).await.is_err());

    // The INSERTs ran in the same transaction and were rolled back
    let (report, _, _) = diff(&client).await;
    assert_eq!((report.inserts, report.updates), (2, 1));

    let (_, inserts, updates) = diff(&client).await;
    assert_eq!(client.apply_scripts(&[inserts.as_str(), updates.as_str()]).await.unwrap(), 3);
    let (report, _, _) = diff(&client).await;
    assert_eq!((report.inserts, report.updates), (0, 0));
}
