//! End-to-end runs of the data diff and delete sync against in-memory databases

use std::collections::HashMap;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use rstest::rstest;

use table_sync::config::{DataDiffConfig, DeleteSyncConfig, OutputConfig};
use table_sync::data::change::{ChangeKind, OutputDialect};
use table_sync::data::monitor::ProgressMonitor;
use table_sync::data::{
    CancelToken, ColumnDescriptor, ComparisonStatus, MemorySink, TableDataDiff, TableDeleteSync,
    TableIdentifier, Value,
};
use table_sync::db::{MemoryDatabase, StatementRunner};
use table_sync::utils::naming::SqlDialect;

const PERSON_ROWS: i64 = 187;

fn person() -> TableIdentifier {
    TableIdentifier::new("person")
}

fn person_columns() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor::new("id1", "integer").primary_key(),
        ColumnDescriptor::new("id2", "integer").primary_key(),
        ColumnDescriptor::new("firstname", "varchar"),
        ColumnDescriptor::new("lastname", "varchar"),
        ColumnDescriptor::new("city", "varchar").nullable(true),
    ]
}

fn person_row(i: i64) -> Vec<Value> {
    vec![
        Value::Int(i),
        Value::Int(i * 2),
        Value::Text(format!("First{}", i)),
        Value::Text(format!("Last{}", i)),
        Value::Text("Berlin".into()),
    ]
}

fn person_table(rows: impl IntoIterator<Item = Vec<Value>>) -> Arc<MemoryDatabase> {
    let db = MemoryDatabase::new(SqlDialect::Postgres);
    db.create_table(person(), person_columns());
    for row in rows {
        db.insert_row(&person(), row).unwrap();
    }
    Arc::new(db)
}

/// Reference with 187 rows; the target lacks ids 1..=5 and has different
/// first names for ids 10, 20, 30, 40 and 50
fn people_with_changes() -> (Arc<MemoryDatabase>, Arc<MemoryDatabase>) {
    let reference = person_table((1..=PERSON_ROWS).map(person_row));
    let target = person_table((6..=PERSON_ROWS).map(|i| {
        let mut row = person_row(i);
        if i % 10 == 0 && i <= 50 {
            row[2] = Value::Text(format!("Changed{}", i));
        }
        row
    }));
    (reference, target)
}

fn quiet_output() -> OutputConfig {
    OutputConfig {
        include_banner: false,
        ..OutputConfig::default()
    }
}

fn data_diff(
    reference: &Arc<MemoryDatabase>,
    target: &Arc<MemoryDatabase>,
    config: DataDiffConfig,
) -> (TableDataDiff, MemorySink, MemorySink) {
    let inserts = MemorySink::new();
    let updates = MemorySink::new();
    let diff = TableDataDiff::new(reference.clone(), target.clone(), config, quiet_output())
        .with_insert_sink(Box::new(inserts.clone()))
        .with_update_sink(Box::new(updates.clone()));
    (diff, inserts, updates)
}

#[tokio::test]
async fn test_data_diff_finds_inserts_and_updates() {
    let (reference, target) = people_with_changes();
    let (mut diff, inserts, updates) = data_diff(&reference, &target, DataDiffConfig::default());

    let status = diff.prepare(&person(), &person()).await.unwrap();
    assert_eq!(status, ComparisonStatus::Ok);
    diff.execute().await.unwrap();

    assert_eq!(diff.inserts(), 5);
    assert_eq!(diff.updates(), 5);
    assert_eq!(diff.rows_processed(), PERSON_ROWS as u64);
    assert!(!diff.messages().has_errors());

    let insert_text = inserts.text();
    assert!(insert_text.starts_with(
        "INSERT INTO person (id1, id2, firstname, lastname, city) VALUES (1, 2, 'First1', 'Last1', 'Berlin');\n"
    ));
    assert!(insert_text.ends_with("\nCOMMIT;\n"));

    let update_text = updates.text();
    assert!(update_text.contains("UPDATE person SET firstname = 'First10' WHERE id1 = 10 AND id2 = 20;\n"));
    assert_eq!(update_text.matches("UPDATE person").count(), 5);
    assert!(updates
        .fragments()
        .iter()
        .all(|f| f.change.kind == ChangeKind::Update));
}

#[tokio::test]
async fn test_applied_changes_leave_nothing_to_do() {
    let (reference, target) = people_with_changes();
    let (mut diff, inserts, updates) = data_diff(&reference, &target, DataDiffConfig::default());
    diff.prepare(&person(), &person()).await.unwrap();
    diff.execute().await.unwrap();

    for fragment in inserts.fragments().iter().chain(updates.fragments().iter()) {
        let affected = target
            .execute_dml(&fragment.change, &fragment.text)
            .await
            .unwrap();
        assert_eq!(affected, 1);
    }
    assert_eq!(target.row_count(&person()), PERSON_ROWS as usize);

    let (mut second, inserts, updates) = data_diff(&reference, &target, DataDiffConfig::default());
    second.prepare(&person(), &person()).await.unwrap();
    second.execute().await.unwrap();

    assert_eq!(second.inserts(), 0);
    assert_eq!(second.updates(), 0);
    // Neither header nor footer without a single fragment
    assert!(inserts.text().is_empty());
    assert!(updates.text().is_empty());
}

#[rstest]
#[case(1)]
#[case(5)]
#[case(15)]
#[case(1000)]
#[tokio::test]
async fn test_chunk_size_does_not_change_result(#[case] chunk_size: usize) {
    let (reference, target) = people_with_changes();
    let config = DataDiffConfig {
        chunk_size,
        ..DataDiffConfig::default()
    };
    let (mut diff, inserts, updates) = data_diff(&reference, &target, config);
    diff.prepare(&person(), &person()).await.unwrap();
    diff.execute().await.unwrap();

    assert_eq!(diff.inserts(), 5);
    assert_eq!(diff.updates(), 5);
    let rows: Vec<u64> = inserts.fragments().iter().map(|f| f.row_number).collect();
    assert_eq!(rows, vec![1, 2, 3, 4, 5]);
    let rows: Vec<u64> = updates.fragments().iter().map(|f| f.row_number).collect();
    assert_eq!(rows, vec![10, 20, 30, 40, 50]);
}

#[tokio::test]
async fn test_alternate_key_with_excluded_real_pk() {
    let reference = person_table([person_row(1), person_row(2), person_row(3)]);
    // Same people under different ids; one moved, one is missing
    let target = person_table([
        {
            let mut row = person_row(1);
            row[0] = Value::Int(101);
            row
        },
        {
            let mut row = person_row(2);
            row[0] = Value::Int(102);
            row[4] = Value::Text("Paris".into());
            row
        },
    ]);

    let config = DataDiffConfig {
        alternate_keys: HashMap::from([(
            "person".to_string(),
            vec!["firstname".to_string(), "lastname".to_string()],
        )]),
        exclude_real_pk: true,
        ..DataDiffConfig::default()
    };
    let (mut diff, inserts, updates) = data_diff(&reference, &target, config);
    assert_eq!(diff.prepare(&person(), &person()).await.unwrap(), ComparisonStatus::Ok);
    diff.execute().await.unwrap();

    assert_eq!(
        updates.text(),
        "UPDATE person SET city = 'Berlin' WHERE firstname = 'First2' AND lastname = 'Last2';\n\nCOMMIT;\n"
    );
    assert_eq!(
        inserts.text(),
        "INSERT INTO person (firstname, lastname, city) VALUES ('First3', 'Last3', 'Berlin');\n\nCOMMIT;\n"
    );
}

#[tokio::test]
async fn test_alternate_key_keeps_real_pk_in_inserts() {
    let reference = person_table([person_row(1)]);
    let target = person_table(std::iter::empty());

    let config = DataDiffConfig {
        alternate_keys: HashMap::from([("PERSON".to_string(), vec!["firstname".to_string()])]),
        ..DataDiffConfig::default()
    };
    let (mut diff, inserts, _) = data_diff(&reference, &target, config);
    diff.prepare(&person(), &person()).await.unwrap();
    diff.execute().await.unwrap();

    let fragments = inserts.fragments();
    assert_eq!(fragments.len(), 1);
    assert_eq!(
        fragments[0].change.column_names(),
        vec!["id1", "id2", "firstname", "lastname", "city"]
    );
}

#[tokio::test]
async fn test_ignored_columns_are_not_compared() {
    let reference = person_table([person_row(1)]);
    let mut changed = person_row(1);
    changed[4] = Value::Text("Rome".into());
    let target = person_table([changed]);

    let config = DataDiffConfig {
        ignore_columns: vec!["CITY".into()],
        ..DataDiffConfig::default()
    };
    let (mut diff, _, updates) = data_diff(&reference, &target, config);
    diff.prepare(&person(), &person()).await.unwrap();
    diff.execute().await.unwrap();

    assert_eq!(diff.updates(), 0);
    assert!(updates.is_empty());
}

#[tokio::test]
async fn test_missing_target_table() {
    let reference = person_table((1..=3).map(person_row));
    let target = Arc::new(MemoryDatabase::new(SqlDialect::Postgres));

    let (mut diff, _, _) = data_diff(&reference, &target, DataDiffConfig::default());
    let status = diff.prepare(&person(), &person()).await.unwrap();
    assert_eq!(status, ComparisonStatus::TargetTableNotFound);
    assert!(!diff.can_execute());
    assert!(diff.execute().await.is_err());

    let config = DataDiffConfig {
        ignore_missing_target: true,
        ..DataDiffConfig::default()
    };
    let (mut diff, inserts, _) = data_diff(&reference, &target, config);
    let status = diff.prepare(&person(), &person()).await.unwrap();
    assert!(status.can_execute());
    assert!(diff.messages().has_warnings());
    diff.execute().await.unwrap();
    assert_eq!(diff.inserts(), 3);
    assert_eq!(inserts.fragment_count(), 3);
}

#[tokio::test]
async fn test_missing_reference_table_and_missing_key() {
    let reference = Arc::new(MemoryDatabase::new(SqlDialect::Postgres));
    let target = person_table(std::iter::empty());
    let (mut diff, _, _) = data_diff(&reference, &target, DataDiffConfig::default());
    assert_eq!(
        diff.prepare(&person(), &person()).await.unwrap(),
        ComparisonStatus::ReferenceTableNotFound
    );

    let keyless = TableIdentifier::new("audit");
    reference.create_table(keyless.clone(), vec![ColumnDescriptor::new("entry", "text")]);
    target.create_table(keyless.clone(), vec![ColumnDescriptor::new("entry", "text")]);
    assert_eq!(
        diff.prepare(&keyless, &keyless).await.unwrap(),
        ComparisonStatus::NoPrimaryKey
    );
    assert_eq!(diff.messages().errors().len(), 1);
}

#[tokio::test]
async fn test_target_missing_a_column() {
    let reference = person_table([person_row(1), person_row(2)]);
    let target = Arc::new(MemoryDatabase::new(SqlDialect::Postgres));
    target.create_table(person(), person_columns()[..4].to_vec());
    target
        .insert_row(&person(), person_row(1)[..4].to_vec())
        .unwrap();

    let (mut diff, inserts, _) = data_diff(&reference, &target, DataDiffConfig::default());
    let status = diff.prepare(&person(), &person()).await.unwrap();
    assert_eq!(status, ComparisonStatus::ColumnMismatch);
    diff.execute().await.unwrap();

    assert_eq!(diff.updates(), 0);
    assert_eq!(
        inserts.fragments()[0].change.column_names(),
        vec!["id1", "id2", "firstname", "lastname"]
    );
}

#[tokio::test]
async fn test_null_values_in_reference() {
    let mut row = person_row(1);
    row[4] = Value::Null;
    let reference = person_table([row]);
    let target = person_table([person_row(1)]);

    let (mut diff, _, updates) = data_diff(&reference, &target, DataDiffConfig::default());
    diff.prepare(&person(), &person()).await.unwrap();
    diff.execute().await.unwrap();

    assert_eq!(
        updates.text(),
        "UPDATE person SET city = NULL WHERE id1 = 1 AND id2 = 2;\n\nCOMMIT;\n"
    );
}

#[tokio::test]
async fn test_xml_output() {
    let reference = person_table([person_row(1)]);
    let target = person_table(std::iter::empty());
    let output = OutputConfig {
        format: OutputDialect::Xml,
        ..OutputConfig::default()
    };
    let inserts = MemorySink::new();
    let mut diff = TableDataDiff::new(reference, target, DataDiffConfig::default(), output)
        .with_insert_sink(Box::new(inserts.clone()));
    diff.prepare(&person(), &person()).await.unwrap();
    diff.execute().await.unwrap();

    let xml = inserts.text();
    assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<table-data-diff name=\"person\">\n"));
    assert!(xml.contains("<insert row=\"1\">"));
    assert!(xml.contains("<col name=\"id1\" type=\"integer\" pk=\"true\">1</col>"));
    assert!(xml.contains("<col name=\"firstname\" type=\"varchar\">First1</col>"));
    assert!(xml.ends_with("</table-data-diff>\n"));
}

#[tokio::test]
async fn test_savepoint_per_chunk() {
    let reference = person_table((1..=10).map(person_row));
    let target = Arc::new(MemoryDatabase::new(SqlDialect::Postgres).with_savepoints());
    target.create_table(person(), person_columns());

    let config = DataDiffConfig {
        chunk_size: 4,
        ..DataDiffConfig::default()
    };
    let (mut diff, _, _) = data_diff(&reference, &target, config);
    diff.prepare(&person(), &person()).await.unwrap();
    diff.execute().await.unwrap();

    let log = target.savepoint_log();
    assert_eq!(log.len(), 6);
    assert_eq!(log[0], "set table_sync_chunk");
    assert_eq!(log[1], "release table_sync_chunk");
}

#[tokio::test]
async fn test_target_query_error_is_reported() {
    let reference = person_table((1..=20).map(person_row));
    let target = Arc::new(MemoryDatabase::new(SqlDialect::Postgres).with_savepoints());
    target.create_table(person(), person_columns());
    target.fail_queries_on(Some("person"));

    let (mut diff, _, _) = data_diff(&reference, &target, DataDiffConfig::default());
    diff.prepare(&person(), &person()).await.unwrap();
    let err = diff.execute().await.unwrap_err();

    assert!(err.is_database_error());
    assert!(err.to_string().contains("SELECT"));
    assert!(diff.messages().errors()[0].starts_with("Error retrieving target rows using: SELECT"));
    assert!(target
        .savepoint_log()
        .contains(&"rollback table_sync_chunk".to_string()));
}

/// Cancels the run once a given row has been read
struct CancelAt {
    row: u64,
    token: CancelToken,
}

impl ProgressMonitor for CancelAt {
    fn report_progress(&self, _table: &str, row: u64) {
        if row >= self.row {
            self.token.cancel();
        }
    }
}

#[tokio::test]
async fn test_cancellation_drops_current_chunk() {
    let reference = person_table((1..=60).map(person_row));
    let target = person_table(std::iter::empty());
    let token = CancelToken::new();

    let config = DataDiffConfig {
        chunk_size: 15,
        progress_interval: 1,
        ..DataDiffConfig::default()
    };
    let (diff, inserts, _) = data_diff(&reference, &target, config);
    let mut diff = diff
        .with_cancel_token(token.clone())
        .with_progress_monitor(Arc::new(CancelAt {
            row: 20,
            token: token.clone(),
        }));
    diff.prepare(&person(), &person()).await.unwrap();
    diff.execute().await.unwrap();

    assert!(token.is_cancelled());
    assert_eq!(diff.inserts(), 15);
    assert_eq!(inserts.fragment_count(), 15);
    assert!(inserts.text().ends_with("\nCOMMIT;\n"));
}

#[tokio::test]
async fn test_prepare_resets_previous_run() {
    let (reference, target) = people_with_changes();
    let (mut diff, inserts, _) = data_diff(&reference, &target, DataDiffConfig::default());
    diff.prepare(&person(), &person()).await.unwrap();
    diff.execute().await.unwrap();
    assert_eq!(diff.inserts(), 5);

    diff.prepare(&person(), &person()).await.unwrap();
    assert_eq!(diff.inserts(), 0);
    assert_eq!(diff.rows_processed(), 0);
    diff.execute().await.unwrap();
    assert_eq!(diff.inserts(), 5);
    // The second run starts a new script in the same sink
    assert_eq!(inserts.text().matches("COMMIT;").count(), 2);
}

#[tokio::test]
async fn test_execute_twice_needs_prepare() {
    let (reference, target) = people_with_changes();
    let (mut diff, inserts, _) = data_diff(&reference, &target, DataDiffConfig::default());
    diff.prepare(&person(), &person()).await.unwrap();
    diff.execute().await.unwrap();
    let script = inserts.text();

    assert!(!diff.can_execute());
    assert!(diff.execute().await.is_err());
    // Nothing lands after the footer of the finished script
    assert_eq!(inserts.text(), script);
    assert!(script.ends_with("\nCOMMIT;\n"));
}

fn delete_scenario() -> (Arc<MemoryDatabase>, Arc<MemoryDatabase>) {
    let reference = person_table((1..=PERSON_ROWS).map(person_row));
    let target = person_table((1..=PERSON_ROWS).chain(10000..=10052).map(person_row));
    (reference, target)
}

#[rstest]
#[case(1)]
#[case(15)]
#[case(1000)]
#[tokio::test]
async fn test_delete_sync_scripts_orphans(#[case] chunk_size: usize) {
    let (reference, target) = delete_scenario();
    let sink = MemorySink::new();
    let config = DeleteSyncConfig {
        chunk_size,
        ..DeleteSyncConfig::default()
    };
    let mut sync = TableDeleteSync::new(reference, target.clone(), config, quiet_output())
        .with_output_sink(Box::new(sink.clone()));

    assert_eq!(sync.prepare(&person(), &person()).await.unwrap(), ComparisonStatus::Ok);
    sync.execute().await.unwrap();

    assert_eq!(sync.deleted_rows(), 53);
    assert_eq!(sync.rows_processed(), (PERSON_ROWS + 53) as u64);
    assert!(sink
        .text()
        .starts_with("DELETE FROM person WHERE id1 = 10000 AND id2 = 20000;\n"));
    // Nothing runs against the target unless asked to
    assert_eq!(target.row_count(&person()), (PERSON_ROWS + 53) as usize);
}

#[tokio::test]
async fn test_delete_sync_executes_deletes() {
    let (reference, target) = delete_scenario();
    let config = DeleteSyncConfig {
        execute_deletes: true,
        ..DeleteSyncConfig::default()
    };
    let mut sync = TableDeleteSync::new(reference, target.clone(), config, quiet_output());
    sync.prepare(&person(), &person()).await.unwrap();
    sync.execute().await.unwrap();

    assert_eq!(sync.deleted_rows(), 53);
    assert_eq!(target.row_count(&person()), PERSON_ROWS as usize);
    assert_eq!(target.executed_statements().len(), 53);
}

#[tokio::test]
async fn test_cancelled_delete_sync_keeps_completed_chunks() {
    let reference = person_table((1..=30).map(person_row));
    let target = person_table((1000..1030).chain(1..=30).map(person_row));
    let token = CancelToken::new();
    let config = DeleteSyncConfig {
        chunk_size: 10,
        execute_deletes: true,
        ..DeleteSyncConfig::default()
    };
    let mut sync = TableDeleteSync::new(reference, target.clone(), config, quiet_output())
        .with_cancel_token(token.clone())
        .with_progress_monitor(
            Arc::new(CancelAt {
                row: 45,
                token: token.clone(),
            }),
            1,
        );
    sync.prepare(&person(), &person()).await.unwrap();
    sync.execute().await.unwrap();

    assert!(token.is_cancelled());
    assert_eq!(sync.deleted_rows(), 30);
    assert_eq!(target.row_count(&person()), 30);
    assert_eq!(target.executed_statements().len(), 30);
}

#[tokio::test]
async fn test_delete_sync_with_alternate_key() {
    let reference = person_table([person_row(1), person_row(2)]);
    let target = person_table([
        {
            let mut row = person_row(1);
            row[0] = Value::Int(500);
            row
        },
        person_row(7),
    ]);
    let sink = MemorySink::new();
    let config = DeleteSyncConfig {
        alternate_keys: HashMap::from([("person".to_string(), vec!["lastname".to_string()])]),
        ..DeleteSyncConfig::default()
    };
    let mut sync = TableDeleteSync::new(reference, target, config, quiet_output())
        .with_output_sink(Box::new(sink.clone()));
    sync.prepare(&person(), &person()).await.unwrap();
    sync.execute().await.unwrap();

    assert_eq!(sink.text(), "DELETE FROM person WHERE lastname = 'Last7';\n\nCOMMIT;\n");
}

#[tokio::test]
async fn test_delete_sync_missing_tables() {
    let reference = person_table(std::iter::empty());
    let target = Arc::new(MemoryDatabase::new(SqlDialect::Postgres));
    let mut sync = TableDeleteSync::new(
        reference.clone(),
        target.clone(),
        DeleteSyncConfig::default(),
        quiet_output(),
    );
    assert_eq!(
        sync.prepare(&person(), &person()).await.unwrap(),
        ComparisonStatus::TargetTableNotFound
    );

    let mut sync = TableDeleteSync::new(target, reference, DeleteSyncConfig::default(), quiet_output());
    assert_eq!(
        sync.prepare(&person(), &person()).await.unwrap(),
        ComparisonStatus::ReferenceTableNotFound
    );
    assert!(sync.execute().await.is_err());
}
