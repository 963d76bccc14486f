//! Basic create/read/update/delete flows against SQLite.

mod common;

use pretty_assertions::assert_eq;

use gridsync::{Fault, PkSpec, PkValue, SyncConfig, SyncTable, TrackingMode, Value};

use common::{init_tracing, memory_engine, row, users_frame};

#[tokio::test]
async fn basic_crud_round_trip() {
    init_tracing();
    let engine = memory_engine();
    let mut users = SyncTable::new("users", users_frame(), PkSpec::single("id"), engine.clone());

    // First push creates the table and rebaselines.
    users.push().await.unwrap();
    assert!(!users.has_changes());

    users.add_row(row(&[("id", Value::Int(4)), ("name", "David".into()), ("age", Value::Int(40))]))
        .unwrap();
    users.update_row(PkValue::scalar(2), row(&[("age", Value::Int(31))])).unwrap();
    users.delete_row(PkValue::scalar(3)).unwrap();
    assert!(users.has_changes());

    users.push().await.unwrap();
    assert!(!users.has_changes());

    let expected = vec![
        vec![Value::Int(1), "Alice".into(), Value::Int(25)],
        vec![Value::Int(2), "Bob".into(), Value::Int(31)],
        vec![Value::Int(4), "David".into(), Value::Int(40)],
    ];
    assert_eq!(users.frame().rows(), &expected[..]);

    // The in-memory value equals the remote table.
    let remote = engine.read_table("users", None).await.unwrap();
    assert_eq!(remote.rows(), &expected[..]);
}

#[tokio::test]
async fn full_tracking_mode_pushes_the_same_result() {
    init_tracing();
    let engine = memory_engine();
    let config = SyncConfig { tracking_mode: TrackingMode::Full, ..SyncConfig::default() };
    let mut users = SyncTable::with_config(
        "users",
        users_frame(),
        PkSpec::single("id"),
        engine.clone(),
        None,
        config,
    );
    users.push().await.unwrap();

    users.update_row(PkValue::scalar(1), row(&[("name", "Alicia".into())])).unwrap();
    users.delete_row(PkValue::scalar(2)).unwrap();
    users.push().await.unwrap();

    let remote = engine.read_table("users", None).await.unwrap();
    assert_eq!(remote.num_rows(), 2);
    assert_eq!(remote.cell_by_name(0, "name"), Some(&Value::Text("Alicia".into())));
}

#[tokio::test]
async fn upsert_updates_or_inserts_by_key() {
    init_tracing();
    let mut users =
        SyncTable::new("users", users_frame(), PkSpec::single("id"), memory_engine());
    users.push().await.unwrap();

    users.upsert_row(row(&[("id", Value::Int(2)), ("age", Value::Int(44))])).unwrap();
    users
        .upsert_row(row(&[("id", Value::Int(9)), ("name", "Nina".into()), ("age", Value::Int(20))]))
        .unwrap();
    users.push().await.unwrap();

    assert_eq!(users.get_row(&PkValue::scalar(2)).unwrap()["age"], Value::Int(44));
    assert_eq!(users.get_row(&PkValue::scalar(9)).unwrap()["name"], Value::Text("Nina".into()));
}

#[tokio::test]
async fn bulk_insert_rejects_duplicates_atomically() {
    init_tracing();
    let mut users =
        SyncTable::new("users", users_frame(), PkSpec::single("id"), memory_engine());

    // One duplicate against existing keys poisons the whole batch.
    let err = users
        .bulk_insert(vec![
            row(&[("id", Value::Int(10)), ("name", "New".into()), ("age", Value::Int(1))]),
            row(&[("id", Value::Int(2)), ("name", "Dup".into()), ("age", Value::Int(2))]),
        ])
        .unwrap_err();
    assert!(matches!(err, Fault::Validation { .. }));
    assert_eq!(users.frame().num_rows(), 3, "failed bulk insert must not add rows");

    // Duplicates inside the batch are caught too.
    let err = users
        .bulk_insert(vec![
            row(&[("id", Value::Int(10)), ("name", "A".into()), ("age", Value::Int(1))]),
            row(&[("id", Value::Int(10)), ("name", "B".into()), ("age", Value::Int(2))]),
        ])
        .unwrap_err();
    assert!(matches!(err, Fault::Validation { .. }));

    users
        .bulk_insert(vec![
            row(&[("id", Value::Int(10)), ("name", "Ten".into()), ("age", Value::Int(1))]),
            row(&[("id", Value::Int(11)), ("name", "Eleven".into()), ("age", Value::Int(2))]),
        ])
        .unwrap();
    assert_eq!(users.frame().num_rows(), 5);
}

#[tokio::test]
async fn update_of_missing_row_faults() {
    init_tracing();
    let mut users =
        SyncTable::new("users", users_frame(), PkSpec::single("id"), memory_engine());
    let err = users
        .update_row(PkValue::scalar(99), row(&[("age", Value::Int(1))]))
        .unwrap_err();
    assert!(matches!(err, Fault::Validation { .. }));
}

#[tokio::test]
async fn pull_discards_local_changes() {
    init_tracing();
    let engine = memory_engine();
    let mut users = SyncTable::new("users", users_frame(), PkSpec::single("id"), engine);
    users.push().await.unwrap();

    users.update_row(PkValue::scalar(1), row(&[("age", Value::Int(99))])).unwrap();
    assert!(users.has_changes());

    users.pull().await.unwrap();
    assert!(!users.has_changes());
    assert_eq!(users.get_row(&PkValue::scalar(1)).unwrap()["age"], Value::Int(25));
}

#[tokio::test]
async fn pushed_data_survives_reopening_the_database_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");

    {
        let engine: std::sync::Arc<dyn gridsync::Engine> =
            std::sync::Arc::new(gridsync::SqliteEngine::open(&path).unwrap());
        let mut users = SyncTable::new("users", users_frame(), PkSpec::single("id"), engine);
        users.push().await.unwrap();
        users.update_row(PkValue::scalar(2), row(&[("age", Value::Int(31))])).unwrap();
        users.push().await.unwrap();
    }

    let engine: std::sync::Arc<dyn gridsync::Engine> =
        std::sync::Arc::new(gridsync::SqliteEngine::open(&path).unwrap());
    let users = SyncTable::load("users", engine, None, SyncConfig::default()).await.unwrap();
    assert_eq!(users.frame().num_rows(), 3);
    assert_eq!(users.get_row(&PkValue::scalar(2)).unwrap()["age"], Value::Int(31));
}

#[tokio::test]
async fn validate_reports_problems_before_push() {
    init_tracing();
    let mut users =
        SyncTable::new("users", users_frame(), PkSpec::single("id"), memory_engine());
    assert!(users.validate().is_empty());

    users.drop_column_safe("id").unwrap();
    let errors = users.validate();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("primary key"), "{errors:?}");

    let err = users.push().await.unwrap_err();
    assert!(matches!(err, Fault::Schema { .. }));
}
