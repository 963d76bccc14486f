//! Schema evolution: column add/drop/rename/retype flowing through a push.

mod common;

use pretty_assertions::assert_eq;

use gridsync::{DataType, Fault, PkSpec, PkValue, StepKind, SyncTable, Value};

use common::{init_tracing, memory_engine, row, users_frame};

async fn pushed_users() -> (SyncTable, std::sync::Arc<dyn gridsync::Engine>) {
    let engine = memory_engine();
    let mut users = SyncTable::new("users", users_frame(), PkSpec::single("id"), engine.clone());
    users.push().await.unwrap();
    (users, engine)
}

#[tokio::test]
async fn added_column_backfills_existing_rows() {
    init_tracing();
    let (mut users, engine) = pushed_users().await;

    users
        .add_column_with_default("email", Value::Text("unknown".into()), None)
        .unwrap();
    users.push().await.unwrap();

    let remote = engine.read_table("users", None).await.unwrap();
    assert!(remote.schema().contains("email"));
    for i in 0..remote.num_rows() {
        assert_eq!(remote.cell_by_name(i, "email"), Some(&Value::Text("unknown".into())));
    }
}

#[tokio::test]
async fn rename_keeps_data_and_tracks_key_renames() {
    init_tracing();
    let (mut users, engine) = pushed_users().await;

    users.rename_column_safe("age", "years").unwrap();
    users.push().await.unwrap();

    let remote = engine.read_table("users", None).await.unwrap();
    assert!(remote.schema().contains("years"));
    assert!(!remote.schema().contains("age"));
    assert_eq!(remote.cell_by_name(1, "years"), Some(&Value::Int(30)));

    // Renaming the key column updates the key spec and later pushes still
    // bind by it.
    users.rename_column_safe("id", "user_id").unwrap();
    assert_eq!(users.primary_key().columns(), &["user_id".to_owned()]);
    users.update_row(PkValue::scalar(2), row(&[("years", Value::Int(31))])).unwrap();
    users.push().await.unwrap();

    let remote = engine.read_table("users", None).await.unwrap();
    assert!(remote.schema().contains("user_id"));
    assert_eq!(remote.cell_by_name(1, "years"), Some(&Value::Int(31)));
}

#[tokio::test]
async fn dropped_column_disappears_remotely() {
    init_tracing();
    let (mut users, engine) = pushed_users().await;

    users.drop_column_safe("age").unwrap();
    users.push().await.unwrap();

    let remote = engine.read_table("users", None).await.unwrap();
    assert!(!remote.schema().contains("age"));
    assert_eq!(remote.num_rows(), 3);
}

#[tokio::test]
async fn add_then_drop_in_one_session_is_a_no_op() {
    init_tracing();
    let (mut users, _engine) = pushed_users().await;

    users.add_column_with_default("tmp", Value::Int(0), None).unwrap();
    users.drop_column_safe("tmp").unwrap();

    let plan = users.plan().unwrap();
    assert!(plan.is_empty(), "{plan}");
}

#[tokio::test]
async fn type_change_casts_in_memory_and_plans_an_alter_step() {
    init_tracing();
    let (mut users, _engine) = pushed_users().await;

    users.change_column_type("age", DataType::Float).unwrap();
    assert_eq!(
        users.frame().cell_by_name(0, "age"),
        Some(&Value::Float(25.0))
    );

    let plan = users.plan().unwrap();
    let kinds: Vec<StepKind> = plan.steps().iter().map(|s| s.kind).collect();
    assert!(kinds.contains(&StepKind::SchemaChange));

    // SQLite has no column retype DDL; the push still succeeds (the step is
    // a dialect no-op) and the data updates land.
    users.push().await.unwrap();
}

#[tokio::test]
async fn duplicate_add_faults() {
    init_tracing();
    let (mut users, _engine) = pushed_users().await;
    let err = users
        .add_column_with_default("name", Value::Text("x".into()), None)
        .unwrap_err();
    assert!(matches!(err, Fault::Schema { .. }));
}

#[tokio::test]
async fn schema_and_data_changes_combine_in_one_push() {
    init_tracing();
    let (mut users, engine) = pushed_users().await;

    users.add_column_with_default("active", Value::Bool(true), None).unwrap();
    users.update_row(PkValue::scalar(1), row(&[("age", Value::Int(26))])).unwrap();
    users
        .add_row(row(&[
            ("id", Value::Int(4)),
            ("name", "Dina".into()),
            ("age", Value::Int(22)),
            ("active", Value::Bool(false)),
        ]))
        .unwrap();
    users.push().await.unwrap();

    let remote = engine.read_table("users", None).await.unwrap();
    assert_eq!(remote.num_rows(), 4);
    assert_eq!(remote.cell_by_name(0, "age"), Some(&Value::Int(26)));
    assert_eq!(remote.cell_by_name(0, "active"), Some(&Value::Bool(true)));
    assert_eq!(remote.cell_by_name(3, "active"), Some(&Value::Bool(false)));
}
