//! Bulk conditional updates and deletes.

mod common;

use pretty_assertions::assert_eq;

use gridsync::{
    Column, Database, DataType, Frame, PkSpec, Schema, SyncConfig, Value,
};

use common::{init_tracing, memory_engine, row};

fn employees_frame() -> Frame {
    let rows = [
        (1, "Alice", "Engineering", 80_000),
        (2, "Bob", "Sales", 60_000),
        (3, "Charlie", "Engineering", 75_000),
        (4, "Diana", "Marketing", 70_000),
        (5, "Eve", "Sales", 62_000),
        (6, "Frank", "Engineering", 85_000),
    ];
    Frame::from_rows(
        Schema::new(vec![
            Column::new("id", DataType::Int),
            Column::new("name", DataType::Text),
            Column::new("department", DataType::Text),
            Column::new("salary", DataType::Int),
        ]),
        rows.iter()
            .map(|(id, name, dept, salary)| {
                vec![Value::Int(*id), (*name).into(), (*dept).into(), Value::Int(*salary)]
            })
            .collect(),
    )
    .unwrap()
}

#[tokio::test]
async fn conditional_update_renames_a_department() {
    init_tracing();
    let engine = memory_engine();
    let mut db = Database::connect(engine.clone(), None, SyncConfig::default()).await.unwrap();
    let employees = db
        .create_table("employees", employees_frame(), PkSpec::single("id"))
        .unwrap();

    let changed = employees
        .update_rows_where(
            |r| r["department"] == Value::Text("Sales".into()),
            row(&[("department", "Business Development".into())]),
        )
        .unwrap();
    assert_eq!(changed, 2);

    db.push(false).await.unwrap();

    let remote = engine.read_table("employees", None).await.unwrap();
    let moved = remote
        .rows()
        .iter()
        .filter(|r| r[2] == Value::Text("Business Development".into()))
        .count();
    assert_eq!(moved, 2);
}

#[tokio::test]
async fn conditional_delete_removes_matching_rows_only() {
    init_tracing();
    let engine = memory_engine();
    let mut db = Database::connect(engine.clone(), None, SyncConfig::default()).await.unwrap();
    let employees = db
        .create_table("employees", employees_frame(), PkSpec::single("id"))
        .unwrap();

    let removed = employees
        .delete_rows_where(|r| matches!(r["salary"], Value::Int(s) if s < 65_000))
        .unwrap();
    assert_eq!(removed, 2);

    db.push(false).await.unwrap();

    let remote = engine.read_table("employees", None).await.unwrap();
    assert_eq!(remote.num_rows(), 4);
    assert!(remote
        .rows()
        .iter()
        .all(|r| matches!(r[3], Value::Int(s) if s >= 65_000)));
}

#[tokio::test]
async fn conditional_update_rejects_key_columns() {
    init_tracing();
    let engine = memory_engine();
    let mut db = Database::connect(engine, None, SyncConfig::default()).await.unwrap();
    let employees = db
        .create_table("employees", employees_frame(), PkSpec::single("id"))
        .unwrap();

    let err = employees
        .update_rows_where(|_| true, row(&[("id", Value::Int(0))]))
        .unwrap_err();
    assert!(matches!(err, gridsync::Fault::Validation { .. }));
}

#[tokio::test]
async fn no_matches_is_a_clean_no_op() {
    init_tracing();
    let engine = memory_engine();
    let mut db = Database::connect(engine, None, SyncConfig::default()).await.unwrap();
    let employees = db
        .create_table("employees", employees_frame(), PkSpec::single("id"))
        .unwrap();

    let changed = employees
        .update_rows_where(
            |r| r["department"] == Value::Text("Legal".into()),
            row(&[("salary", Value::Int(0))]),
        )
        .unwrap();
    assert_eq!(changed, 0);
    let removed = employees.delete_rows_where(|_| false).unwrap();
    assert_eq!(removed, 0);
}
