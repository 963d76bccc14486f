//! Concurrent-modification scenarios: two handles over one database.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;

use gridsync::{
    ConflictStrategy, Engine, Fault, PkSpec, PkValue, SyncConfig, SyncTable, Value,
};

use common::{init_tracing, memory_engine, row, users_frame};

/// Seed the users table and hand back two independent handles to it.
async fn two_handles(
    strategy_a: ConflictStrategy,
) -> (SyncTable, SyncTable, Arc<dyn Engine>) {
    let engine = memory_engine();
    let mut seed = SyncTable::new("users", users_frame(), PkSpec::single("id"), engine.clone());
    seed.push().await.unwrap();

    let config_a = SyncConfig { conflict_strategy: strategy_a, ..SyncConfig::default() };
    let a = SyncTable::load("users", engine.clone(), None, config_a).await.unwrap();
    let b = SyncTable::load("users", engine.clone(), None, SyncConfig::default())
        .await
        .unwrap();
    (a, b, engine)
}

#[tokio::test]
async fn last_writer_wins_keeps_the_second_push() {
    init_tracing();
    let (mut a, mut b, engine) = two_handles(ConflictStrategy::LastWriterWins).await;

    b.update_row(PkValue::scalar(1), row(&[("name", "Beatrice".into())])).unwrap();
    b.push().await.unwrap();

    a.update_row(PkValue::scalar(1), row(&[("name", "Alicia".into())])).unwrap();
    a.push().await.unwrap();

    let remote = engine.read_table("users", None).await.unwrap();
    assert_eq!(remote.cell_by_name(0, "name"), Some(&Value::Text("Alicia".into())));
}

#[tokio::test]
async fn abort_raises_and_leaves_the_database_untouched() {
    init_tracing();
    let (mut a, mut b, engine) = two_handles(ConflictStrategy::Abort).await;

    b.update_row(PkValue::scalar(1), row(&[("name", "Beatrice".into())])).unwrap();
    b.push().await.unwrap();

    a.update_row(PkValue::scalar(1), row(&[("name", "Alicia".into())])).unwrap();
    let err = a.push().await.unwrap_err();

    match &err {
        Fault::Conflict { pk, conflicting_columns, local, remote, .. } => {
            assert_eq!(pk, "1");
            assert_eq!(conflicting_columns, &vec!["name".to_owned()]);
            assert_eq!(local["name"], "Alicia");
            assert_eq!(remote["name"], "Beatrice");
        }
        other => panic!("expected conflict fault, got {other}"),
    }

    // Nothing was written, and the local edit is still pending for retry.
    let remote = engine.read_table("users", None).await.unwrap();
    assert_eq!(remote.cell_by_name(0, "name"), Some(&Value::Text("Beatrice".into())));
    assert!(a.has_changes());
}

#[tokio::test]
async fn first_writer_wins_drops_the_local_update() {
    init_tracing();
    let (mut a, mut b, engine) = two_handles(ConflictStrategy::FirstWriterWins).await;

    b.update_row(PkValue::scalar(1), row(&[("name", "Beatrice".into())])).unwrap();
    b.push().await.unwrap();

    a.update_row(PkValue::scalar(1), row(&[("name", "Alicia".into())])).unwrap();
    a.push().await.unwrap();

    let remote = engine.read_table("users", None).await.unwrap();
    assert_eq!(remote.cell_by_name(0, "name"), Some(&Value::Text("Beatrice".into())));
    // The push rebaselined; the local handle now agrees with remote.
    assert_eq!(a.get_row(&PkValue::scalar(1)).unwrap()["name"], Value::Text("Beatrice".into()));
}

#[tokio::test]
async fn merge_takes_remote_only_columns() {
    init_tracing();
    let (mut a, mut b, engine) = two_handles(ConflictStrategy::Merge).await;

    // Remote changes both name and age; local changes only name.
    b.update_row(
        PkValue::scalar(1),
        row(&[("name", "Beatrice".into()), ("age", Value::Int(26))]),
    )
    .unwrap();
    b.push().await.unwrap();

    a.update_row(PkValue::scalar(1), row(&[("name", "Alicia".into())])).unwrap();
    a.push().await.unwrap();

    let remote = engine.read_table("users", None).await.unwrap();
    // Local wins the conflicting column, remote keeps its own change.
    assert_eq!(remote.cell_by_name(0, "name"), Some(&Value::Text("Alicia".into())));
    assert_eq!(remote.cell_by_name(0, "age"), Some(&Value::Int(26)));
}

#[tokio::test]
async fn custom_resolver_decides() {
    init_tracing();
    let strategy = ConflictStrategy::Custom(Arc::new(|_, local, remote| {
        // Keep whichever name is lexicographically first.
        let mut out = local.clone();
        if let (Some(l), Some(r)) = (local.get("name"), remote.get("name")) {
            if r.to_string() < l.to_string() {
                out.insert("name".to_owned(), r.clone());
            }
        }
        out
    }));
    let (mut a, mut b, engine) = two_handles(strategy).await;

    b.update_row(PkValue::scalar(1), row(&[("name", "Beatrice".into())])).unwrap();
    b.push().await.unwrap();

    a.update_row(PkValue::scalar(1), row(&[("name", "Zelda".into())])).unwrap();
    a.push().await.unwrap();

    let remote = engine.read_table("users", None).await.unwrap();
    assert_eq!(remote.cell_by_name(0, "name"), Some(&Value::Text("Beatrice".into())));
}

#[tokio::test]
async fn no_conflict_when_remote_matches_baseline() {
    init_tracing();
    let (mut a, _b, engine) = two_handles(ConflictStrategy::Abort).await;

    // Nobody else wrote; even under Abort the push sails through.
    a.update_row(PkValue::scalar(1), row(&[("name", "Alicia".into())])).unwrap();
    a.push().await.unwrap();

    let remote = engine.read_table("users", None).await.unwrap();
    assert_eq!(remote.cell_by_name(0, "name"), Some(&Value::Text("Alicia".into())));
}

#[tokio::test]
async fn remote_delete_is_not_a_conflict() {
    init_tracing();
    let (mut a, mut b, _engine) = two_handles(ConflictStrategy::Abort).await;

    b.delete_row(PkValue::scalar(1)).unwrap();
    b.push().await.unwrap();

    // The locally updated row vanished remotely: the conflict resolver
    // skips it and the plan's update simply affects zero rows.
    a.update_row(PkValue::scalar(1), row(&[("name", "Alicia".into())])).unwrap();
    a.push().await.unwrap();
    assert!(!a.row_exists(&PkValue::scalar(1)));
}
