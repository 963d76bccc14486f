#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use gridsync::{Column, DataType, Engine, Frame, Schema, SqliteEngine, Value};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn memory_engine() -> Arc<dyn Engine> {
    Arc::new(SqliteEngine::open_in_memory().expect("in-memory sqlite"))
}

pub fn row(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

pub fn users_frame() -> Frame {
    Frame::from_rows(
        Schema::new(vec![
            Column::new("id", DataType::Int),
            Column::new("name", DataType::Text),
            Column::new("age", DataType::Int),
        ]),
        vec![
            vec![Value::Int(1), "Alice".into(), Value::Int(25)],
            vec![Value::Int(2), "Bob".into(), Value::Int(30)],
            vec![Value::Int(3), "Charlie".into(), Value::Int(35)],
        ],
    )
    .expect("users frame")
}
