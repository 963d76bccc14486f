//! Per-table and per-database configuration.

use std::time::Duration;

use gridsync_tracker::{ConflictStrategy, TrackingMode};

use crate::retry::RetryPolicy;

/// Recognized synchronization options. A [`Database`](crate::Database) holds
/// one config and hands a copy to every table it creates; tables accept their
/// own via [`SyncTable::with_config`](crate::SyncTable::with_config).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How much baseline state the tracker retains.
    pub tracking_mode: TrackingMode,
    /// How concurrent remote modifications are resolved on push.
    pub conflict_strategy: ConflictStrategy,
    /// Wall-clock budget for the data-step transaction of one push,
    /// including retries. `None` means unbounded.
    pub query_timeout: Option<Duration>,
    /// Budget for the pre-flight health probe.
    pub connection_timeout: Duration,
    /// Issued as the first statement of the data transaction when the
    /// dialect supports it (e.g. `"SERIALIZABLE"`, `"READ COMMITTED"`).
    pub isolation_level: Option<String>,
    /// Backoff schedule for transient failures.
    pub retry_policy: RetryPolicy,
    /// Bound on concurrently pushing tables in a parallel multi-table push.
    pub max_concurrent_pushes: usize,
    /// Defer each table's first pull until it is accessed.
    pub lazy: bool,
    /// Probe the connection before executing a plan.
    pub check_health: bool,
    /// Assign `max + 1` key values to rows added without one. Single-column
    /// integer keys only.
    pub auto_increment: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            tracking_mode: TrackingMode::default(),
            conflict_strategy: ConflictStrategy::default(),
            query_timeout: None,
            connection_timeout: Duration::from_secs(5),
            isolation_level: None,
            retry_policy: RetryPolicy::default(),
            max_concurrent_pushes: 4,
            lazy: false,
            check_health: true,
            auto_increment: false,
        }
    }
}
