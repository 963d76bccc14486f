//! Pre-flight connection health checks.

use std::time::Duration;

use tracing::warn;

use crate::engine::{Engine, PoolStatus};

/// Probe the engine with a trivial query under a timeout. Read-only and
/// side-effect-free; returns `false` on any failure rather than erroring.
pub async fn check_connection_health(engine: &dyn Engine, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, engine.query("SELECT 1", &[])).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            warn!(url = engine.url(), error = %e, "connection health check failed");
            false
        }
        Err(_) => {
            warn!(
                url = engine.url(),
                timeout_ms = timeout.as_millis() as u64,
                "connection health check timed out"
            );
            false
        }
    }
}

/// The engine's pool snapshot; unavailable fields stay unset.
pub fn connection_pool_status(engine: &dyn Engine) -> PoolStatus {
    engine.pool_status()
}

#[cfg(test)]
mod tests {
    use crate::engine::sqlite::SqliteEngine;

    use super::*;

    #[tokio::test]
    async fn healthy_engine_probes_true() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        assert!(check_connection_health(&engine, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn pool_status_reports_url() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let status = connection_pool_status(&engine);
        assert_eq!(status.url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(status.pool_size, Some(1));
    }
}
