use std::sync::Arc;

use anyhow::anyhow;
use tracing::error;

use encore_db::Database;

use crate::error::SocialError;

/// Run synchronous work (SQLite, argon2) on the blocking pool.
pub async fn run_blocking<F, T>(f: F) -> Result<T, SocialError>
where
    F: FnOnce() -> Result<T, SocialError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            SocialError::Persistence(anyhow!("blocking task failed: {}", e))
        })?
}

/// Run one store call against a shared handle on the blocking pool.
pub async fn with_db<F, T>(db: &Arc<Database>, f: F) -> Result<T, SocialError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    run_blocking(move || f(&db).map_err(SocialError::from)).await
}
