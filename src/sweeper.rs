//! The lock/timeout sweeper (§4.5): a periodic background task that heals
//! two kinds of crash-left state — physical rows stuck mid-lock past their
//! timeout, and logical rows whose physical children all finished without
//! the logical row itself ever being promoted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::SweeperConfig;
use crate::core::Core;
use crate::error::ApiResult;
use crate::model::Status;

/// Runs until `shutdown` fires, sweeping every `config.period_minutes`.
pub async fn run(core: Arc<Core>, config: SweeperConfig, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(config.period_minutes * 60));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = sweep_once(&core, config.lock_timeout_minutes).await {
                    warn!(error = %e, "sweeper pass failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("sweeper stopping on shutdown signal");
                    return;
                }
            }
        }
    }
}

async fn sweep_once(core: &Core, lock_timeout_minutes: i64) -> ApiResult<()> {
    let cutoff = Utc::now() - chrono::Duration::minutes(lock_timeout_minutes);
    let mut tx = core.db.begin().await.map_err(crate::error::ApiError::from)?;

    // 1. reset stale physical locks back to `ready`.
    let reset_buckets = sqlx::query(
        "UPDATE physical_bucket_locators SET status = $1, lock_acquired_ts = NULL \
         WHERE lock_acquired_ts IS NOT NULL AND lock_acquired_ts <= $2",
    )
    .bind(Status::Ready)
    .bind(cutoff)
    .execute(&mut *tx)
    .await
    .map_err(crate::error::ApiError::from)?
    .rows_affected();

    let reset_objects = sqlx::query(
        "UPDATE physical_object_locators SET status = $1, lock_acquired_ts = NULL \
         WHERE lock_acquired_ts IS NOT NULL AND lock_acquired_ts <= $2",
    )
    .bind(Status::Ready)
    .bind(cutoff)
    .execute(&mut *tx)
    .await
    .map_err(crate::error::ApiError::from)?
    .rows_affected();

    // 2. promote logical rows whose physical children are all ready.
    let promoted_buckets = sqlx::query(
        "UPDATE logical_buckets SET status = $1 \
         WHERE status = $2 AND bucket IN ( \
             SELECT bucket_name FROM physical_bucket_locators \
             GROUP BY bucket_name HAVING bool_and(status = $1) \
         )",
    )
    .bind(Status::Ready)
    .bind(Status::Pending)
    .execute(&mut *tx)
    .await
    .map_err(crate::error::ApiError::from)?
    .rows_affected();

    let promoted_objects = sqlx::query(
        "UPDATE logical_objects SET status = $1 \
         WHERE status = $2 AND id IN ( \
             SELECT logical_object_id FROM physical_object_locators \
             GROUP BY logical_object_id HAVING bool_and(status = $1) \
         )",
    )
    .bind(Status::Ready)
    .bind(Status::Pending)
    .execute(&mut *tx)
    .await
    .map_err(crate::error::ApiError::from)?
    .rows_affected();

    tx.commit().await.map_err(crate::error::ApiError::from)?;

    if reset_buckets + reset_objects + promoted_buckets + promoted_objects > 0 {
        info!(reset_buckets, reset_objects, promoted_buckets, promoted_objects, "sweeper healed stale rows");
    }

    Ok(())
}

