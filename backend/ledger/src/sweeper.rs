//! Long-running background task that fails PENDING donations whose payment
//! was never confirmed within `PENDING_EXPIRY_SECS`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::donation;

pub struct SweeperState {
    pub pool: SqlitePool,
    pub expiry_secs: u64,
    pub interval_secs: u64,
}

/// Run the sweep loop until `shutdown` is cancelled.
pub async fn run(state: Arc<SweeperState>, shutdown: CancellationToken) {
    info!(
        "Sweeper starting; pending donations expire after {}s, checked every {}s",
        state.expiry_secs, state.interval_secs
    );

    loop {
        match sweep_once(&state.pool, state.expiry_secs, Utc::now().timestamp()).await {
            Ok(0) => {}
            Ok(n) => info!("Expired {n} stale pending donations"),
            Err(e) => error!("Sweeper error: {e}"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(state.interval_secs.max(1))) => {}
        }
    }
    info!("Sweeper stopped");
}

/// Perform a single sweep. Returns the number of donations expired.
async fn sweep_once(pool: &SqlitePool, expiry_secs: u64, now: i64) -> crate::errors::Result<u64> {
    let cutoff = now.saturating_sub(i64::try_from(expiry_secs).unwrap_or(i64::MAX));
    donation::expire_stale(pool, cutoff, now).await
}
