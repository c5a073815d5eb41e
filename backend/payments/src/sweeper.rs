//! Background task that fails donations which never received a PayPal order.
//!
//! A donation row is inserted before the order is opened. If the process dies
//! between the two, the row would stay `pending` forever; the sweeper moves
//! such rows to `failed` once they are older than `pending_ttl_secs`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::ApiState;
use crate::db;
use crate::errors::Result;

pub struct SweeperConfig {
    pub interval_secs: u64,
    pub pending_ttl_secs: i64,
}

/// Run the sweep loop until `shutdown` is cancelled.
pub async fn run(state: Arc<ApiState>, config: SweeperConfig, shutdown: CancellationToken) {
    if config.interval_secs == 0 {
        info!("Stale donation sweeper disabled");
        return;
    }
    info!(
        "Sweeper starting: every {}s, pending TTL {}s",
        config.interval_secs, config.pending_ttl_secs
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_secs));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Sweeper stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        let now = chrono::Utc::now().timestamp();
        if let Err(e) = sweep_once(&state, now - config.pending_ttl_secs).await {
            error!("Sweep error: {e}");
        }
    }
}

/// Fail stale order-less donations created before `cutoff`.
async fn sweep_once(state: &ApiState, cutoff: i64) -> Result<u64> {
    let pool = state.datastore.privileged().await?;
    let failed = db::fail_stale_pending(pool, cutoff).await?;
    if failed > 0 {
        info!("Swept {failed} stale pending donation(s)");
    }
    Ok(failed)
}
