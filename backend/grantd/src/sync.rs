//! Background task that brings off-chain project status in line with the
//! chain. It only reads; transactions are never submitted from here.

use std::sync::Arc;
use std::time::Duration;

use ethers::types::U256;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::GrantChain;
use crate::db;
use crate::models::ProjectStatus;
use crate::stats::get_stats;

pub struct SyncState {
    pub pool: SqlitePool,
    pub chain: Arc<dyn GrantChain>,
    pub interval: Duration,
}

/// Poll until `shutdown` fires.
pub async fn run(state: Arc<SyncState>, shutdown: CancellationToken) {
    info!("Status sync starting, every {:?}", state.interval);

    loop {
        match sync_once(&state.pool, state.chain.as_ref()).await {
            Ok(0) => {}
            Ok(n) => info!("Status sync moved {n} project(s) to active_voting"),
            Err(e) => error!("Status sync error: {e}"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(state.interval) => {}
        }
    }

    info!("Status sync stopped");
}

/// One pass over minted projects still marked `pending`.
///
/// Returns how many projects were moved to `active_voting`. A failed stats
/// read skips that project until the next pass.
pub async fn sync_once(pool: &SqlitePool, chain: &dyn GrantChain) -> crate::errors::Result<usize> {
    let mut moved = 0;
    for project in db::list_minted_pending(pool).await? {
        let Some(token_id) = project.token_id() else {
            continue;
        };
        match get_stats(chain, U256::from(token_id)).await {
            Ok(stats) if stats.voting_started => {
                db::update_project_status(pool, project.id, ProjectStatus::ActiveVoting).await?;
                moved += 1;
            }
            Ok(_) => debug!("Proposal {token_id} not started yet"),
            Err(e) => warn!("Could not read stats for proposal {token_id}: {e}"),
        }
    }
    Ok(moved)
}
