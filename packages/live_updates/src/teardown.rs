//! Close and Abort: the two ways a connected client returns to UNKNOWN.
//!
//! Both remove the live entry and delete the record while holding the table
//! lock, so nothing observes one without the other.

use tracing::{debug, info};
use uuid::Uuid;

use crate::Shared;
use crate::nonce::Nonce;

/// The transport of connection `id` went away. Only that connection's own
/// entry is torn down; a newer connection of the same nonce is left alone.
pub(crate) async fn close(shared: &Shared, nonce: &Nonce, id: Uuid) -> Result<bool, sqlx::Error> {
    let removed = remove(shared, nonce, Some(id)).await?;
    if removed {
        debug!(nonce = %nonce, connection = %id, "Live-updates channel closed");
    }
    Ok(removed)
}

/// Explicit out-of-band drop. No live entry means nothing to do; a
/// provisional row is left for the sweeper.
pub(crate) async fn abort(shared: &Shared, nonce: &Nonce) -> Result<bool, sqlx::Error> {
    let removed = remove(shared, nonce, None).await?;
    if removed {
        shared.metrics.aborted();
        info!(nonce = %nonce, "Live-updates channel aborted");
    }
    Ok(removed)
}

async fn remove(shared: &Shared, nonce: &Nonce, id: Option<Uuid>) -> Result<bool, sqlx::Error> {
    let mut table = shared.connections.lock().await;
    let owned = table
        .get(nonce)
        .is_some_and(|conn| id.is_none_or(|id| conn.id == id));
    if !owned {
        return Ok(false);
    }
    let Some(conn) = table.remove(nonce) else {
        return Ok(false);
    };
    conn.cancel.cancel();
    drop(conn);
    shared.metrics.connection_closed();

    shared.store.delete(nonce).await?;
    Ok(true)
}
