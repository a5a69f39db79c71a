// One handler per business operation. Handlers stay thin: coerce the field
// wrapper, open a transaction, resolve the actor, gate, call the mutator or
// service, commit. Domain errors map to the wire exactly once, here, with a
// per-operation fallback message for infrastructure failures.
pub mod devices;
pub mod org;
pub mod pools;
pub mod public;
pub mod users;

use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{ApiError, OpError};
use crate::state::AppState;

pub(crate) async fn begin_tx<'a>(
    pool: &'a PgPool,
    fallback: &str,
) -> Result<Transaction<'a, Postgres>, ApiError> {
    pool.begin()
        .await
        .map_err(|err| ApiError::from_op(OpError::from(err), fallback))
}

pub(crate) async fn commit_tx(
    tx: Transaction<'_, Postgres>,
    fallback: &str,
) -> Result<(), ApiError> {
    tx.commit()
        .await
        .map_err(|err| ApiError::from_op(OpError::from(err), fallback))
}

/// Notifications are best-effort: the transaction has already committed, so
/// a dispatch failure is logged and swallowed.
pub(crate) async fn notify_best_effort(state: &AppState, topic: &str, status: &str) {
    if let Err(err) = state.notifier.notify(topic, status).await {
        tracing::warn!(topic, status, "notification dispatch failed: {}", err);
    }
}
