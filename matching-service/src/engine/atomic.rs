//! The one place units of work are opened, committed and rolled back.

use super::error::MatchError;
use crate::store::{ReconciliationStore, UnitOfWork};
use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run `work` inside a fresh unit of work.
///
/// The unit commits when `work` returns `Ok` and rolls back when it returns
/// `Err`. The whole unit, commit included, is bounded by `timeout`; a unit
/// abandoned on timeout is dropped, which discards its changes.
///
/// `work` must move owned values into its future; it may not borrow from
/// the caller.
pub async fn atomically<T, F>(
    store: &dyn ReconciliationStore,
    operation: &'static str,
    timeout: Duration,
    work: F,
) -> Result<T, MatchError>
where
    T: Send,
    F: for<'u> FnOnce(&'u mut (dyn UnitOfWork + 'static)) -> BoxFuture<'u, Result<T, MatchError>>
        + Send,
{
    let unit = async move {
        let mut uow = store.begin().await?;
        match work(uow.as_mut()).await {
            Ok(value) => {
                uow.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = uow.rollback().await {
                    warn!(
                        operation,
                        error = %rollback_err,
                        "Rollback failed; the unit is discarded on drop"
                    );
                }
                Err(err)
            }
        }
    };

    bounded(operation, timeout, unit).await
}

/// Bound a store call by `timeout`, reporting expiry as a retryable error.
pub async fn bounded<T, Fut>(
    operation: &'static str,
    timeout: Duration,
    call: Fut,
) -> Result<T, MatchError>
where
    Fut: Future<Output = Result<T, MatchError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| MatchError::Timeout { operation, timeout })?
}
