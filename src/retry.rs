//! Replay-once wrapper for authenticated calls.

use std::future::Future;

use tracing::debug;

use crate::client::ClientError;
use crate::refresh::RefreshCoordinator;

/// Run `op`, refreshing the session and replaying it once on a 401.
///
/// Any other error, a failed refresh, or a second 401 from the replay is
/// returned to the caller unchanged.
///
/// # Example
/// ```ignore
/// let response = with_refresh(&coordinator, || transport.send(&request)).await?;
/// ```
pub async fn with_refresh<F, Fut, T>(coordinator: &RefreshCoordinator, mut op: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut retried = false;
    loop {
        match op().await {
            Err(e) if e.is_unauthorized() && !retried => {
                retried = true;
                debug!("request unauthorized, refreshing session before replay");
                coordinator.refresh().await?;
            }
            result => return result,
        }
    }
}
