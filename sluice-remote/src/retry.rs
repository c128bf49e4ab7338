use std::time::Duration;

use bytes::Bytes;
use sluice_common::RetryBackoff;
use tokio_util::sync::CancellationToken;

use crate::{StoreError, WriteClient};

/// Reasons a payload was not delivered by [`send_with_backoff`].
#[derive(Debug)]
pub(crate) enum SendError {
    /// The client returned a non-recoverable error.
    Store(StoreError),
    /// The cancellation token fired before the payload was delivered.
    Cancelled,
}

/// Sends a payload until it is delivered, a non-recoverable error occurs or `cancel` fires.
///
/// Recoverable errors are retried after the wait time requested by the server, or otherwise
/// after an exponential backoff between `min_backoff` and `max_backoff`. A server-requested wait
/// does not advance the backoff. `on_retry` is called before every retry.
pub(crate) async fn send_with_backoff<F>(
    client: &dyn WriteClient,
    payload: Bytes,
    min_backoff: Duration,
    max_backoff: Duration,
    cancel: &CancellationToken,
    mut on_retry: F,
) -> Result<(), SendError>
where
    F: FnMut(&StoreError),
{
    let mut backoff = RetryBackoff::new(min_backoff, max_backoff);

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SendError::Cancelled),
            result = client.store(payload.clone()) => result,
        };

        let error = match result {
            Ok(()) => return Ok(()),
            Err(error) if !error.is_recoverable() => return Err(SendError::Store(error)),
            Err(error) => error,
        };

        let wait = match error.retry_after() {
            Some(retry_after) if !retry_after.is_zero() => {
                sluice_log::info!(
                    destination = client.name(),
                    retry_after = ?retry_after,
                    "retrying after duration specified by the server",
                );
                retry_after
            }
            _ => backoff.next_backoff(),
        };

        sluice_log::debug!(
            destination = client.name(),
            error = &error as &dyn std::error::Error,
            wait = ?wait,
            "failed to send batch, retrying",
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SendError::Cancelled),
            _ = tokio::time::sleep(wait) => (),
        }

        on_retry(&error);
    }
}
