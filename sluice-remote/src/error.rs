use std::time::Duration;

/// An error returned by a [`WriteClient`](crate::WriteClient) when storing a payload.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A transient failure, the payload may be sent again.
    ///
    /// The server may ask for a specific wait time before the next attempt.
    #[error("recoverable error: {message}")]
    Recoverable {
        /// Description of the failure.
        message: String,
        /// Wait time requested by the server.
        retry_after: Option<Duration>,
    },
    /// A permanent failure, sending the payload again will fail as well.
    #[error("non-recoverable error: {message}")]
    Unrecoverable {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a recoverable error without a retry hint.
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::Recoverable {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Creates a recoverable error the server asked to retry after `retry_after`.
    pub fn recoverable_after(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::Recoverable {
            message: message.into(),
            retry_after,
        }
    }

    /// Creates a non-recoverable error.
    pub fn unrecoverable(message: impl Into<String>) -> Self {
        Self::Unrecoverable {
            message: message.into(),
        }
    }

    /// Returns `true` if sending the payload again may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable { .. })
    }

    /// Returns the wait time requested by the server, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Recoverable { retry_after, .. } => *retry_after,
            Self::Unrecoverable { .. } => None,
        }
    }
}

/// An error returned when handing data to a [`QueueManager`](crate::QueueManager).
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue manager is stopping and no longer accepts data.
    #[error("queue manager is shutting down")]
    ShuttingDown,
    /// The queue manager has not been started.
    #[error("queue manager is not started")]
    NotStarted,
}
