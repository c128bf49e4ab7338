/// An error returned by an [`Appender`](crate::Appender).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AppendError {
    /// The stage does not implement this operation.
    #[error("{operation} is not supported by this appender")]
    Unsupported {
        /// Name of the rejected operation.
        operation: &'static str,
    },
    /// The destination has been shut down and accepts no more data.
    #[error("appender is closed")]
    Closed,
    /// A downstream destination cannot take the data.
    #[error("remote destination failed: {0}")]
    Remote(String),
}

impl AppendError {
    /// Creates an [`AppendError::Unsupported`] for the given operation.
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }
}
