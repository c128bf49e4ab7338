use async_trait::async_trait;
use bytes::Bytes;

use crate::StoreError;

/// Transport that delivers encoded remote-write payloads to one endpoint.
///
/// The payload is a snappy compressed protobuf [`WriteRequest`](crate::proto::WriteRequest).
/// Implementations classify failures into recoverable and non-recoverable errors; retrying is
/// up to the caller.
#[async_trait]
pub trait WriteClient: Send + Sync + 'static {
    /// Sends one payload.
    async fn store(&self, payload: Bytes) -> Result<(), StoreError>;

    /// Returns the name of the destination.
    fn name(&self) -> &str;

    /// Returns the URL payloads are sent to.
    fn endpoint(&self) -> &str;
}
