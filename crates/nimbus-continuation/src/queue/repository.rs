//! QueueRepository trait definition

use std::time::Duration;

use async_trait::async_trait;

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Backend failure (connectivity, storage, malformed ids)
    #[error("queue backend error: {0}")]
    Backend(String),

    /// Payload serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An opaque envelope around a serialized job payload.
///
/// Visibility and lease semantics belong to the backing queue; consumers only
/// see the identity needed for deletion and the serialized body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Backend-assigned message identity.
    pub id: String,

    /// Serialized job payload.
    pub body: String,
}

/// The durable queue the engine consumes.
///
/// Implementations must be thread-safe. A fetch that returns nothing is not
/// an error. Fetched messages stay leased until deleted and become eligible
/// for redelivery if the lease lapses, which is what makes step execution
/// at-least-once.
#[async_trait]
pub trait QueueRepository: Send + Sync + 'static {
    /// Fetch up to `count` messages, leasing each one.
    async fn fetch_batch(&self, count: usize) -> Result<Vec<QueueMessage>, QueueError>;

    /// Fetch a single message, if one is available.
    async fn fetch_one(&self) -> Result<Option<QueueMessage>, QueueError> {
        Ok(self.fetch_batch(1).await?.pop())
    }

    /// Delete a fully processed message.
    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Submit a serialized payload, optionally invisible for `visibility_delay`.
    async fn add(
        &self,
        body: String,
        visibility_delay: Option<Duration>,
    ) -> Result<(), QueueError>;
}
