//! In-memory implementation of QueueRepository for testing

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::repository::{QueueError, QueueMessage, QueueRepository};

/// Internal message state
struct StoredMessage {
    id: String,
    body: String,
    visible_at: DateTime<Utc>,
    leased_until: Option<DateTime<Utc>>,
}

impl StoredMessage {
    fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.visible_at <= now && self.leased_until.map_or(true, |until| until <= now)
    }
}

/// In-memory implementation of QueueRepository
///
/// This is primarily for testing and single-process deployments. It honors
/// visibility delays and leases fetched messages, redelivering them after the
/// lease lapses, with the same semantics as the PostgreSQL implementation.
///
/// # Example
///
/// ```
/// use nimbus_continuation::queue::InMemoryQueue;
///
/// let queue = InMemoryQueue::new();
/// ```
pub struct InMemoryQueue {
    messages: Mutex<VecDeque<StoredMessage>>,
    lease: Duration,
}

impl InMemoryQueue {
    /// Create a new in-memory queue with the default 30s lease.
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            lease: Duration::from_secs(30),
        }
    }

    /// Set the lease duration applied to fetched messages.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Number of messages currently available for delivery.
    pub fn available_count(&self) -> usize {
        let now = Utc::now();
        self.messages
            .lock()
            .iter()
            .filter(|m| m.is_available(now))
            .count()
    }

    /// Total number of stored messages, leased and delayed included.
    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    /// Clear all messages (for testing)
    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueRepository for InMemoryQueue {
    async fn fetch_batch(&self, count: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let now = Utc::now();
        let lease_until = now
            + chrono::Duration::from_std(self.lease)
                .map_err(|e| QueueError::Backend(e.to_string()))?;

        let mut messages = self.messages.lock();
        let mut fetched = Vec::new();

        for stored in messages.iter_mut() {
            if fetched.len() >= count {
                break;
            }
            if stored.is_available(now) {
                stored.leased_until = Some(lease_until);
                fetched.push(QueueMessage {
                    id: stored.id.clone(),
                    body: stored.body.clone(),
                });
            }
        }

        Ok(fetched)
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut messages = self.messages.lock();
        messages.retain(|m| m.id != message.id);
        Ok(())
    }

    async fn add(
        &self,
        body: String,
        visibility_delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        let delay = visibility_delay.unwrap_or(Duration::ZERO);
        let visible_at = Utc::now()
            + chrono::Duration::from_std(delay).map_err(|e| QueueError::Backend(e.to_string()))?;

        let mut messages = self.messages.lock();
        messages.push_back(StoredMessage {
            id: Uuid::now_v7().to_string(),
            body,
            visible_at,
            leased_until: None,
        });
        Ok(())
    }
}
