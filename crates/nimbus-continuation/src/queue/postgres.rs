//! PostgreSQL implementation of QueueRepository
//!
//! Production queue on a single table:
//! - Concurrent claiming with `FOR UPDATE SKIP LOCKED`
//! - Visibility delays via `visible_at`
//! - Lease expiry (`leased_until`) for at-least-once redelivery

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error};
use uuid::Uuid;

use super::repository::{QueueError, QueueMessage, QueueRepository};

/// PostgreSQL implementation of QueueRepository
///
/// Uses a connection pool for efficient database access. Messages are claimed
/// in enqueue order; claiming skips rows locked by concurrent fetchers, so
/// many worker processes can share one queue table.
///
/// # Example
///
/// ```ignore
/// use nimbus_continuation::queue::PostgresQueue;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/nimbus").await?;
/// let queue = PostgresQueue::new(pool);
/// queue.ensure_schema().await?;
/// ```
#[derive(Clone)]
pub struct PostgresQueue {
    pool: PgPool,
    lease: Duration,
}

impl PostgresQueue {
    /// Create a new PostgreSQL queue with the default 30s lease.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease: Duration::from_secs(30),
        }
    }

    /// Set the lease duration applied to fetched messages.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the queue table and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nimbus_queue_messages (
                id UUID PRIMARY KEY,
                body TEXT NOT NULL,
                visible_at TIMESTAMPTZ NOT NULL,
                leased_until TIMESTAMPTZ,
                enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_nimbus_queue_messages_visible
            ON nimbus_queue_messages (visible_at, enqueued_at)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(())
    }

    fn parse_message_id(message: &QueueMessage) -> Result<Uuid, QueueError> {
        message
            .id
            .parse::<Uuid>()
            .map_err(|e| QueueError::Backend(format!("malformed message id: {e}")))
    }
}

#[async_trait]
impl QueueRepository for PostgresQueue {
    async fn fetch_batch(&self, count: usize) -> Result<Vec<QueueMessage>, QueueError> {
        if count == 0 {
            return Ok(vec![]);
        }

        // Claim in enqueue order; SKIP LOCKED avoids contention between
        // concurrent fetchers.
        let rows = sqlx::query(
            r#"
            UPDATE nimbus_queue_messages
            SET leased_until = now() + make_interval(secs => $2)
            WHERE id IN (
                SELECT id FROM nimbus_queue_messages
                WHERE visible_at <= now()
                  AND (leased_until IS NULL OR leased_until <= now())
                ORDER BY enqueued_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, body
            "#,
        )
        .bind(count as i64)
        .bind(self.lease.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch queue messages: {}", e);
            QueueError::Backend(e.to_string())
        })?;

        let messages = rows
            .into_iter()
            .map(|row| QueueMessage {
                id: row.get::<Uuid, _>("id").to_string(),
                body: row.get("body"),
            })
            .collect::<Vec<_>>();

        if !messages.is_empty() {
            debug!(count = messages.len(), "fetched queue messages");
        }
        Ok(messages)
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let id = Self::parse_message_id(message)?;

        sqlx::query("DELETE FROM nimbus_queue_messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(message_id = %message.id, "Failed to delete queue message: {}", e);
                QueueError::Backend(e.to_string())
            })?;

        Ok(())
    }

    async fn add(
        &self,
        body: String,
        visibility_delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        let delay = visibility_delay.unwrap_or(Duration::ZERO);

        sqlx::query(
            r#"
            INSERT INTO nimbus_queue_messages (id, body, visible_at)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&body)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to enqueue message: {}", e);
            QueueError::Backend(e.to_string())
        })?;

        Ok(())
    }
}
