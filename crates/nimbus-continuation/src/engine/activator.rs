//! Chain activator - the engine's only state-transition point
//!
//! A chain moves Initialized -> (InProgress)* -> Terminal, where each
//! in-progress iteration is exactly one re-queue-and-redeliver cycle. The
//! transition is driven solely by the presence of a continuation token in
//! the handler's result.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::contract::{JobPayload, StepHandler, StepInput};
use crate::queue::{QueueError, QueuePump};

/// Errors from activator operations
#[derive(Debug, thiserror::Error)]
pub enum ActivatorError {
    /// The handler failed the step
    #[error("handler error: {0}")]
    Handler(#[source] anyhow::Error),

    /// Queue error while scheduling the next step
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Drives one continuation step and schedules the next
///
/// The activator invokes the matching handler, builds an immutable successor
/// payload from the step result, and re-queues it through the pump when a
/// continuation token remains. Handler errors propagate to the caller;
/// swallowing them is the worker loop's job, so the synchronous submission
/// path still sees failures from its own call.
///
/// # Example
///
/// ```ignore
/// let activator = Activator::new(pump);
/// let payload = activator
///     .execute(handler.as_ref(), "provision-vm", json!({"size": "M"}))
///     .await?;
/// println!("chain {} started", payload.tracking_id);
/// ```
pub struct Activator {
    pump: Arc<QueuePump>,
}

impl Activator {
    /// Create a new activator over a pump.
    pub fn new(pump: Arc<QueuePump>) -> Self {
        Self { pump }
    }

    /// Start a brand-new chain and run its first step.
    ///
    /// Synthesizes a fresh payload bound to `name` and delegates to
    /// [`Activator::continue_step`]. Returns the post-step payload; its
    /// `tracking_id` identifies the chain for the rest of its life.
    #[instrument(skip(self, handler, input), fields(target = name))]
    pub async fn execute(
        &self,
        handler: &dyn StepHandler,
        name: &str,
        input: serde_json::Value,
    ) -> Result<JobPayload, ActivatorError> {
        let payload = JobPayload::new_chain(name, input);
        debug!(tracking_id = %payload.tracking_id, "starting chain");
        self.continue_step(handler, &payload).await
    }

    /// Run exactly one step of a chain.
    ///
    /// Invokes the handler with the chain's input bundle and current token,
    /// then re-queues the successor payload if the result carries a token.
    /// The successor (terminal or not) is returned either way.
    #[instrument(
        skip(self, handler, payload),
        fields(tracking_id = %payload.tracking_id, target = %payload.target, step = payload.step_count)
    )]
    pub async fn continue_step(
        &self,
        handler: &dyn StepHandler,
        payload: &JobPayload,
    ) -> Result<JobPayload, ActivatorError> {
        let input = StepInput::from_payload(payload);

        let result = handler
            .continue_step(input, payload.token())
            .await
            .map_err(ActivatorError::Handler)?;

        let retry_after = result.retry_after;
        let next = payload.next_step(&result);

        if next.is_terminal() {
            debug!(status = ?next.status, steps = next.step_count, "chain reached terminal state");
        } else {
            self.schedule(&next, retry_after).await?;
        }

        Ok(next)
    }

    async fn schedule(
        &self,
        payload: &JobPayload,
        retry_after: Option<Duration>,
    ) -> Result<(), ActivatorError> {
        self.pump.add_payload(payload, retry_after).await?;
        debug!(
            token = ?payload.continuation_token,
            retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
            "scheduled next step"
        );
        Ok(())
    }
}
