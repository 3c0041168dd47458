//! Per-step exchange shapes and the handler trait

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::payload::JobPayload;

/// The bundle a handler receives for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepInput {
    /// The chain's original input, unchanged since submission.
    pub input: serde_json::Value,

    /// Handler-owned state carried forward from the previous step.
    pub metadata: serde_json::Value,
}

impl StepInput {
    /// Build the step input for a payload.
    pub fn from_payload(payload: &JobPayload) -> Self {
        Self {
            input: payload.input.clone(),
            metadata: payload.metadata.clone(),
        }
    }
}

/// What a handler reports back after executing one step.
///
/// An absent continuation token means the chain is terminal; the status
/// string alone distinguishes success from permanent failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// State name to record on the chain.
    pub status: String,

    /// Where the next invocation should resume. `None` ends the chain.
    pub continuation_token: Option<String>,

    /// Delay before the re-queued message becomes visible again.
    pub retry_after: Option<Duration>,

    /// Handler-owned state to carry into the next step.
    pub metadata: serde_json::Value,
}

impl StepResult {
    /// A result that schedules another step under the given token.
    pub fn in_progress(status: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            continuation_token: Some(token.into()),
            retry_after: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// A terminal result; nothing is re-queued.
    pub fn terminal(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            continuation_token: None,
            retry_after: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach metadata to carry into the next step.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Delay redelivery of the next step.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Whether this result ends the chain.
    pub fn is_terminal(&self) -> bool {
        match &self.continuation_token {
            Some(token) => token.is_empty(),
            None => true,
        }
    }
}

/// A step handler owns the business logic of one chain target.
///
/// The engine routes payloads and persists progress; all side effects (the
/// actual provisioning work) live behind `continue_step`. Implementations
/// must execute exactly one step per call and encode any retry they want as
/// a non-terminal result.
#[async_trait]
pub trait StepHandler: Send + Sync + 'static {
    /// Handler name, matched against a chain's target.
    fn name(&self) -> &str;

    /// Whether this handler owns the given payload.
    ///
    /// The default matches on the chain's target name; handlers that claim
    /// payloads by shape can override.
    fn can_handle(&self, payload: &JobPayload) -> bool {
        payload.target == self.name()
    }

    /// Execute exactly one step.
    ///
    /// `continuation_token` is `None` for the first step of a chain.
    async fn continue_step(
        &self,
        input: StepInput,
        continuation_token: Option<&str>,
    ) -> anyhow::Result<StepResult>;
}
