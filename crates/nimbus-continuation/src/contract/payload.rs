//! Job payload - the persisted state of a continuation chain

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::step::StepResult;

/// The payload serialized into every queue message of a job chain.
///
/// A chain is the full sequence of steps sharing one `tracking_id`, from
/// initial submission to terminal completion. `tracking_id` and `target` are
/// fixed for the life of the chain; each completed step produces a successor
/// payload via [`JobPayload::next_step`] rather than mutating the current one.
///
/// Wire names are PascalCase, matching the persisted queue format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobPayload {
    /// Stable identifier for the chain, generated once at submission.
    pub tracking_id: String,

    /// UTC timestamp of the first enqueue, unchanged across steps.
    pub created: DateTime<Utc>,

    /// Last state reported by the handler. `None` before the first step runs.
    pub status: Option<String>,

    /// Opaque handler-owned progress marker. Empty or absent means terminal.
    pub continuation_token: Option<String>,

    /// Opaque input passed to the very first step, carried forward unchanged.
    pub input: serde_json::Value,

    /// Opaque handler-owned state carried between steps.
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Name of the handler this chain is bound to.
    pub target: String,

    /// Number of completed steps, used for log correlation.
    #[serde(default)]
    pub step_count: u32,
}

impl JobPayload {
    /// Synthesize the payload for a brand-new chain.
    pub fn new_chain(target: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            tracking_id: Uuid::now_v7().to_string(),
            created: Utc::now(),
            status: Some("Initialized".to_string()),
            continuation_token: None,
            input,
            metadata: serde_json::Value::Null,
            target: target.into(),
            step_count: 0,
        }
    }

    /// Whether the chain has reached a terminal state.
    ///
    /// Both a missing and an empty continuation token are terminal.
    pub fn is_terminal(&self) -> bool {
        match &self.continuation_token {
            Some(token) => token.is_empty(),
            None => true,
        }
    }

    /// The continuation token, with an empty string treated as absent.
    pub fn token(&self) -> Option<&str> {
        self.continuation_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Build the successor payload from a handler's step result.
    ///
    /// The chain identity (`tracking_id`, `created`, `target`, `input`) is
    /// preserved; status, token, and metadata come from the result.
    pub fn next_step(&self, result: &StepResult) -> Self {
        Self {
            tracking_id: self.tracking_id.clone(),
            created: self.created,
            status: Some(result.status.clone()),
            continuation_token: result.continuation_token.clone(),
            input: self.input.clone(),
            metadata: result.metadata.clone(),
            target: self.target.clone(),
            step_count: self.step_count + 1,
        }
    }
}
