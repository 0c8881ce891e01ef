use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::designer::analysis::{RoomAnalysis, RoomContext};

/// Failure taxonomy shared by every external collaborator. Quota exhaustion
/// is its own variant so callers can surface a retry-after-delay condition
/// instead of a generic failure.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator returned no usable payload")]
    NoPayload,
    #[error("collaborator payload did not match the expected shape: {0}")]
    MalformedPayload(String),
    #[error("collaborator is rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("collaborator call failed: {0}")]
    Api(String),
}

impl CollaboratorError {
    pub fn is_retryable_later(&self) -> bool {
        matches!(self, CollaboratorError::RateLimited { .. })
    }
}

/// Structured edit directive returned by the chat collaborator. The Director
/// validates it mechanically before anything is dispatched; an absent
/// directive is the conversational-only branch.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditDirective {
    #[serde(default)]
    pub target_elements: Vec<String>,
    #[serde(default)]
    pub change_description: String,
    #[serde(default)]
    pub preserve_elements: Vec<String>,
    #[serde(default)]
    pub restore_elements: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseReply {
    pub text: String,
    #[serde(default)]
    pub edit: Option<EditDirective>,
}

/// Inputs for one chat/Director-backing call. The transcript is already
/// clipped to the history budget and contains no display-only notices.
#[derive(Debug)]
pub struct ConverseRequest<'a> {
    pub history: &'a str,
    pub current_image: &'a [u8],
    pub analysis: Option<&'a RoomAnalysis>,
    pub user_message: &'a str,
    pub room_context: RoomContext,
}

#[async_trait]
pub trait AnalysisCollaborator: Send + Sync {
    async fn analyze(
        &self,
        image: &[u8],
        room_context: RoomContext,
    ) -> Result<RoomAnalysis, CollaboratorError>;
}

#[async_trait]
pub trait ChatCollaborator: Send + Sync {
    async fn converse(&self, request: ConverseRequest<'_>)
        -> Result<ConverseReply, CollaboratorError>;
}

#[async_trait]
pub trait EditCollaborator: Send + Sync {
    /// Apply a fully-composed edit instruction to the image. The wrapper is
    /// responsible for appending the hard generation constraints.
    async fn edit(&self, image: &[u8], instruction: &str) -> Result<Vec<u8>, CollaboratorError>;
}

#[async_trait]
pub trait GenerationCollaborator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, CollaboratorError>;
}
