use std::time::Duration;

use crate::artifact::ArtifactKind;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("unknown model id: {0}")]
    UnknownModel(String),
    #[error("model {id} failed to load: {error:#}")]
    Load { id: String, error: anyhow::Error },
    #[error("model {id} inference failed: {error:#}")]
    Inference { id: String, error: anyhow::Error },
    #[error("model {id} inference timed out after {timeout:?}")]
    InferenceTimeout { id: String, timeout: Duration },
    #[error("model {id} is not ready")]
    NotReady { id: String },
    #[error("a recording session is already active")]
    AlreadyRecording,
    #[error("no recording session is active")]
    NotRecording,
    #[error("{kind} serialization failed: {error:#}")]
    Serialization {
        kind: ArtifactKind,
        error: anyhow::Error,
    },
    #[error("media capture failed: {0:#}")]
    Media(anyhow::Error),
    #[error("saving {kind} artifact failed: {error:#}")]
    Persist {
        kind: ArtifactKind,
        error: anyhow::Error,
    },
    #[error("pipeline has been shut down")]
    ShutDown,
    #[error("pipeline bus is closed")]
    BusClosed,
}

impl PipelineError {
    /// Caller misuse that leaves every state untouched.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            PipelineError::AlreadyRecording | PipelineError::NotRecording
        )
    }

    /// The model id this error belongs to, if any.
    pub fn model_id(&self) -> Option<&str> {
        match self {
            PipelineError::UnknownModel(id)
            | PipelineError::Load { id, .. }
            | PipelineError::Inference { id, .. }
            | PipelineError::InferenceTimeout { id, .. }
            | PipelineError::NotReady { id } => Some(id),
            _ => None,
        }
    }
}
