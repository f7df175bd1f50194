//! Error types for the pipeline layer.

use std::path::PathBuf;

use cf_core::StageKind;
use cf_params::ParamError;
use cf_stages::StageError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage failed; the stage's own message is kept verbatim.
    #[error("{source}")]
    Stage {
        stage: StageKind,
        #[source]
        source: StageError,
    },

    #[error("Parameter error: {0}")]
    Parameters(#[from] ParamError),

    #[error("Unread parameters with strict_parameters = yes: {}", .names.join(", "))]
    UnusedParameters { names: Vec<String> },

    #[error("Failed to write {path}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize run summary: {0}")]
    Summary(#[from] serde_json::Error),
}

impl From<StageError> for PipelineError {
    fn from(source: StageError) -> Self {
        PipelineError::Stage {
            stage: source.stage(),
            source,
        }
    }
}

impl PipelineError {
    /// The underlying stage error, when there is one.
    pub fn stage_error(&self) -> Option<&StageError> {
        match self {
            PipelineError::Stage { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
