use std::path::PathBuf;

use thiserror::Error;

use crate::error::FailureKind;
use crate::identifier::IdentifierError;

use super::tools::ToolError;
use super::types::PipelineStage;

pub type ConversionResult<T> = Result<T, ConversionError>;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("invalid source url: {url}")]
    InvalidUrl { url: String },
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("{stage} failed: {source}")]
    Tool {
        stage: PipelineStage,
        #[source]
        source: ToolError,
    },
    #[error("{stage} produced no file at {}", path.display())]
    MissingArtifact { stage: PipelineStage, path: PathBuf },
    #[error("{stage} io error at {}: {source}", path.display())]
    Io {
        stage: PipelineStage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<IdentifierError> for ConversionError {
    fn from(err: IdentifierError) -> Self {
        match err {
            IdentifierError::InvalidUrl { url } => ConversionError::InvalidUrl { url },
        }
    }
}

impl ConversionError {
    pub fn stage(&self) -> PipelineStage {
        match self {
            ConversionError::InvalidUrl { .. } | ConversionError::UnsupportedFormat(_) => {
                PipelineStage::Resolving
            }
            ConversionError::Tool { stage, .. }
            | ConversionError::MissingArtifact { stage, .. }
            | ConversionError::Io { stage, .. } => *stage,
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.stage().failure_kind()
    }

    /// Best available human-readable detail; tool stderr when there is one.
    pub fn details(&self) -> String {
        match self {
            ConversionError::Tool {
                source: ToolError::Exit { stderr, .. },
                ..
            } if !stderr.trim().is_empty() => stderr.trim().to_string(),
            other => other.to_string(),
        }
    }

    /// The offending url, for errors caused by the caller's input.
    pub fn received_url(&self) -> Option<&str> {
        match self {
            ConversionError::InvalidUrl { url } => Some(url),
            _ => None,
        }
    }
}
