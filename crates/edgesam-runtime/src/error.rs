use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::Size;

/// Opaque failure reported by the inference backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Encoder,
    Decoder,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Encoder => f.write_str("encoder"),
            Stage::Decoder => f.write_str("decoder"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{stage} model file not found: {}", .path.display())]
    ModelNotFound { stage: Stage, path: PathBuf },

    #[error("{stage} model has an unsupported shape: {reason}")]
    InvalidModelShape { stage: Stage, reason: String },

    #[error("failed to open {stage} model")]
    Backend {
        stage: Stage,
        #[source]
        source: BoxError,
    },
}

impl LoadError {
    pub(crate) fn shape(stage: Stage, reason: impl Into<String>) -> Self {
        LoadError::InvalidModelShape {
            stage,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image is {actual}, model expects {expected}")]
    SizeMismatch { expected: Size, actual: Size },

    #[error("image has {actual} channels, model expects {expected}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    BufferLength { expected: usize, actual: usize },

    #[error("failed to build the encoder input")]
    Tensor(#[source] BoxError),

    #[error("embedding inference failed")]
    InferenceFailed(#[source] BoxError),

    #[error("encoder produced an unusable embedding: {0}")]
    InvalidEmbedding(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no image loaded")]
    NoImageLoaded,

    #[error("failed to build the decoder inputs")]
    Tensor(#[source] BoxError),

    #[error("mask decoder inference failed")]
    InferenceFailed(#[source] BoxError),

    #[error("decoder did not return output {0}")]
    MissingOutput(String),

    #[error("decoder produced unusable output: {0}")]
    InvalidOutput(String),
}
