use nested_core::NestedCoreError;
use thiserror::Error;

/// Errors raised while building, reshaping or storing NestedTensors.
#[derive(Error, Debug)]
pub enum NestedTensorError {
    #[error(transparent)]
    Core(#[from] NestedCoreError),

    #[error("invalid nested structure: {0}")]
    InvalidStructure(String),

    #[error("nested size mismatch: expected {expected}, got {got}")]
    NestedSizeMismatch { expected: String, got: String },

    #[error("dim {dim} is irregular, no dense equivalent")]
    IrregularShape { dim: usize },

    #[error("{op} does not accept nested dim {dim} (nested_dim is {nested_dim})")]
    NestedDim {
        op: &'static str,
        dim: usize,
        nested_dim: usize,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serialization(String),
}

impl From<safetensors::SafeTensorError> for NestedTensorError {
    fn from(e: safetensors::SafeTensorError) -> Self {
        NestedTensorError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for NestedTensorError {
    fn from(e: serde_json::Error) -> Self {
        NestedTensorError::Serialization(e.to_string())
    }
}
