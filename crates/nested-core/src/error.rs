use thiserror::Error;

use crate::{DType, Device};

/// Errors from the dense engine. Bad shapes, dims and dtypes are reported
/// here rather than panicking.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NestedCoreError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    /// `dim` is reported as given, before negative wrapping.
    #[error("dim {dim} is out of range for a {ndim}-d tensor")]
    InvalidAxis { dim: isize, ndim: usize },

    #[error("expected dtype {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    #[error("expected device {expected}, got {got}")]
    DeviceMismatch { expected: Device, got: Device },

    #[error("device {0} cannot hold tensor data; only cpu is backed")]
    DeviceUnavailable(Device),

    #[error("{numel} elements do not fit shape {shape:?}")]
    InvalidReshape { numel: usize, shape: Vec<isize> },

    #[error("shapes {a:?} and {b:?} do not broadcast")]
    BroadcastError { a: Vec<usize>, b: Vec<usize> },

    #[error("index {index} is out of bounds for dim {axis} of size {size}")]
    IndexOutOfBounds { index: usize, axis: usize, size: usize },

    #[error("matmul of [{m}, {k1}] and [{k2}, {n}]: inner sizes differ")]
    MatmulDimMismatch { m: usize, k1: usize, k2: usize, n: usize },

    /// Compute kernels only run on f32.
    #[error("{0} tensors are not supported by this op")]
    UnsupportedDType(DType),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage: {0}")]
    StorageError(String),
}
