use thiserror::Error;

use crate::{DType, Device};

/// Errors raised by buffers, storage and device transfers.
#[derive(Debug, Error)]
pub enum KilnError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("Unsupported dtype: {0}")]
    UnsupportedDType(DType),

    #[error("DType mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    #[error("Axis {axis} out of range for tensor with {ndim} dimensions")]
    InvalidAxis { axis: usize, ndim: usize },

    #[error("Tensor is uninitialized: {0}")]
    Uninitialized(String),

    #[error("Device mismatch: expected {expected}, got {got}")]
    DeviceMismatch { expected: Device, got: Device },

    #[error("Invalid device string: {0:?}")]
    InvalidDevice(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("CUDA error: {0}")]
    CudaError(String),
}
