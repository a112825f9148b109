//! CUDA GPU backend for Kiln.
//!
//! Provides:
//! - `CudaContext`, the execution context for CUDA ordinals
//! - Kernel launcher with per-device module caching
//! - Fill, copy and one-hot kernels over raw device buffers

pub mod context;
pub mod launch;
pub mod ops;

pub use context::{device_count, is_cuda_available, CudaContext, CudaError};
