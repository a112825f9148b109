//! # kiln-kernels
//!
//! Execution contexts and math kernels for Kiln operators.
//!
//! Provides:
//! - The `Context` trait operator kernels are written against
//! - `CpuContext` over host slices, parallelized with rayon for large buffers
//! - `CudaContext` over device buffers (behind the `cuda` feature flag)

pub mod context;
pub mod cpu;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use context::{Context, CpuContext};

#[cfg(feature = "cuda")]
pub use cuda::CudaContext;
