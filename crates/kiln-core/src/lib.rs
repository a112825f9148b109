//! # kiln-core
//!
//! Typed, device-aware tensor buffers for the Kiln operator framework.
//!
//! Provides the buffer type every operator reads and writes:
//! - Element types (`DType`) and the `Element` trait linking Rust scalars to them
//! - CPU and CUDA devices (`Device`, `DeviceKind`)
//! - Reference-counted, copy-on-write storage with fixed dtype and device
//! - Lazily allocated tensors whose reshape never reallocates needlessly

pub mod dtype;
pub mod device;
pub mod storage;
pub mod shape;
pub mod tensor;
pub mod error;
pub mod prelude;

pub use dtype::{DType, Element};
pub use device::{Device, DeviceKind};
pub use storage::Storage;
pub use shape::Shape;
pub use tensor::Tensor;
pub use error::KilnError;

/// Half-precision float, re-exported so downstream crates name one type.
pub use half::f16;

pub type Result<T> = std::result::Result<T, KilnError>;
