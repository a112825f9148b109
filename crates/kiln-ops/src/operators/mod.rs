//! Built-in operators.
//!
//! Each module exposes its operator generic over the execution context and a
//! `register` function adding its schema, deployments and gradient entry.

pub mod accuracy;
pub mod copy;
pub mod one_hot;

pub use accuracy::{compute_accuracy, AccuracyOp, AccuracyResult, Extents};
pub use copy::CopyOp;
pub use one_hot::OneHotOp;
