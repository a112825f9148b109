//! # kiln-ops
//!
//! Operator framework for Kiln: declare an operation once, run it on every
//! supported element type and device.
//!
//! Provides:
//! - `Operator` / `OperatorBase` and the `dispatch_types!` type dispatch macro
//! - `OpSchema` arity declarations, per-device deployments and gradient
//!   registrations in an `OperatorRegistry`
//! - Built-in operators: Copy, Accuracy, OneHot
//! - `Workspace`, `Graph` builder/executor and `ExecutorConfig`
//!
//! ```
//! use kiln_core::Tensor;
//! use kiln_ops::{ExecutorConfig, Graph, GraphDef, OperatorDef, Workspace};
//!
//! let def = GraphDef::new("encode")
//!     .push(OperatorDef::new("OneHot", ["labels"], ["onehot"]).with_arg("depth", 3));
//! let mut graph = Graph::build(def, kiln_ops::global_registry().unwrap(), ExecutorConfig::default()).unwrap();
//!
//! let mut ws = Workspace::new();
//! ws.feed("labels", Tensor::from_f32(&[2.0, 0.0], &[2]));
//! graph.run(&mut ws).unwrap();
//! assert_eq!(
//!     ws.fetch("onehot").unwrap().data::<f32>().unwrap(),
//!     &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0]
//! );
//! ```

pub mod config;
pub mod def;
mod error;
pub mod graph;
pub mod operator;
pub mod operators;
pub mod registry;
pub mod schema;
pub mod workspace;

pub use config::ExecutorConfig;
pub use def::{Argument, GraphDef, OperatorDef};
pub use error::Error;
pub use graph::Graph;
pub use operator::{CreateOperator, Operator, OperatorBase};
pub use registry::{
    global_registry, register_builtin_operators, GradientEntry, OperatorCreator, OperatorRegistry,
};
pub use schema::OpSchema;
pub use workspace::Workspace;

pub use kiln_core::{DType, Element};

pub type Result<T> = std::result::Result<T, Error>;
