//! Graph builder and sequential executor.

use std::time::Instant;

use kiln_core::Tensor;

use crate::config::ExecutorConfig;
use crate::def::GraphDef;
use crate::operator::Operator;
use crate::registry::OperatorRegistry;
use crate::workspace::Workspace;
use crate::{Error, Result};

/// A built graph: one operator instance per definition, in order.
pub struct Graph {
    name: String,
    ops: Vec<Box<dyn Operator>>,
    config: ExecutorConfig,
}

impl Graph {
    /// Resolve every definition against `registry` and create its operator.
    ///
    /// Definitions without a device run on `config.device`. Any unknown op
    /// type, arity violation, missing deployment or invalid argument fails
    /// the whole build. With `requires_grad`, each created operator must
    /// also have a gradient.
    pub fn build(def: GraphDef, registry: &OperatorRegistry, config: ExecutorConfig) -> Result<Self> {
        let mut ops = Vec::with_capacity(def.ops.len());
        for mut op_def in def.ops {
            let device = *op_def.device.get_or_insert(config.device);
            let op = registry.create_operator(op_def, device)?;
            if def.requires_grad {
                registry.check_differentiable(&op.def().op_type)?;
            }
            ops.push(op);
        }
        tracing::debug!(graph = %def.name, ops = ops.len(), "built graph");
        Ok(Self {
            name: def.name,
            ops,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn operators(&self) -> impl Iterator<Item = &dyn Operator> {
        self.ops.iter().map(|op| op.as_ref())
    }

    /// Run every operator in order, stopping at the first failure.
    pub fn run(&mut self, ws: &mut Workspace) -> Result<()> {
        let start = Instant::now();
        for op in self.ops.iter_mut() {
            if let Err(e) = run_op(op.as_mut(), ws, self.config.sync_after_each_op) {
                tracing::error!(
                    graph = %self.name,
                    op = op.def().display_name(),
                    op_type = %op.def().op_type,
                    error = %e,
                    "operator failed"
                );
                return Err(e);
            }
        }
        tracing::debug!(graph = %self.name, elapsed_us = start.elapsed().as_micros() as u64, "graph run");
        Ok(())
    }
}

/// Gather inputs, move outputs out of the workspace, run, and store the
/// outputs back even if the operator failed.
fn run_op(op: &mut dyn Operator, ws: &mut Workspace, sync: bool) -> Result<()> {
    let device = op.device();
    let def = op.def();
    let name = def.display_name().to_string();

    let mut inputs = Vec::with_capacity(def.inputs.len());
    for input in &def.inputs {
        let tensor = ws.fetch(input).ok_or_else(|| Error::MissingInput {
            op: name.clone(),
            what: format!("workspace tensor `{input}`"),
        })?;
        inputs.push(tensor.to_device(device)?);
    }
    let output_names = def.outputs.clone();
    let mut outputs: Vec<Tensor> = output_names
        .iter()
        .map(|out| ws.take_output(out, device))
        .collect();

    tracing::debug!(op = %name, %device, "run");
    let result = op.run_on_device(&inputs, &mut outputs);
    for (out, tensor) in output_names.into_iter().zip(outputs) {
        ws.feed(out, tensor);
    }
    result?;
    if sync {
        op.synchronize()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::OperatorDef;
    use crate::registry::register_builtin_operators;
    use kiln_core::{Device, DeviceKind};

    fn registry() -> OperatorRegistry {
        let mut registry = OperatorRegistry::new();
        register_builtin_operators(&mut registry).unwrap();
        registry
    }

    #[test]
    fn test_copy_chain() {
        let def = GraphDef::new("chain")
            .push(OperatorDef::new("Copy", ["a"], ["b"]))
            .push(OperatorDef::new("Copy", ["b"], ["c"]));
        let mut graph = Graph::build(def, &registry(), ExecutorConfig::default()).unwrap();
        assert_eq!(graph.len(), 2);

        let mut ws = Workspace::new();
        ws.feed("a", Tensor::from_f32(&[1.0, 2.0, 3.0], &[3]));
        graph.run(&mut ws).unwrap();
        assert_eq!(ws.fetch("c").unwrap().data::<f32>().unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(ws.tensor_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_default_device_is_filled_in() {
        let def = GraphDef::new("g").push(OperatorDef::new("Copy", ["a"], ["b"]));
        let graph = Graph::build(def, &registry(), ExecutorConfig::default()).unwrap();
        let op = graph.operators().next().unwrap();
        assert_eq!(op.def().device, Some(Device::Cpu));
    }

    #[test]
    fn test_schema_violation_fails_build() {
        let def = GraphDef::new("g").push(OperatorDef::new("Copy", ["a", "b"], ["c"]));
        let err = Graph::build(def, &registry(), ExecutorConfig::default()).err().unwrap();
        assert!(matches!(err, Error::SchemaViolation { .. }));
    }

    #[test]
    fn test_requires_grad_rejects_builtins() {
        let mut def = GraphDef::new("g").push(OperatorDef::new("Copy", ["a"], ["b"]));
        def.requires_grad = true;
        let err = Graph::build(def, &registry(), ExecutorConfig::default()).err().unwrap();
        assert!(matches!(err, Error::NotDifferentiable(op) if op == "Copy"));
    }

    #[test]
    fn test_requires_grad_checks_schema_first() {
        let mut def = GraphDef::new("g").push(OperatorDef::new("Conv", ["a"], ["b"]));
        def.requires_grad = true;
        let err = Graph::build(def, &registry(), ExecutorConfig::default()).err().unwrap();
        assert!(matches!(err, Error::UnknownOperator(op) if op == "Conv"));

        let mut def = GraphDef::new("g").push(OperatorDef::new("Copy", ["a", "b"], ["c"]));
        def.requires_grad = true;
        let err = Graph::build(def, &registry(), ExecutorConfig::default()).err().unwrap();
        assert!(matches!(err, Error::SchemaViolation { .. }));
    }

    #[test]
    fn test_undeployed_device() {
        let mut registry = OperatorRegistry::new();
        crate::operators::copy::register(&mut registry).unwrap();
        let def = GraphDef::new("g").push(OperatorDef::new("Copy", ["a"], ["b"]));
        let config = ExecutorConfig::default().with_device(Device::Cuda(0));
        if registry.is_deployed("Copy", DeviceKind::Cuda) {
            return;
        }
        let err = Graph::build(def, &registry, config).err().unwrap();
        assert!(matches!(err, Error::UndeployedDevice { device: DeviceKind::Cuda, .. }));
    }

    #[test]
    fn test_missing_input_stops_run() {
        let def = GraphDef::new("g")
            .push(OperatorDef::new("Copy", ["missing"], ["b"]))
            .push(OperatorDef::new("Copy", ["a"], ["c"]));
        let mut graph = Graph::build(def, &registry(), ExecutorConfig::default()).unwrap();
        let mut ws = Workspace::new();
        ws.feed("a", Tensor::from_f32(&[1.0], &[1]));
        let err = graph.run(&mut ws).unwrap_err();
        assert!(matches!(err, Error::MissingInput { .. }));
        assert!(!ws.has("c"));
    }

    #[test]
    fn test_sync_after_each_op() {
        let def = GraphDef::new("g").push(OperatorDef::new("Copy", ["a"], ["b"]));
        let config = ExecutorConfig::default().with_sync_after_each_op(true);
        let mut graph = Graph::build(def, &registry(), config).unwrap();
        let mut ws = Workspace::new();
        ws.feed("a", Tensor::from_f32(&[4.0], &[1]));
        graph.run(&mut ws).unwrap();
        assert_eq!(ws.fetch("b").unwrap().data::<f32>().unwrap(), &[4.0]);
    }
}
