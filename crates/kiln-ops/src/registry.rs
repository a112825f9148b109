//! Schema, deployment and gradient registries.

use std::collections::HashMap;
use std::sync::OnceLock;

use kiln_core::{Device, DeviceKind};
use kiln_kernels::Context;

use crate::def::OperatorDef;
use crate::operator::{CreateOperator, Operator, OperatorBase};
use crate::schema::OpSchema;
use crate::{Error, Result};

/// Builds an operator instance for a definition on a concrete device.
pub type OperatorCreator = fn(OperatorDef, Device) -> Result<Box<dyn Operator>>;

/// Gradient registration for an operator type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradientEntry {
    /// The operator is explicitly not differentiable.
    None,
    /// Gradient computed by the named operator type.
    Op(String),
}

/// Everything known about operator types: arity, per-device creators and
/// gradient registrations.
///
/// Registration fails on duplicates instead of overwriting.
///
/// # Example
///
/// ```
/// use kiln_ops::{register_builtin_operators, OperatorRegistry};
/// use kiln_core::DeviceKind;
///
/// let mut registry = OperatorRegistry::new();
/// register_builtin_operators(&mut registry).unwrap();
/// assert!(registry.is_deployed("Copy", DeviceKind::Cpu));
/// ```
#[derive(Default)]
pub struct OperatorRegistry {
    schemas: HashMap<String, OpSchema>,
    deployments: HashMap<(String, DeviceKind), OperatorCreator>,
    gradients: HashMap<String, GradientEntry>,
}

impl OperatorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Schemas
    // =========================================================================

    pub fn register_schema(&mut self, schema: OpSchema) -> Result<()> {
        if self.schemas.contains_key(schema.name()) {
            return Err(Error::DuplicateRegistration {
                op: schema.name().to_string(),
                what: "schema".into(),
            });
        }
        tracing::debug!(op = schema.name(), "registered schema");
        self.schemas.insert(schema.name().to_string(), schema);
        Ok(())
    }

    pub fn schema(&self, op_type: &str) -> Option<&OpSchema> {
        self.schemas.get(op_type)
    }

    /// Registered operator types, sorted.
    pub fn op_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    // =========================================================================
    // Deployments
    // =========================================================================

    pub fn register_deployment(
        &mut self,
        op_type: &str,
        kind: DeviceKind,
        creator: OperatorCreator,
    ) -> Result<()> {
        let key = (op_type.to_string(), kind);
        if self.deployments.contains_key(&key) {
            return Err(Error::DuplicateRegistration {
                op: op_type.to_string(),
                what: format!("{kind} deployment"),
            });
        }
        tracing::debug!(op = op_type, device = %kind, "registered deployment");
        self.deployments.insert(key, creator);
        Ok(())
    }

    /// Deploy `O` for `op_type` on the device kind of its context.
    pub fn deploy<O: CreateOperator>(&mut self, op_type: &str) -> Result<()> {
        self.register_deployment(op_type, O::Context::KIND, create::<O>)
    }

    pub fn is_deployed(&self, op_type: &str, kind: DeviceKind) -> bool {
        self.deployments.contains_key(&(op_type.to_string(), kind))
    }

    /// Device kinds `op_type` is deployed on, CPU first.
    pub fn deployed_kinds(&self, op_type: &str) -> Vec<DeviceKind> {
        [DeviceKind::Cpu, DeviceKind::Cuda]
            .into_iter()
            .filter(|&kind| self.is_deployed(op_type, kind))
            .collect()
    }

    // =========================================================================
    // Gradients
    // =========================================================================

    pub fn register_no_gradient(&mut self, op_type: &str) -> Result<()> {
        self.register_gradient_entry(op_type, GradientEntry::None)
    }

    pub fn register_gradient(&mut self, op_type: &str, grad_op: &str) -> Result<()> {
        self.register_gradient_entry(op_type, GradientEntry::Op(grad_op.to_string()))
    }

    fn register_gradient_entry(&mut self, op_type: &str, entry: GradientEntry) -> Result<()> {
        if self.gradients.contains_key(op_type) {
            return Err(Error::DuplicateRegistration {
                op: op_type.to_string(),
                what: "gradient".into(),
            });
        }
        self.gradients.insert(op_type.to_string(), entry);
        Ok(())
    }

    pub fn gradient(&self, op_type: &str) -> Option<&GradientEntry> {
        self.gradients.get(op_type)
    }

    /// Check that `op_type` can be part of a differentiable graph.
    pub fn check_differentiable(&self, op_type: &str) -> Result<()> {
        match self.gradient(op_type) {
            Some(GradientEntry::Op(_)) => Ok(()),
            Some(GradientEntry::None) => Err(Error::NotDifferentiable(op_type.to_string())),
            None => Err(Error::MissingGradient(op_type.to_string())),
        }
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Build an operator for `def` on `device`.
    ///
    /// Verifies the schema before anything else, so arity errors surface
    /// before a context is created or a kernel can run.
    pub fn create_operator(&self, def: OperatorDef, device: Device) -> Result<Box<dyn Operator>> {
        let schema = self
            .schema(&def.op_type)
            .ok_or_else(|| Error::UnknownOperator(def.op_type.clone()))?;
        schema.verify(&def)?;

        let kind = device.kind();
        let creator = self
            .deployments
            .get(&(def.op_type.clone(), kind))
            .ok_or_else(|| Error::UndeployedDevice {
                op: def.op_type.clone(),
                device: kind,
            })?;
        tracing::debug!(op = def.display_name(), op_type = %def.op_type, %device, "creating operator");
        creator(def, device)
    }
}

fn create<O: CreateOperator>(def: OperatorDef, device: Device) -> Result<Box<dyn Operator>> {
    let base = OperatorBase::<O::Context>::new(def, device)?;
    Ok(Box::new(O::create(base)?))
}

/// Register Copy, Accuracy and OneHot with their schemas, deployments and
/// (absent) gradients.
pub fn register_builtin_operators(registry: &mut OperatorRegistry) -> Result<()> {
    crate::operators::copy::register(registry)?;
    crate::operators::accuracy::register(registry)?;
    crate::operators::one_hot::register(registry)?;
    tracing::info!(count = registry.len(), "registered built-in operators");
    Ok(())
}

static GLOBAL: OnceLock<OperatorRegistry> = OnceLock::new();

/// Process-wide registry holding the built-in operators.
///
/// Built on first use. A registration failure is returned to the caller and
/// leaves the registry unset, so the next call reports it again.
pub fn global_registry() -> Result<&'static OperatorRegistry> {
    init_once(&GLOBAL, register_builtin_operators)
}

fn init_once(
    slot: &OnceLock<OperatorRegistry>,
    register: impl FnOnce(&mut OperatorRegistry) -> Result<()>,
) -> Result<&OperatorRegistry> {
    if let Some(registry) = slot.get() {
        return Ok(registry);
    }
    let mut registry = OperatorRegistry::new();
    register(&mut registry)?;
    Ok(slot.get_or_init(|| registry))
}
