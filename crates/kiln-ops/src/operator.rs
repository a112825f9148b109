//! Operator base and dispatch core.
//!
//! Dispatch happens on two axes:
//!
//! - **Device**, once at build time: each concrete operator is generic over a
//!   [`Context`], and the registry maps `(op_type, DeviceKind)` to a creator
//!   for the matching monomorphization.
//! - **Element type**, once per run: `run_on_device` shapes the outputs, reads
//!   the runtime dtype of the relevant input and calls its generic
//!   `run_with_type::<T>` through [`dispatch_types!`](crate::dispatch_types).

use kiln_core::{DType, Device, KilnError, Tensor};
use kiln_kernels::Context;

use crate::def::{Argument, OperatorDef};
use crate::{Error, Result};

/// A built operator instance, ready to run.
pub trait Operator: Send {
    fn def(&self) -> &OperatorDef;

    /// Device the operator's context is bound to.
    fn device(&self) -> Device;

    /// Shape the outputs and compute them from the inputs.
    ///
    /// `inputs` and `outputs` are in definition order. When this returns
    /// `Ok`, every output is shaped and holds its final values.
    fn run_on_device(&mut self, inputs: &[Tensor], outputs: &mut [Tensor]) -> Result<()>;

    /// Wait for device work issued by `run_on_device` to finish.
    fn synchronize(&self) -> Result<()>;
}

/// Construction of an operator for one context type.
///
/// The registry deploys an implementor under `Self::Context::KIND`.
pub trait CreateOperator: Operator + Sized + 'static {
    type Context: Context;

    fn create(base: OperatorBase<Self::Context>) -> Result<Self>;
}

/// Definition plus bound context, shared by every concrete operator.
///
/// Also carries the typed argument getters operators use to parse their
/// configuration once at construction.
pub struct OperatorBase<C: Context> {
    def: OperatorDef,
    context: C,
}

impl<C: Context> OperatorBase<C> {
    pub fn new(def: OperatorDef, device: Device) -> Result<Self> {
        let context = C::new(device)?;
        Ok(Self { def, context })
    }

    pub fn def(&self) -> &OperatorDef {
        &self.def
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// Label used in errors and logs.
    pub fn name(&self) -> &str {
        self.def.display_name()
    }

    pub fn arg(&self, name: &str) -> Option<&Argument> {
        self.def.args.get(name)
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.def.args.contains_key(name)
    }

    /// Integer argument, or `default` when absent.
    pub fn arg_i64(&self, name: &str, default: i64) -> Result<i64> {
        match self.arg(name) {
            None => Ok(default),
            Some(Argument::Int(v)) => Ok(*v),
            Some(other) => Err(self.wrong_kind(name, "int", other)),
        }
    }

    /// Float argument, or `default` when absent. Integers are widened.
    pub fn arg_f32(&self, name: &str, default: f32) -> Result<f32> {
        match self.arg(name) {
            None => Ok(default),
            Some(Argument::Float(v)) => Ok(*v),
            Some(Argument::Int(v)) => Ok(*v as f32),
            Some(other) => Err(self.wrong_kind(name, "float", other)),
        }
    }

    /// Integer list argument, empty when absent. A single int is a list of one.
    pub fn arg_ints(&self, name: &str) -> Result<Vec<i64>> {
        match self.arg(name) {
            None => Ok(Vec::new()),
            Some(Argument::Ints(v)) => Ok(v.clone()),
            Some(Argument::Int(v)) => Ok(vec![*v]),
            Some(other) => Err(self.wrong_kind(name, "ints", other)),
        }
    }

    /// Integer argument that must be present.
    pub fn required_i64(&self, name: &str) -> Result<i64> {
        if !self.has_arg(name) {
            return Err(self.invalid_argument(format!("missing required argument `{name}`")));
        }
        self.arg_i64(name, 0)
    }

    pub fn invalid_argument(&self, msg: impl Into<String>) -> Error {
        Error::InvalidArgument {
            op: self.name().to_string(),
            msg: msg.into(),
        }
    }

    pub fn shape_mismatch(&self, msg: impl Into<String>) -> Error {
        Error::ShapeMismatch {
            op: self.name().to_string(),
            msg: msg.into(),
        }
    }

    /// Input slot `idx`.
    pub fn input<'a>(&self, inputs: &'a [Tensor], idx: usize) -> Result<&'a Tensor> {
        inputs.get(idx).ok_or_else(|| Error::MissingInput {
            op: self.name().to_string(),
            what: format!("input {idx}"),
        })
    }

    /// Element type of an input, which must already hold data.
    pub fn dtype_of(&self, tensor: &Tensor) -> Result<DType> {
        tensor.dtype().ok_or_else(|| {
            KilnError::Uninitialized(format!(
                "{}: input of shape {} has no data",
                self.name(),
                tensor.shape()
            ))
            .into()
        })
    }

    /// Output slot `idx`.
    pub fn output<'a>(&self, outputs: &'a mut [Tensor], idx: usize) -> Result<&'a mut Tensor> {
        outputs.get_mut(idx).ok_or_else(|| Error::MissingInput {
            op: self.name().to_string(),
            what: format!("output {idx}"),
        })
    }

    fn wrong_kind(&self, name: &str, expected: &str, got: &Argument) -> Error {
        self.invalid_argument(format!(
            "argument `{name}` must be {expected}, got {}",
            got.kind()
        ))
    }
}

/// Dispatch a runtime [`DType`](kiln_core::DType) to a generic body.
///
/// Lists every supported element type explicitly. Inside the body the
/// chosen type is bound to the given identifier. When nothing matches,
/// evaluates to `Err(Error::UnsupportedDType)` naming the operator, the
/// offending dtype and the supported list.
///
/// ```ignore
/// dispatch_types!(self.base.name(), dtype, [f32, f16], |T| {
///     self.run_with_type::<T>(inputs, outputs)
/// })
/// ```
#[macro_export]
macro_rules! dispatch_types {
    ($op:expr, $dtype:expr, [$($ty:ty),+ $(,)?], |$t:ident| $body:expr) => {{
        let dtype: $crate::DType = $dtype;
        $(
            if dtype == <$ty as $crate::Element>::DTYPE {
                #[allow(non_camel_case_types, dead_code)]
                type $t = $ty;
                $body
            } else
        )+
        {
            Err($crate::Error::UnsupportedDType {
                op: ($op).to_string(),
                dtype,
                supported: vec![$(<$ty as $crate::Element>::DTYPE),+],
            })
        }
    }};
}
