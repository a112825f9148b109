//! OneHot: expand class indices into one-hot rows.

use kiln_core::{Device, Element, Tensor};
use kiln_kernels::{cpu, Context, CpuContext};

use crate::def::OperatorDef;
use crate::operator::{CreateOperator, Operator, OperatorBase};
use crate::registry::OperatorRegistry;
use crate::schema::OpSchema;
use crate::{dispatch_types, Error, Result};

pub const OP_TYPE: &str = "OneHot";

/// Output has the input's shape plus a trailing `depth` axis. Every entry is
/// `off_value` except `y[p, x[p]]`, which is `on_value`.
pub struct OneHotOp<C: Context> {
    base: OperatorBase<C>,
    depth: usize,
    on_value: f32,
    off_value: f32,
}

impl<C: Context> OneHotOp<C> {
    fn run_with_type<T: Element>(&self, inputs: &[Tensor], outputs: &mut [Tensor]) -> Result<()> {
        let x = self.base.input(inputs, 0)?;
        let ctx = self.base.context();
        let count = x.count();
        let indices = x.typed_storage::<T>()?;

        // Validated on the host before the output is written.
        let host = ctx.read_host::<T>(count, indices)?;
        if let Some((position, value)) = cpu::find_out_of_range(&host, self.depth) {
            return Err(Error::IndexOutOfRange {
                op: self.base.name().to_string(),
                value,
                position,
                depth: self.depth,
            });
        }

        let y = self.base.output(outputs, 0)?.mutable_storage::<T>()?;
        ctx.fill(count * self.depth, T::from_f32(self.off_value), y)?;
        ctx.one_hot(count, self.depth, T::from_f32(self.on_value), indices, y)?;
        Ok(())
    }
}

impl<C: Context> Operator for OneHotOp<C> {
    fn def(&self) -> &OperatorDef {
        self.base.def()
    }

    fn device(&self) -> Device {
        self.base.context().device()
    }

    fn run_on_device(&mut self, inputs: &[Tensor], outputs: &mut [Tensor]) -> Result<()> {
        let x = self.base.input(inputs, 0)?;
        let dtype = self.base.dtype_of(x)?;
        self.base
            .output(outputs, 0)?
            .reshape(x.shape().with_trailing(self.depth));
        dispatch_types!(self.base.name(), dtype, [f32], |T| {
            self.run_with_type::<T>(inputs, outputs)
        })
    }

    fn synchronize(&self) -> Result<()> {
        Ok(self.base.context().synchronize()?)
    }
}

impl<C: Context> CreateOperator for OneHotOp<C> {
    type Context = C;

    fn create(base: OperatorBase<C>) -> Result<Self> {
        let depth = base.required_i64("depth")?;
        if depth <= 0 {
            return Err(base.invalid_argument(format!("depth must be positive, got {depth}")));
        }
        let on_value = base.arg_f32("on_value", 1.0)?;
        let off_value = base.arg_f32("off_value", 0.0)?;
        Ok(Self {
            base,
            depth: depth as usize,
            on_value,
            off_value,
        })
    }
}

pub(crate) fn register(registry: &mut OperatorRegistry) -> Result<()> {
    registry.register_schema(
        OpSchema::new(OP_TYPE)
            .num_inputs(1)
            .num_outputs(1)
            .doc("One-hot encode class indices along a new trailing axis of size `depth`."),
    )?;
    registry.deploy::<OneHotOp<CpuContext>>(OP_TYPE)?;
    #[cfg(feature = "cuda")]
    registry.deploy::<OneHotOp<kiln_kernels::CudaContext>>(OP_TYPE)?;
    registry.register_no_gradient(OP_TYPE)
}
