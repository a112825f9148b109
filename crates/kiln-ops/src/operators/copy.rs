//! Copy: `y = x`, elementwise, same shape.

use kiln_core::{f16, Device, Element, Tensor};
use kiln_kernels::{Context, CpuContext};

use crate::def::OperatorDef;
use crate::operator::{CreateOperator, Operator, OperatorBase};
use crate::registry::OperatorRegistry;
use crate::schema::OpSchema;
use crate::{dispatch_types, Result};

pub const OP_TYPE: &str = "Copy";

pub struct CopyOp<C: Context> {
    base: OperatorBase<C>,
}

impl<C: Context> CopyOp<C> {
    fn run_with_type<T: Element>(&self, inputs: &[Tensor], outputs: &mut [Tensor]) -> Result<()> {
        let x = self.base.input(inputs, 0)?;
        let count = x.count();
        let src = x.typed_storage::<T>()?;
        let dst = self.base.output(outputs, 0)?.mutable_storage::<T>()?;
        self.base.context().copy::<T>(count, dst, src)?;
        Ok(())
    }
}

impl<C: Context> Operator for CopyOp<C> {
    fn def(&self) -> &OperatorDef {
        self.base.def()
    }

    fn device(&self) -> Device {
        self.base.context().device()
    }

    fn run_on_device(&mut self, inputs: &[Tensor], outputs: &mut [Tensor]) -> Result<()> {
        let x = self.base.input(inputs, 0)?;
        let dtype = self.base.dtype_of(x)?;
        self.base.output(outputs, 0)?.reshape_like(x);
        dispatch_types!(self.base.name(), dtype, [f32, f16], |T| {
            self.run_with_type::<T>(inputs, outputs)
        })
    }

    fn synchronize(&self) -> Result<()> {
        Ok(self.base.context().synchronize()?)
    }
}

impl<C: Context> CreateOperator for CopyOp<C> {
    type Context = C;

    fn create(base: OperatorBase<C>) -> Result<Self> {
        Ok(Self { base })
    }
}

pub(crate) fn register(registry: &mut OperatorRegistry) -> Result<()> {
    registry.register_schema(
        OpSchema::new(OP_TYPE)
            .num_inputs(1)
            .num_outputs(1)
            .doc("Copy the input into the output, keeping shape and element type."),
    )?;
    registry.deploy::<CopyOp<CpuContext>>(OP_TYPE)?;
    #[cfg(feature = "cuda")]
    registry.deploy::<CopyOp<kiln_kernels::CudaContext>>(OP_TYPE)?;
    registry.register_no_gradient(OP_TYPE)
}
