//! Execution contexts.
//!
//! A context is the device-side half of an operator: it owns whatever the
//! device needs (nothing on the host, a driver handle on CUDA) and exposes the
//! handful of primitives operator kernels are written against. Kernels take
//! typed storage blocks plus an element count, so one generic operator body
//! runs unchanged on every device that implements the trait.

use kiln_core::{Device, DeviceKind, Element, KilnError, Result, Storage};

use crate::cpu;

/// Device primitives used by operator kernels.
///
/// Every method checks that the storage it touches lives on this context's
/// device and holds elements of `T`.
pub trait Context: Send + Sized + 'static {
    /// Device family this context serves.
    const KIND: DeviceKind;

    /// Bind a context to a concrete device of kind [`Self::KIND`].
    fn new(device: Device) -> Result<Self>;

    fn device(&self) -> Device;

    /// Copy `count` elements from `src` into `dst`.
    fn copy<T: Element>(&self, count: usize, dst: &mut Storage, src: &Storage) -> Result<()>;

    /// Set `count` elements of `dst` to `value`.
    fn fill<T: Element>(&self, count: usize, value: T, dst: &mut Storage) -> Result<()>;

    /// Write `on_value` at `y[p * depth + x[p]]` for every `p < count`.
    fn one_hot<T: Element>(
        &self,
        count: usize,
        depth: usize,
        on_value: T,
        x: &Storage,
        y: &mut Storage,
    ) -> Result<()>;

    /// Copy `count` elements of `src` into a host vector.
    fn read_host<T: Element>(&self, count: usize, src: &Storage) -> Result<Vec<T>>;

    /// Copy host `values` into the front of `dst`.
    fn write_host<T: Element>(&self, dst: &mut Storage, values: &[T]) -> Result<()>;

    /// Block until all work queued on this context has finished.
    fn synchronize(&self) -> Result<()>;
}

/// Host execution context.
#[derive(Debug, Clone, Default)]
pub struct CpuContext;

impl CpuContext {
    fn check(&self, storage: &Storage) -> Result<()> {
        if !storage.is_cpu() {
            return Err(KilnError::DeviceMismatch {
                expected: Device::Cpu,
                got: storage.device(),
            });
        }
        Ok(())
    }
}

impl Context for CpuContext {
    const KIND: DeviceKind = DeviceKind::Cpu;

    fn new(device: Device) -> Result<Self> {
        match device {
            Device::Cpu => Ok(CpuContext),
            other => Err(KilnError::DeviceMismatch {
                expected: Device::Cpu,
                got: other,
            }),
        }
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn copy<T: Element>(&self, count: usize, dst: &mut Storage, src: &Storage) -> Result<()> {
        self.check(src)?;
        self.check(dst)?;
        tracing::trace!(count, dtype = %T::DTYPE, "cpu copy");
        cpu::copy(count, src.as_slice::<T>()?, dst.as_slice_mut::<T>()?)
    }

    fn fill<T: Element>(&self, count: usize, value: T, dst: &mut Storage) -> Result<()> {
        self.check(dst)?;
        tracing::trace!(count, dtype = %T::DTYPE, "cpu fill");
        cpu::fill(count, value, dst.as_slice_mut::<T>()?)
    }

    fn one_hot<T: Element>(
        &self,
        count: usize,
        depth: usize,
        on_value: T,
        x: &Storage,
        y: &mut Storage,
    ) -> Result<()> {
        self.check(x)?;
        self.check(y)?;
        tracing::trace!(count, depth, dtype = %T::DTYPE, "cpu one_hot");
        cpu::one_hot(count, depth, on_value, x.as_slice::<T>()?, y.as_slice_mut::<T>()?)
    }

    fn read_host<T: Element>(&self, count: usize, src: &Storage) -> Result<Vec<T>> {
        self.check(src)?;
        let data = src.as_slice::<T>()?;
        data.get(..count).map(<[T]>::to_vec).ok_or_else(|| {
            KilnError::StorageError(format!(
                "read of {count} elements from a block of {}",
                data.len()
            ))
        })
    }

    fn write_host<T: Element>(&self, dst: &mut Storage, values: &[T]) -> Result<()> {
        self.check(dst)?;
        cpu::copy(values.len(), values, dst.as_slice_mut::<T>()?)
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}
