//! CUDA execution context.
//!
//! Device handles come from the process-wide cache in `kiln_core::storage`,
//! so a context and the tensors it works on always share one `CudaDevice`.

use std::sync::Arc;

use bytemuck::Zeroable;
use cudarc::driver::{CudaDevice, CudaSlice};
use kiln_core::{DType, Device, DeviceKind, Element, KilnError, Storage};

use super::ops;
use crate::context::Context;

/// CUDA-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum CudaError {
    #[error("CUDA device init failed: {0}")]
    DeviceInit(String),

    #[error("PTX compilation failed for module '{module}': {msg}")]
    PtxCompile { module: String, msg: String },

    #[error("Failed to load module '{module}': {msg}")]
    ModuleLoad { module: String, msg: String },

    #[error("Function '{func}' not found in module '{module}'")]
    FuncNotFound { module: String, func: String },

    #[error("CUDA kernel launch failed: {0}")]
    LaunchError(String),

    #[error("CUDA memory error: {0}")]
    MemoryError(String),
}

impl From<CudaError> for KilnError {
    fn from(e: CudaError) -> Self {
        KilnError::CudaError(e.to_string())
    }
}

/// Check if any CUDA device is available.
pub fn is_cuda_available() -> bool {
    CudaDevice::new(0).is_ok()
}

/// Number of available CUDA devices.
pub fn device_count() -> usize {
    CudaDevice::count().map(|n| n as usize).unwrap_or(0)
}

/// Execution context bound to one CUDA ordinal.
#[derive(Debug)]
pub struct CudaContext {
    device_idx: usize,
    dev: Arc<CudaDevice>,
}

impl CudaContext {
    /// Driver handle for this context's device.
    pub fn cuda_device(&self) -> &Arc<CudaDevice> {
        &self.dev
    }

    fn check<T: Element>(&self, storage: &Storage) -> kiln_core::Result<()> {
        if storage.device() != Device::Cuda(self.device_idx) {
            return Err(KilnError::DeviceMismatch {
                expected: self.device(),
                got: storage.device(),
            });
        }
        if storage.dtype() != T::DTYPE {
            return Err(KilnError::DTypeMismatch {
                expected: T::DTYPE,
                got: storage.dtype(),
            });
        }
        Ok(())
    }

    fn buffer<'a>(&self, storage: &'a Storage) -> kiln_core::Result<&'a CudaSlice<u8>> {
        storage
            .as_cuda_slice()
            .ok_or_else(|| KilnError::StorageError("storage has no device buffer".into()))
    }

    fn buffer_mut<'a>(&self, storage: &'a mut Storage) -> kiln_core::Result<&'a mut CudaSlice<u8>> {
        storage
            .as_cuda_slice_mut()
            .ok_or_else(|| KilnError::StorageError("storage has no device buffer".into()))
    }
}

impl Context for CudaContext {
    const KIND: DeviceKind = DeviceKind::Cuda;

    fn new(device: Device) -> kiln_core::Result<Self> {
        match device {
            Device::Cuda(device_idx) => Ok(Self {
                device_idx,
                dev: kiln_core::storage::cuda_device(device_idx)?,
            }),
            other => Err(KilnError::DeviceMismatch {
                expected: Device::Cuda(0),
                got: other,
            }),
        }
    }

    fn device(&self) -> Device {
        Device::Cuda(self.device_idx)
    }

    fn copy<T: Element>(&self, count: usize, dst: &mut Storage, src: &Storage) -> kiln_core::Result<()> {
        self.check::<T>(src)?;
        self.check::<T>(dst)?;
        tracing::trace!(count, dtype = %T::DTYPE, device = self.device_idx, "cuda copy");
        let nbytes = T::DTYPE.storage_bytes(count);
        let src = self.buffer(src)?;
        ops::cuda_copy(&self.dev, src, self.buffer_mut(dst)?, nbytes)?;
        Ok(())
    }

    fn fill<T: Element>(&self, count: usize, value: T, dst: &mut Storage) -> kiln_core::Result<()> {
        self.check::<T>(dst)?;
        tracing::trace!(count, dtype = %T::DTYPE, device = self.device_idx, "cuda fill");
        let pattern = bytemuck::bytes_of(&value);
        ops::cuda_fill(&self.dev, self.device_idx, self.buffer_mut(dst)?, pattern, count)?;
        Ok(())
    }

    fn one_hot<T: Element>(
        &self,
        count: usize,
        depth: usize,
        on_value: T,
        x: &Storage,
        y: &mut Storage,
    ) -> kiln_core::Result<()> {
        self.check::<T>(x)?;
        self.check::<T>(y)?;
        tracing::trace!(count, depth, dtype = %T::DTYPE, device = self.device_idx, "cuda one_hot");
        let x = self.buffer(x)?;
        let y = self.buffer_mut(y)?;
        match T::DTYPE {
            DType::F32 => {
                let on: f32 = bytemuck::try_cast(on_value)
                    .map_err(|e| KilnError::StorageError(e.to_string()))?;
                ops::cuda_one_hot_f32(&self.dev, self.device_idx, x, y, on, count, depth)?;
            }
            DType::F64 => {
                let on: f64 = bytemuck::try_cast(on_value)
                    .map_err(|e| KilnError::StorageError(e.to_string()))?;
                ops::cuda_one_hot_f64(&self.dev, self.device_idx, x, y, on, count, depth)?;
            }
            other => return Err(KilnError::UnsupportedDType(other)),
        }
        Ok(())
    }

    fn read_host<T: Element>(&self, count: usize, src: &Storage) -> kiln_core::Result<Vec<T>> {
        self.check::<T>(src)?;
        let nbytes = T::DTYPE.storage_bytes(count);
        let buf = self.buffer(src)?;
        if src.nbytes() < nbytes {
            return Err(KilnError::StorageError(format!(
                "read of {nbytes} bytes from a block of {}",
                src.nbytes()
            )));
        }
        let bytes: Vec<u8> = self
            .dev
            .dtoh_sync_copy(&buf.slice(..nbytes))
            .map_err(|e| CudaError::MemoryError(format!("D2H copy: {}", e)))?;
        let mut out = vec![T::zeroed(); count];
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&bytes);
        Ok(out)
    }

    fn write_host<T: Element>(&self, dst: &mut Storage, values: &[T]) -> kiln_core::Result<()> {
        self.check::<T>(dst)?;
        let bytes: &[u8] = bytemuck::cast_slice(values);
        if dst.nbytes() < bytes.len() {
            return Err(KilnError::StorageError(format!(
                "write of {} bytes into a block of {}",
                bytes.len(),
                dst.nbytes()
            )));
        }
        if bytes.is_empty() {
            return Ok(());
        }
        let dev = Arc::clone(&self.dev);
        let buf = self.buffer_mut(dst)?;
        let mut view = buf.slice_mut(..bytes.len());
        dev.htod_sync_copy_into(bytes, &mut view)
            .map_err(|e| CudaError::MemoryError(format!("H2D copy: {}", e)))?;
        Ok(())
    }

    fn synchronize(&self) -> kiln_core::Result<()> {
        self.dev
            .synchronize()
            .map_err(|e| CudaError::LaunchError(format!("synchronize: {}", e)))?;
        Ok(())
    }
}
