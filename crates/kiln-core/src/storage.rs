use std::sync::Arc;

use crate::{DType, Device, Element, KilnError, Result};

#[cfg(feature = "cuda")]
use cudarc::driver::{CudaDevice, CudaSlice};

/// Backing memory for a tensor.
///
/// Host memory is kept in 8-byte words so that typed views over it are
/// aligned for every supported element type.
#[derive(Debug, Clone)]
pub enum StorageData {
    /// Host memory: words plus the logical byte length.
    Cpu { words: Vec<u64>, nbytes: usize },
    /// CUDA GPU storage with device handle and raw byte buffer.
    #[cfg(feature = "cuda")]
    Cuda {
        device: Arc<CudaDevice>,
        buffer: Arc<CudaSlice<u8>>,
        device_idx: usize,
    },
}

/// Shared, reference-counted allocation of `capacity` elements of one dtype.
///
/// The dtype and device are fixed for the lifetime of the allocation.
/// Cloning a `Storage` shares the block; mutable access copies it first
/// when it is shared (copy-on-write).
#[derive(Debug, Clone)]
pub struct Storage {
    data: Arc<StorageData>,
    dtype: DType,
    device: Device,
    /// Number of elements the block can hold.
    capacity: usize,
}

impl Storage {
    /// Allocate zeroed CPU storage for `numel` elements of the given dtype.
    pub fn zeros(dtype: DType, numel: usize) -> Self {
        let nbytes = dtype.storage_bytes(numel);
        let words = vec![0u64; nbytes.div_ceil(8)];
        Self {
            data: Arc::new(StorageData::Cpu { words, nbytes }),
            dtype,
            device: Device::Cpu,
            capacity: numel,
        }
    }

    /// Allocate zeroed storage on any device.
    pub fn allocate(dtype: DType, numel: usize, device: Device) -> Result<Self> {
        match device {
            Device::Cpu => Ok(Self::zeros(dtype, numel)),
            #[cfg(feature = "cuda")]
            Device::Cuda(idx) => Self::cuda_zeros(dtype, numel, idx),
            #[cfg(not(feature = "cuda"))]
            Device::Cuda(_) => Err(KilnError::CudaError(
                "kiln-core was built without the `cuda` feature".into(),
            )),
        }
    }

    /// Create CPU storage holding a copy of `data`.
    pub fn from_slice<T: Element>(data: &[T]) -> Self {
        let mut storage = Self::zeros(T::DTYPE, data.len());
        if let StorageData::Cpu { words, nbytes } = Arc::make_mut(&mut storage.data) {
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(words.as_mut_slice());
            bytes[..*nbytes].copy_from_slice(bytemuck::cast_slice(data));
        }
        storage
    }

    /// Get the dtype of this storage.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Get the device of this storage.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Number of elements the block can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size in bytes.
    pub fn nbytes(&self) -> usize {
        match self.data.as_ref() {
            StorageData::Cpu { nbytes, .. } => *nbytes,
            #[cfg(feature = "cuda")]
            StorageData::Cuda { buffer, .. } => {
                use cudarc::driver::DeviceSlice;
                buffer.len()
            }
        }
    }

    /// Read-only host bytes. Errors for device-resident storage.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self.data.as_ref() {
            StorageData::Cpu { words, nbytes } => {
                let bytes: &[u8] = bytemuck::cast_slice(words.as_slice());
                Ok(&bytes[..*nbytes])
            }
            #[cfg(feature = "cuda")]
            StorageData::Cuda { .. } => Err(KilnError::DeviceMismatch {
                expected: Device::Cpu,
                got: self.device,
            }),
        }
    }

    /// Mutable host bytes (copy-on-write). Errors for device-resident storage.
    pub fn as_bytes_mut(&mut self) -> Result<&mut [u8]> {
        match Arc::make_mut(&mut self.data) {
            StorageData::Cpu { words, nbytes } => {
                let bytes: &mut [u8] = bytemuck::cast_slice_mut(words.as_mut_slice());
                Ok(&mut bytes[..*nbytes])
            }
            #[cfg(feature = "cuda")]
            StorageData::Cuda { .. } => Err(KilnError::DeviceMismatch {
                expected: Device::Cpu,
                got: self.device,
            }),
        }
    }

    /// Typed host view over the whole block.
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        self.check_dtype::<T>()?;
        Ok(bytemuck::cast_slice(self.as_bytes()?))
    }

    /// Typed mutable host view over the whole block (copy-on-write).
    pub fn as_slice_mut<T: Element>(&mut self) -> Result<&mut [T]> {
        self.check_dtype::<T>()?;
        Ok(bytemuck::cast_slice_mut(self.as_bytes_mut()?))
    }

    fn check_dtype<T: Element>(&self) -> Result<()> {
        if self.dtype != T::DTYPE {
            return Err(KilnError::DTypeMismatch {
                expected: T::DTYPE,
                got: self.dtype,
            });
        }
        Ok(())
    }

    /// Whether this storage is uniquely owned (no other Arc references).
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.data) == 1
    }

    /// Whether two storages share the same block.
    pub fn ptr_eq(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Whether this storage is on CPU.
    pub fn is_cpu(&self) -> bool {
        self.device.is_cpu()
    }

    /// Whether this storage is on a CUDA device.
    pub fn is_cuda(&self) -> bool {
        self.device.is_cuda()
    }

    /// Get the raw StorageData reference (for dispatch).
    pub fn data(&self) -> &StorageData {
        self.data.as_ref()
    }

    /// Create GPU storage with zeroed memory.
    #[cfg(feature = "cuda")]
    pub fn cuda_zeros(dtype: DType, numel: usize, device_idx: usize) -> Result<Self> {
        let nbytes = dtype.storage_bytes(numel);
        let cuda_dev = cuda_device(device_idx)?;
        // Zero-sized device allocations are rejected by the driver.
        let gpu_buf = cuda_dev
            .alloc_zeros::<u8>(nbytes.max(4))
            .map_err(|e| KilnError::CudaError(format!("alloc_zeros({} bytes): {}", nbytes, e)))?;
        Ok(Self {
            data: Arc::new(StorageData::Cuda {
                device: cuda_dev,
                buffer: Arc::new(gpu_buf),
                device_idx,
            }),
            dtype,
            device: Device::Cuda(device_idx),
            capacity: numel,
        })
    }

    /// Copy host storage to a CUDA device (H2D).
    #[cfg(feature = "cuda")]
    pub fn to_cuda(&self, device_idx: usize) -> Result<Self> {
        if self.device == Device::Cuda(device_idx) {
            return Ok(self.clone());
        }
        let host_bytes = self.to_cpu()?.as_bytes()?.to_vec();
        let cuda_dev = cuda_device(device_idx)?;
        let gpu_buf = cuda_dev
            .htod_copy(host_bytes)
            .map_err(|e| KilnError::CudaError(format!("H2D copy: {}", e)))?;
        Ok(Self {
            data: Arc::new(StorageData::Cuda {
                device: cuda_dev,
                buffer: Arc::new(gpu_buf),
                device_idx,
            }),
            dtype: self.dtype,
            device: Device::Cuda(device_idx),
            capacity: self.capacity,
        })
    }

    /// Copy GPU storage back to CPU (D2H).
    #[cfg(feature = "cuda")]
    pub fn to_cpu(&self) -> Result<Self> {
        match self.data.as_ref() {
            StorageData::Cpu { .. } => Ok(self.clone()),
            StorageData::Cuda { device, buffer, .. } => {
                let host_data: Vec<u8> = device
                    .dtoh_sync_copy(buffer.as_ref())
                    .map_err(|e| KilnError::CudaError(format!("D2H copy: {}", e)))?;
                let mut host = Self::zeros(self.dtype, self.capacity);
                let dst = host.as_bytes_mut()?;
                let n = dst.len();
                dst.copy_from_slice(&host_data[..n]);
                Ok(host)
            }
        }
    }

    /// Get the underlying CudaSlice for kernel launches.
    /// Returns None if not on GPU.
    #[cfg(feature = "cuda")]
    pub fn as_cuda_slice(&self) -> Option<&CudaSlice<u8>> {
        match self.data.as_ref() {
            StorageData::Cuda { buffer, .. } => Some(buffer.as_ref()),
            _ => None,
        }
    }

    /// Mutable CudaSlice for kernel outputs (copy-on-write when shared).
    #[cfg(feature = "cuda")]
    pub fn as_cuda_slice_mut(&mut self) -> Option<&mut CudaSlice<u8>> {
        match Arc::make_mut(&mut self.data) {
            StorageData::Cuda { buffer, .. } => Some(Arc::make_mut(buffer)),
            _ => None,
        }
    }

    /// Get the CudaDevice handle. Returns None if not on GPU.
    #[cfg(feature = "cuda")]
    pub fn cuda_device(&self) -> Option<Arc<CudaDevice>> {
        match self.data.as_ref() {
            StorageData::Cuda { device, .. } => Some(Arc::clone(device)),
            _ => None,
        }
    }
}

#[cfg(feature = "cuda")]
static CUDA_DEVICES: std::sync::OnceLock<
    parking_lot::Mutex<std::collections::HashMap<usize, Arc<CudaDevice>>>,
> = std::sync::OnceLock::new();

/// Get or create the process-wide handle for a CUDA ordinal.
#[cfg(feature = "cuda")]
pub fn cuda_device(device_idx: usize) -> Result<Arc<CudaDevice>> {
    let devices = CUDA_DEVICES.get_or_init(|| parking_lot::Mutex::new(Default::default()));
    let mut map = devices.lock();
    if let Some(dev) = map.get(&device_idx) {
        return Ok(Arc::clone(dev));
    }
    let dev = CudaDevice::new(device_idx)
        .map_err(|e| KilnError::CudaError(format!("device {}: {}", device_idx, e)))?;
    map.insert(device_idx, Arc::clone(&dev));
    Ok(dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    #[test]
    fn test_zeros() {
        let s = Storage::zeros(DType::F32, 10);
        assert_eq!(s.dtype(), DType::F32);
        assert_eq!(s.device(), Device::Cpu);
        assert_eq!(s.capacity(), 10);
        assert_eq!(s.nbytes(), 40);
        assert!(s.as_bytes().unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_from_slice() {
        let s = Storage::from_slice(&[1.0f32, 2.0, 3.0]);
        assert_eq!(s.capacity(), 3);
        assert_eq!(s.as_slice::<f32>().unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_odd_sized_f16() {
        let data = [f16::from_f32(1.0), f16::from_f32(-2.0), f16::from_f32(0.5)];
        let s = Storage::from_slice(&data);
        assert_eq!(s.nbytes(), 6);
        assert_eq!(s.as_slice::<f16>().unwrap(), &data);
    }

    #[test]
    fn test_dtype_checked_views() {
        let s = Storage::from_slice(&[1.0f32]);
        assert!(matches!(
            s.as_slice::<f16>(),
            Err(KilnError::DTypeMismatch { expected: DType::F16, got: DType::F32 })
        ));
    }

    #[test]
    fn test_copy_on_write() {
        let s1 = Storage::from_slice(&[1.0f32, 2.0, 3.0]);
        let mut s2 = s1.clone();
        assert!(!s1.is_unique());
        assert!(s1.ptr_eq(&s2));

        s2.as_slice_mut::<f32>().unwrap()[0] = 99.0;

        assert!(!s1.ptr_eq(&s2));
        assert_eq!(s1.as_slice::<f32>().unwrap()[0], 1.0);
        assert_eq!(s2.as_slice::<f32>().unwrap()[0], 99.0);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cuda_allocation_without_feature() {
        let result = Storage::allocate(DType::F32, 4, Device::Cuda(0));
        assert!(matches!(result, Err(KilnError::CudaError(_))));
    }
}
