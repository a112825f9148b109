use std::fmt;

use crate::dtype::{DType, Element};
use crate::device::Device;
use crate::error::KilnError;
use crate::shape::Shape;
use crate::storage::Storage;
use crate::Result;

/// An n-dimensional buffer: a shape, a device, and lazily allocated storage.
///
/// A tensor starts without storage. The first typed mutable access
/// (`mutable_data::<T>()` / `mutable_storage::<T>()`) allocates a block of
/// `T` on the tensor's device. Later accesses reuse the block as long as the
/// dtype matches and its capacity covers the current shape, so reshaping
/// back and forth between shapes of equal or smaller size never reallocates.
///
/// # Examples
///
/// ```
/// use kiln_core::{Device, Tensor};
///
/// let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
/// assert_eq!(t.dims(), &[2, 2]);
/// assert_eq!(t.count(), 4);
///
/// let mut out = Tensor::empty(Device::Cpu);
/// out.reshape_like(&t);
/// out.mutable_data::<f32>().unwrap().copy_from_slice(t.data::<f32>().unwrap());
/// assert_eq!(out.data::<f32>().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
/// ```
#[derive(Clone)]
pub struct Tensor {
    shape: Shape,
    device: Device,
    storage: Option<Storage>,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// An unallocated tensor with zero elements on `device`.
    pub fn empty(device: Device) -> Self {
        Self {
            shape: Shape::new(&[0]),
            device,
            storage: None,
        }
    }

    /// Create a CPU tensor from typed data with the given shape.
    pub fn from_slice<T: Element>(data: &[T], shape: &[usize]) -> Self {
        let s = Shape::new(shape);
        assert_eq!(
            s.numel(),
            data.len(),
            "Shape {:?} requires {} elements, got {}",
            shape,
            s.numel(),
            data.len()
        );
        Self {
            shape: s,
            device: Device::Cpu,
            storage: Some(Storage::from_slice(data)),
        }
    }

    /// Create a CPU tensor from f32 data with the given shape.
    pub fn from_f32(data: &[f32], shape: &[usize]) -> Self {
        Self::from_slice(data, shape)
    }

    /// Create a zeroed CPU tensor with the given shape and dtype.
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let s = Shape::new(shape);
        let storage = Storage::zeros(dtype, s.numel());
        Self {
            shape: s,
            device: Device::Cpu,
            storage: Some(storage),
        }
    }

    /// Create a tensor from pre-built storage and shape.
    pub fn from_storage(storage: Storage, shape: &[usize]) -> Result<Self> {
        let s = Shape::new(shape);
        if storage.capacity() < s.numel() {
            return Err(KilnError::ShapeMismatch {
                expected: vec![storage.capacity()],
                got: shape.to_vec(),
            });
        }
        Ok(Self {
            shape: s,
            device: storage.device(),
            storage: Some(storage),
        })
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Shape of the tensor.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Dimension sizes.
    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    /// Size of dimension `axis`.
    pub fn dim(&self, axis: usize) -> Result<usize> {
        self.shape.dim(axis).ok_or(KilnError::InvalidAxis {
            axis,
            ndim: self.ndim(),
        })
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// Total number of elements.
    pub fn count(&self) -> usize {
        self.shape.numel()
    }

    /// Number of elements spanned by dimensions `axis..`.
    pub fn count_from(&self, axis: usize) -> usize {
        self.shape.count_from(axis)
    }

    /// Element type of the current allocation, if any.
    pub fn dtype(&self) -> Option<DType> {
        self.storage.as_ref().map(|s| s.dtype())
    }

    /// Whether the current allocation holds elements of type `T`.
    pub fn is_type<T: Element>(&self) -> bool {
        self.dtype() == Some(T::DTYPE)
    }

    /// Device.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Whether this tensor is on CPU.
    pub fn is_cpu(&self) -> bool {
        self.device.is_cpu()
    }

    /// Whether this tensor is on a CUDA device.
    pub fn is_cuda(&self) -> bool {
        self.device.is_cuda()
    }

    /// Whether storage has been allocated.
    pub fn is_allocated(&self) -> bool {
        self.storage.is_some()
    }

    /// The current allocation.
    pub fn storage(&self) -> Option<&Storage> {
        self.storage.as_ref()
    }

    // =========================================================================
    // Shape assignment
    // =========================================================================

    /// Assign a new shape. The allocation is kept; a later mutable access
    /// reallocates only if it has become too small.
    pub fn reshape(&mut self, shape: impl Into<Shape>) {
        self.shape = shape.into();
    }

    /// Assign the shape of `other`.
    pub fn reshape_like(&mut self, other: &Tensor) {
        self.shape = other.shape.clone();
    }

    // =========================================================================
    // Data access
    // =========================================================================

    /// The allocation, checked to hold `count()` elements of `T`.
    pub fn typed_storage<T: Element>(&self) -> Result<&Storage> {
        let storage = self.storage.as_ref().ok_or_else(|| {
            KilnError::Uninitialized(format!("no storage for tensor of shape {}", self.shape))
        })?;
        if storage.dtype() != T::DTYPE {
            return Err(KilnError::DTypeMismatch {
                expected: T::DTYPE,
                got: storage.dtype(),
            });
        }
        if storage.capacity() < self.count() {
            return Err(KilnError::Uninitialized(format!(
                "storage holds {} elements but shape {} needs {}",
                storage.capacity(),
                self.shape,
                self.count()
            )));
        }
        Ok(storage)
    }

    /// Typed host view of the first `count()` elements.
    pub fn data<T: Element>(&self) -> Result<&[T]> {
        let count = self.count();
        let slice = self.typed_storage::<T>()?.as_slice::<T>()?;
        Ok(&slice[..count])
    }

    /// The allocation for writing `count()` elements of `T`, allocating
    /// on the tensor's device when absent, of another dtype, or too small.
    /// A block still shared with a live clone is copied on the first write.
    pub fn mutable_storage<T: Element>(&mut self) -> Result<&mut Storage> {
        let count = self.count();
        let reuse = self
            .storage
            .as_ref()
            .is_some_and(|s| s.dtype() == T::DTYPE && s.capacity() >= count);
        if !reuse {
            self.storage = Some(Storage::allocate(T::DTYPE, count, self.device)?);
        }
        self.storage
            .as_mut()
            .ok_or_else(|| KilnError::StorageError("allocation vanished".into()))
    }

    /// Typed mutable host view of the first `count()` elements.
    pub fn mutable_data<T: Element>(&mut self) -> Result<&mut [T]> {
        let count = self.count();
        let slice = self.mutable_storage::<T>()?.as_slice_mut::<T>()?;
        Ok(&mut slice[..count])
    }

    /// Copy the first `count()` elements to a host vector, from any device.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        let storage = self.typed_storage::<T>()?;
        if storage.is_cpu() {
            return Ok(self.data::<T>()?.to_vec());
        }
        #[cfg(feature = "cuda")]
        {
            let host = storage.to_cpu()?;
            Ok(host.as_slice::<T>()?[..self.count()].to_vec())
        }
        #[cfg(not(feature = "cuda"))]
        {
            Err(KilnError::DeviceMismatch {
                expected: Device::Cpu,
                got: storage.device(),
            })
        }
    }

    // =========================================================================
    // Device transfer
    // =========================================================================

    /// Copy this tensor to `device`. No-op clone if already there.
    pub fn to_device(&self, device: Device) -> Result<Tensor> {
        if self.device == device {
            return Ok(self.clone());
        }
        let storage = match &self.storage {
            None => None,
            Some(s) => Some(transfer(s, device)?),
        };
        Ok(Tensor {
            shape: self.shape.clone(),
            device,
            storage,
        })
    }
}

#[cfg(feature = "cuda")]
fn transfer(storage: &Storage, device: Device) -> Result<Storage> {
    match device {
        Device::Cpu => storage.to_cpu(),
        Device::Cuda(idx) => storage.to_cuda(idx),
    }
}

#[cfg(not(feature = "cuda"))]
fn transfer(_storage: &Storage, device: Device) -> Result<Storage> {
    Err(KilnError::CudaError(format!(
        "cannot move tensor to {device}: kiln-core was built without the `cuda` feature"
    )))
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dtype = match self.dtype() {
            Some(d) => d.to_string(),
            None => "unallocated".to_string(),
        };
        write!(f, "Tensor(shape={}, dtype={}, device={})", self.shape, dtype, self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    #[test]
    fn test_from_slice() {
        let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        assert_eq!(t.dims(), &[2, 3]);
        assert_eq!(t.count(), 6);
        assert_eq!(t.dim(1).unwrap(), 3);
        assert!(t.is_type::<f32>());
        assert!(!t.is_type::<f16>());
        assert_eq!(t.data::<f32>().unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    #[should_panic(expected = "requires 4 elements")]
    fn test_from_slice_validates_shape() {
        Tensor::from_f32(&[1.0, 2.0, 3.0], &[2, 2]);
    }

    #[test]
    fn test_dim_out_of_range() {
        let t = Tensor::from_f32(&[1.0, 2.0], &[2]);
        assert!(matches!(t.dim(3), Err(KilnError::InvalidAxis { axis: 3, ndim: 1 })));
    }

    #[test]
    fn test_empty_is_unallocated() {
        let t = Tensor::empty(Device::Cpu);
        assert!(!t.is_allocated());
        assert_eq!(t.dtype(), None);
        assert_eq!(t.count(), 0);
        assert!(matches!(t.data::<f32>(), Err(KilnError::Uninitialized(_))));
    }

    #[test]
    fn test_lazy_allocation() {
        let mut t = Tensor::empty(Device::Cpu);
        t.reshape([2, 2]);
        let data = t.mutable_data::<f16>().unwrap();
        assert_eq!(data.len(), 4);
        assert!(t.is_type::<f16>());
    }

    #[test]
    fn test_reshape_keeps_allocation() {
        let mut t = Tensor::empty(Device::Cpu);
        t.reshape([4, 3]);
        let before = t.mutable_data::<f32>().unwrap().as_ptr();

        t.reshape([4, 3]);
        assert_eq!(t.mutable_data::<f32>().unwrap().as_ptr(), before);

        // Smaller shapes fit in the same block.
        t.reshape([2, 3]);
        assert_eq!(t.mutable_data::<f32>().unwrap().as_ptr(), before);
    }

    #[test]
    fn test_reshape_grows_allocation() {
        let mut t = Tensor::empty(Device::Cpu);
        t.reshape([2]);
        let before = t.mutable_data::<f32>().unwrap().as_ptr();

        t.reshape([8]);
        assert!(matches!(t.data::<f32>(), Err(KilnError::Uninitialized(_))));
        assert_ne!(t.mutable_data::<f32>().unwrap().as_ptr(), before);
        assert_eq!(t.storage().unwrap().capacity(), 8);
    }

    #[test]
    fn test_write_to_shared_block_copies() {
        let mut t = Tensor::from_f32(&[1.0, 2.0], &[2]);
        let alias = t.clone();
        t.mutable_data::<f32>().unwrap()[0] = 5.0;
        assert_eq!(t.data::<f32>().unwrap(), &[5.0, 2.0]);
        assert_eq!(alias.data::<f32>().unwrap(), &[1.0, 2.0]);
        assert!(!t.storage().unwrap().ptr_eq(alias.storage().unwrap()));
    }

    #[test]
    fn test_dtype_change_reallocates() {
        let mut t = Tensor::from_f32(&[1.0, 2.0], &[2]);
        t.mutable_data::<f16>().unwrap();
        assert_eq!(t.dtype(), Some(DType::F16));
        assert!(matches!(
            t.data::<f32>(),
            Err(KilnError::DTypeMismatch { expected: DType::F32, got: DType::F16 })
        ));
    }

    #[test]
    fn test_to_vec_cpu() {
        let t = Tensor::from_slice(&[3i32, 4, 5], &[3]);
        assert_eq!(t.to_vec::<i32>().unwrap(), vec![3, 4, 5]);
    }

    #[test]
    fn test_debug() {
        let t = Tensor::from_f32(&[1.0], &[1]);
        assert_eq!(format!("{:?}", t), "Tensor(shape=[1], dtype=f32, device=cpu)");
    }
}
