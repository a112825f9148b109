//! GPU integration tests for the CUDA execution context.
//! Run with: cargo test -p kiln-kernels --features cuda -- --nocapture

#![cfg(feature = "cuda")]

use kiln_core::{DType, Device, Storage};
use kiln_kernels::{Context, CudaContext};

fn ctx() -> CudaContext {
    CudaContext::new(Device::Cuda(0)).expect("Failed to create CUDA context")
}

#[test]
fn test_fill_and_read() {
    let ctx = ctx();
    let mut s = Storage::allocate(DType::F32, 10, Device::Cuda(0)).unwrap();
    ctx.fill(10, 2.5f32, &mut s).unwrap();
    ctx.synchronize().unwrap();
    assert_eq!(ctx.read_host::<f32>(10, &s).unwrap(), vec![2.5; 10]);
}

#[test]
fn test_copy_partial() {
    let ctx = ctx();
    let mut src = Storage::allocate(DType::F32, 4, Device::Cuda(0)).unwrap();
    ctx.write_host(&mut src, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let mut dst = Storage::allocate(DType::F32, 4, Device::Cuda(0)).unwrap();
    ctx.copy::<f32>(3, &mut dst, &src).unwrap();
    assert_eq!(ctx.read_host::<f32>(4, &dst).unwrap(), vec![1.0, 2.0, 3.0, 0.0]);
}

#[test]
fn test_one_hot() {
    let ctx = ctx();
    let mut x = Storage::allocate(DType::F32, 3, Device::Cuda(0)).unwrap();
    ctx.write_host(&mut x, &[2.0f32, 0.0, 1.0]).unwrap();
    let mut y = Storage::allocate(DType::F32, 9, Device::Cuda(0)).unwrap();
    ctx.fill(9, 0.0f32, &mut y).unwrap();
    ctx.one_hot(3, 3, 1.0f32, &x, &mut y).unwrap();
    assert_eq!(
        ctx.read_host::<f32>(9, &y).unwrap(),
        vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
    );
}

#[test]
fn test_one_hot_f64() {
    let ctx = ctx();
    let mut x = Storage::allocate(DType::F64, 2, Device::Cuda(0)).unwrap();
    ctx.write_host(&mut x, &[1.0f64, 3.0]).unwrap();
    let mut y = Storage::allocate(DType::F64, 8, Device::Cuda(0)).unwrap();
    ctx.fill(8, -1.0f64, &mut y).unwrap();
    ctx.one_hot(2, 4, 0.5f64, &x, &mut y).unwrap();
    ctx.synchronize().unwrap();
    assert_eq!(
        ctx.read_host::<f64>(8, &y).unwrap(),
        vec![-1.0, 0.5, -1.0, -1.0, -1.0, -1.0, -1.0, 0.5]
    );
}

#[test]
fn test_rejects_host_storage() {
    let ctx = ctx();
    let mut s = Storage::zeros(DType::F32, 2);
    assert!(ctx.fill(2, 1.0f32, &mut s).is_err());
}
