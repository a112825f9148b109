//! CUDA kernel dispatch over raw byte buffers.
//!
//! Buffers are the `CudaSlice<u8>` blocks held by `kiln_core::Storage`;
//! element counts are passed explicitly and every kernel writes in place.

use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaSlice, LaunchAsync};

use super::context::CudaError;
use super::launch::{get_or_load_func, grid_1d, KernelModule};

const FILL: KernelModule = KernelModule {
    name: "kiln_fill",
    source: include_str!("kernels/fill.cu"),
    functions: &["fill_u8", "fill_u16", "fill_u32", "fill_u64"],
};

const ONE_HOT: KernelModule = KernelModule {
    name: "kiln_one_hot",
    source: include_str!("kernels/one_hot.cu"),
    functions: &["one_hot_f32", "one_hot_f64"],
};

const BLOCK_SIZE: usize = 256;

fn check_len(buf: &CudaSlice<u8>, nbytes: usize) -> Result<(), CudaError> {
    use cudarc::driver::DeviceSlice;
    if buf.len() < nbytes {
        return Err(CudaError::MemoryError(format!(
            "buffer holds {} bytes, {} needed",
            buf.len(),
            nbytes
        )));
    }
    Ok(())
}

/// Broadcast an element-sized bit pattern over the first `n` elements of `y`.
///
/// `pattern` holds the element's bytes in native order; its length selects
/// the kernel (1, 2, 4 or 8 bytes).
pub fn cuda_fill(
    dev: &Arc<CudaDevice>,
    dev_idx: usize,
    y: &mut CudaSlice<u8>,
    pattern: &[u8],
    n: usize,
) -> Result<(), CudaError> {
    if n == 0 {
        return Ok(());
    }
    check_len(y, n * pattern.len())?;
    let cfg = grid_1d(n, BLOCK_SIZE);
    let n = n as u32;
    let launched = match *pattern {
        [b] => {
            let f = get_or_load_func(dev, dev_idx, &FILL, "fill_u8")?;
            unsafe { f.launch(cfg, (y, b, n)) }
        }
        [b0, b1] => {
            let f = get_or_load_func(dev, dev_idx, &FILL, "fill_u16")?;
            unsafe { f.launch(cfg, (y, u16::from_ne_bytes([b0, b1]), n)) }
        }
        [b0, b1, b2, b3] => {
            let f = get_or_load_func(dev, dev_idx, &FILL, "fill_u32")?;
            unsafe { f.launch(cfg, (y, u32::from_ne_bytes([b0, b1, b2, b3]), n)) }
        }
        [b0, b1, b2, b3, b4, b5, b6, b7] => {
            let bits = u64::from_ne_bytes([b0, b1, b2, b3, b4, b5, b6, b7]);
            let f = get_or_load_func(dev, dev_idx, &FILL, "fill_u64")?;
            unsafe { f.launch(cfg, (y, bits, n)) }
        }
        _ => {
            return Err(CudaError::LaunchError(format!(
                "no fill kernel for {}-byte elements",
                pattern.len()
            )))
        }
    };
    launched.map_err(|e| CudaError::LaunchError(e.to_string()))
}

/// Copy `nbytes` from the front of `src` to the front of `dst`.
pub fn cuda_copy(
    dev: &Arc<CudaDevice>,
    src: &CudaSlice<u8>,
    dst: &mut CudaSlice<u8>,
    nbytes: usize,
) -> Result<(), CudaError> {
    if nbytes == 0 {
        return Ok(());
    }
    check_len(src, nbytes)?;
    check_len(dst, nbytes)?;
    let src_view = src.slice(..nbytes);
    let mut dst_view = dst.slice_mut(..nbytes);
    dev.dtod_copy(&src_view, &mut dst_view)
        .map_err(|e| CudaError::MemoryError(format!("D2D copy: {}", e)))
}

/// Scatter `on_value` into a `[count, depth]` f32 buffer.
pub fn cuda_one_hot_f32(
    dev: &Arc<CudaDevice>,
    dev_idx: usize,
    x: &CudaSlice<u8>,
    y: &mut CudaSlice<u8>,
    on_value: f32,
    count: usize,
    depth: usize,
) -> Result<(), CudaError> {
    if count == 0 || depth == 0 {
        return Ok(());
    }
    check_len(x, count * 4)?;
    check_len(y, count * depth * 4)?;
    let f = get_or_load_func(dev, dev_idx, &ONE_HOT, "one_hot_f32")?;
    let cfg = grid_1d(count, BLOCK_SIZE);
    unsafe {
        f.launch(cfg, (x, y, on_value, count as u32, depth as u32))
            .map_err(|e| CudaError::LaunchError(e.to_string()))
    }
}

/// Scatter `on_value` into a `[count, depth]` f64 buffer.
pub fn cuda_one_hot_f64(
    dev: &Arc<CudaDevice>,
    dev_idx: usize,
    x: &CudaSlice<u8>,
    y: &mut CudaSlice<u8>,
    on_value: f64,
    count: usize,
    depth: usize,
) -> Result<(), CudaError> {
    if count == 0 || depth == 0 {
        return Ok(());
    }
    check_len(x, count * 8)?;
    check_len(y, count * depth * 8)?;
    let f = get_or_load_func(dev, dev_idx, &ONE_HOT, "one_hot_f64")?;
    let cfg = grid_1d(count, BLOCK_SIZE);
    unsafe {
        f.launch(cfg, (x, y, on_value, count as u32, depth as u32))
            .map_err(|e| CudaError::LaunchError(e.to_string()))
    }
}
