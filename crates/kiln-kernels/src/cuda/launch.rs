//! Kernel launcher with NVRTC compilation and per-device module caching.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use cudarc::driver::{CudaDevice, CudaFunction, LaunchConfig};
use parking_lot::Mutex;

use super::context::CudaError;

/// A CUDA C source compiled on first use, with the entry points it exports.
pub struct KernelModule {
    pub name: &'static str,
    pub source: &'static str,
    pub functions: &'static [&'static str],
}

/// Modules already loaded, keyed by (device ordinal, module name).
static LOADED: OnceLock<Mutex<HashSet<(usize, &'static str)>>> = OnceLock::new();

fn loaded_set() -> &'static Mutex<HashSet<(usize, &'static str)>> {
    LOADED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Compile and load `module` on the device unless it is already there.
pub fn ensure_module(
    device: &Arc<CudaDevice>,
    device_idx: usize,
    module: &KernelModule,
) -> Result<(), CudaError> {
    let key = (device_idx, module.name);
    // Held across compilation so two threads never load the same module twice.
    let mut set = loaded_set().lock();
    if set.contains(&key) {
        return Ok(());
    }

    tracing::debug!(module = module.name, device_idx, "compiling CUDA module");
    let ptx = cudarc::nvrtc::compile_ptx(module.source).map_err(|e| CudaError::PtxCompile {
        module: module.name.to_string(),
        msg: e.to_string(),
    })?;

    device
        .load_ptx(ptx, module.name, module.functions)
        .map_err(|e| CudaError::ModuleLoad {
            module: module.name.to_string(),
            msg: e.to_string(),
        })?;

    set.insert(key);
    Ok(())
}

/// Get a kernel function handle, loading its module if needed.
pub fn get_or_load_func(
    device: &Arc<CudaDevice>,
    device_idx: usize,
    module: &KernelModule,
    func_name: &str,
) -> Result<CudaFunction, CudaError> {
    ensure_module(device, device_idx, module)?;
    device
        .get_func(module.name, func_name)
        .ok_or_else(|| CudaError::FuncNotFound {
            module: module.name.to_string(),
            func: func_name.to_string(),
        })
}

/// Grid dimensions for a 1D kernel launch over `n` threads.
pub fn grid_1d(n: usize, block_size: usize) -> LaunchConfig {
    let grid = n.div_ceil(block_size).max(1);
    LaunchConfig {
        grid_dim: (grid as u32, 1, 1),
        block_dim: (block_size as u32, 1, 1),
        shared_mem_bytes: 0,
    }
}
