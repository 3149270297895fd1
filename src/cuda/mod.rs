//! CUDA backend for the suppression-matrix kernel
//!
//! ```text
//! +-------------------------+
//! |        CudaNms          |  <- context, stream, compiled-kernel cache
//! +-------------------------+
//! |   cudarc::nvrtc         |  <- runtime compilation of KERNEL_SRC
//! +-------------------------+
//! |   cudarc::driver        |  <- device memory, launch, dtoh copy
//! +-------------------------+
//! ```
//!
//! The kernel source is embedded as CUDA C and NVRTC-compiled at most once
//! per context; the compiled function lives in an explicit per-context
//! cache (device identity is fixed by the context, so the cache key reduces
//! to the kernel name plus compile options). Kernels are immutable, so
//! entries are never invalidated.
//!
//! One thread block of 64 threads covers one 64×64 tile of the pairwise
//! comparison grid. Each block first stages its column tile of boxes into
//! shared memory behind a `__syncthreads()` barrier, then each thread owns
//! one row and packs its comparison results into a single `u64` word,
//! written once to `mask[row * col_blocks + col_tile]`. Writers own
//! disjoint words, so the barrier is the only synchronization point.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use cudarc::driver::{
    CudaContext, CudaFunction, CudaSlice, CudaStream, LaunchConfig, PushKernelArg,
};
use cudarc::nvrtc::compile_ptx;

use crate::error::{Result, SupresorError};
use crate::mask::{col_blocks, SuppressionMatrix, BLOCK_SIZE};

/// Entry point name inside [`KERNEL_SRC`].
const KERNEL_NAME: &str = "suppression_matrix_kernel";

/// The suppression-matrix kernel.
///
/// TILE is the word width (64): one block per (row_tile, col_tile), one
/// thread per row within the tile. The diagonal-tile `start` rule makes
/// diagonal blocks strictly upper-triangular, so no box marks itself.
/// The IoU division carries no epsilon guard; see `kernel::iou` for the
/// degenerate-box semantics shared with the CPU mirror.
const KERNEL_SRC: &str = r#"
#define DIVUP(m, n) (((m) + (n) - 1) / (n))
int const TILE = sizeof(unsigned long long) * 8;

__device__ inline float box_iou(float const *const a, float const *const b) {
  float top = max(a[0], b[0]);
  float bottom = min(a[2], b[2]);
  float left = max(a[1], b[1]);
  float right = min(a[3], b[3]);
  float height = max(bottom - top, 0.f);
  float width = max(right - left, 0.f);
  float inter = height * width;
  float area_a = (a[2] - a[0]) * (a[3] - a[1]);
  float area_b = (b[2] - b[0]) * (b[3] - b[1]);
  return inter / (area_a + area_b - inter);
}

extern "C" __global__ void suppression_matrix_kernel(
    const int n_boxes, const float threshold,
    const float *boxes, unsigned long long *mask) {
  const int row_tile = blockIdx.y;
  const int col_tile = blockIdx.x;

  const int row_size = min(n_boxes - row_tile * TILE, TILE);
  const int col_size = min(n_boxes - col_tile * TILE, TILE);

  __shared__ float tile_boxes[TILE * 4];
  if (threadIdx.x < col_size) {
    const int src = (col_tile * TILE + threadIdx.x) * 4;
    tile_boxes[threadIdx.x * 4 + 0] = boxes[src + 0];
    tile_boxes[threadIdx.x * 4 + 1] = boxes[src + 1];
    tile_boxes[threadIdx.x * 4 + 2] = boxes[src + 2];
    tile_boxes[threadIdx.x * 4 + 3] = boxes[src + 3];
  }
  __syncthreads();

  if (threadIdx.x < row_size) {
    const int row = row_tile * TILE + threadIdx.x;
    const float *cur = boxes + row * 4;
    unsigned long long bits = 0;
    const int start = (row_tile == col_tile) ? threadIdx.x + 1 : 0;
    for (int j = start; j < col_size; j++) {
      if (box_iou(cur, tile_boxes + j * 4) >= threshold) {
        bits |= 1ULL << j;
      }
    }
    const int blocks = DIVUP(n_boxes, TILE);
    mask[row * (long long)blocks + col_tile] = bits;
  }
}
"#;

/// Check if verbose mode is enabled (SUPRESOR_VERBOSE=1)
/// Default is quiet - only errors are surfaced
fn verbose() -> bool {
    static VERBOSE: OnceLock<bool> = OnceLock::new();
    *VERBOSE.get_or_init(|| std::env::var("SUPRESOR_VERBOSE").is_ok())
}

fn gpu_err(e: impl std::fmt::Display) -> SupresorError {
    SupresorError::Gpu {
        reason: e.to_string(),
    }
}

/// CUDA executor for the suppression-matrix kernel
///
/// Owns a device context, its default stream, and the compiled-kernel
/// cache. Create once and reuse across calls so the NVRTC compile happens
/// only on the first launch.
pub struct CudaNms {
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    // Compiled entry points, keyed by kernel name. Never invalidated.
    functions: HashMap<String, CudaFunction>,
}

impl CudaNms {
    /// Whether at least one CUDA device is present.
    #[must_use]
    pub fn is_available() -> bool {
        CudaContext::device_count().map(|c| c > 0).unwrap_or(false)
    }

    /// Number of visible CUDA devices.
    #[must_use]
    pub fn num_devices() -> usize {
        CudaContext::device_count().unwrap_or(0) as usize
    }

    /// Create an executor on the given device ordinal.
    ///
    /// # Errors
    ///
    /// Returns `GpuUnavailable` if the context cannot be created.
    pub fn new(ordinal: usize) -> Result<Self> {
        let ctx = CudaContext::new(ordinal).map_err(|e| SupresorError::GpuUnavailable {
            reason: format!("device {ordinal}: {e}"),
        })?;
        let stream = ctx.default_stream();
        Ok(Self {
            ctx,
            stream,
            functions: HashMap::new(),
        })
    }

    /// Look up the compiled kernel, compiling and caching it on first use.
    fn function(&mut self) -> Result<CudaFunction> {
        if let Some(func) = self.functions.get(KERNEL_NAME) {
            return Ok(func.clone());
        }
        if verbose() {
            eprintln!("[supresor] nvrtc compile {KERNEL_NAME}");
        }
        let ptx = compile_ptx(KERNEL_SRC).map_err(|e| SupresorError::Compilation {
            reason: e.to_string(),
        })?;
        let module = self
            .ctx
            .load_module(ptx)
            .map_err(|e| SupresorError::Compilation {
                reason: format!("module load: {e}"),
            })?;
        let func = module
            .load_function(KERNEL_NAME)
            .map_err(|e| SupresorError::Compilation {
                reason: format!("missing entry point {KERNEL_NAME}: {e}"),
            })?;
        self.functions.insert(KERNEL_NAME.to_string(), func.clone());
        Ok(func)
    }

    /// Build the suppression matrix on the device for boxes already in
    /// priority order, and copy it back to the host.
    ///
    /// # Errors
    ///
    /// Returns `Compilation` on NVRTC failure and `Gpu` on allocation,
    /// transfer, or launch failure. None of these are retried.
    pub fn suppression_matrix(
        &mut self,
        sorted_boxes: &[f32],
        threshold: f32,
    ) -> Result<SuppressionMatrix> {
        let n = sorted_boxes.len() / 4;
        if n == 0 {
            return Ok(SuppressionMatrix::zeroed(0));
        }
        let blocks = col_blocks(n);
        let func = self.function()?;

        let d_boxes: CudaSlice<f32> = self.stream.clone_htod(sorted_boxes).map_err(gpu_err)?;
        let mut d_mask: CudaSlice<u64> = self.stream.alloc_zeros(n * blocks).map_err(gpu_err)?;

        let n_i32 = n as i32;
        let config = LaunchConfig {
            grid_dim: (blocks as u32, blocks as u32, 1),
            block_dim: (BLOCK_SIZE as u32, 1, 1),
            shared_mem_bytes: 0,
        };
        if verbose() {
            eprintln!("[supresor] launch n={n} grid={blocks}x{blocks} block={BLOCK_SIZE}");
        }

        let mut launch = self.stream.launch_builder(&func);
        launch.arg(&n_i32);
        launch.arg(&threshold);
        launch.arg(&d_boxes);
        launch.arg(&mut d_mask);
        unsafe { launch.launch(config) }.map_err(gpu_err)?;

        let mut words = vec![0u64; n * blocks];
        self.stream
            .memcpy_dtoh(&d_mask, &mut words)
            .map_err(gpu_err)?;
        Ok(SuppressionMatrix::from_words(words, n))
    }
}
