//! # Supresor
//!
//! GPU-accelerated Non-Maximum Suppression (NMS) for axis-aligned bounding
//! boxes, with a bit-identical CPU fallback.
//!
//! Supresor (Spanish: "suppressor") filters thousands of candidate
//! detection boxes per inference pass: boxes are ordered by descending
//! confidence, every ordered pair is compared for overlap in a tiled O(N²)
//! kernel that packs its decisions into a 64-bit-word suppression matrix,
//! and a single sequential pass resolves the matrix into the indices of
//! the surviving boxes.
//!
//! ## Features
//!
//! - **Unified API**: single interface dispatching to CUDA or CPU
//! - **Bit-exact backends**: the CPU kernel mirrors the CUDA tiling, so
//!   both produce identical suppression matrices
//! - **Compile-once kernels**: the CUDA source is NVRTC-compiled per
//!   device context and cached for the process lifetime
//! - **No partial results**: every call is atomic; all failures are fatal
//!   at the call level and never retried
//!
//! ## Example
//!
//! ```rust
//! use supresor::nms;
//!
//! // Two heavily overlapping boxes and one disjoint box, each box given
//! // as (top, left, bottom, right).
//! let boxes = [
//!     0.0, 0.0, 10.0, 10.0, //
//!     1.0, 1.0, 11.0, 11.0, //
//!     50.0, 50.0, 60.0, 60.0, //
//! ];
//! let scores = [0.9, 0.8, 0.7];
//!
//! let keep = nms(&boxes, Some(&scores), 0.5, None).unwrap();
//! assert_eq!(keep, vec![0, 2]);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! boxes + scores
//!       |  stable descending argsort
//!       v
//! sorted boxes ---> suppression-matrix kernel (CUDA or CPU, tiled 64x64)
//!       |                         |
//!       |                         v
//!       |            N x ceil(N/64) bit-matrix
//!       |                         |
//!       |                         v
//!       +----------> sequential reducer -> kept indices -> remap + limit
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)] // box counts fit in u32
#![allow(clippy::cast_precision_loss)] // usize -> f32 in tests and benches
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

/// CUDA execution of the suppression-matrix kernel
///
/// NVRTC-compiled from embedded CUDA C, one 64-thread block per tile,
/// shared-memory staging behind a single barrier.
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod error;
/// Pairwise IoU and the tiled CPU suppression kernel
pub mod kernel;
/// Suppression bit-matrix and the sequential reducer
pub mod mask;
/// Pipeline front-end: validation, priority ordering, backend dispatch
pub mod nms;

// Re-exports for convenience
pub use error::{Result, SupresorError};
pub use nms::{nms, ComputeBackend, Nms, NmsConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
