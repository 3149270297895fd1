//! NMS pipeline front-end: validation, priority ordering, backend dispatch
//!
//! ```text
//! +---------------------------+
//! |  Nms / nms() public API   |  <- validation, argsort, remap, limit
//! +---------------------------+
//! |  kernel / cuda backends   |  <- suppression-matrix construction
//! +---------------------------+
//! |  mask::SuppressionMatrix  |  <- sequential reducer
//! +---------------------------+
//! ```
//!
//! The pipeline is the same on every backend: sort boxes by descending
//! score, build the suppression matrix, reduce it sequentially, map the
//! kept local indices back through the sort permutation, and truncate to
//! the configured limit. Only the matrix construction step differs.

use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(feature = "cuda")]
use crate::cuda::CudaNms;
use crate::error::{Result, SupresorError};
use crate::kernel;
use crate::mask::SuppressionMatrix;

/// NMS call parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NmsConfig {
    /// IoU cutoff in [0, 1]; pairs at or above it suppress
    pub threshold: f32,
    /// Optional cap on the number of returned indices
    pub limit: Option<usize>,
}

impl Default for NmsConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            limit: None,
        }
    }
}

/// Compute backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComputeBackend {
    /// CUDA device (requires the `cuda` feature and an NVIDIA GPU)
    Gpu,
    /// CPU execution (always available)
    Cpu,
    /// Auto-select best available backend
    #[default]
    Auto,
}

/// NMS compute context
///
/// Holds the resolved backend and, when active, the CUDA executor with its
/// compiled-kernel cache, so repeated calls reuse the compiled artifact.
pub struct Nms {
    backend: ComputeBackend,
    #[cfg(feature = "cuda")]
    gpu: Option<CudaNms>,
}

// Manual impl: the CUDA executor holds driver handles that are not Debug.
impl fmt::Debug for Nms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nms")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl Nms {
    /// Create a context with auto-detected backend.
    ///
    /// Uses the GPU when the `cuda` feature is compiled in and a device is
    /// present, otherwise falls back to the CPU.
    ///
    /// # Errors
    ///
    /// Returns an error only if GPU initialization fails after a device was
    /// detected.
    pub fn auto() -> Result<Self> {
        Self::new(ComputeBackend::Auto)
    }

    /// Create a context with the given backend.
    ///
    /// # Errors
    ///
    /// Returns `SupresorError::GpuUnavailable` if `Gpu` is requested but the
    /// `cuda` feature is not compiled in or no device is present.
    pub fn new(backend: ComputeBackend) -> Result<Self> {
        match backend {
            ComputeBackend::Gpu => Self::gpu_context(),
            ComputeBackend::Cpu => Ok(Self::cpu_context()),
            ComputeBackend::Auto => {
                if Self::gpu_possible() {
                    Self::gpu_context()
                } else {
                    Ok(Self::cpu_context())
                }
            },
        }
    }

    fn cpu_context() -> Self {
        Self {
            backend: ComputeBackend::Cpu,
            #[cfg(feature = "cuda")]
            gpu: None,
        }
    }

    #[cfg(feature = "cuda")]
    fn gpu_possible() -> bool {
        CudaNms::is_available()
    }

    #[cfg(not(feature = "cuda"))]
    fn gpu_possible() -> bool {
        false
    }

    #[cfg(feature = "cuda")]
    fn gpu_context() -> Result<Self> {
        if !CudaNms::is_available() {
            return Err(SupresorError::GpuUnavailable {
                reason: "no CUDA device detected".to_string(),
            });
        }
        Ok(Self {
            backend: ComputeBackend::Gpu,
            gpu: Some(CudaNms::new(0)?),
        })
    }

    #[cfg(not(feature = "cuda"))]
    fn gpu_context() -> Result<Self> {
        Err(SupresorError::GpuUnavailable {
            reason: "built without the cuda feature".to_string(),
        })
    }

    /// Whether the GPU backend is active.
    #[must_use]
    pub fn is_gpu(&self) -> bool {
        self.backend == ComputeBackend::Gpu
    }

    /// The resolved backend (`Auto` is never stored).
    #[must_use]
    pub fn backend(&self) -> ComputeBackend {
        self.backend
    }

    /// Run NMS over `boxes` with optional `scores`.
    ///
    /// `boxes` is an N×4 flat slice in (top, left, bottom, right) order.
    /// When `scores` is `None` the input order is the priority order.
    /// Returns kept indices into the original `boxes`, highest priority
    /// first, at most `min(n, limit)` of them.
    ///
    /// # Errors
    ///
    /// Returns `InvalidShape` for malformed inputs, `InvalidThreshold` for
    /// a threshold outside [0, 1], and GPU errors from the CUDA backend.
    pub fn run(
        &mut self,
        boxes: &[f32],
        scores: Option<&[f32]>,
        config: &NmsConfig,
    ) -> Result<Vec<u32>> {
        let n = validate(boxes, scores, config.threshold)?;
        if n == 0 {
            return Ok(Vec::new());
        }

        let order = priority_order(n, scores);
        let sorted = gather(boxes, &order);
        let matrix = self.suppression_matrix(&sorted, config.threshold)?;

        let mut kept: Vec<u32> = matrix
            .reduce()
            .into_iter()
            .map(|local| order[local as usize] as u32)
            .collect();
        if let Some(limit) = config.limit {
            kept.truncate(limit);
        }
        Ok(kept)
    }

    #[cfg(feature = "cuda")]
    fn suppression_matrix(
        &mut self,
        sorted_boxes: &[f32],
        threshold: f32,
    ) -> Result<SuppressionMatrix> {
        match self.gpu.as_mut() {
            Some(gpu) => gpu.suppression_matrix(sorted_boxes, threshold),
            None => Ok(kernel::build_matrix(sorted_boxes, threshold)),
        }
    }

    #[cfg(not(feature = "cuda"))]
    fn suppression_matrix(
        &mut self,
        sorted_boxes: &[f32],
        threshold: f32,
    ) -> Result<SuppressionMatrix> {
        Ok(kernel::build_matrix(sorted_boxes, threshold))
    }
}

/// One-shot CPU NMS.
///
/// Convenience wrapper for callers that do not keep a [`Nms`] context
/// around. See [`Nms::run`] for argument semantics.
///
/// # Errors
///
/// Returns `InvalidShape` for malformed inputs and `InvalidThreshold` for a
/// threshold outside [0, 1].
pub fn nms(
    boxes: &[f32],
    scores: Option<&[f32]>,
    threshold: f32,
    limit: Option<usize>,
) -> Result<Vec<u32>> {
    Nms::new(ComputeBackend::Cpu)?.run(boxes, scores, &NmsConfig { threshold, limit })
}

fn validate(boxes: &[f32], scores: Option<&[f32]>, threshold: f32) -> Result<usize> {
    if boxes.len() % 4 != 0 {
        return Err(SupresorError::InvalidShape {
            reason: format!("boxes length {} is not a multiple of 4", boxes.len()),
        });
    }
    let n = boxes.len() / 4;
    if let Some(scores) = scores {
        if scores.len() != n {
            return Err(SupresorError::InvalidShape {
                reason: format!("expected {} scores, got {}", n, scores.len()),
            });
        }
    }
    // NaN fails the range check and is rejected too.
    if !(0.0..=1.0).contains(&threshold) {
        return Err(SupresorError::InvalidThreshold { value: threshold });
    }
    Ok(n)
}

/// Stable descending argsort of scores.
///
/// Scores are ordered by `f32::total_cmp`, so the comparator is a total
/// order even with NaN scores (positive NaN sorts above every real score
/// when descending). Equal scores keep ascending input order, so repeated
/// calls are deterministic and the earlier of two tied boxes wins the
/// tie-break.
fn priority_order(n: usize, scores: Option<&[f32]>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    if let Some(scores) = scores {
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    }
    order
}

/// Reorder the flat N×4 box array into priority order.
fn gather(boxes: &[f32], order: &[usize]) -> Vec<f32> {
    let mut sorted = Vec::with_capacity(order.len() * 4);
    for &i in order {
        sorted.extend_from_slice(&boxes[i * 4..i * 4 + 4]);
    }
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_not_an_error() {
        assert_eq!(nms(&[], None, 0.5, None).unwrap(), Vec::<u32>::new());
        assert_eq!(nms(&[], Some(&[]), 0.9, Some(3)).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn test_identical_pair_keeps_first() {
        let boxes = [0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0];
        let keep = nms(&boxes, None, 0.5, None).unwrap();
        assert_eq!(keep, vec![0]);
    }

    #[test]
    fn test_tied_scores_keep_lower_index() {
        let boxes = [0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0];
        let keep = nms(&boxes, Some(&[0.7, 0.7]), 0.5, None).unwrap();
        assert_eq!(keep, vec![0]);
    }

    #[test]
    fn test_disjoint_pair_keeps_both() {
        let boxes = [0.0, 0.0, 1.0, 1.0, 5.0, 5.0, 6.0, 6.0];
        let keep = nms(&boxes, None, 0.5, None).unwrap();
        assert_eq!(keep, vec![0, 1]);
    }

    #[test]
    fn test_overlap_chain_keeps_ends() {
        // A overlaps B, B overlaps C, A does not overlap C. B falls to A,
        // C survives because B was never kept.
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [0.0, 6.0, 10.0, 16.0];
        let c = [0.0, 12.0, 10.0, 22.0];
        let boxes = [a, b, c].concat();
        let scores = [0.9, 0.8, 0.7];
        let keep = nms(&boxes, Some(&scores), 0.2, None).unwrap();
        assert_eq!(keep, vec![0, 2]);
    }

    #[test]
    fn test_ascending_scores_reverse_priority() {
        // Disjoint boxes, ascending scores: output is input order reversed.
        let mut boxes = Vec::new();
        for i in 0..5 {
            let off = i as f32 * 10.0;
            boxes.extend_from_slice(&[off, off, off + 1.0, off + 1.0]);
        }
        let scores = [0.1, 0.2, 0.3, 0.4, 0.5];
        let keep = nms(&boxes, Some(&scores), 0.5, None).unwrap();
        assert_eq!(keep, vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_scores_remap_after_suppression() {
        // Highest score in the middle of the input; the overlapping
        // lower-score box is dropped and indices come back in input terms.
        let boxes = [
            0.0, 0.0, 10.0, 10.0, // idx 0, overlaps idx 1
            1.0, 1.0, 11.0, 11.0, // idx 1, highest score
            50.0, 50.0, 60.0, 60.0, // idx 2, disjoint
        ];
        let scores = [0.8, 0.95, 0.9];
        let keep = nms(&boxes, Some(&scores), 0.5, None).unwrap();
        assert_eq!(keep, vec![1, 2]);
    }

    #[test]
    fn test_limit_truncates_to_prefix() {
        let mut boxes = Vec::new();
        for i in 0..6 {
            let off = i as f32 * 10.0;
            boxes.extend_from_slice(&[off, off, off + 1.0, off + 1.0]);
        }
        let full = nms(&boxes, None, 0.5, None).unwrap();
        assert_eq!(full.len(), 6);
        let capped = nms(&boxes, None, 0.5, Some(4)).unwrap();
        assert_eq!(capped, full[..4]);
        // Limit larger than the kept set is a no-op; zero empties it.
        assert_eq!(nms(&boxes, None, 0.5, Some(100)).unwrap(), full);
        assert!(nms(&boxes, None, 0.5, Some(0)).unwrap().is_empty());
    }

    #[test]
    fn test_two_box_threshold_monotonicity() {
        // IoU of this pair is 25/175 ≈ 0.143: below the cutoff both
        // survive, at or above it the second is suppressed.
        let boxes = [0.0, 0.0, 10.0, 10.0, 5.0, 5.0, 15.0, 15.0];
        let v = 25.0 / 175.0;
        assert_eq!(nms(&boxes, None, v - 0.01, None).unwrap(), vec![0]);
        assert_eq!(nms(&boxes, None, v + 0.01, None).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_degenerate_boxes_are_kept() {
        // Two identical zero-area boxes: IoU is NaN, which never crosses
        // the threshold, so both survive.
        let boxes = [3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0];
        let keep = nms(&boxes, None, 0.5, None).unwrap();
        assert_eq!(keep, vec![0, 1]);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let boxes = [0.0, 0.0, 1.0, 1.0];
        for bad in [-0.1, 1.1, f32::NAN] {
            let err = nms(&boxes, None, bad, None).unwrap_err();
            assert!(matches!(err, SupresorError::InvalidThreshold { .. }));
        }
        // Boundary values are valid.
        assert!(nms(&boxes, None, 0.0, None).is_ok());
        assert!(nms(&boxes, None, 1.0, None).is_ok());
    }

    #[test]
    fn test_invalid_shapes_rejected() {
        let err = nms(&[1.0, 2.0, 3.0], None, 0.5, None).unwrap_err();
        assert!(matches!(err, SupresorError::InvalidShape { .. }));

        let boxes = [0.0, 0.0, 1.0, 1.0];
        let err = nms(&boxes, Some(&[0.5, 0.6]), 0.5, None).unwrap_err();
        assert!(matches!(err, SupresorError::InvalidShape { .. }));
    }

    #[test]
    fn test_backend_dispatch() {
        let ctx = Nms::new(ComputeBackend::Cpu).unwrap();
        assert_eq!(ctx.backend(), ComputeBackend::Cpu);
        assert!(!ctx.is_gpu());

        // Auto never fails: it falls back to the CPU.
        let ctx = Nms::auto().unwrap();
        assert!(matches!(
            ctx.backend(),
            ComputeBackend::Cpu | ComputeBackend::Gpu
        ));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_gpu_backend_unavailable_without_feature() {
        let err = Nms::new(ComputeBackend::Gpu).unwrap_err();
        assert!(matches!(err, SupresorError::GpuUnavailable { .. }));
    }

    #[test]
    fn test_context_debug_shows_backend() {
        let ctx = Nms::new(ComputeBackend::Cpu).unwrap();
        let repr = format!("{ctx:?}");
        assert!(repr.contains("Nms"));
        assert!(repr.contains("Cpu"));

        // Error paths rely on this too: unwrap_err needs Nms: Debug.
        let result = Nms::new(ComputeBackend::Cpu);
        assert!(format!("{result:?}").contains("Ok"));
    }

    #[test]
    fn test_nan_scores_sort_deterministically() {
        // total_cmp places positive NaN above every real score, so the
        // NaN-scored box takes top priority; the rest order by value.
        let mut boxes = Vec::new();
        for i in 0..3 {
            let off = i as f32 * 10.0;
            boxes.extend_from_slice(&[off, off, off + 1.0, off + 1.0]);
        }
        let scores = [0.5, f32::NAN, 0.9];
        let keep = nms(&boxes, Some(&scores), 0.5, None).unwrap();
        assert_eq!(keep, vec![1, 2, 0]);

        // Many interleaved NaNs must neither panic nor flip between runs.
        let mut big_boxes = Vec::new();
        let mut big_scores = Vec::new();
        for i in 0..200 {
            let off = i as f32 * 3.0;
            big_boxes.extend_from_slice(&[off, off, off + 4.0, off + 4.0]);
            big_scores.push(if i % 3 == 0 { f32::NAN } else { i as f32 / 200.0 });
        }
        let first = nms(&big_boxes, Some(&big_scores), 0.5, None).unwrap();
        let second = nms(&big_boxes, Some(&big_scores), 0.5, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 200);
    }

    #[test]
    fn test_config_defaults_and_serde() {
        let config = NmsConfig::default();
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.limit, None);

        let json = serde_json::to_string(&config).unwrap();
        let back: NmsConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_large_input_crosses_block_boundary() {
        // 100 boxes in overlapping pairs: every odd index falls to the even
        // one before it, across the 64-box word boundary.
        let mut boxes = Vec::new();
        for i in 0..100 {
            let off = (i / 2) as f32 * 10.0;
            boxes.extend_from_slice(&[off, off, off + 5.0, off + 5.0]);
        }
        let keep = nms(&boxes, None, 0.5, None).unwrap();
        let expected: Vec<u32> = (0..100).step_by(2).map(|i| i as u32).collect();
        assert_eq!(keep, expected);
    }
}
