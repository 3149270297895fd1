//! Error types for supresor
//!
//! Every failure mode is fatal at the call level: there is no retry logic
//! anywhere in the crate. An empty input is not an error — it short-circuits
//! to an empty result before any of these paths are reached.

use thiserror::Error;

/// Errors returned by supresor operations
#[derive(Debug, Error)]
pub enum SupresorError {
    /// Input arrays have inconsistent or malformed shapes
    #[error("invalid shape: {reason}")]
    InvalidShape {
        /// What was wrong with the input
        reason: String,
    },

    /// IoU threshold outside the valid [0, 1] range
    #[error("invalid IoU threshold {value}: must be within [0, 1]")]
    InvalidThreshold {
        /// The rejected threshold value
        value: f32,
    },

    /// GPU backend requested but no usable CUDA device exists
    #[error("GPU unavailable: {reason}")]
    GpuUnavailable {
        /// Why no device could be used
        reason: String,
    },

    /// Device allocation, transfer, or kernel launch failure
    #[error("GPU error: {reason}")]
    Gpu {
        /// Driver-level failure description
        reason: String,
    },

    /// Kernel source failed to compile for the target device
    #[error("kernel compilation failed: {reason}")]
    Compilation {
        /// NVRTC diagnostic output
        reason: String,
    },
}

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SupresorError>;
