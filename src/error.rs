//! Error types for the transform-quantization core.

use thiserror::Error;

/// Result type for transform-quantization operations.
pub type Result<T> = std::result::Result<T, TqError>;

/// Errors raised by the transform-quantization core.
///
/// The arithmetic paths have a closed input domain enforced by caller
/// contract and never fail at runtime; only construction and configuration
/// can return errors.
#[derive(Error, Debug)]
pub enum TqError {
    /// Bit depth outside the supported range.
    #[error("unsupported bit depth {0} (supported: 8-14)")]
    UnsupportedBitDepth(u32),

    /// The scaling list bundle was built for a different bit depth.
    #[error("scaling list bit depth {list} does not match encoder bit depth {encoder}")]
    BitDepthMismatch {
        /// Bit depth the scaling list was built for.
        list: u32,
        /// Bit depth the quantizer was configured with.
        encoder: u32,
    },

    /// Invalid encoder configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A scaling list entry was zero or negative.
    #[error("scaling list entries must be positive, found {0}")]
    ScalingListEntry(i32),
}
