//! HEVC transform and quantization core.
//!
//! This crate implements the transform-quantization subsystem of an
//! HEVC/H.265 encoder: the machinery that turns a block of residual
//! samples into a sparse block of quantized coefficient levels ready for
//! entropy coding, and inverts that process for reconstruction.
//!
//! # Features
//!
//! - **Transforms**: DCT-II for 4x4 through 32x32 and DST-VII for 4x4
//!   intra luma, forward and inverse, with a pluggable kernel table
//! - **Quantization**: scalar quantization with asymmetric dead-zone
//!   rounding, scaling-list support and transform skip
//! - **RDOQ**: full rate-distortion optimized quantization driven by
//!   CABAC bit-cost estimates, including per-group zero-out, last-position
//!   re-selection and an optional psycho-visual bias
//! - **Sign-bit hiding**: both the distortion-only flavour used with the
//!   scalar quantizer and the rate-aware flavour used with RDOQ
//! - **Noise reduction**: per-frequency coefficient denoising with
//!   caller-owned adaptive state
//!
//! # Architecture
//!
//! [`Quant`] is the per-worker core: it owns scratch buffers sized for the
//! largest transform, borrows a read-only [`ScalingList`] bundle, and is
//! driven synchronously one block at a time. The CABAC bit-cost tables
//! ([`EstBits`]) are populated by the entropy coder between blocks. All
//! block geometry (scan order, context offsets) is derived internally from
//! the per-block [`TuDesc`].
//!
//! # Example
//!
//! ```rust
//! use transcode_hevc_tq::{
//!     Channel, ChromaFormat, Quant, QuantConfig, ScalingList, SliceType,
//!     TransformSize, TuDesc,
//! };
//!
//! let scaling = ScalingList::flat(8)?;
//! let mut quant = Quant::new(&QuantConfig::default(), &scaling)?;
//! quant.set_qp(32, 0, 0, ChromaFormat::Yuv420);
//!
//! let tu = TuDesc {
//!     size: TransformSize::T8x8,
//!     channel: Channel::Luma,
//!     slice_type: SliceType::P,
//!     intra: false,
//!     intra_dir: 0,
//!     transquant_bypass: false,
//!     transform_skip: false,
//!     sign_hide: false,
//!     tu_depth: 0,
//!     cbf_ctx: 1,
//!     use_rdoq: false,
//! };
//!
//! let residual = [12i16; 64];
//! let mut coeff = [0i16; 64];
//! let num_sig = quant.transform_nxn(&tu, None, &residual, 8, &mut coeff, None);
//!
//! let mut recon = [0i16; 64];
//! quant.inv_transform_nxn(
//!     false, &mut recon, 8, &coeff,
//!     TransformSize::T8x8, Channel::Luma, false, false, num_sig,
//! );
//! # Ok::<(), transcode_hevc_tq::TqError>(())
//! ```

pub mod context;
pub mod error;
pub mod quant;
pub mod rdoq;
pub mod scaling;
pub mod scan;
pub mod transform;

// Re-export main error types
pub use error::{Result, TqError};

// Re-export transform types
pub use transform::{Kernels, TransformSize, MAX_TR_COEFF, MAX_TR_DYNAMIC_RANGE, MAX_TR_SIZE};

// Re-export quantization types
pub use quant::{
    NoiseReduction, Quant, QuantConfig, TuDesc, QUANT_IQUANT_SHIFT, QUANT_SHIFT, SBH_THRESHOLD,
};

// Re-export parameter types
pub use scaling::{
    chroma_qp, Channel, ChromaFormat, QpParam, ScalingList, ScalingListData, SliceType,
    INV_QUANT_SCALES, QUANT_SCALES, SCALE_BITS,
};

// Re-export scan and context types
pub use context::{EstBits, IEP_RATE};
pub use scan::{ScanType, TuCodingParams, MLS_GRP_NUM, SCAN_SET_SIZE};
