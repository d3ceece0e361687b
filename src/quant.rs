//! Transform driver, scalar quantization and dequantization.
//!
//! [`Quant`] owns the scratch buffers and per-channel QP state for one
//! encoder worker and drives a block through the full forward path
//! (transform, optional noise reduction, quantization, sign-bit hiding)
//! and the inverse path (dequantization, inverse transform). One instance
//! is used by exactly one thread at a time; there is no internal
//! synchronization.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]

use crate::context::EstBits;
use crate::error::{Result, TqError};
use crate::scaling::{
    chroma_qp, Channel, ChromaFormat, QpParam, ScalingList, SliceType, INV_QUANT_SCALES,
};
use crate::scan::{ScanType, TuCodingParams, LOG2_SCAN_SET_SIZE, SCAN_SET_SIZE};
use crate::transform::{
    Kernels, TransformSize, KERNEL_DCT_4X4, MAX_TR_COEFF, MAX_TR_DYNAMIC_RANGE,
};

/// Log2 scale of the forward quantizer.
pub const QUANT_SHIFT: i32 = 14;

/// Combined log2 scale of quantizer and dequantizer.
pub const QUANT_IQUANT_SHIFT: i32 = 20;

/// Minimum span between first and last nonzero coefficient of a coding
/// group for sign-bit hiding to apply.
pub const SBH_THRESHOLD: i32 = 4;

/// Scaling applied through the forward transform for a block size.
pub(crate) fn transform_shift(bit_depth: u32, log2_tr_size: u32) -> i32 {
    MAX_TR_DYNAMIC_RANGE - bit_depth as i32 - log2_tr_size as i32
}

/// Configuration of a [`Quant`] instance.
#[derive(Debug, Clone)]
pub struct QuantConfig {
    /// Sample bit depth (8-14).
    pub bit_depth: u32,
    /// Enable rate-distortion optimized quantization.
    pub rdoq: bool,
    /// Strength of the psycho-visual RDOQ bias; 0 disables it. Requires
    /// `rdoq`.
    pub psy_rdoq_scale: f64,
}

impl Default for QuantConfig {
    fn default() -> Self {
        Self {
            bit_depth: 8,
            rdoq: false,
            psy_rdoq_scale: 0.0,
        }
    }
}

/// Per-frequency noise reduction state, owned by the caller and updated by
/// the forward path for every DCT block it sees.
pub struct NoiseReduction {
    /// Master enable.
    pub enabled: bool,
    /// Offsets subtracted from coefficient magnitudes, per size class.
    pub offset: [[u16; MAX_TR_COEFF]; 4],
    /// Accumulated coefficient magnitudes, per size class.
    pub residual_sum: [[u32; MAX_TR_COEFF]; 4],
    /// Number of blocks accumulated, per size class.
    pub count: [u32; 4],
}

impl Default for NoiseReduction {
    fn default() -> Self {
        Self {
            enabled: false,
            offset: [[0; MAX_TR_COEFF]; 4],
            residual_sum: [[0; MAX_TR_COEFF]; 4],
            count: [0; 4],
        }
    }
}

impl NoiseReduction {
    /// Fresh, disabled state.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Per-block parameters of the forward path.
#[derive(Debug, Clone)]
pub struct TuDesc {
    /// Transform size.
    pub size: TransformSize,
    /// Color channel.
    pub channel: Channel,
    /// Slice type of the containing slice.
    pub slice_type: SliceType,
    /// Whether the block is intra predicted.
    pub intra: bool,
    /// Intra prediction mode, used for mode-dependent scan selection.
    /// Ignored for inter blocks.
    pub intra_dir: u32,
    /// Lossless transform-quantization bypass.
    pub transquant_bypass: bool,
    /// Code shifted residuals instead of transform coefficients.
    pub transform_skip: bool,
    /// Sign-bit hiding enabled in the PPS.
    pub sign_hide: bool,
    /// Transform depth below the CU root.
    pub tu_depth: u32,
    /// Context index for the coded-block flag of this block.
    pub cbf_ctx: u32,
    /// Allow RDOQ for this block (per-call override of the instance
    /// setting).
    pub use_rdoq: bool,
}

/// Transform-quantization core for one encoder worker.
///
/// Holds the scratch coefficient buffers, the per-channel QP parameters
/// and Lagrange multipliers, and a borrow of the scaling-list bundle.
pub struct Quant<'a> {
    pub(crate) bit_depth: u32,
    pub(crate) use_rdoq: bool,
    /// Psy-RDOQ strength in 8.8 fixed point; 0 disables the bias.
    pub(crate) psy_rdoq_scale: u64,
    pub(crate) scaling: &'a ScalingList,
    pub(crate) kernels: Kernels,
    pub(crate) qp_param: [QpParam; 3],
    pub(crate) lambda2: [f64; 3],
    /// CABAC bit-cost tables, populated by the entropy coder for the
    /// channel about to be coded.
    pub est_bits: EstBits,
    /// DCT coefficients of the residual being coded.
    pub(crate) resi_dct: Box<[i32]>,
    /// DCT coefficients of the source block, for the psy-RDOQ bias.
    pub(crate) fenc_dct: Box<[i32]>,
    /// Staging buffer for the source block samples.
    pub(crate) fenc_short: Box<[i16]>,
}

impl<'a> Quant<'a> {
    /// Create a core instance with the built-in transform kernels.
    pub fn new(cfg: &QuantConfig, scaling: &'a ScalingList) -> Result<Self> {
        Self::with_kernels(cfg, scaling, Kernels::default())
    }

    /// Create a core instance with caller-provided transform kernels.
    pub fn with_kernels(
        cfg: &QuantConfig,
        scaling: &'a ScalingList,
        kernels: Kernels,
    ) -> Result<Self> {
        if !(8..=14).contains(&cfg.bit_depth) {
            return Err(TqError::UnsupportedBitDepth(cfg.bit_depth));
        }
        if scaling.bit_depth() != cfg.bit_depth {
            return Err(TqError::BitDepthMismatch {
                list: scaling.bit_depth(),
                encoder: cfg.bit_depth,
            });
        }
        if cfg.psy_rdoq_scale != 0.0 && !cfg.rdoq {
            return Err(TqError::Config(
                "psy-rdoq requires rdoq to be enabled".into(),
            ));
        }
        if !(0.0..=50.0).contains(&cfg.psy_rdoq_scale) {
            return Err(TqError::Config(format!(
                "psy-rdoq scale {} out of range 0-50",
                cfg.psy_rdoq_scale
            )));
        }

        tracing::debug!(
            bit_depth = cfg.bit_depth,
            rdoq = cfg.rdoq,
            psy_rdoq_scale = cfg.psy_rdoq_scale,
            scaling_lists = scaling.enabled(),
            "transform-quant core initialized"
        );

        Ok(Quant {
            bit_depth: cfg.bit_depth,
            use_rdoq: cfg.rdoq,
            psy_rdoq_scale: (cfg.psy_rdoq_scale * 256.0) as u64,
            scaling,
            kernels,
            qp_param: [QpParam::default(); 3],
            lambda2: [0.0; 3],
            est_bits: EstBits::default(),
            resi_dct: vec![0i32; MAX_TR_COEFF].into_boxed_slice(),
            fenc_dct: vec![0i32; MAX_TR_COEFF].into_boxed_slice(),
            fenc_short: vec![0i16; MAX_TR_COEFF].into_boxed_slice(),
        })
    }

    /// Bit-depth dependent QP offset.
    pub fn qp_bd_offset(&self) -> i32 {
        6 * (self.bit_depth as i32 - 8)
    }

    /// Set the QP for all three channels from the luma QP and the PPS
    /// chroma QP offsets.
    pub fn set_qp(
        &mut self,
        qp_y: i32,
        cb_qp_offset: i32,
        cr_qp_offset: i32,
        format: ChromaFormat,
    ) {
        let bd = self.qp_bd_offset();
        debug_assert!((0..=57 + bd).contains(&(qp_y + bd)));
        self.qp_param[Channel::Luma as usize] = QpParam::new(qp_y + bd);
        self.qp_param[Channel::ChromaU as usize] =
            QpParam::new(chroma_qp(qp_y, cb_qp_offset, format, bd) + bd);
        self.qp_param[Channel::ChromaV as usize] =
            QpParam::new(chroma_qp(qp_y, cr_qp_offset, format, bd) + bd);
    }

    /// Cache the squared Lagrange multipliers used by RDOQ, one per
    /// channel.
    pub fn set_lambdas(&mut self, lambda2_y: f64, lambda2_cb: f64, lambda2_cr: f64) {
        self.lambda2 = [lambda2_y, lambda2_cb, lambda2_cr];
    }

    /// QP parameter currently in effect for a channel.
    pub fn qp_param(&self, channel: Channel) -> QpParam {
        self.qp_param[channel as usize]
    }

    /// Forward path: transform the residual block, quantize it and write
    /// the coefficient block. Returns the number of nonzero coefficients.
    ///
    /// `fenc` supplies the source block (samples and stride) for the
    /// psy-RDOQ bias; it is only read when psy-RDOQ is active on a luma
    /// block.
    pub fn transform_nxn(
        &mut self,
        tu: &TuDesc,
        fenc: Option<(&[i16], usize)>,
        residual: &[i16],
        stride: usize,
        coeff: &mut [i16],
        nr: Option<&mut NoiseReduction>,
    ) -> u32 {
        let log2 = tu.size.log2_size();
        let tr_size = tu.size.size();
        let num_coeff = tr_size * tr_size;

        if tu.transquant_bypass {
            let mut num_sig = 0u32;
            for y in 0..tr_size {
                for x in 0..tr_size {
                    let r = residual[y * stride + x];
                    coeff[y * tr_size + x] = r;
                    num_sig += (r != 0) as u32;
                }
            }
            return num_sig;
        }

        let shift = transform_shift(self.bit_depth, log2);
        if tu.transform_skip {
            if shift >= 0 {
                for y in 0..tr_size {
                    for x in 0..tr_size {
                        self.resi_dct[y * tr_size + x] = (residual[y * stride + x] as i32) << shift;
                    }
                }
            } else {
                // Bit depths above 13 scale down instead.
                let shift = -shift;
                let offset = 1 << (shift - 1);
                for y in 0..tr_size {
                    for x in 0..tr_size {
                        self.resi_dct[y * tr_size + x] =
                            (residual[y * stride + x] as i32 + offset) >> shift;
                    }
                }
            }
        } else {
            let size_idx = tu.size.size_idx();
            let use_dst = size_idx == 0 && tu.channel.is_luma() && tu.intra;
            let index = KERNEL_DCT_4X4 + size_idx - use_dst as usize;

            if self.psy_rdoq_scale > 0 && tu.channel.is_luma() {
                if let Some((fenc, fenc_stride)) = fenc {
                    for y in 0..tr_size {
                        self.fenc_short[y * tr_size..y * tr_size + tr_size]
                            .copy_from_slice(&fenc[y * fenc_stride..y * fenc_stride + tr_size]);
                    }
                    (self.kernels.fwd[index])(
                        &self.fenc_short,
                        &mut self.fenc_dct,
                        tr_size,
                        self.bit_depth,
                    );
                }
            }

            (self.kernels.fwd[index])(residual, &mut self.resi_dct, stride, self.bit_depth);

            if let Some(nr) = nr {
                if nr.enabled && !use_dst {
                    denoise_dct(
                        &mut self.resi_dct[..num_coeff],
                        &mut nr.residual_sum[size_idx][..num_coeff],
                        &nr.offset[size_idx][..num_coeff],
                    );
                    nr.count[size_idx] += 1;
                }
            }
        }

        if self.use_rdoq && tu.use_rdoq {
            self.rdo_quant(tu, coeff).num_sig
        } else {
            self.quant(tu, coeff)
        }
    }

    /// Inverse path: dequantize the coefficient block and reconstruct the
    /// residual.
    pub fn inv_transform_nxn(
        &mut self,
        transquant_bypass: bool,
        residual: &mut [i16],
        stride: usize,
        coeff: &[i16],
        size: TransformSize,
        channel: Channel,
        intra: bool,
        transform_skip: bool,
        num_sig: u32,
    ) {
        let log2 = size.log2_size();
        let tr_size = size.size();

        if transquant_bypass {
            for y in 0..tr_size {
                for x in 0..tr_size {
                    residual[y * stride + x] = coeff[y * tr_size + x];
                }
            }
            return;
        }

        let qp = self.qp_param[channel as usize];
        let shift = QUANT_IQUANT_SHIFT - QUANT_SHIFT - transform_shift(self.bit_depth, log2);
        let num_coeff = tr_size * tr_size;

        if self.scaling.enabled() {
            let list_type = (if intra { 0 } else { 3 }) + channel as usize;
            let dequant_coef = self
                .scaling
                .dequant_coef(size.size_idx(), list_type, qp.rem as usize);
            dequant_scaling(
                &coeff[..num_coeff],
                dequant_coef,
                &mut self.resi_dct[..num_coeff],
                qp.per,
                shift,
            );
        } else {
            let scale = INV_QUANT_SCALES[qp.rem as usize] << qp.per;
            dequant_normal(
                &coeff[..num_coeff],
                &mut self.resi_dct[..num_coeff],
                scale,
                shift,
            );
        }

        if transform_skip {
            let shift = transform_shift(self.bit_depth, log2);
            if shift > 0 {
                let round = 1 << (shift - 1);
                for y in 0..tr_size {
                    for x in 0..tr_size {
                        residual[y * stride + x] =
                            ((self.resi_dct[y * tr_size + x] + round) >> shift) as i16;
                    }
                }
            } else {
                let shift = -shift;
                for y in 0..tr_size {
                    for x in 0..tr_size {
                        residual[y * stride + x] = (self.resi_dct[y * tr_size + x] << shift) as i16;
                    }
                }
            }
        } else {
            let size_idx = size.size_idx();
            let use_dst = size_idx == 0 && channel.is_luma() && intra;

            debug_assert_eq!(
                num_sig as usize,
                coeff[..num_coeff].iter().filter(|&&c| c != 0).count(),
                "nonzero count does not match the coefficient block"
            );

            if num_sig == 1 && coeff[0] != 0 && !use_dst {
                // A lone DC coefficient reconstructs to a constant block.
                let shift_2nd = 12 - (self.bit_depth as i32 - 8);
                let add_2nd = 1 << (shift_2nd - 1);
                let dc = (((self.resi_dct[0] * 64 + 64) >> 7) * 64 + add_2nd) >> shift_2nd;
                for y in 0..tr_size {
                    residual[y * stride..y * stride + tr_size].fill(dc as i16);
                }
                return;
            }

            let index = KERNEL_DCT_4X4 + size_idx - use_dst as usize;
            (self.kernels.inv[index])(&self.resi_dct, residual, stride, self.bit_depth);
        }
    }

    /// Scalar quantization with dead-zone rounding, optionally chained
    /// into sign-bit hiding.
    pub(crate) fn quant(&self, tu: &TuDesc, qcoef: &mut [i16]) -> u32 {
        let log2 = tu.size.log2_size();
        let list_type = (if tu.intra { 0 } else { 3 }) + tu.channel as usize;
        let qp = self.qp_param[tu.channel as usize];
        let quant_coef = self
            .scaling
            .quant_coef(tu.size.size_idx(), list_type, qp.rem as usize);

        let qbits = QUANT_SHIFT + qp.per + transform_shift(self.bit_depth, log2);
        debug_assert!(qbits >= 9);
        let add = (if tu.slice_type == SliceType::I { 171 } else { 85 }) << (qbits - 9);
        let num_coeff = 1usize << (2 * log2);

        let mut delta_u = [0i32; MAX_TR_COEFF];
        let num_sig = quant_block(
            &self.resi_dct[..num_coeff],
            quant_coef,
            &mut delta_u[..num_coeff],
            &mut qcoef[..num_coeff],
            qbits,
            add,
        );

        if num_sig >= 2 && tu.sign_hide {
            let scan_type = ScanType::select(tu.intra, tu.intra_dir, log2, tu.channel.is_luma());
            let params = TuCodingParams::new(scan_type, log2, tu.channel.is_luma());
            sign_bit_hiding(qcoef, &self.resi_dct, &delta_u, num_sig, &params)
        } else {
            num_sig
        }
    }
}

/// Quantize one block: `level = (|coef| * quant_coef + add) >> qbits`, with
/// the rounding residue recorded for sign-bit hiding.
pub(crate) fn quant_block(
    coef: &[i32],
    quant_coef: &[i32],
    delta_u: &mut [i32],
    qcoef: &mut [i16],
    qbits: i32,
    add: i32,
) -> u32 {
    let qbits8 = qbits - 8;
    let mut num_sig = 0u32;

    for i in 0..coef.len() {
        let c = coef[i];
        let tmp = c.unsigned_abs() as i64 * quant_coef[i] as i64;
        let level = (tmp + add as i64) >> qbits;
        delta_u[i] = ((tmp - (level << qbits)) >> qbits8) as i32;
        num_sig += (level != 0) as u32;
        let level = if c < 0 { -level } else { level };
        qcoef[i] = level.clamp(-32768, 32767) as i16;
    }
    num_sig
}

/// Quantize one block and also emit the scaled products
/// `|coef| * quant_coef`, which RDOQ reuses for its distortion terms.
pub(crate) fn nquant_block(
    coef: &[i32],
    quant_coef: &[i32],
    scaled: &mut [i32],
    qcoef: &mut [i16],
    qbits: i32,
    add: i32,
) -> u32 {
    let mut num_sig = 0u32;

    for i in 0..coef.len() {
        let c = coef[i];
        let tmp = c.unsigned_abs() as i64 * quant_coef[i] as i64;
        scaled[i] = tmp as i32;
        let level = (tmp + add as i64) >> qbits;
        num_sig += (level != 0) as u32;
        let level = if c < 0 { -level } else { level };
        qcoef[i] = level.clamp(-32768, 32767) as i16;
    }
    num_sig
}

/// Dequantize with a flat scale.
pub(crate) fn dequant_normal(qcoef: &[i16], out: &mut [i32], scale: i32, shift: i32) {
    if shift > 0 {
        let add = 1i64 << (shift - 1);
        for (o, &c) in out.iter_mut().zip(qcoef) {
            *o = ((c as i64 * scale as i64 + add) >> shift).clamp(-32768, 32767) as i32;
        }
    } else {
        let shift = -shift;
        for (o, &c) in out.iter_mut().zip(qcoef) {
            *o = ((c as i64 * scale as i64) << shift).clamp(-32768, 32767) as i32;
        }
    }
}

/// Dequantize with a per-coefficient scaling matrix.
pub(crate) fn dequant_scaling(
    qcoef: &[i16],
    dequant_coef: &[i32],
    out: &mut [i32],
    per: i32,
    shift: i32,
) {
    // The dequant matrices carry an extra factor of 16.
    let shift = shift + 4;

    if shift > per {
        let s = shift - per;
        let add = 1i64 << (s - 1);
        for i in 0..qcoef.len() {
            let q = (qcoef[i] as i64 * dequant_coef[i] as i64 + add) >> s;
            out[i] = q.clamp(-32768, 32767) as i32;
        }
    } else {
        let s = per - shift;
        for i in 0..qcoef.len() {
            let q = (qcoef[i] as i64 * dequant_coef[i] as i64).clamp(-32768, 32767);
            out[i] = (q << s).clamp(-32768, 32767) as i32;
        }
    }
}

/// Subtract the learned per-frequency offsets from the coefficient
/// magnitudes and accumulate the magnitudes for the next offset update.
/// Signs are preserved exactly, including for zero.
pub(crate) fn denoise_dct(dct: &mut [i32], residual_sum: &mut [u32], offset: &[u16]) {
    for i in 0..dct.len() {
        let level = dct[i];
        let magnitude = level.unsigned_abs();
        residual_sum[i] = residual_sum[i].wrapping_add(magnitude);
        let reduced = magnitude.saturating_sub(offset[i] as u32) as i32;
        dct[i] = if level < 0 { -reduced } else { reduced };
    }
}

/// Force the parity of each coding group's absolute level sum to match the
/// sign of its first nonzero coefficient, adjusting the coefficient whose
/// rounding residue makes the change cheapest.
///
/// Minimizes distortion only; no rate is considered.
pub(crate) fn sign_bit_hiding(
    qcoef: &mut [i16],
    coef: &[i32],
    delta_u: &[i32],
    mut num_sig: u32,
    params: &TuCodingParams,
) -> u32 {
    let cg_num = 1usize << (params.log2_tr_size_cg * 2);
    let scan = params.scan;
    let mut last_cg = true;

    for sub_set in (0..cg_num).rev() {
        let sub_pos = sub_set << LOG2_SCAN_SET_SIZE;

        let Some(last_nz) =
            (0..SCAN_SET_SIZE).rev().find(|&n| qcoef[scan[n + sub_pos] as usize] != 0)
        else {
            continue;
        };
        let first_nz = (0..SCAN_SET_SIZE)
            .find(|&n| qcoef[scan[n + sub_pos] as usize] != 0)
            .unwrap_or(last_nz);

        if last_nz as i32 - first_nz as i32 >= SBH_THRESHOLD {
            let sign_bit = (qcoef[scan[sub_pos + first_nz] as usize] <= 0) as u32;
            let mut abs_sum = 0u32;
            for n in first_nz..=last_nz {
                abs_sum += qcoef[scan[n + sub_pos] as usize].unsigned_abs() as u32;
            }

            if sign_bit != (abs_sum & 1) {
                let mut min_cost = i32::MAX;
                let mut best: Option<(usize, i32)> = None;

                let start = if last_cg { last_nz } else { SCAN_SET_SIZE - 1 };
                for n in (0..=start).rev() {
                    let blk_pos = scan[n + sub_pos] as usize;
                    let (cur_cost, cur_change) = if qcoef[blk_pos] != 0 {
                        if delta_u[blk_pos] > 0 {
                            (-delta_u[blk_pos], 1)
                        } else if n == first_nz && qcoef[blk_pos].abs() == 1 {
                            // Shrinking the first nonzero to zero would
                            // move the hidden sign to another position.
                            (i32::MAX, 0)
                        } else {
                            (delta_u[blk_pos], -1)
                        }
                    } else if n < first_nz {
                        let this_sign_bit = (coef[blk_pos] < 0) as u32;
                        if this_sign_bit != sign_bit {
                            (i32::MAX, 0)
                        } else {
                            (-delta_u[blk_pos], 1)
                        }
                    } else {
                        (-delta_u[blk_pos], 1)
                    };

                    if cur_cost < min_cost {
                        min_cost = cur_cost;
                        best = Some((blk_pos, cur_change));
                    }
                }

                if let Some((min_pos, mut change)) = best {
                    if qcoef[min_pos] == 32767 || qcoef[min_pos] == -32768 {
                        change = -1;
                    }

                    if qcoef[min_pos] == 0 {
                        num_sig += 1;
                    } else if change == -1 && qcoef[min_pos].abs() == 1 {
                        num_sig -= 1;
                    }

                    if coef[min_pos] >= 0 {
                        qcoef[min_pos] += change as i16;
                    } else {
                        qcoef[min_pos] -= change as i16;
                    }
                }
            }
        }

        last_cg = false;
    }

    num_sig
}
