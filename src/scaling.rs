//! Quantization parameters and scaling-list matrices.
//!
//! A [`ScalingList`] bundles the per-coefficient forward multipliers,
//! inverse multipliers and error-scale factors for every transform size,
//! list type and QP remainder. It is built once (flat or from custom
//! lists) and then borrowed immutably by the quantizer for its lifetime.

use crate::error::{Result, TqError};
use crate::transform::MAX_TR_DYNAMIC_RANGE;

/// Forward quantization scales per QP remainder.
pub const QUANT_SCALES: [i32; 6] = [26214, 23302, 20560, 18396, 16384, 14564];

/// Inverse quantization scales per QP remainder.
pub const INV_QUANT_SCALES: [i32; 6] = [40, 45, 51, 57, 64, 72];

/// Log2 scale of the distortion metric used by rate-distortion costs.
pub const SCALE_BITS: i32 = 15;

/// Number of transform sizes with scaling lists (4x4 .. 32x32).
pub const NUM_SIZES: usize = 4;

/// Number of scaling list types (intra/inter x Y/Cb/Cr).
pub const NUM_LISTS: usize = 6;

/// Number of QP remainder classes.
pub const NUM_REM: usize = 6;

/// Chroma QP mapping for 4:2:0, indexed by `qp - 30`.
const CHROMA_SCALE_420: [i32; 28] = [
    29, 30, 31, 32, 33, 33, 34, 34, 35, 35, 36, 36, 37, 37, //
    38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51,
];

/// Color channel of a transform block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Luma (Y).
    Luma = 0,
    /// First chroma channel (Cb).
    ChromaU = 1,
    /// Second chroma channel (Cr).
    ChromaV = 2,
}

impl Channel {
    /// Whether this is the luma channel.
    pub fn is_luma(&self) -> bool {
        matches!(self, Channel::Luma)
    }
}

/// Slice type of the picture being coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    /// Intra slice.
    I,
    /// Predicted slice.
    P,
    /// Bi-predicted slice.
    B,
}

/// Chroma subsampling format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaFormat {
    /// 4:2:0 subsampling.
    Yuv420,
    /// 4:2:2 subsampling.
    Yuv422,
    /// 4:4:4 (no subsampling).
    Yuv444,
}

/// QP split into the per-6 step multiplier and remainder.
#[derive(Debug, Clone, Copy, Default)]
pub struct QpParam {
    /// Full scaled QP.
    pub qp: i32,
    /// `qp / 6`.
    pub per: i32,
    /// `qp % 6`.
    pub rem: i32,
}

impl QpParam {
    /// Split a scaled QP (bit-depth offset already applied).
    pub fn new(qp_scaled: i32) -> Self {
        debug_assert!(qp_scaled >= 0);
        QpParam {
            qp: qp_scaled,
            per: qp_scaled / 6,
            rem: qp_scaled % 6,
        }
    }
}

/// Derive a chroma QP from the luma QP and a chroma QP offset.
///
/// QPs of 30 and above are compressed through the 4:2:0 mapping table;
/// other chroma formats clamp at 51. The caller adds the bit-depth offset
/// afterwards.
pub fn chroma_qp(qp_y: i32, chroma_qp_offset: i32, format: ChromaFormat, qp_bd_offset: i32) -> i32 {
    let mut qp = (qp_y + chroma_qp_offset).clamp(-qp_bd_offset, 57);
    if qp >= 30 {
        if format == ChromaFormat::Yuv420 {
            qp = CHROMA_SCALE_420[(qp - 30) as usize];
        } else {
            qp = qp.min(51);
        }
    }
    qp
}

/// Raw scaling-list data: 4x4 lists plus 8x8 lists with DC overrides, as
/// carried in an SPS/PPS. Lists for 16x16 and 32x32 are upsampled from the
/// 8x8 entries.
#[derive(Debug, Clone)]
pub struct ScalingListData {
    /// Six 16-entry lists for 4x4 blocks.
    pub lists_4x4: [[i32; 16]; NUM_LISTS],
    /// Six 64-entry lists shared by 8x8 and larger blocks.
    pub lists_8x8: [[i32; 64]; NUM_LISTS],
    /// DC values for 16x16 blocks.
    pub dc_16x16: [i32; NUM_LISTS],
    /// DC values for 32x32 blocks.
    pub dc_32x32: [i32; NUM_LISTS],
}

/// Default intra scaling list for 8x8 blocks.
pub const DEFAULT_SCALING_LIST_8X8_INTRA: [i32; 64] = [
    16, 16, 16, 16, 17, 18, 21, 24, //
    16, 16, 16, 16, 17, 19, 22, 25, //
    16, 16, 17, 18, 20, 22, 25, 29, //
    16, 16, 18, 21, 24, 27, 31, 36, //
    17, 17, 20, 24, 30, 35, 41, 47, //
    18, 19, 22, 27, 35, 44, 54, 65, //
    21, 22, 25, 31, 41, 54, 70, 88, //
    24, 25, 29, 36, 47, 65, 88, 115,
];

/// Default inter scaling list for 8x8 blocks.
pub const DEFAULT_SCALING_LIST_8X8_INTER: [i32; 64] = [
    16, 16, 16, 16, 17, 18, 20, 24, //
    16, 16, 16, 17, 18, 20, 24, 25, //
    16, 16, 17, 18, 20, 24, 25, 28, //
    16, 17, 18, 20, 24, 25, 28, 33, //
    17, 18, 20, 24, 25, 28, 33, 41, //
    18, 20, 24, 25, 28, 33, 41, 54, //
    20, 24, 25, 28, 33, 41, 54, 71, //
    24, 25, 28, 33, 41, 54, 71, 91,
];

impl Default for ScalingListData {
    /// The default (non-flat) lists from the standard.
    fn default() -> Self {
        let mut lists_8x8 = [[0i32; 64]; NUM_LISTS];
        for (list, entry) in lists_8x8.iter_mut().enumerate() {
            *entry = if list < 3 {
                DEFAULT_SCALING_LIST_8X8_INTRA
            } else {
                DEFAULT_SCALING_LIST_8X8_INTER
            };
        }
        ScalingListData {
            lists_4x4: [[16; 16]; NUM_LISTS],
            lists_8x8,
            dc_16x16: [16; NUM_LISTS],
            dc_32x32: [16; NUM_LISTS],
        }
    }
}

type CoefTable<T> = [[[Vec<T>; NUM_REM]; NUM_LISTS]; NUM_SIZES];

/// Pre-computed quantizer and dequantizer matrices.
pub struct ScalingList {
    enabled: bool,
    bit_depth: u32,
    quant_coef: CoefTable<i32>,
    dequant_coef: CoefTable<i32>,
    err_scale: CoefTable<f64>,
}

impl ScalingList {
    /// Build the flat bundle (scaling lists disabled).
    pub fn flat(bit_depth: u32) -> Result<Self> {
        check_bit_depth(bit_depth)?;
        let mut list = Self::empty(bit_depth, false);
        for size in 0..NUM_SIZES {
            let count = coef_count(size);
            for lt in 0..NUM_LISTS {
                for rem in 0..NUM_REM {
                    list.quant_coef[size][lt][rem] = vec![QUANT_SCALES[rem]; count];
                    list.dequant_coef[size][lt][rem] = vec![INV_QUANT_SCALES[rem] << 4; count];
                }
            }
        }
        list.setup_err_scale();
        Ok(list)
    }

    /// Build a bundle from custom scaling-list data.
    pub fn from_data(bit_depth: u32, data: &ScalingListData) -> Result<Self> {
        check_bit_depth(bit_depth)?;
        for list in data.lists_4x4.iter().flatten() {
            check_entry(*list)?;
        }
        for list in data.lists_8x8.iter().flatten() {
            check_entry(*list)?;
        }
        for &dc in data.dc_16x16.iter().chain(data.dc_32x32.iter()) {
            check_entry(dc)?;
        }

        let mut out = Self::empty(bit_depth, true);
        for size in 0..NUM_SIZES {
            let tr_size = 4usize << size;
            // 16x16 and 32x32 lists are upsampled from the 8x8 entries.
            let ratio = tr_size / tr_size.min(8);
            for lt in 0..NUM_LISTS {
                let dc = match size {
                    2 => Some(data.dc_16x16[lt]),
                    3 => Some(data.dc_32x32[lt]),
                    _ => None,
                };
                let base: &[i32] = if size == 0 {
                    &data.lists_4x4[lt]
                } else {
                    &data.lists_8x8[lt]
                };
                let base_stride = tr_size.min(8);

                for rem in 0..NUM_REM {
                    let quant_scale = QUANT_SCALES[rem] << 4;
                    let inv_scale = INV_QUANT_SCALES[rem];
                    let mut quant = vec![0i32; tr_size * tr_size];
                    let mut dequant = vec![0i32; tr_size * tr_size];
                    for y in 0..tr_size {
                        for x in 0..tr_size {
                            let entry = base[(y / ratio) * base_stride + x / ratio];
                            quant[y * tr_size + x] = quant_scale / entry;
                            dequant[y * tr_size + x] = inv_scale * entry;
                        }
                    }
                    if let Some(dc) = dc {
                        quant[0] = quant_scale / dc;
                        dequant[0] = inv_scale * dc;
                    }
                    out.quant_coef[size][lt][rem] = quant;
                    out.dequant_coef[size][lt][rem] = dequant;
                }
            }
        }
        out.setup_err_scale();
        Ok(out)
    }

    fn empty(bit_depth: u32, enabled: bool) -> Self {
        ScalingList {
            enabled,
            bit_depth,
            quant_coef: std::array::from_fn(|_| {
                std::array::from_fn(|_| std::array::from_fn(|_| Vec::new()))
            }),
            dequant_coef: std::array::from_fn(|_| {
                std::array::from_fn(|_| std::array::from_fn(|_| Vec::new()))
            }),
            err_scale: std::array::from_fn(|_| {
                std::array::from_fn(|_| std::array::from_fn(|_| Vec::new()))
            }),
        }
    }

    /// Distortion scale factors follow directly from the forward
    /// multipliers, so they are derived after those are in place.
    fn setup_err_scale(&mut self) {
        for size in 0..NUM_SIZES {
            let log2_tr_size = size as i32 + 2;
            let transform_shift = MAX_TR_DYNAMIC_RANGE - self.bit_depth as i32 - log2_tr_size;
            let scaling_bits = (2.0f64).powi(SCALE_BITS - 2 * transform_shift);
            let depth_scale = (1i64 << (2 * (self.bit_depth - 8))) as f64;

            for lt in 0..NUM_LISTS {
                for rem in 0..NUM_REM {
                    let quant = &self.quant_coef[size][lt][rem];
                    self.err_scale[size][lt][rem] = quant
                        .iter()
                        .map(|&q| scaling_bits / q as f64 / q as f64 / depth_scale)
                        .collect();
                }
            }
        }
    }

    /// Whether custom scaling lists are enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Bit depth the bundle was built for.
    pub fn bit_depth(&self) -> u32 {
        self.bit_depth
    }

    /// Forward multipliers for (size index, list type, QP remainder).
    pub fn quant_coef(&self, size_idx: usize, list_type: usize, rem: usize) -> &[i32] {
        &self.quant_coef[size_idx][list_type][rem]
    }

    /// Inverse multipliers for (size index, list type, QP remainder).
    pub fn dequant_coef(&self, size_idx: usize, list_type: usize, rem: usize) -> &[i32] {
        &self.dequant_coef[size_idx][list_type][rem]
    }

    /// Error-scale factors for (size index, list type, QP remainder).
    pub fn err_scale(&self, size_idx: usize, list_type: usize, rem: usize) -> &[f64] {
        &self.err_scale[size_idx][list_type][rem]
    }
}

fn coef_count(size_idx: usize) -> usize {
    let tr_size = 4usize << size_idx;
    tr_size * tr_size
}

fn check_bit_depth(bit_depth: u32) -> Result<()> {
    if !(8..=14).contains(&bit_depth) {
        return Err(TqError::UnsupportedBitDepth(bit_depth));
    }
    Ok(())
}

fn check_entry(entry: i32) -> Result<()> {
    if entry <= 0 {
        return Err(TqError::ScalingListEntry(entry));
    }
    Ok(())
}
