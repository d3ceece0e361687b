//! HEVC forward and inverse transforms.
//!
//! This module provides the integer transform kernels used by the
//! transform-quantization core:
//! - DCT-II for 4x4, 8x8, 16x16 and 32x32 blocks
//! - DST-VII for 4x4 intra luma blocks
//!
//! Forward kernels take a strided `i16` residual block and produce a dense
//! coefficient block; inverse kernels take a dense coefficient block and
//! produce a strided `i16` residual block. Intermediate values of the
//! inverse transform are clipped to the 16-bit dynamic range as required
//! for conformance.

#![allow(clippy::needless_range_loop)]

/// Maximum transform size (32x32).
pub const MAX_TR_SIZE: usize = 32;

/// Maximum number of coefficients in a transform block.
pub const MAX_TR_COEFF: usize = MAX_TR_SIZE * MAX_TR_SIZE;

/// Dynamic range of transform intermediates, in bits.
pub const MAX_TR_DYNAMIC_RANGE: i32 = 15;

/// Transform sizes supported by HEVC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformSize {
    /// 4x4 transform.
    T4x4,
    /// 8x8 transform.
    T8x8,
    /// 16x16 transform.
    T16x16,
    /// 32x32 transform.
    T32x32,
}

impl TransformSize {
    /// Get the size as a number.
    pub fn size(&self) -> usize {
        1 << self.log2_size()
    }

    /// Get the log2 of the size.
    pub fn log2_size(&self) -> u32 {
        match self {
            Self::T4x4 => 2,
            Self::T8x8 => 3,
            Self::T16x16 => 4,
            Self::T32x32 => 5,
        }
    }

    /// Size index used for table lookups (0 for 4x4 .. 3 for 32x32).
    pub fn size_idx(&self) -> usize {
        self.log2_size() as usize - 2
    }

    /// Create from size value.
    pub fn from_size(size: usize) -> Option<Self> {
        match size {
            4 => Some(Self::T4x4),
            8 => Some(Self::T8x8),
            16 => Some(Self::T16x16),
            32 => Some(Self::T32x32),
            _ => None,
        }
    }

    /// Create from log2 size value.
    pub fn from_log2(log2: u32) -> Option<Self> {
        Self::from_size(1usize.checked_shl(log2)?)
    }
}

/// DST-VII matrix coefficients for 4x4 intra (luma only).
const DST4_MATRIX: [[i32; 4]; 4] = [
    [29, 55, 74, 84],
    [74, 74, 0, -74],
    [84, -29, -74, 55],
    [55, -84, 74, -29],
];

/// DCT-II matrix coefficients for 4x4 transform.
const DCT4_MATRIX: [[i32; 4]; 4] = [
    [64, 64, 64, 64],
    [83, 36, -36, -83],
    [64, -64, -64, 64],
    [36, -83, 83, -36],
];

/// DCT-II matrix coefficients for 8x8 transform.
const DCT8_MATRIX: [[i32; 8]; 8] = [
    [64, 64, 64, 64, 64, 64, 64, 64],
    [89, 75, 50, 18, -18, -50, -75, -89],
    [83, 36, -36, -83, -83, -36, 36, 83],
    [75, -18, -89, -50, 50, 89, 18, -75],
    [64, -64, -64, 64, 64, -64, -64, 64],
    [50, -89, 18, 75, -75, -18, 89, -50],
    [36, -83, 83, -36, -36, 83, -83, 36],
    [18, -50, 75, -89, 89, -75, 50, -18],
];

/// DCT-II matrix coefficients for 16x16 transform.
const DCT16_MATRIX: [[i32; 16]; 16] = [
    [64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64],
    [90, 87, 80, 70, 57, 43, 25, 9, -9, -25, -43, -57, -70, -80, -87, -90],
    [89, 75, 50, 18, -18, -50, -75, -89, -89, -75, -50, -18, 18, 50, 75, 89],
    [87, 57, 9, -43, -80, -90, -70, -25, 25, 70, 90, 80, 43, -9, -57, -87],
    [83, 36, -36, -83, -83, -36, 36, 83, 83, 36, -36, -83, -83, -36, 36, 83],
    [80, 9, -70, -87, -25, 57, 90, 43, -43, -90, -57, 25, 87, 70, -9, -80],
    [75, -18, -89, -50, 50, 89, 18, -75, -75, 18, 89, 50, -50, -89, -18, 75],
    [70, -43, -87, 9, 90, 25, -80, -57, 57, 80, -25, -90, -9, 87, 43, -70],
    [64, -64, -64, 64, 64, -64, -64, 64, 64, -64, -64, 64, 64, -64, -64, 64],
    [57, -80, -25, 90, -9, -87, 43, 70, -70, -43, 87, 9, -90, 25, 80, -57],
    [50, -89, 18, 75, -75, -18, 89, -50, -50, 89, -18, -75, 75, 18, -89, 50],
    [43, -90, 57, 25, -87, 70, 9, -80, 80, -9, -70, 87, -25, -57, 90, -43],
    [36, -83, 83, -36, -36, 83, -83, 36, 36, -83, 83, -36, -36, 83, -83, 36],
    [25, -70, 90, -80, 43, 9, -57, 87, -87, 57, -9, -43, 80, -90, 70, -25],
    [18, -50, 75, -89, 89, -75, 50, -18, -18, 50, -75, 89, -89, 75, -50, 18],
    [9, -25, 43, -57, 70, -80, 87, -90, 90, -87, 80, -70, 57, -43, 25, -9],
];

/// DCT-II odd-row basis functions for the 32x32 transform (left half).
///
/// Even rows reuse the 16x16 matrix by symmetry; odd rows are
/// anti-symmetric, so only the left 16 columns are stored.
const DCT32_ODD: [[i32; 16]; 16] = [
    [90, 90, 88, 85, 82, 78, 73, 67, 61, 54, 46, 38, 31, 22, 13, 4],
    [90, 82, 67, 46, 22, -4, -31, -54, -73, -85, -90, -88, -78, -61, -38, -13],
    [88, 67, 31, -13, -54, -82, -90, -78, -46, -4, 38, 73, 90, 85, 61, 22],
    [85, 46, -13, -67, -90, -73, -22, 38, 82, 88, 54, -4, -61, -90, -78, -31],
    [82, 22, -54, -90, -61, 13, 78, 85, 31, -46, -90, -67, 4, 73, 88, 38],
    [78, -4, -82, -73, 13, 85, 67, -22, -88, -61, 31, 90, 54, -38, -90, -46],
    [73, -31, -90, -22, 78, 67, -38, -90, -13, 82, 61, -46, -88, -4, 85, 54],
    [67, -54, -78, 38, 85, -22, -90, 4, 90, 13, -88, -31, 82, 46, -73, -61],
    [61, -73, -46, 82, 31, -88, -13, 90, -4, -90, 22, 85, -38, -78, 54, 67],
    [54, -85, -4, 88, -46, -61, 82, 13, -90, 38, 67, -78, -22, 90, -31, -73],
    [46, -90, 38, 54, -90, 31, 61, -88, 22, 67, -85, 13, 73, -82, 4, 78],
    [38, -88, 73, -4, -67, 90, -46, -31, 85, -78, 13, 61, -90, 54, 22, -82],
    [31, -78, 90, -61, 4, 54, -88, 82, -38, -22, 73, -90, 67, -13, -46, 85],
    [22, -61, 85, -90, 73, -38, -4, 46, -78, 90, -82, 54, -13, -31, 67, -88],
    [13, -38, 61, -78, 88, -90, 85, -73, 54, -31, 4, 22, -46, 67, -82, 90],
    [4, -13, 22, -31, 38, -46, 54, -61, 67, -73, 78, -82, 85, -88, 90, -90],
];

/// Get the 32x32 DCT basis coefficient at (row, col).
///
/// Even rows fold onto the 16x16 matrix (symmetric), odd rows onto the
/// stored left half (anti-symmetric).
fn dct32_coef(row: usize, col: usize) -> i32 {
    if row % 2 == 0 {
        if col < 16 {
            DCT16_MATRIX[row / 2][col]
        } else {
            DCT16_MATRIX[row / 2][31 - col]
        }
    } else if col < 16 {
        DCT32_ODD[row / 2][col]
    } else {
        -DCT32_ODD[row / 2][31 - col]
    }
}

/// Signature of a forward transform kernel: strided residual in, dense
/// coefficients out.
pub type FwdTransformFn = fn(src: &[i16], dst: &mut [i32], stride: usize, bit_depth: u32);

/// Signature of an inverse transform kernel: dense coefficients in,
/// strided residual out.
pub type InvTransformFn = fn(src: &[i32], dst: &mut [i16], stride: usize, bit_depth: u32);

/// Kernel table index for the 4x4 DST.
pub const KERNEL_DST_4X4: usize = 0;
/// Kernel table index for the 4x4 DCT; larger DCTs follow in size order.
pub const KERNEL_DCT_4X4: usize = 1;

/// Transform kernel capability set.
///
/// Kernels are selected from a table indexed by transform size; callers may
/// substitute optimized implementations as long as they remain bit-exact
/// with the reference kernels.
#[derive(Clone)]
pub struct Kernels {
    /// Forward kernels, indexed DST4, DCT4, DCT8, DCT16, DCT32.
    pub fwd: [FwdTransformFn; 5],
    /// Inverse kernels, same order.
    pub inv: [InvTransformFn; 5],
}

impl Default for Kernels {
    fn default() -> Self {
        Self {
            fwd: [fwd_dst4, fwd_dct4, fwd_dct8, fwd_dct16, fwd_dct32],
            inv: [inv_dst4, inv_dct4, inv_dct8, inv_dct16, inv_dct32],
        }
    }
}

/// Two-pass forward transform with the given basis matrix.
///
/// First pass transforms rows with `shift1 = log2(n) + bit_depth - 9`,
/// second pass transforms columns with `shift2 = log2(n) + 6`, matching the
/// normative forward scaling.
fn forward_2d<M>(m: M, n: usize, src: &[i16], dst: &mut [i32], stride: usize, bit_depth: u32)
where
    M: Fn(usize, usize) -> i32,
{
    let log2 = n.trailing_zeros() as i32;
    let shift1 = log2 + bit_depth as i32 - 9;
    let shift2 = log2 + 6;
    let add1 = 1i64 << (shift1 - 1);
    let add2 = 1i64 << (shift2 - 1);

    let mut tmp = [0i64; MAX_TR_COEFF];

    // Horizontal pass over rows of the residual.
    for i in 0..n {
        for j in 0..n {
            let mut sum = 0i64;
            for k in 0..n {
                sum += m(j, k) as i64 * src[i * stride + k] as i64;
            }
            tmp[i * n + j] = (sum + add1) >> shift1;
        }
    }

    // Vertical pass over columns of the intermediate.
    for i in 0..n {
        for j in 0..n {
            let mut sum = 0i64;
            for k in 0..n {
                sum += m(i, k) as i64 * tmp[k * n + j];
            }
            dst[i * n + j] = ((sum + add2) >> shift2) as i32;
        }
    }
}

/// Two-pass inverse transform with the given basis matrix.
///
/// Vertical pass with shift 7, horizontal pass with shift `20 - bit_depth`.
/// Intermediate values are clipped to the 16-bit dynamic range.
fn inverse_2d<M>(m: M, n: usize, src: &[i32], dst: &mut [i16], stride: usize, bit_depth: u32)
where
    M: Fn(usize, usize) -> i32,
{
    let shift1 = 7;
    let shift2 = 20 - bit_depth as i32;
    let add1 = 1i64 << (shift1 - 1);
    let add2 = 1i64 << (shift2 - 1);

    let mut tmp = [0i64; MAX_TR_COEFF];

    // Vertical pass.
    for i in 0..n {
        for j in 0..n {
            let mut sum = 0i64;
            for k in 0..n {
                sum += m(k, j) as i64 * src[k * n + i] as i64;
            }
            tmp[j * n + i] = ((sum + add1) >> shift1).clamp(-32768, 32767);
        }
    }

    // Horizontal pass.
    for i in 0..n {
        for j in 0..n {
            let mut sum = 0i64;
            for k in 0..n {
                sum += m(k, j) as i64 * tmp[i * n + k];
            }
            dst[i * stride + j] = ((sum + add2) >> shift2).clamp(-32768, 32767) as i16;
        }
    }
}

/// Forward 4x4 DST (intra luma).
pub fn fwd_dst4(src: &[i16], dst: &mut [i32], stride: usize, bit_depth: u32) {
    forward_2d(|r, c| DST4_MATRIX[r][c], 4, src, dst, stride, bit_depth);
}

/// Forward 4x4 DCT.
pub fn fwd_dct4(src: &[i16], dst: &mut [i32], stride: usize, bit_depth: u32) {
    forward_2d(|r, c| DCT4_MATRIX[r][c], 4, src, dst, stride, bit_depth);
}

/// Forward 8x8 DCT.
pub fn fwd_dct8(src: &[i16], dst: &mut [i32], stride: usize, bit_depth: u32) {
    forward_2d(|r, c| DCT8_MATRIX[r][c], 8, src, dst, stride, bit_depth);
}

/// Forward 16x16 DCT.
pub fn fwd_dct16(src: &[i16], dst: &mut [i32], stride: usize, bit_depth: u32) {
    forward_2d(|r, c| DCT16_MATRIX[r][c], 16, src, dst, stride, bit_depth);
}

/// Forward 32x32 DCT.
pub fn fwd_dct32(src: &[i16], dst: &mut [i32], stride: usize, bit_depth: u32) {
    forward_2d(dct32_coef, 32, src, dst, stride, bit_depth);
}

/// Inverse 4x4 DST (intra luma).
pub fn inv_dst4(src: &[i32], dst: &mut [i16], stride: usize, bit_depth: u32) {
    inverse_2d(|r, c| DST4_MATRIX[r][c], 4, src, dst, stride, bit_depth);
}

/// Inverse 4x4 DCT.
pub fn inv_dct4(src: &[i32], dst: &mut [i16], stride: usize, bit_depth: u32) {
    inverse_2d(|r, c| DCT4_MATRIX[r][c], 4, src, dst, stride, bit_depth);
}

/// Inverse 8x8 DCT.
pub fn inv_dct8(src: &[i32], dst: &mut [i16], stride: usize, bit_depth: u32) {
    inverse_2d(|r, c| DCT8_MATRIX[r][c], 8, src, dst, stride, bit_depth);
}

/// Inverse 16x16 DCT.
pub fn inv_dct16(src: &[i32], dst: &mut [i16], stride: usize, bit_depth: u32) {
    inverse_2d(|r, c| DCT16_MATRIX[r][c], 16, src, dst, stride, bit_depth);
}

/// Inverse 32x32 DCT.
pub fn inv_dct32(src: &[i32], dst: &mut [i16], stride: usize, bit_depth: u32) {
    inverse_2d(dct32_coef, 32, src, dst, stride, bit_depth);
}
