//! Coefficient scan orders and per-TU entropy-coding parameters.
//!
//! HEVC scans a transform block as a sequence of 4x4 coding groups; the
//! group grid and the positions inside each group follow the same scan
//! pattern (up-right diagonal, horizontal or vertical). The tables map a
//! forward scan index to the raster position inside the block.

use std::sync::OnceLock;

/// log2 of the number of coefficients in a coding group.
pub const LOG2_SCAN_SET_SIZE: u32 = 4;

/// Number of coefficients in a coding group.
pub const SCAN_SET_SIZE: usize = 16;

/// log2 of the coding-group edge length.
pub const MLS_CG_SIZE: u32 = 4;

/// Maximum number of coding groups in a block (32x32 has 64).
pub const MLS_GRP_NUM: usize = 64;

/// Coefficient scan pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    /// Up-right diagonal scan (default).
    Diag = 0,
    /// Horizontal scan (for near-vertical intra modes).
    Horizontal = 1,
    /// Vertical scan (for near-horizontal intra modes).
    Vertical = 2,
}

impl ScanType {
    /// Select the scan pattern for a transform unit.
    ///
    /// Mode-dependent coefficient scanning applies to intra blocks up to
    /// 8x8 luma / 4x4 chroma: near-horizontal prediction modes scan
    /// vertically, near-vertical modes scan horizontally.
    pub fn select(intra: bool, dir_mode: u32, log2_tr_size: u32, is_luma: bool) -> ScanType {
        if !intra {
            return ScanType::Diag;
        }
        let max_log2 = if is_luma { 3 } else { 2 };
        if log2_tr_size > max_log2 {
            return ScanType::Diag;
        }
        if (6..=14).contains(&dir_mode) {
            ScanType::Vertical
        } else if (22..=30).contains(&dir_mode) {
            ScanType::Horizontal
        } else {
            ScanType::Diag
        }
    }
}

/// Generate the scan positions of one `size`x`size` grid as (x, y) pairs.
fn scan_grid(scan: ScanType, size: usize) -> Vec<(usize, usize)> {
    let mut order = Vec::with_capacity(size * size);
    match scan {
        ScanType::Diag => {
            // Up-right diagonal: walk each anti-diagonal from bottom-left.
            let (mut x, mut y) = (0usize, 0usize);
            loop {
                loop {
                    if x < size && y < size {
                        order.push((x, y));
                    }
                    if y == 0 {
                        break;
                    }
                    y -= 1;
                    x += 1;
                }
                y = x + 1;
                x = 0;
                if order.len() >= size * size {
                    break;
                }
            }
        }
        ScanType::Horizontal => {
            for y in 0..size {
                for x in 0..size {
                    order.push((x, y));
                }
            }
        }
        ScanType::Vertical => {
            for x in 0..size {
                for y in 0..size {
                    order.push((x, y));
                }
            }
        }
    }
    order
}

/// Build the full coefficient scan for a block: coding groups in scan
/// order, 16 positions per group in the same scan order.
fn build_scan(scan: ScanType, log2_tr_size: u32) -> Vec<u16> {
    let tr_size = 1usize << log2_tr_size;
    let cg_size = tr_size >> 2;

    let mut table = Vec::with_capacity(tr_size * tr_size);
    for &(cg_x, cg_y) in &scan_grid(scan, cg_size) {
        for &(x, y) in &scan_grid(scan, 4) {
            let blk = (cg_y * 4 + y) * tr_size + cg_x * 4 + x;
            table.push(blk as u16);
        }
    }
    table
}

/// Build the coding-group scan for a block.
fn build_scan_cg(scan: ScanType, log2_tr_size_cg: u32) -> Vec<u16> {
    let cg_size = 1usize << log2_tr_size_cg;
    scan_grid(scan, cg_size)
        .iter()
        .map(|&(x, y)| (y * cg_size + x) as u16)
        .collect()
}

struct ScanTables {
    /// scan[scan_type][size_idx]: scan index -> raster position.
    scan: [[Vec<u16>; 4]; 3],
    /// scan_cg[scan_type][size_idx]: CG scan index -> CG raster position.
    scan_cg: [[Vec<u16>; 4]; 3],
}

static SCAN_TABLES: OnceLock<ScanTables> = OnceLock::new();

fn scan_tables() -> &'static ScanTables {
    SCAN_TABLES.get_or_init(|| {
        let types = [ScanType::Diag, ScanType::Horizontal, ScanType::Vertical];
        ScanTables {
            scan: types.map(|t| std::array::from_fn(|i| build_scan(t, i as u32 + 2))),
            scan_cg: types.map(|t| std::array::from_fn(|i| build_scan_cg(t, i as u32))),
        }
    })
}

/// Entropy-coding parameters of one transform unit.
///
/// Bundles the scan tables and significance-map context offset the
/// quantizer needs for a block.
#[derive(Clone, Copy)]
pub struct TuCodingParams {
    /// Coefficient scan: scan index to raster position.
    pub scan: &'static [u16],
    /// Coding-group scan: CG scan index to CG raster position.
    pub scan_cg: &'static [u16],
    /// Scan pattern in use.
    pub scan_type: ScanType,
    /// log2 of the coding-group grid edge (log2 transform size - 2).
    pub log2_tr_size_cg: u32,
    /// Base context for the significance map of this block.
    pub first_sig_map_ctx: u32,
}

impl TuCodingParams {
    /// Derive the coding parameters for a transform unit.
    pub fn new(scan_type: ScanType, log2_tr_size: u32, is_luma: bool) -> Self {
        debug_assert!((2..=5).contains(&log2_tr_size));
        let size_idx = log2_tr_size as usize - 2;
        let tables = scan_tables();

        let first_sig_map_ctx = match log2_tr_size {
            2 => 0,
            3 => {
                if scan_type != ScanType::Diag && is_luma {
                    15
                } else {
                    9
                }
            }
            _ => {
                if is_luma {
                    21
                } else {
                    12
                }
            }
        };

        TuCodingParams {
            scan: &tables.scan[scan_type as usize][size_idx][..],
            scan_cg: &tables.scan_cg[scan_type as usize][size_idx][..],
            scan_type,
            log2_tr_size_cg: log2_tr_size - 2,
            first_sig_map_ctx,
        }
    }
}
