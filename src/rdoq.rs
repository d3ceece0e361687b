//! Rate-distortion optimized quantization.
//!
//! RDOQ jointly minimizes `D + lambda * R` over the level of every
//! coefficient, the set of coding groups kept nonzero, and the position of
//! the last significant coefficient, using the CABAC bit-cost tables to
//! price each decision. An RDO flavour of sign-bit hiding runs last.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]

use crate::context::{
    calc_pattern_sig_ctx, rate_last, sig_coeff_group_ctx_inc, sig_ctx_inc, IEP_RATE,
};
use crate::quant::{
    nquant_block, transform_shift, Quant, TuDesc, QUANT_IQUANT_SHIFT, QUANT_SHIFT, SBH_THRESHOLD,
};
use crate::scaling::{INV_QUANT_SCALES, SCALE_BITS};
use crate::scan::{ScanType, TuCodingParams, LOG2_SCAN_SET_SIZE, MLS_GRP_NUM, SCAN_SET_SIZE};
use crate::transform::MAX_TR_COEFF;

/// Maximum number of greater-than-one flags per coding group.
pub const C1FLAG_NUMBER: u32 = 8;

/// Golomb-Rice prefix length at which remainder coding switches to
/// exp-Golomb.
pub const COEF_REMAIN_BIN_REDUCTION: u32 = 3;

/// Largest remainder symbol coded with a pure Rice prefix, per Rice
/// parameter.
pub const GO_RICE_RANGE: [u32; 5] = [7, 14, 26, 46, 78];

/// Rate of an already-coded level, relative to the running CABAC state.
/// `diff_level` is the remainder symbol `level - base_level`; negative
/// remainders are covered by the greater-than-x flags alone.
fn get_ic_rate(
    abs_level: u32,
    diff_level: i32,
    greater_one_bits: &[i32; 2],
    level_abs_bits: &[i32; 2],
    abs_go_rice: u32,
    c1c2_idx: u32,
) -> i32 {
    debug_assert!(c1c2_idx <= 3);
    debug_assert!(abs_go_rice <= 4);

    if abs_level == 0 {
        debug_assert!(diff_level < 0);
        return 0;
    }
    let mut rate = 0;

    if diff_level < 0 {
        debug_assert!(abs_level <= 2);
        rate += greater_one_bits[(abs_level == 2) as usize];
        if abs_level == 2 {
            rate += level_abs_bits[0];
        }
    } else {
        let mut symbol = diff_level as u32;
        let max_vlc = GO_RICE_RANGE[abs_go_rice as usize];

        if symbol > max_vlc {
            // exp-Golomb escape
            let escape = symbol - max_vlc;
            let egs = escape.ilog2() * 2 + 1;
            rate += (egs as i32) << 15;
            symbol = max_vlc + 1;
        }

        let pref_len = (symbol >> abs_go_rice) + 1;
        let num_bins = (pref_len + abs_go_rice).min(8);
        rate += (num_bins as i32) << 15;

        if c1c2_idx & 1 != 0 {
            rate += greater_one_bits[1];
        }
        if c1c2_idx == 3 {
            rate += level_abs_bits[1];
        }
    }
    rate
}

/// Rate of coding a specific nonzero level, including its sign bin.
fn get_ic_rate_cost(
    abs_level: u32,
    diff_level: i32,
    greater_one_bits: &[i32; 2],
    level_abs_bits: &[i32; 2],
    abs_go_rice: u32,
    c1c2_idx: u32,
) -> i32 {
    debug_assert!(abs_level != 0);
    let mut rate = IEP_RATE;

    if diff_level < 0 {
        debug_assert!(abs_level == 1 || abs_level == 2);
        rate += greater_one_bits[(abs_level == 2) as usize];
        if abs_level == 2 {
            rate += level_abs_bits[0];
        }
    } else {
        let symbol = diff_level as u32;
        if (symbol >> abs_go_rice) < COEF_REMAIN_BIN_REDUCTION {
            let length = symbol >> abs_go_rice;
            rate += ((length + 1 + abs_go_rice) as i32) << 15;
        } else {
            let symbol = (symbol >> abs_go_rice) - COEF_REMAIN_BIN_REDUCTION;
            let length = if symbol != 0 { (symbol + 1).ilog2() } else { 0 };
            rate +=
                ((COEF_REMAIN_BIN_REDUCTION + length + abs_go_rice + 1 + length) as i32) << 15;
        }
        if c1c2_idx & 1 != 0 {
            rate += greater_one_bits[1];
        }
        if c1c2_idx == 3 {
            rate += level_abs_bits[1];
        }
    }
    rate
}

/// Inputs of the psy bias evaluation for one coefficient.
struct PsyEval {
    psy_scale: u64,
    unquant_scale: i64,
    unquant_round: i64,
    unquant_shift: i32,
    scale_bits: i32,
    signed_coef: i32,
    predicted_coef: i32,
}

/// Search the candidate levels `{max_abs_level, max_abs_level - 1}` for the
/// cheapest coded representation of one coefficient.
///
/// `cur_cost_sig` is the rate of the significance flag (zero for the last
/// position, which is signaled implicitly). `best_cost`/`best_sig` carry
/// the cost of coding the coefficient as zero where that is an option;
/// returns the chosen level (0 when no candidate improves) and the updated
/// costs.
fn best_coded_level(
    cur_cost_sig: i32,
    level_double: i64,
    max_abs_level: u32,
    base_level: u32,
    qbits: i32,
    scale_factor: f64,
    lambda2: f64,
    greater_one_bits: &[i32; 2],
    level_abs_bits: &[i32; 2],
    go_rice_param: u32,
    c1c2_idx: u32,
    psy: Option<&PsyEval>,
    mut best_cost: f64,
    mut best_sig: f64,
) -> (u32, f64, f64) {
    let mut level = 0u32;
    let min_abs_level = max_abs_level.saturating_sub(1).max(1);

    for lvl in (min_abs_level..=max_abs_level).rev() {
        let rate_cost = get_ic_rate_cost(
            lvl,
            lvl as i32 - base_level as i32,
            greater_one_bits,
            level_abs_bits,
            go_rice_param,
            c1c2_idx,
        );
        let err = level_double - ((lvl as i64) << qbits);
        let dist = (err * err) as f64 * scale_factor;
        let mut cur_cost = dist + lambda2 * (cur_cost_sig + rate_cost) as f64;

        if let Some(p) = psy {
            // Bias in favor of higher AC energy in the reconstruction.
            let unquant_abs = (lvl as i64 * p.unquant_scale + p.unquant_round) >> p.unquant_shift;
            let predicted = if p.signed_coef < 0 {
                -(p.predicted_coef as i64)
            } else {
                p.predicted_coef as i64
            };
            let recon_coef = (unquant_abs + predicted).abs() << p.scale_bits;
            cur_cost -= ((p.psy_scale as i64 * recon_coef) >> 8) as f64;
        }

        if cur_cost < best_cost {
            level = lvl;
            best_cost = cur_cost;
            best_sig = lambda2 * cur_cost_sig as f64;
        }
    }

    (level, best_cost, best_sig)
}

/// Rate-distortion bookkeeping for one coding group.
#[derive(Default, Clone, Copy)]
struct CgRdStats {
    nnz_before_pos0: u32,
    coded_level_and_dist: f64,
    uncoded_dist: f64,
    sig_cost: f64,
    sig_cost0: f64,
}

/// Outcome of rate-distortion optimized quantization for one block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RdoqOutcome {
    /// Number of nonzero coefficients written to the output block.
    pub num_sig: u32,
    /// Estimated block cost with every surviving level coded, before the
    /// last-position search.
    pub cost_coded_block: f64,
    /// Estimated block cost of the chosen last position.
    pub cost_best_last: f64,
}

impl Quant<'_> {
    /// Rate-distortion optimized quantization for entropy coding engines
    /// driven by probability models. Writes the chosen levels to
    /// `dst_coeff` and returns the nonzero count together with the block
    /// cost estimates.
    pub(crate) fn rdo_quant(&self, tu: &TuDesc, dst_coeff: &mut [i16]) -> RdoqOutcome {
        let log2 = tu.size.log2_size();
        let tr_size = 1u32 << log2;
        let size_idx = tu.size.size_idx();
        let ts = transform_shift(self.bit_depth, log2);
        let list_type = (if tu.intra { 0 } else { 3 }) + tu.channel as usize;
        let qp = self.qp_param[tu.channel as usize];
        let rem = qp.rem as usize;

        let qbits = QUANT_SHIFT + qp.per + ts;
        let add = 1i32 << (qbits - 1);
        let quant_coef = self.scaling.quant_coef(size_idx, list_type, rem);
        let num_coeff = 1usize << (2 * log2);

        let mut scaled = [0i32; MAX_TR_COEFF];
        let num_sig = nquant_block(
            &self.resi_dct[..num_coeff],
            quant_coef,
            &mut scaled[..num_coeff],
            &mut dst_coeff[..num_coeff],
            qbits,
            add,
        );
        debug_assert_eq!(
            num_sig as usize,
            dst_coeff[..num_coeff].iter().filter(|&&c| c != 0).count()
        );
        if num_sig == 0 {
            return RdoqOutcome {
                num_sig: 0,
                cost_coded_block: 0.0,
                cost_best_last: 0.0,
            };
        }

        let lambda2 = self.lambda2[tu.channel as usize];
        let est = &self.est_bits;
        let is_luma = tu.channel.is_luma();
        let use_psy = self.psy_rdoq_scale > 0 && is_luma;

        // unquant constants for the psy bias
        let unquant_shift = QUANT_IQUANT_SHIFT - QUANT_SHIFT - ts;
        let unquant_round = (1i64 << unquant_shift) - 1;
        let unquant_scale = (INV_QUANT_SCALES[rem] << qp.per) as i64;
        let scale_bits = SCALE_BITS - 2 * ts;

        let err_scale = self.scaling.err_scale(size_idx, list_type, rem);

        let mut block_uncoded_cost = 0.0f64;
        let mut cost_coeff = [0.0f64; MAX_TR_COEFF];
        let mut cost_sig = [0.0f64; MAX_TR_COEFF];
        let mut cost_coeff0 = [0.0f64; MAX_TR_COEFF];

        let mut rate_inc_up = [0i32; MAX_TR_COEFF];
        let mut rate_inc_down = [0i32; MAX_TR_COEFF];
        let mut sig_rate_delta = [0i32; MAX_TR_COEFF];
        let mut delta_u = [0i32; MAX_TR_COEFF];

        let mut cost_coeff_group_sig = [0.0f64; MLS_GRP_NUM];
        let mut sig_coeff_group_flags = 0u64;
        let mut ctx_set = 0u32;
        let mut c1 = 1i32;
        let mut c2 = 0i32;
        let mut base_cost = 0.0f64;
        let mut last_scan_pos = -1i32;
        let mut go_rice_param = 0u32;
        let mut c1_idx = 0u32;
        let mut c2_idx = 0u32;
        let mut cg_last_scan_pos = -1i32;

        let scan_type = ScanType::select(tu.intra, tu.intra_dir, log2, is_luma);
        let params = TuCodingParams::new(scan_type, log2, is_luma);
        let cg_num = 1usize << (params.log2_tr_size_cg * 2);

        for cg_scan_pos in (0..cg_num).rev() {
            let cg_blk_pos = params.scan_cg[cg_scan_pos] as u32;
            let cg_pos_y = cg_blk_pos >> params.log2_tr_size_cg;
            let cg_pos_x = cg_blk_pos - (cg_pos_y << params.log2_tr_size_cg);
            let cg_blk_mask = 1u64 << cg_blk_pos;
            let mut rd_stats = CgRdStats::default();

            let pattern_sig_ctx = calc_pattern_sig_ctx(
                sig_coeff_group_flags,
                cg_pos_x,
                cg_pos_y,
                params.log2_tr_size_cg,
            );

            for scan_pos_in_cg in (0..SCAN_SET_SIZE).rev() {
                let scan_pos = (cg_scan_pos << LOG2_SCAN_SET_SIZE) + scan_pos_in_cg;
                let blk_pos = params.scan[scan_pos] as usize;
                let scale_factor = err_scale[blk_pos];
                let level_double = scaled[blk_pos] as i64;
                let max_abs_level = dst_coeff[blk_pos].unsigned_abs() as u32;

                // Cost of leaving the coefficient uncoded: pure L2
                // distortion of the scaled magnitude.
                cost_coeff0[scan_pos] = (level_double * level_double) as f64 * scale_factor;
                block_uncoded_cost += cost_coeff0[scan_pos];

                if max_abs_level > 0 && last_scan_pos < 0 {
                    // First nonzero in reverse scan order becomes the
                    // provisional last position.
                    last_scan_pos = scan_pos as i32;
                    ctx_set = if scan_pos < SCAN_SET_SIZE || !is_luma { 0 } else { 2 };
                    cg_last_scan_pos = cg_scan_pos as i32;
                }

                if last_scan_pos >= 0 {
                    let c1c2_idx =
                        (c1_idx < C1FLAG_NUMBER) as u32 | (((c2_idx == 0) as u32) << 1);
                    let base_level = if c1_idx < C1FLAG_NUMBER {
                        2 + (c2_idx == 0) as u32
                    } else {
                        1
                    };

                    let one_ctx = (4 * ctx_set + c1 as u32) as usize;
                    let abs_ctx = (ctx_set + c2 as u32) as usize;
                    let greater_one_bits = &est.greater_one_bits[one_ctx];
                    let level_abs_bits = &est.level_abs_bits[abs_ctx];

                    let psy = if use_psy && blk_pos > 0 {
                        let signed_coef = self.resi_dct[blk_pos];
                        Some(PsyEval {
                            psy_scale: self.psy_rdoq_scale,
                            unquant_scale,
                            unquant_round,
                            unquant_shift,
                            scale_bits,
                            signed_coef,
                            predicted_coef: self.fenc_dct[blk_pos] - signed_coef,
                        })
                    } else {
                        None
                    };

                    let level;
                    if scan_pos as i32 == last_scan_pos {
                        // The last position needs no significance flag.
                        let (l, cost, sig) = best_coded_level(
                            0,
                            level_double,
                            max_abs_level,
                            base_level,
                            qbits,
                            scale_factor,
                            lambda2,
                            greater_one_bits,
                            level_abs_bits,
                            go_rice_param,
                            c1c2_idx,
                            psy.as_ref(),
                            f64::MAX,
                            0.0,
                        );
                        level = l;
                        cost_coeff[scan_pos] = cost;
                        cost_sig[scan_pos] = sig;
                        sig_rate_delta[blk_pos] = 0;
                    } else {
                        let ctx_sig = sig_ctx_inc(
                            pattern_sig_ctx,
                            log2,
                            tr_size,
                            blk_pos as u32,
                            is_luma,
                            params.first_sig_map_ctx,
                        ) as usize;

                        cost_coeff[scan_pos] = f64::MAX;
                        if max_abs_level < 3 {
                            cost_sig[scan_pos] =
                                lambda2 * est.significant_bits[ctx_sig][0] as f64;
                            cost_coeff[scan_pos] = cost_coeff0[scan_pos] + cost_sig[scan_pos];
                        }
                        if max_abs_level != 0 {
                            let (l, cost, sig) = best_coded_level(
                                est.significant_bits[ctx_sig][1],
                                level_double,
                                max_abs_level,
                                base_level,
                                qbits,
                                scale_factor,
                                lambda2,
                                greater_one_bits,
                                level_abs_bits,
                                go_rice_param,
                                c1c2_idx,
                                psy.as_ref(),
                                cost_coeff[scan_pos],
                                cost_sig[scan_pos],
                            );
                            level = l;
                            cost_coeff[scan_pos] = cost;
                            cost_sig[scan_pos] = sig;
                        } else {
                            level = 0;
                        }
                        sig_rate_delta[blk_pos] =
                            est.significant_bits[ctx_sig][1] - est.significant_bits[ctx_sig][0];
                    }

                    delta_u[blk_pos] =
                        ((level_double - ((level as i64) << qbits)) >> (qbits - 8)) as i32;
                    dst_coeff[blk_pos] = level as i16;
                    base_cost += cost_coeff[scan_pos];

                    // Incremental rates for the sign-hiding pass.
                    if level > 0 {
                        let rate_now = get_ic_rate(
                            level,
                            level as i32 - base_level as i32,
                            greater_one_bits,
                            level_abs_bits,
                            go_rice_param,
                            c1c2_idx,
                        );
                        rate_inc_up[blk_pos] = get_ic_rate(
                            level + 1,
                            level as i32 + 1 - base_level as i32,
                            greater_one_bits,
                            level_abs_bits,
                            go_rice_param,
                            c1c2_idx,
                        ) - rate_now;
                        rate_inc_down[blk_pos] = get_ic_rate(
                            level - 1,
                            level as i32 - 1 - base_level as i32,
                            greater_one_bits,
                            level_abs_bits,
                            go_rice_param,
                            c1c2_idx,
                        ) - rate_now;
                    } else {
                        rate_inc_up[blk_pos] = greater_one_bits[0];
                        rate_inc_down[blk_pos] = 0;
                    }

                    // Update the running CABAC estimation state.
                    if level >= base_level && go_rice_param < 4 && level > (3 << go_rice_param) {
                        go_rice_param += 1;
                    }
                    if level > 0 {
                        c1_idx += 1;
                    }

                    if level > 1 {
                        c1 = 0;
                        if c2 < 2 {
                            c2 += 1;
                        }
                        c2_idx += 1;
                    } else if c1 < 3 && c1 > 0 && level == 1 {
                        c1 += 1;
                    }

                    if scan_pos % SCAN_SET_SIZE == 0 && scan_pos > 0 {
                        // Coding group boundary: reset the per-group state
                        // and re-derive the context set, promoting it when
                        // the group just finished coded a level above one.
                        c2 = 0;
                        go_rice_param = 0;
                        c1_idx = 0;
                        c2_idx = 0;
                        ctx_set = if scan_pos == SCAN_SET_SIZE || !is_luma { 0 } else { 2 };
                        debug_assert!(c1 >= 0);
                        if c1 == 0 {
                            ctx_set += 1;
                        }
                        c1 = 1;
                    }
                } else {
                    // Nothing coded yet in scan order; only distortion.
                    cost_coeff[scan_pos] = 0.0;
                    base_cost += cost_coeff0[scan_pos];
                }

                rd_stats.sig_cost += cost_sig[scan_pos];
                if scan_pos_in_cg == 0 {
                    rd_stats.sig_cost0 = cost_sig[scan_pos];
                }

                if dst_coeff[blk_pos] != 0 {
                    sig_coeff_group_flags |= cg_blk_mask;
                    rd_stats.coded_level_and_dist += cost_coeff[scan_pos] - cost_sig[scan_pos];
                    rd_stats.uncoded_dist += cost_coeff0[scan_pos];
                    if scan_pos_in_cg != 0 {
                        rd_stats.nnz_before_pos0 += 1;
                    }
                }
            }

            // Summarize the coding group: price its significance flag and
            // try converting it to an all-zero group.
            if cg_last_scan_pos >= 0 {
                cost_coeff_group_sig[cg_scan_pos] = 0.0;
                if cg_scan_pos == 0 {
                    // The top-left group's flag is not coded.
                    sig_coeff_group_flags |= cg_blk_mask;
                } else if sig_coeff_group_flags & cg_blk_mask == 0 {
                    let ctx_sig = sig_coeff_group_ctx_inc(
                        sig_coeff_group_flags,
                        cg_pos_x,
                        cg_pos_y,
                        params.log2_tr_size_cg,
                    ) as usize;
                    let group_zero_cost =
                        lambda2 * est.significant_coeff_group_bits[ctx_sig][0] as f64;
                    base_cost += group_zero_cost - rd_stats.sig_cost;
                    cost_coeff_group_sig[cg_scan_pos] = group_zero_cost;
                } else if (cg_scan_pos as i32) < cg_last_scan_pos {
                    if rd_stats.nnz_before_pos0 == 0 {
                        base_cost -= rd_stats.sig_cost0;
                        rd_stats.sig_cost -= rd_stats.sig_cost0;
                    }

                    let ctx_sig = sig_coeff_group_ctx_inc(
                        sig_coeff_group_flags,
                        cg_pos_x,
                        cg_pos_y,
                        params.log2_tr_size_cg,
                    ) as usize;
                    let group_bits = &est.significant_coeff_group_bits[ctx_sig];

                    let mut cost_zero_cg = base_cost;
                    base_cost += lambda2 * group_bits[1] as f64;
                    cost_zero_cg += lambda2 * group_bits[0] as f64;
                    cost_coeff_group_sig[cg_scan_pos] = lambda2 * group_bits[1] as f64;

                    // Cost of forcing every level in the group to zero.
                    cost_zero_cg += rd_stats.uncoded_dist;
                    cost_zero_cg -= rd_stats.coded_level_and_dist;
                    cost_zero_cg -= rd_stats.sig_cost;

                    if cost_zero_cg < base_cost {
                        sig_coeff_group_flags &= !cg_blk_mask;
                        base_cost = cost_zero_cg;
                        cost_coeff_group_sig[cg_scan_pos] = lambda2 * group_bits[0] as f64;

                        for scan_pos_in_cg in (0..SCAN_SET_SIZE).rev() {
                            let scan_pos = cg_scan_pos * SCAN_SET_SIZE + scan_pos_in_cg;
                            let blk_pos = params.scan[scan_pos] as usize;
                            if dst_coeff[blk_pos] != 0 {
                                cost_coeff[scan_pos] = cost_coeff0[scan_pos];
                                cost_sig[scan_pos] = 0.0;
                            }
                            dst_coeff[blk_pos] = 0;
                        }
                    }
                }
            }
        }

        if last_scan_pos < 0 {
            return RdoqOutcome {
                num_sig: 0,
                cost_coded_block: 0.0,
                cost_best_last: 0.0,
            };
        }

        // Price the coded-block flag against sending nothing at all, then
        // re-select the last position.
        let mut best_cost;
        if !tu.intra && is_luma && tu.tu_depth == 0 {
            best_cost = block_uncoded_cost + lambda2 * est.block_root_cbp_bits[0][0] as f64;
            base_cost += lambda2 * est.block_root_cbp_bits[0][1] as f64;
        } else {
            let ctx_cbf = tu.cbf_ctx as usize;
            best_cost = block_uncoded_cost + lambda2 * est.block_cbp_bits[ctx_cbf][0] as f64;
            base_cost += lambda2 * est.block_cbp_bits[ctx_cbf][1] as f64;
        }
        let cost_coded_block = base_cost;

        let mut best_last_idx = 0usize;
        let mut found_last = false;

        let mut cg_scan_pos = cg_last_scan_pos;
        while cg_scan_pos >= 0 && !found_last {
            let cg_blk_pos = params.scan_cg[cg_scan_pos as usize];
            base_cost -= cost_coeff_group_sig[cg_scan_pos as usize];

            if sig_coeff_group_flags & (1u64 << cg_blk_pos) != 0 {
                for scan_pos_in_cg in (0..SCAN_SET_SIZE).rev() {
                    let scan_pos = cg_scan_pos as usize * SCAN_SET_SIZE + scan_pos_in_cg;
                    if scan_pos as i32 > last_scan_pos {
                        continue;
                    }
                    let blk_pos = params.scan[scan_pos] as usize;

                    if dst_coeff[blk_pos] != 0 {
                        let pos_y = blk_pos as u32 >> log2;
                        let pos_x = blk_pos as u32 - (pos_y << log2);
                        // Signaling the last position also implies the
                        // significance of that coefficient.
                        let rate = if params.scan_type == ScanType::Vertical {
                            rate_last(est, pos_y, pos_x)
                        } else {
                            rate_last(est, pos_x, pos_y)
                        };
                        let total_cost = base_cost + lambda2 * rate as f64 - cost_sig[scan_pos];

                        if total_cost < best_cost {
                            best_last_idx = scan_pos + 1;
                            best_cost = total_cost;
                        }
                        if dst_coeff[blk_pos] > 1 {
                            // No earlier position can improve past a level
                            // above one.
                            found_last = true;
                            break;
                        }
                        base_cost -= cost_coeff[scan_pos];
                        base_cost += cost_coeff0[scan_pos];
                    } else {
                        base_cost -= cost_sig[scan_pos];
                    }
                }
            }
            cg_scan_pos -= 1;
        }
        let cost_best_last = best_cost;

        // Re-apply the signs of the transform coefficients and drop
        // everything past the selected last position.
        let mut num_sig = 0u32;
        for pos in 0..best_last_idx {
            let blk_pos = params.scan[pos] as usize;
            let level = dst_coeff[blk_pos];
            num_sig += (level != 0) as u32;
            if self.resi_dct[blk_pos] < 0 {
                dst_coeff[blk_pos] = -level;
            }
        }
        for pos in best_last_idx..=last_scan_pos as usize {
            dst_coeff[params.scan[pos] as usize] = 0;
        }

        if tu.sign_hide && num_sig >= 2 {
            // The scaling list is ignored by this cost model.
            let inv_quant = (INV_QUANT_SCALES[rem] << qp.per) as i64;
            let rd_factor = ((inv_quant * inv_quant) as f64 / (lambda2 * 16.0) + 0.5) as i64;

            let mut last_cg = true;
            for sub_set in (0..=cg_last_scan_pos as usize).rev() {
                let sub_pos = sub_set << LOG2_SCAN_SET_SIZE;

                let Some(last_nz) = (0..SCAN_SET_SIZE)
                    .rev()
                    .find(|&n| dst_coeff[params.scan[n + sub_pos] as usize] != 0)
                else {
                    continue;
                };
                let first_nz = (0..SCAN_SET_SIZE)
                    .find(|&n| dst_coeff[params.scan[n + sub_pos] as usize] != 0)
                    .unwrap_or(last_nz);

                if last_nz as i32 - first_nz as i32 >= SBH_THRESHOLD {
                    let sign_bit =
                        (dst_coeff[params.scan[sub_pos + first_nz] as usize] <= 0) as u32;
                    let mut abs_sum = 0u32;
                    for n in first_nz..=last_nz {
                        abs_sum += dst_coeff[params.scan[n + sub_pos] as usize].unsigned_abs()
                            as u32;
                    }

                    if sign_bit != (abs_sum & 1) {
                        let mut min_cost = i64::MAX;
                        let mut best: Option<(usize, i32)> = None;

                        let start = if last_cg { last_nz } else { SCAN_SET_SIZE - 1 };
                        for n in (0..=start).rev() {
                            let blk_pos = params.scan[n + sub_pos] as usize;

                            let (cur_cost, cur_change) = if dst_coeff[blk_pos] != 0 {
                                let cost_up = rd_factor * -(delta_u[blk_pos] as i64)
                                    + rate_inc_up[blk_pos] as i64;
                                let mut cost_down = rd_factor * delta_u[blk_pos] as i64
                                    + rate_inc_down[blk_pos] as i64
                                    - if dst_coeff[blk_pos].abs() == 1 {
                                        (IEP_RATE + sig_rate_delta[blk_pos]) as i64
                                    } else {
                                        0
                                    };

                                if last_cg && last_nz == n && dst_coeff[blk_pos].abs() == 1 {
                                    // Dropping the last nonzero also saves
                                    // last-position signaling.
                                    cost_down -= (4 * IEP_RATE) as i64;
                                }

                                if cost_up < cost_down {
                                    (cost_up, 1)
                                } else if n == first_nz && dst_coeff[blk_pos].abs() == 1 {
                                    (i64::MAX, -1)
                                } else {
                                    (cost_down, -1)
                                }
                            } else {
                                let cost = rd_factor * -(delta_u[blk_pos].unsigned_abs() as i64)
                                    + (IEP_RATE + rate_inc_up[blk_pos] + sig_rate_delta[blk_pos])
                                        as i64;
                                if n < first_nz
                                    && ((self.resi_dct[blk_pos] < 0) as u32) != sign_bit
                                {
                                    (i64::MAX, 1)
                                } else {
                                    (cost, 1)
                                }
                            };

                            if cur_cost < min_cost {
                                min_cost = cur_cost;
                                best = Some((blk_pos, cur_change));
                            }
                        }

                        if let Some((min_pos, mut change)) = best {
                            if dst_coeff[min_pos] == 32767 || dst_coeff[min_pos] == -32768 {
                                change = -1;
                            }

                            if dst_coeff[min_pos] == 0 {
                                num_sig += 1;
                            } else if change == -1 && dst_coeff[min_pos].abs() == 1 {
                                num_sig -= 1;
                            }

                            if self.resi_dct[min_pos] >= 0 {
                                dst_coeff[min_pos] += change as i16;
                            } else {
                                dst_coeff[min_pos] -= change as i16;
                            }
                        }
                    }
                }

                last_cg = false;
            }
        }

        RdoqOutcome {
            num_sig,
            cost_coded_block,
            cost_best_last,
        }
    }
}
