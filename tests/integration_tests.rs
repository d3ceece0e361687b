//! Integration tests for the transform-quantization core.
//!
//! These tests exercise the public forward and inverse paths end to end:
//! bypass and transform-skip round trips, the DC-only reconstruction fast
//! path, sign-bit hiding parity, and the RDOQ decision passes.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use transcode_hevc_tq::{
    context::{
        NUM_ABS_FLAG_CTX, NUM_LAST_POS_CTX, NUM_ONE_FLAG_CTX, NUM_QT_CBF_CTX,
        NUM_QT_ROOT_CBF_CTX, NUM_SIG_CG_FLAG_CTX, NUM_SIG_FLAG_CTX,
    },
    Channel, ChromaFormat, EstBits, Quant, QuantConfig, ScalingList, ScalingListData, ScanType,
    SliceType, TransformSize, TuCodingParams, TuDesc, SCAN_SET_SIZE,
};

/// Bit-cost tables with the same rate for every context and bin.
fn uniform_est_bits(rate: i32) -> EstBits {
    EstBits {
        significant_coeff_group_bits: [[rate; 2]; NUM_SIG_CG_FLAG_CTX],
        significant_bits: [[rate; 2]; NUM_SIG_FLAG_CTX],
        last_x_bits: [rate; NUM_LAST_POS_CTX],
        last_y_bits: [rate; NUM_LAST_POS_CTX],
        greater_one_bits: [[rate; 2]; NUM_ONE_FLAG_CTX],
        level_abs_bits: [[rate; 2]; NUM_ABS_FLAG_CTX],
        block_cbp_bits: [[rate; 2]; NUM_QT_CBF_CTX],
        block_root_cbp_bits: [[rate; 2]; NUM_QT_ROOT_CBF_CTX],
    }
}

fn inter_tu(size: TransformSize) -> TuDesc {
    TuDesc {
        size,
        channel: Channel::Luma,
        slice_type: SliceType::P,
        intra: false,
        intra_dir: 0,
        transquant_bypass: false,
        transform_skip: false,
        sign_hide: false,
        tu_depth: 1,
        cbf_ctx: 0,
        use_rdoq: false,
    }
}

fn count_nonzero(coeff: &[i16]) -> u32 {
    coeff.iter().filter(|&&c| c != 0).count() as u32
}

// ============================================================================
// Round-trip and fast-path tests
// ============================================================================

#[test]
fn test_zero_residual_stays_zero() {
    let scaling = ScalingList::flat(8).unwrap();
    let mut quant = Quant::new(&QuantConfig::default(), &scaling).unwrap();
    quant.set_qp(22, 0, 0, ChromaFormat::Yuv420);

    let tu = inter_tu(TransformSize::T8x8);
    let residual = [0i16; 64];
    let mut coeff = [0i16; 64];
    let num_sig = quant.transform_nxn(&tu, None, &residual, 8, &mut coeff, None);

    assert_eq!(num_sig, 0);
    assert_eq!(coeff, [0i16; 64]);

    let mut recon = [1i16; 64];
    quant.inv_transform_nxn(
        false,
        &mut recon,
        8,
        &coeff,
        TransformSize::T8x8,
        Channel::Luma,
        false,
        false,
        num_sig,
    );
    assert_eq!(recon, [0i16; 64]);
}

#[test]
fn test_flat_block_hits_dc_only_reconstruction() {
    // A flat residual block produces exactly one nonzero (DC) coefficient,
    // whose reconstruction takes the constant-fill path.
    let scaling = ScalingList::flat(8).unwrap();
    let mut quant = Quant::new(&QuantConfig::default(), &scaling).unwrap();
    quant.set_qp(22, 0, 0, ChromaFormat::Yuv420);

    let tu = inter_tu(TransformSize::T8x8);
    let residual = [128i16; 64];
    let mut coeff = [0i16; 64];
    let num_sig = quant.transform_nxn(&tu, None, &residual, 8, &mut coeff, None);

    assert_eq!(num_sig, 1);
    assert_ne!(coeff[0], 0);
    assert!(coeff[1..].iter().all(|&c| c == 0));

    let mut recon = [0i16; 64];
    quant.inv_transform_nxn(
        false,
        &mut recon,
        8,
        &coeff,
        TransformSize::T8x8,
        Channel::Luma,
        false,
        false,
        num_sig,
    );

    let first = recon[0];
    assert!(recon.iter().all(|&r| r == first), "DC fill must be uniform");
    assert!(
        (first - 128).abs() <= 2,
        "DC reconstruction too far off: {first}"
    );
}

#[test]
fn test_corner_impulse_spectrum_thinned_by_quantizer() {
    // A single spatial impulse excites every DCT coefficient, with the
    // strongest response on the low-frequency AC terms. The sparsity of
    // the output block is therefore entirely the quantizer's doing.
    let scaling = ScalingList::flat(8).unwrap();
    let mut quant = Quant::new(&QuantConfig::default(), &scaling).unwrap();

    let mut residual = [0i16; 64];
    residual[0] = 128;

    // The impulse really is broadband: no transform coefficient is zero.
    let mut dct = [0i32; 64];
    transcode_hevc_tq::transform::fwd_dct8(&residual, &mut dct, 8, 8);
    assert!(dct.iter().all(|&c| c != 0));

    let tu = inter_tu(TransformSize::T8x8);

    // At QP 22 the dead zone rounds the weak tail of the spectrum to
    // zero while the strong coefficients survive.
    quant.set_qp(22, 0, 0, ChromaFormat::Yuv420);
    let mut coeff = [0i16; 64];
    let num_sig = quant.transform_nxn(&tu, None, &residual, 8, &mut coeff, None);
    assert_eq!(num_sig, count_nonzero(&coeff));
    assert!(
        num_sig > 1 && num_sig < 64,
        "expected a partially thinned spectrum, got {num_sig} nonzero"
    );
    assert_eq!(coeff[63], 0, "the weakest coefficient must round to zero");

    // At a coarser QP the dead zone swallows everything except the
    // single strongest coefficient, which sits at (1, 1), not at DC.
    quant.set_qp(35, 0, 0, ChromaFormat::Yuv420);
    let num_sig = quant.transform_nxn(&tu, None, &residual, 8, &mut coeff, None);
    assert_eq!(num_sig, 1);
    assert_eq!(count_nonzero(&coeff), 1);
    assert_eq!(coeff[9], 1);
}

#[test]
fn test_transquant_bypass_round_trip_exact() {
    let scaling = ScalingList::flat(8).unwrap();
    let mut quant = Quant::new(&QuantConfig::default(), &scaling).unwrap();
    quant.set_qp(51, 0, 0, ChromaFormat::Yuv420);

    let mut rng = StdRng::seed_from_u64(0x42);
    let mut tu = inter_tu(TransformSize::T4x4);
    tu.transquant_bypass = true;

    for _ in 0..16 {
        let residual: Vec<i16> = (0..16).map(|_| rng.gen_range(-2048..=2048)).collect();
        let mut coeff = [0i16; 16];
        let num_sig = quant.transform_nxn(&tu, None, &residual, 4, &mut coeff, None);
        assert_eq!(num_sig, count_nonzero(&coeff));

        let mut recon = [0i16; 16];
        quant.inv_transform_nxn(
            true,
            &mut recon,
            4,
            &coeff,
            TransformSize::T4x4,
            Channel::Luma,
            false,
            false,
            num_sig,
        );
        assert_eq!(&recon[..], &residual[..]);
    }
}

#[test]
fn test_chroma_path_counts_match() {
    let scaling = ScalingList::flat(8).unwrap();
    let mut quant = Quant::new(&QuantConfig::default(), &scaling).unwrap();
    quant.set_qp(35, 2, -2, ChromaFormat::Yuv420);

    let mut rng = StdRng::seed_from_u64(7);
    for channel in [Channel::ChromaU, Channel::ChromaV] {
        let mut tu = inter_tu(TransformSize::T4x4);
        tu.channel = channel;

        let residual: Vec<i16> = (0..16).map(|_| rng.gen_range(-200..=200)).collect();
        let mut coeff = [0i16; 16];
        let num_sig = quant.transform_nxn(&tu, None, &residual, 4, &mut coeff, None);
        assert_eq!(num_sig, count_nonzero(&coeff));
    }
}

#[test]
fn test_transform_skip_sign_preservation() {
    // With transform skip, coefficients are shifted residuals, so output
    // signs must match the residual signs directly.
    let scaling = ScalingList::flat(8).unwrap();
    let mut quant = Quant::new(&QuantConfig::default(), &scaling).unwrap();
    quant.set_qp(18, 0, 0, ChromaFormat::Yuv420);

    let mut tu = inter_tu(TransformSize::T4x4);
    tu.transform_skip = true;

    let residual: [i16; 16] = [
        120, -120, 60, -60, 30, -30, 250, -250, 90, -90, 45, -45, 15, -15, 200, -200,
    ];
    let mut coeff = [0i16; 16];
    let num_sig = quant.transform_nxn(&tu, None, &residual, 4, &mut coeff, None);
    assert!(num_sig > 0);

    for (r, c) in residual.iter().zip(coeff.iter()) {
        if *c != 0 {
            assert_eq!(c.signum(), r.signum());
        }
    }
}

// ============================================================================
// Sign-bit hiding
// ============================================================================

/// Check the hidden-sign parity of every qualifying coding group.
fn assert_sbh_parity(coeff: &[i16], params: &TuCodingParams) {
    let cg_num = 1usize << (params.log2_tr_size_cg * 2);
    for cg in 0..cg_num {
        let sub_pos = cg * SCAN_SET_SIZE;
        let nz: Vec<usize> = (0..SCAN_SET_SIZE)
            .filter(|&n| coeff[params.scan[sub_pos + n] as usize] != 0)
            .collect();
        let (Some(&first), Some(&last)) = (nz.first(), nz.last()) else {
            continue;
        };
        if (last - first) as i32 >= 4 {
            let sign_bit = (coeff[params.scan[sub_pos + first] as usize] < 0) as u32;
            let abs_sum: u32 = (first..=last)
                .map(|n| coeff[params.scan[sub_pos + n] as usize].unsigned_abs() as u32)
                .sum();
            assert_eq!(
                abs_sum & 1,
                sign_bit,
                "coding group {cg} parity does not encode the first sign"
            );
        }
    }
}

#[test]
fn test_sign_hiding_parity_invariant() {
    let scaling = ScalingList::flat(8).unwrap();
    let mut quant = Quant::new(&QuantConfig::default(), &scaling).unwrap();
    quant.set_qp(27, 0, 0, ChromaFormat::Yuv420);

    let params = TuCodingParams::new(ScanType::Diag, 3, true);
    let mut rng = StdRng::seed_from_u64(0xbeef);

    for _ in 0..50 {
        let mut tu = inter_tu(TransformSize::T8x8);
        tu.sign_hide = true;

        let residual: Vec<i16> = (0..64).map(|_| rng.gen_range(-160..=160)).collect();
        let mut coeff = [0i16; 64];
        let num_sig = quant.transform_nxn(&tu, None, &residual, 8, &mut coeff, None);

        assert_eq!(num_sig, count_nonzero(&coeff), "nonzero count out of sync");
        if num_sig >= 2 {
            assert_sbh_parity(&coeff, &params);
        }
    }
}

// ============================================================================
// RDOQ
// ============================================================================

fn rdoq_quant<'a>(scaling: &'a ScalingList, lambda2: f64, qp: i32) -> Quant<'a> {
    let cfg = QuantConfig {
        rdoq: true,
        ..QuantConfig::default()
    };
    let mut quant = Quant::new(&cfg, scaling).unwrap();
    quant.set_qp(qp, 0, 0, ChromaFormat::Yuv420);
    quant.set_lambdas(lambda2, lambda2, lambda2);
    quant.est_bits = uniform_est_bits(1 << 14);
    quant
}

#[test]
fn test_rdoq_zeroes_isolated_group_under_high_lambda() {
    // One weak coefficient in a mid-frequency coding group: when rate
    // dominates, RDOQ must zero the group and report an empty block.
    let scaling = ScalingList::flat(8).unwrap();
    let mut quant = rdoq_quant(&scaling, 1e9, 24);

    let params = TuCodingParams::new(ScanType::Diag, 4, true);
    let mut tu = inter_tu(TransformSize::T16x16);
    tu.transform_skip = true;
    tu.use_rdoq = true;
    tu.tu_depth = 0;

    let mut residual = [0i16; 256];
    // scan position 40 sits in the third coding group.
    let blk = params.scan[40] as usize;
    residual[blk] = 20;

    let mut coeff = [0i16; 256];
    let num_sig = quant.transform_nxn(&tu, None, &residual, 16, &mut coeff, None);

    assert_eq!(num_sig, 0);
    assert_eq!(count_nonzero(&coeff), 0);
}

#[test]
fn test_rdoq_truncates_weak_trailing_coefficient() {
    // Strong coefficients at the start of the scan and a single level-1
    // coefficient at scan position 23: the trailing coefficient costs more
    // to signal than its distortion saves, so the last position moves up.
    let scaling = ScalingList::flat(8).unwrap();
    let mut quant = rdoq_quant(&scaling, 1000.0, 24);

    let params = TuCodingParams::new(ScanType::Diag, 4, true);
    let mut tu = inter_tu(TransformSize::T16x16);
    tu.transform_skip = true;
    tu.use_rdoq = true;
    tu.tu_depth = 0;

    let mut residual = [0i16; 256];
    for pos in 0..4 {
        let blk = params.scan[pos] as usize;
        residual[blk] = 400;
    }
    let trailing = params.scan[23] as usize;
    residual[trailing] = 10;

    let mut coeff = [0i16; 256];
    let num_sig = quant.transform_nxn(&tu, None, &residual, 16, &mut coeff, None);

    assert_eq!(coeff[trailing], 0, "trailing level-1 coefficient kept");
    assert_eq!(num_sig, 4);
    for pos in 0..4 {
        assert!(coeff[params.scan[pos] as usize] > 0);
    }
}

#[test]
fn test_rdoq_nonzero_count_and_scan_tail() {
    let scaling = ScalingList::flat(8).unwrap();
    let mut quant = rdoq_quant(&scaling, 16.0, 30);

    let params = TuCodingParams::new(ScanType::Diag, 3, true);
    let mut rng = StdRng::seed_from_u64(0xfeed);

    for _ in 0..40 {
        let mut tu = inter_tu(TransformSize::T8x8);
        tu.use_rdoq = true;
        tu.sign_hide = rng.gen_bool(0.5);

        let residual: Vec<i16> = (0..64).map(|_| rng.gen_range(-128..=128)).collect();
        let mut coeff = [0i16; 64];
        let num_sig = quant.transform_nxn(&tu, None, &residual, 8, &mut coeff, None);

        assert_eq!(num_sig, count_nonzero(&coeff));

        // Everything past the last nonzero scan position must be zero.
        let last = (0..64)
            .rev()
            .find(|&pos| coeff[params.scan[pos] as usize] != 0);
        if let Some(last) = last {
            for pos in last + 1..64 {
                assert_eq!(coeff[params.scan[pos] as usize], 0);
            }
        }
    }
}

#[test]
fn test_rdoq_is_deterministic_without_psy() {
    let scaling = ScalingList::flat(8).unwrap();
    let mut rng = StdRng::seed_from_u64(31);
    let residual: Vec<i16> = (0..256).map(|_| rng.gen_range(-300..=300)).collect();

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let mut quant = rdoq_quant(&scaling, 64.0, 28);
        let mut tu = inter_tu(TransformSize::T16x16);
        tu.use_rdoq = true;
        tu.sign_hide = true;
        tu.tu_depth = 0;

        let mut coeff = [0i16; 256];
        let num_sig = quant.transform_nxn(&tu, None, &residual, 16, &mut coeff, None);
        outputs.push((num_sig, coeff.to_vec()));
    }

    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_rdoq_psy_bias_path_runs_clean() {
    let scaling = ScalingList::flat(8).unwrap();
    let cfg = QuantConfig {
        rdoq: true,
        psy_rdoq_scale: 2.0,
        ..QuantConfig::default()
    };
    let mut quant = Quant::new(&cfg, &scaling).unwrap();
    quant.set_qp(30, 0, 0, ChromaFormat::Yuv420);
    quant.set_lambdas(64.0, 64.0, 64.0);
    quant.est_bits = uniform_est_bits(1 << 14);

    let mut tu = inter_tu(TransformSize::T8x8);
    tu.use_rdoq = true;
    tu.tu_depth = 0;

    let mut rng = StdRng::seed_from_u64(99);
    let fenc: Vec<i16> = (0..64).map(|_| rng.gen_range(0..=255)).collect();
    let residual: Vec<i16> = (0..64).map(|_| rng.gen_range(-120..=120)).collect();
    let mut coeff = [0i16; 64];
    let num_sig = quant.transform_nxn(&tu, Some((&fenc, 8)), &residual, 8, &mut coeff, None);

    assert_eq!(num_sig, count_nonzero(&coeff));
}

// ============================================================================
// Quantization error bounds
// ============================================================================

/// Transform-skip forward/inverse with a flat scaling list: each sample
/// must come back within one dequantization step (scaled to the sample
/// domain) of its input.
fn check_skip_round_trip(scaling: &ScalingList, qp: i32, residual: &[i16], log2: u32) {
    let mut quant = Quant::new(&QuantConfig::default(), scaling).unwrap();
    quant.set_qp(qp, 0, 0, ChromaFormat::Yuv420);

    let size = TransformSize::from_log2(log2).unwrap();
    let tr_size = size.size();
    let mut tu = inter_tu(size);
    tu.transform_skip = true;

    let mut coeff = vec![0i16; tr_size * tr_size];
    let num_sig = quant.transform_nxn(&tu, None, residual, tr_size, &mut coeff, None);

    let mut recon = vec![0i16; tr_size * tr_size];
    quant.inv_transform_nxn(
        false,
        &mut recon,
        tr_size,
        &coeff,
        size,
        Channel::Luma,
        false,
        true,
        num_sig,
    );

    let qp_param = quant.qp_param(Channel::Luma);
    let transform_shift = 15 - 8 - log2 as i32;
    let iq_shift = 6 - transform_shift;

    for (i, (&orig, &rec)) in residual.iter().zip(recon.iter()).enumerate() {
        // One dequantization step in the coefficient domain, scaled down
        // to the sample domain, plus rounding slop.
        let dq = if scaling.enabled() {
            let dequant = scaling.dequant_coef(size.size_idx(), 3, qp_param.rem as usize);
            ((dequant[i] as i64) << qp_param.per) >> (iq_shift + 4)
        } else {
            ((transcode_hevc_tq::INV_QUANT_SCALES[qp_param.rem as usize] as i64) << qp_param.per)
                >> iq_shift
        };
        let bound = ((dq + 2) >> transform_shift) + 2;
        let err = (orig as i64 - rec as i64).abs();
        assert!(
            err <= bound,
            "position {i}: error {err} exceeds bound {bound} at qp {qp}"
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_skip_round_trip_error_bounded_flat(
        qp in 0i32..=40,
        residual in prop::collection::vec(-255i16..=255, 64),
    ) {
        let scaling = ScalingList::flat(8).unwrap();
        check_skip_round_trip(&scaling, qp, &residual, 3);
    }

    #[test]
    fn prop_skip_round_trip_error_bounded_scaling_lists(
        qp in 0i32..=36,
        residual in prop::collection::vec(-255i16..=255, 64),
    ) {
        let scaling = ScalingList::from_data(8, &ScalingListData::default()).unwrap();
        check_skip_round_trip(&scaling, qp, &residual, 3);
    }
}
