//! Micro-benchmarks for the forward quantization paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use transcode_hevc_tq::{
    Channel, ChromaFormat, EstBits, Quant, QuantConfig, ScalingList, SliceType, TransformSize,
    TuDesc,
};

fn tu(size: TransformSize, use_rdoq: bool) -> TuDesc {
    TuDesc {
        size,
        channel: Channel::Luma,
        slice_type: SliceType::P,
        intra: false,
        intra_dir: 0,
        transquant_bypass: false,
        transform_skip: false,
        sign_hide: true,
        tu_depth: 0,
        cbf_ctx: 0,
        use_rdoq,
    }
}

fn residual_16x16() -> Vec<i16> {
    (0..256)
        .map(|i| (((i * 2654435761u64 as usize) >> 7) % 201) as i16 - 100)
        .collect()
}

fn bench_quant(c: &mut Criterion) {
    let scaling = ScalingList::flat(8).unwrap();
    let residual = residual_16x16();

    c.bench_function("quant_16x16", |b| {
        let mut quant = Quant::new(&QuantConfig::default(), &scaling).unwrap();
        quant.set_qp(27, 0, 0, ChromaFormat::Yuv420);
        let tu = tu(TransformSize::T16x16, false);
        let mut coeff = [0i16; 256];

        b.iter(|| {
            let num_sig =
                quant.transform_nxn(&tu, None, black_box(&residual), 16, &mut coeff, None);
            black_box(num_sig)
        })
    });

    c.bench_function("rdoq_16x16", |b| {
        let cfg = QuantConfig {
            rdoq: true,
            ..QuantConfig::default()
        };
        let mut quant = Quant::new(&cfg, &scaling).unwrap();
        quant.set_qp(27, 0, 0, ChromaFormat::Yuv420);
        quant.set_lambdas(64.0, 64.0, 64.0);
        quant.est_bits = EstBits::default();
        let tu = tu(TransformSize::T16x16, true);
        let mut coeff = [0i16; 256];

        b.iter(|| {
            let num_sig =
                quant.transform_nxn(&tu, None, black_box(&residual), 16, &mut coeff, None);
            black_box(num_sig)
        })
    });
}

criterion_group!(benches, bench_quant);
criterion_main!(benches);
