use colorimeter_correction::kernel::{
    FitSample, GeneralFitKernel, GeneralFitRequest, KernelContext, ScratchDir,
};
use colorimeter_correction::{
    ArtifactSerializer, CancelToken, CorrectionArtifact, CorrectionError, CorrectionFitter, CorrectionKind,
    FitMethod, FitQualityEvaluator, MeasurementSetLoader, PatchPairingMatcher, Provenance,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::Matrix3;

const ROWS: &str = "1 100 100 100 95.05 100.0 108.9\n\
2 100 0 0 41.24 21.26 1.93\n\
3 0 100 0 35.76 71.52 11.92\n\
4 0 0 100 18.05 7.22 95.05\n\
5 50 50 50 20.3 21.4 23.3\n\
6 75 25 10 28.1 20.9 6.2\n\
7 10 60 80 22.4 30.8 62.7\n\
8 0 0 0 0.3 0.31 0.35";

fn table(instrument: &str, scale: f64) -> String {
    let rows: Vec<String> = ROWS
        .lines()
        .map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let xyz: Vec<String> = fields[4..]
                .iter()
                .map(|v| format!("{:.4}", v.parse::<f64>().unwrap_or(0.0) * scale))
                .collect();
            format!("{} {}", fields[..4].join(" "), xyz.join(" "))
        })
        .collect();
    format!(
        "CTI3\nKEYWORD \"TARGET_INSTRUMENT\"\nTARGET_INSTRUMENT \"{}\"\nBEGIN_DATA_FORMAT\nSAMPLE_ID RGB_R RGB_G RGB_B XYZ_X XYZ_Y XYZ_Z\nEND_DATA_FORMAT\nBEGIN_DATA\n{}\nEND_DATA\n",
        instrument,
        rows.join("\n")
    )
}

struct NoKernel;

impl GeneralFitKernel for NoKernel {
    fn fit_matrix(
        &self,
        _: &[FitSample],
        _: &GeneralFitRequest,
        _: KernelContext<'_>,
    ) -> colorimeter_correction::Result<Matrix3<f64>> {
        Err(CorrectionError::kernel("not used"))
    }
}

fn benchmark_correction_fit(c: &mut Criterion) {
    let loader = MeasurementSetLoader::new();
    let reference_text = table("i1 Pro 2", 1.0);
    let colorimeter_text = table("Spyder5", 0.93);
    let reference = loader.load_text(&reference_text, "ref.ti3").unwrap();
    let colorimeter = loader.load_text(&colorimeter_text, "col.ti3").unwrap();
    let paired = PatchPairingMatcher::new()
        .pair(&[reference, colorimeter], CorrectionKind::Matrix)
        .unwrap();
    let fitter = CorrectionFitter::with_method(FitMethod::FourColor);
    let scratch = ScratchDir::new();
    let cancel = CancelToken::new();
    let ctx = KernelContext {
        scratch: &scratch,
        cancel: &cancel,
    };

    c.bench_function("load_measurement_set", |b| {
        b.iter(|| loader.load_text(black_box(&reference_text), "ref.ti3").unwrap())
    });

    c.bench_function("four_color_fit_and_evaluate", |b| {
        b.iter(|| {
            let body = fitter
                .fit(black_box(&paired), &NoKernel, &GeneralFitRequest::default(), ctx)
                .unwrap();
            FitQualityEvaluator::new().evaluate_body(&paired, &body).unwrap()
        })
    });

    let body = fitter
        .fit(&paired, &NoKernel, &GeneralFitRequest::default(), ctx)
        .unwrap();
    let statistics = FitQualityEvaluator::new()
        .evaluate_body(&paired, &body)
        .unwrap()
        .map(|e| e.statistics);
    let artifact = CorrectionArtifact {
        body,
        metadata: Default::default(),
        statistics,
        provenance: Provenance::default(),
    };
    let serializer = ArtifactSerializer::new();
    c.bench_function("serialize_and_hash_artifact", |b| {
        b.iter(|| {
            let text = serializer.serialize(black_box(&artifact));
            serializer.query_key(&text)
        })
    });
}

criterion_group!(benches, benchmark_correction_fit);
criterion_main!(benches);
