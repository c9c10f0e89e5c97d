//! Integration tests for the complete correction fitting pipeline
//!
//! These tests drive the public API end to end:
//! - Measurement loading and pairing
//! - Four-color and spectral corrections
//! - Fit statistics and patch edits
//! - Artifact round trips and dedup keys
//! - Job execution with stand-in kernels

use std::fs;
use std::path::Path;
use std::sync::Arc;

use approx::assert_relative_eq;
use colorimeter_correction::error::SetRole;
use colorimeter_correction::job::DeclineOverwrite;
use colorimeter_correction::color::Xyz;
use colorimeter_correction::kernel::{
    simulate_reference, ChartLookup, FitSample, GeneralFitKernel, GeneralFitRequest, KernelContext, ScratchDir,
    SpectralReobserver,
};
use colorimeter_correction::{
    recompute, run_job, ArtifactSerializer, CancelToken, CorrectionBody, CorrectionError, CorrectionFitter,
    CorrectionKind, FitJob, FitJobConfig, FitMethod, FitQualityEvaluator, JobInput, JobServices, MeasurementSet,
    MeasurementSetLoader, Observer, PairedPatches, PairingError, PatchEdit, PatchPairingMatcher, RepositoryOutcome,
    Technology,
};
use nalgebra::{Matrix3, Vector3};

// ============================================================================
// Fixtures
// ============================================================================

const SRGB_ROWS: [&str; 4] = [
    "1 100 100 100 95.05 100.00 108.90",
    "2 100 0 0 41.24 21.26 1.93",
    "3 0 100 0 35.76 71.52 11.92",
    "4 0 0 100 18.05 7.22 95.05",
];

fn cti3(instrument: &str, rows: &[&str]) -> String {
    format!(
        "CTI3\n\nDESCRIPTOR \"Argyll Calibration Target chart information 3\"\nKEYWORD \"TARGET_INSTRUMENT\"\nTARGET_INSTRUMENT \"{}\"\nCOLOR_REP \"RGB_XYZ\"\n\nNUMBER_OF_FIELDS 7\nBEGIN_DATA_FORMAT\nSAMPLE_ID RGB_R RGB_G RGB_B XYZ_X XYZ_Y XYZ_Z\nEND_DATA_FORMAT\n\nNUMBER_OF_SETS {}\nBEGIN_DATA\n{}\nEND_DATA\n",
        instrument,
        rows.len(),
        rows.join("\n")
    )
}

const SPECTRAL: &str = "CTI3\n\
\n\
KEYWORD \"TARGET_INSTRUMENT\"\n\
TARGET_INSTRUMENT \"X-Rite i1 Pro 2\"\n\
KEYWORD \"SPECTRAL_BANDS\"\n\
SPECTRAL_BANDS \"4\"\n\
KEYWORD \"SPECTRAL_START_NM\"\n\
SPECTRAL_START_NM \"400.000000\"\n\
KEYWORD \"SPECTRAL_END_NM\"\n\
SPECTRAL_END_NM \"700.000000\"\n\
KEYWORD \"SPECTRAL_NORM\"\n\
SPECTRAL_NORM \"1.000000\"\n\
KEYWORD \"DISPLAY_TYPE_REFRESH\"\n\
DISPLAY_TYPE_REFRESH \"NO\"\n\
\n\
NUMBER_OF_FIELDS 8\n\
BEGIN_DATA_FORMAT\n\
SAMPLE_ID RGB_R RGB_G RGB_B SPEC_400 SPEC_500 SPEC_600 SPEC_700\n\
END_DATA_FORMAT\n\
\n\
NUMBER_OF_SETS 3\n\
BEGIN_DATA\n\
1 100 100 100 0.512345678 0.734 0.689 0.601\n\
2 100 0 0 0.0012 0.0031 0.352 0.598\n\
3 0 0 100 0.498 0.071 0.0021 0.0009\n\
END_DATA\n";

fn load(text: &str, name: &str) -> MeasurementSet {
    MeasurementSetLoader::new().load_text(text, name).unwrap()
}

fn matrix_pair(reference: &str, colorimeter: &str) -> PairedPatches {
    PatchPairingMatcher::new()
        .pair(
            &[load(reference, "reference.ti3"), load(colorimeter, "colorimeter.ti3")],
            CorrectionKind::Matrix,
        )
        .unwrap()
}

struct NoKernel;

impl GeneralFitKernel for NoKernel {
    fn fit_matrix(&self, _: &[FitSample], _: &GeneralFitRequest, _: KernelContext<'_>) -> colorimeter_correction::Result<Matrix3<f64>> {
        Err(CorrectionError::kernel("ccxxmake: not available in tests"))
    }
}

impl SpectralReobserver for NoKernel {
    fn reobserve(&self, _: &MeasurementSet, _: Observer, _: KernelContext<'_>) -> colorimeter_correction::Result<MeasurementSet> {
        Err(CorrectionError::kernel("spec2cie: not available in tests"))
    }
}

fn fit_body(paired: &PairedPatches, method: FitMethod) -> CorrectionBody {
    let scratch = ScratchDir::new();
    let cancel = CancelToken::new();
    CorrectionFitter::with_method(method)
        .fit(
            paired,
            &NoKernel,
            &GeneralFitRequest::default(),
            KernelContext {
                scratch: &scratch,
                cancel: &cancel,
            },
        )
        .unwrap()
}

// ============================================================================
// Matrix fit scenarios
// ============================================================================

#[test]
fn test_identity_fit_on_identical_readings() {
    let reference = cti3("i1 Pro 2", &SRGB_ROWS);
    let colorimeter = cti3("Spyder5", &SRGB_ROWS);
    let paired = matrix_pair(&reference, &colorimeter);

    let body = fit_body(&paired, FitMethod::FourColor);
    let matrix = body.matrix().unwrap();
    assert_relative_eq!(*matrix, Matrix3::identity(), epsilon = 1e-6);

    let evaluation = FitQualityEvaluator::new().evaluate_body(&paired, &body).unwrap().unwrap();
    let stats = evaluation.statistics;
    assert!(stats.avg_de94 <= 1e-3);
    assert!(stats.max_de94 <= 1e-3);
    assert!(stats.avg_de00 <= 1e-3);
    assert!(stats.max_de00 <= 1e-3);
    assert_eq!(evaluation.residuals.len(), 4);
}

#[test]
fn test_scaled_colorimeter_gives_scaled_identity() {
    let reference = cti3("i1 Pro 2", &SRGB_ROWS);
    let dim_rows = [
        "1 100 100 100 76.04 80.00 87.12",
        "2 100 0 0 32.992 17.008 1.544",
        "3 0 100 0 28.608 57.216 9.536",
        "4 0 0 100 14.44 5.776 76.04",
    ];
    let colorimeter = cti3("Spyder5", &dim_rows);
    let body = fit_body(&matrix_pair(&reference, &colorimeter), FitMethod::FourColor);
    assert_relative_eq!(*body.matrix().unwrap(), Matrix3::identity() * 1.25, epsilon = 1e-6);
}

/// Linear sRGB primaries at 100 cd/m², brightened by 25 %
struct BrightSrgbProfile;

impl ChartLookup for BrightSrgbProfile {
    fn lookup(
        &self,
        devices: &[[f64; 3]],
        _profile: &Path,
        _ctx: KernelContext<'_>,
    ) -> colorimeter_correction::Result<Vec<Xyz>> {
        let primaries = Matrix3::new(41.24, 35.76, 18.05, 21.26, 71.52, 7.22, 1.93, 11.92, 95.05);
        Ok(devices
            .iter()
            .map(|d| Xyz::from_vector(primaries * Vector3::from(*d) / 100.0).scaled(1.25))
            .collect())
    }
}

#[test]
fn test_simulated_reference_pairs_with_its_source() {
    let colorimeter = load(&cti3("Spyder5", &SRGB_ROWS), "colorimeter.ti3");
    let scratch = ScratchDir::new();
    let cancel = CancelToken::new();
    let ctx = KernelContext {
        scratch: &scratch,
        cancel: &cancel,
    };
    let reference = simulate_reference(&colorimeter, &BrightSrgbProfile, Path::new("display.icc"), ctx).unwrap();

    let err = PatchPairingMatcher::new()
        .pair(&[reference.clone(), colorimeter.clone()], CorrectionKind::Matrix)
        .unwrap_err();
    assert!(matches!(err, CorrectionError::Pairing(PairingError::MissingRole { .. })));

    let paired = PatchPairingMatcher::new().pair_roles(&reference, &colorimeter).unwrap();
    let body = fit_body(&paired, FitMethod::FourColor);
    assert_relative_eq!(*body.matrix().unwrap(), Matrix3::identity() * 1.25, epsilon = 1e-6);
}

#[test]
fn test_missing_green_names_patch_and_file() {
    let reference = load(&cti3("i1 Pro 2", &SRGB_ROWS), "reference.ti3");
    let without_green = [SRGB_ROWS[0], SRGB_ROWS[1], SRGB_ROWS[3]];
    let colorimeter = load(&cti3("Spyder5", &without_green), "colorimeter.ti3");

    let err = PatchPairingMatcher::new()
        .pair(&[reference, colorimeter], CorrectionKind::Matrix)
        .unwrap_err();
    match err {
        CorrectionError::Pairing(PairingError::MissingPatch { patch, filename }) => {
            assert_eq!(patch, "green");
            assert_eq!(filename, "colorimeter.ti3");
        }
        other => panic!("expected MissingPatch, got {:?}", other),
    }
}

#[test]
fn test_nearby_patch_is_not_substituted() {
    let reference = load(&cti3("i1 Pro 2", &SRGB_ROWS), "reference.ti3");
    let near = [SRGB_ROWS[0], SRGB_ROWS[1], "3 0 99.9 0 35.76 71.52 11.92", SRGB_ROWS[3]];
    let colorimeter = load(&cti3("Spyder5", &near), "colorimeter.ti3");
    let err = PatchPairingMatcher::new()
        .pair(&[reference, colorimeter], CorrectionKind::Matrix)
        .unwrap_err();
    assert!(matches!(err, CorrectionError::Pairing(PairingError::MissingPatch { .. })));
}

#[test]
fn test_two_reference_sets_are_ambiguous() {
    let sets = [
        load(&cti3("i1 Pro 2", &SRGB_ROWS), "ref_a.ti3"),
        load(&cti3("ColorMunki", &SRGB_ROWS), "ref_b.ti3"),
        load(&cti3("Spyder5", &SRGB_ROWS), "colorimeter.ti3"),
    ];
    let err = PatchPairingMatcher::new()
        .pair(&sets, CorrectionKind::Matrix)
        .unwrap_err();
    match err {
        CorrectionError::Pairing(PairingError::AmbiguousRole { role, candidates }) => {
            assert_eq!(role, SetRole::Reference);
            assert_eq!(candidates.len(), 2);
        }
        other => panic!("expected AmbiguousRole, got {:?}", other),
    }
}

#[test]
fn test_collinear_primaries_are_singular() {
    let reference = cti3("i1 Pro 2", &SRGB_ROWS);
    let broken = [SRGB_ROWS[0], SRGB_ROWS[1], SRGB_ROWS[2], "4 0 0 100 41.24 21.26 1.93"];
    let paired = matrix_pair(&reference, &cti3("Spyder5", &broken));
    let scratch = ScratchDir::new();
    let cancel = CancelToken::new();
    let err = CorrectionFitter::with_method(FitMethod::FourColor)
        .fit(
            &paired,
            &NoKernel,
            &GeneralFitRequest::default(),
            KernelContext {
                scratch: &scratch,
                cancel: &cancel,
            },
        )
        .unwrap_err();
    assert!(matches!(err, CorrectionError::Fit(colorimeter_correction::FitError::Singular { .. })));
}

// ============================================================================
// Spectral strategy
// ============================================================================

#[test]
fn test_spectral_body_is_reference_data_verbatim() {
    let reference = load(SPECTRAL, "spectral.ti3");
    let colorimeter = load(&cti3("Spyder5", &SRGB_ROWS), "colorimeter.ti3");
    let paired = PatchPairingMatcher::new()
        .pair(&[reference.clone(), colorimeter], CorrectionKind::Spectral)
        .unwrap();
    assert!(paired.colorimeter().is_none());

    let body = fit_body(&paired, FitMethod::General);
    let CorrectionBody::Spectral(samples) = &body else {
        panic!("expected spectral body");
    };
    assert_eq!(samples.samples.len(), reference.patches.len());
    for (sample, patch) in samples.samples.iter().zip(&reference.patches) {
        assert_eq!(sample.sample_id, patch.sample_id);
        assert_eq!(sample.values.as_slice(), patch.spectrum().unwrap());
    }
    assert!(FitQualityEvaluator::new().evaluate_body(&paired, &body).unwrap().is_none());
}

// ============================================================================
// Artifacts
// ============================================================================

#[test]
fn test_job_artifact_round_trip_and_stable_key() {
    let dir = tempfile::tempdir().unwrap();
    let reference_path = dir.path().join("reference.ti3");
    let colorimeter_path = dir.path().join("colorimeter.ti3");
    fs::write(&reference_path, cti3("X-Rite i1 Pro 2", &SRGB_ROWS)).unwrap();
    fs::write(&colorimeter_path, cti3("Datacolor SpyderX", &SRGB_ROWS)).unwrap();
    let output = dir.path().join("out");

    let mut config = FitJobConfig {
        method: FitMethod::FourColor,
        display: Some("Eizo CG2730".into()),
        manufacturer: Some("EIZO".into()),
        manufacturer_id: Some("ENC".into()),
        technology: Technology::LcdWhiteLed,
        output_dir: output.clone(),
        ..FitJobConfig::default()
    };
    config.repository.enabled = false;
    let job = FitJob::new(
        vec![JobInput::Path(reference_path.clone()), JobInput::Path(colorimeter_path)],
        config,
    );
    let services = JobServices {
        general_fit: Arc::new(NoKernel),
        reobserver: Arc::new(NoKernel),
        repository: None,
        overwrite_gate: Arc::new(DeclineOverwrite),
    };

    let report = run_job(&job, &services, &CancelToken::new(), &|_| {}).unwrap();
    assert_eq!(report.path, output.join("SpyderX & Eizo CG2730.ccmx"));
    assert!(report.repository.is_none());

    let serializer = ArtifactSerializer::new();
    let text = fs::read_to_string(&report.path).unwrap();
    let parsed = serializer.parse(&text, "out.ccmx").unwrap();
    assert_eq!(parsed.kind(), CorrectionKind::Matrix);
    assert_relative_eq!(
        *parsed.body.matrix().unwrap(),
        *report.artifact.body.matrix().unwrap(),
        epsilon = 1e-6
    );
    let mut metadata = parsed.metadata.clone();
    metadata.created = None;
    let mut expected = report.artifact.metadata.clone();
    expected.created = None;
    assert_eq!(metadata, expected);
    assert_eq!(parsed.provenance, report.artifact.provenance);

    let reference_text = fs::read_to_string(&reference_path).unwrap();
    let reference_hash = colorimeter_correction::util::sha256_hex(reference_text.as_bytes());
    assert_eq!(parsed.provenance.reference.unwrap().hash, reference_hash);

    let mut later = report.artifact.clone();
    later.metadata.created = Some("Sat Jan 01 00:00:00 2033".into());
    let later_text = serializer.serialize(&later);
    assert_ne!(later_text, text);
    assert_eq!(serializer.query_key(&later_text), report.query_key);
    assert_eq!(serializer.query_key(&text), report.query_key);
}

fn four_color_job(dir: &Path, description: &str) -> FitJob {
    let mut config = FitJobConfig {
        method: FitMethod::FourColor,
        description: Some(description.to_string()),
        output_dir: dir.to_path_buf(),
        ..FitJobConfig::default()
    };
    config.repository.enabled = false;
    FitJob::new(
        vec![
            JobInput::Embedded {
                name: "reference.ti3".into(),
                bytes: cti3("i1 Pro 2", &SRGB_ROWS).into_bytes(),
            },
            JobInput::Embedded {
                name: "colorimeter.ti3".into(),
                bytes: cti3("Spyder5", &SRGB_ROWS).into_bytes(),
            },
        ],
        config,
    )
}

fn stand_in_services() -> JobServices {
    JobServices {
        general_fit: Arc::new(NoKernel),
        reobserver: Arc::new(NoKernel),
        repository: None,
        overwrite_gate: Arc::new(DeclineOverwrite),
    }
}

#[test]
fn test_multi_line_description_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let job = four_color_job(dir.path(), "Line one\nLine two\r\n");
    let report = run_job(&job, &stand_in_services(), &CancelToken::new(), &|_| {}).unwrap();
    assert_eq!(report.artifact.metadata.description, "Line one Line two");

    let text = fs::read_to_string(&report.path).unwrap();
    let parsed = ArtifactSerializer::new().parse(&text, "multi.ccmx").unwrap();
    assert_eq!(parsed.metadata.description, "Line one Line two");
    assert_eq!(parsed.metadata.created, report.artifact.metadata.created);
    assert_eq!(ArtifactSerializer::new().query_key(&text), report.query_key);

    let again = run_job(&job, &stand_in_services(), &CancelToken::new(), &|_| {});
    assert!(matches!(again, Err(CorrectionError::OverwriteDeclined { .. })));
}

#[test]
fn test_multibyte_description_gets_writable_filename() {
    let dir = tempfile::tempdir().unwrap();
    let job = four_color_job(dir.path(), &"色".repeat(200));
    let report = run_job(&job, &stand_in_services(), &CancelToken::new(), &|_| {}).unwrap();

    let name = report.path.file_name().unwrap().to_str().unwrap();
    assert!(name.len() <= 255);
    assert!(name.ends_with(".ccmx"));
    assert!(report.path.exists());
    assert_eq!(report.artifact.metadata.description, "色".repeat(200));
}

#[test]
fn test_spectral_job_provenance_excludes_second_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = FitJobConfig {
        kind: CorrectionKind::Spectral,
        display: Some("LG OLED55C9".into()),
        technology: Technology::Oled,
        output_dir: dir.path().to_path_buf(),
        ..FitJobConfig::default()
    };
    let job = FitJob::new(
        vec![
            JobInput::Embedded {
                name: "spectral.ti3".into(),
                bytes: SPECTRAL.as_bytes().to_vec(),
            },
            JobInput::Embedded {
                name: "unrelated.ti3".into(),
                bytes: cti3("Spyder5", &SRGB_ROWS).into_bytes(),
            },
        ],
        config,
    );
    let services = JobServices {
        general_fit: Arc::new(NoKernel),
        reobserver: Arc::new(NoKernel),
        repository: None,
        overwrite_gate: Arc::new(DeclineOverwrite),
    };
    let report = run_job(&job, &services, &CancelToken::new(), &|_| {}).unwrap();

    assert_eq!(report.path, dir.path().join("OLED (LG OLED55C9).ccss"));
    assert!(report.artifact.provenance.target.is_none());
    assert!(!report.text.contains("unrelated.ti3"));
    assert!(report.text.contains("DISPLAY_TYPE_REFRESH \"NO\""));

    let parsed = ArtifactSerializer::new().parse(&report.text, "out.ccss").unwrap();
    let CorrectionBody::Spectral(samples) = parsed.body else {
        panic!("expected spectral body");
    };
    assert_eq!(samples.samples[0].values, vec![0.512345678, 0.734, 0.689, 0.601]);
}

// ============================================================================
// Patch edits
// ============================================================================

#[test]
fn test_recompute_after_edit_leaves_original_untouched() {
    let reference = cti3("i1 Pro 2", &SRGB_ROWS);
    let colorimeter = cti3("Spyder5", &SRGB_ROWS);
    let paired = matrix_pair(&reference, &colorimeter);

    let edits = [PatchEdit::Xyz {
        device: [100.0, 0.0, 0.0],
        role: SetRole::Colorimeter,
        xyz: colorimeter_correction::color::Xyz::new(43.0, 22.0, 2.5),
    }];
    let fitter = CorrectionFitter::with_method(FitMethod::FourColor);
    let result = recompute(&paired, &edits, &fitter).unwrap();

    let matrix = result.body.matrix().unwrap();
    assert!((matrix - Matrix3::identity()).norm() > 1e-3);
    assert!(result.evaluation.is_some());

    let untouched = recompute(&paired, &[], &fitter).unwrap();
    assert_relative_eq!(*untouched.body.matrix().unwrap(), Matrix3::identity(), epsilon = 1e-9);
}

// ============================================================================
// Error handling
// ============================================================================

#[test]
fn test_missing_data_section_is_malformed() {
    let text = "CTI3\nBEGIN_DATA_FORMAT\nSAMPLE_ID RGB_R RGB_G RGB_B XYZ_X XYZ_Y XYZ_Z\nEND_DATA_FORMAT\n";
    let err = MeasurementSetLoader::new().load_text(text, "broken.ti3").unwrap_err();
    assert!(matches!(err, CorrectionError::MalformedInput { .. }));
    assert!(!err.is_recoverable());
}

#[test]
fn test_unreachable_repository_is_local_only() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = FitJobConfig {
        method: FitMethod::FourColor,
        output_dir: dir.path().to_path_buf(),
        ..FitJobConfig::default()
    };
    config.repository.base_url = "http://127.0.0.1:9/".into();
    config.repository.timeout_secs = 2;
    let job = FitJob::new(
        vec![
            JobInput::Embedded {
                name: "reference.ti3".into(),
                bytes: cti3("i1 Pro 2", &SRGB_ROWS).into_bytes(),
            },
            JobInput::Embedded {
                name: "colorimeter.ti3".into(),
                bytes: cti3("Spyder5", &SRGB_ROWS).into_bytes(),
            },
        ],
        config.clone(),
    );
    let services = JobServices {
        general_fit: Arc::new(NoKernel),
        reobserver: Arc::new(NoKernel),
        ..JobServices::from_config(&config)
    };
    let report = run_job(&job, &services, &CancelToken::new(), &|_| {}).unwrap();
    assert!(matches!(report.repository, Some(RepositoryOutcome::LocalOnly(_))));
    assert!(Path::new(&report.path).exists());
}
