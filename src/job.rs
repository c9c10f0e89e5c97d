//! Correction fitting job
//!
//! One job runs the full pipeline as a single sequential function:
//! load, normalize, pair, fit, evaluate, serialize, confirm overwrite,
//! write, then consult the repository. Cancellation surfaces as
//! `Err(Cancelled)` from whichever stage observes it. The artifact is staged
//! in the job's scratch directory and moved into the output directory only
//! once everything before it has succeeded.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::artifact::{
    ArtifactMetadata, ArtifactSerializer, CorrectionArtifact, Provenance, SourceRecord, Technology, DEFAULT_ORIGINATOR,
};
use crate::calibration::PhotometricNormalizer;
use crate::config::{FitJobConfig, OverwritePolicy};
use crate::error::{CorrectionError, Result};
use crate::evaluate::{FitEvaluation, FitQualityEvaluator};
use crate::fit::CorrectionFitter;
use crate::kernel::{
    ArgyllCcxxmake, CancelToken, GeneralFitKernel, GeneralFitRequest, KernelContext, ScratchDir, Spec2Cie,
    SpectralReobserver,
};
use crate::measurement::cgats::single_line;
use crate::measurement::{InstrumentProfile, MeasurementSet, MeasurementSetLoader};
use crate::pairing::{CorrectionKind, PairedPatches, PatchPairingMatcher};
use crate::repository::{CorrectionRepository, HttpRepository, RepositoryDedupClient, RepositoryOutcome};
use crate::util::now_created_string;

/// Source of one measurement set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobInput {
    /// Standalone CGATS file or a container with an embedded table
    Path(PathBuf),
    /// Raw bytes handed over by another component
    Embedded { name: String, bytes: Vec<u8> },
}

impl JobInput {
    fn load(&self, loader: &MeasurementSetLoader) -> Result<MeasurementSet> {
        match self {
            JobInput::Path(path) => loader.load_path(path),
            JobInput::Embedded { name, bytes } => loader.load_bytes(bytes, name),
        }
    }

    fn name(&self) -> String {
        match self {
            JobInput::Path(path) => path.display().to_string(),
            JobInput::Embedded { name, .. } => name.clone(),
        }
    }
}

/// A fit request
#[derive(Debug, Clone)]
pub struct FitJob {
    pub inputs: Vec<JobInput>,
    pub config: FitJobConfig,
}

impl FitJob {
    pub fn new(inputs: Vec<JobInput>, config: FitJobConfig) -> Self {
        Self { inputs, config }
    }
}

/// Pipeline stage reported to the progress callback
#[derive(Debug, Clone, PartialEq)]
pub enum JobStage {
    Loading { source: String },
    Normalizing,
    Pairing,
    Fitting { kind: CorrectionKind },
    Evaluating,
    Writing { path: PathBuf },
    Repository,
}

/// Confirmation asked before replacing an existing artifact
pub trait OverwriteGate: Send + Sync {
    /// `existing` is the parsed file currently at `path`, if readable
    fn confirm(&self, path: &Path, existing: Option<&CorrectionArtifact>) -> bool;
}

impl<F> OverwriteGate for F
where
    F: Fn(&Path, Option<&CorrectionArtifact>) -> bool + Send + Sync,
{
    fn confirm(&self, path: &Path, existing: Option<&CorrectionArtifact>) -> bool {
        self(path, existing)
    }
}

/// Gate that never confirms
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclineOverwrite;

impl OverwriteGate for DeclineOverwrite {
    fn confirm(&self, _path: &Path, _existing: Option<&CorrectionArtifact>) -> bool {
        false
    }
}

/// Collaborators a job talks to
#[derive(Clone)]
pub struct JobServices {
    pub general_fit: Arc<dyn GeneralFitKernel>,
    pub reobserver: Arc<dyn SpectralReobserver>,
    pub repository: Option<Arc<dyn CorrectionRepository>>,
    pub overwrite_gate: Arc<dyn OverwriteGate>,
}

impl JobServices {
    /// Argyll kernels and the HTTP repository as configured
    ///
    /// A repository client that cannot be built is left out with a warning.
    pub fn from_config(config: &FitJobConfig) -> Self {
        let repository: Option<Arc<dyn CorrectionRepository>> = if config.repository.enabled {
            match HttpRepository::new(&config.repository) {
                Ok(repo) => Some(Arc::new(repo)),
                Err(err) => {
                    warn!(error = %err, "Correction repository client unavailable");
                    None
                }
            }
        } else {
            None
        };
        Self {
            general_fit: Arc::new(ArgyllCcxxmake::new(config.kernel.ccxxmake_path())),
            reobserver: Arc::new(Spec2Cie::new(config.kernel.spec2cie_path())),
            repository,
            overwrite_gate: Arc::new(DeclineOverwrite),
        }
    }

    pub fn with_overwrite_gate(mut self, gate: Arc<dyn OverwriteGate>) -> Self {
        self.overwrite_gate = gate;
        self
    }
}

/// Result of a successful job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub artifact: CorrectionArtifact,
    /// Artifact text as written
    pub text: String,
    pub path: PathBuf,
    /// Dedup key, independent of `CREATED`
    pub query_key: String,
    /// Per-patch residuals; `None` for spectral corrections
    pub evaluation: Option<FitEvaluation>,
    /// `None` when the repository step is disabled
    pub repository: Option<RepositoryOutcome>,
}

/// Run one job to completion
///
/// # Errors
///
/// Any loader, pairing, fit or write failure aborts the job before the
/// output directory is touched. Repository failures never fail the job.
pub fn run_job(
    job: &FitJob,
    services: &JobServices,
    cancel: &CancelToken,
    progress: &dyn Fn(JobStage),
) -> Result<JobReport> {
    let config = &job.config;
    config.validate()?;
    cancel.check()?;
    prepare_output_dir(&config.output_dir)?;

    let scratch = ScratchDir::new();
    let ctx = KernelContext {
        scratch: &scratch,
        cancel,
    };

    let loader = MeasurementSetLoader::new();
    let mut sets = Vec::with_capacity(job.inputs.len());
    for input in &job.inputs {
        progress(JobStage::Loading { source: input.name() });
        sets.push(input.load(&loader)?);
        cancel.check()?;
    }

    let sets = if config.kind == CorrectionKind::Matrix {
        progress(JobStage::Normalizing);
        let normalizer = PhotometricNormalizer::new();
        sets.iter()
            .map(|set| {
                let observer = set.is_spectral.then_some(config.reference_observer);
                normalizer.normalize(set, observer, services.reobserver.as_ref(), ctx)
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        sets
    };

    progress(JobStage::Pairing);
    let paired = PatchPairingMatcher::new().pair(&sets, config.kind)?;
    cancel.check()?;

    let metadata = build_metadata(config, &paired);
    let request = GeneralFitRequest {
        description: metadata.description.clone(),
        display: config.display.clone(),
        technology: (config.technology != Technology::Unknown).then(|| config.technology.to_string()),
        reference_instrument: paired.reference().instrument.name().to_string(),
        colorimeter_instrument: paired
            .colorimeter()
            .map(|set| set.instrument.name().to_string())
            .unwrap_or_default(),
    };

    progress(JobStage::Fitting { kind: config.kind });
    let body = CorrectionFitter::with_params(config.method, config.y_correction).fit(
        &paired,
        services.general_fit.as_ref(),
        &request,
        ctx,
    )?;
    cancel.check()?;

    progress(JobStage::Evaluating);
    let evaluation = FitQualityEvaluator::new().evaluate_body(&paired, &body)?;

    let artifact = CorrectionArtifact {
        body,
        metadata,
        statistics: evaluation.as_ref().map(|e| e.statistics),
        provenance: provenance(&paired),
    };
    let serializer = ArtifactSerializer::new();
    let text = serializer.serialize(&artifact);
    let query_key = serializer.query_key(&text);
    let path = config.output_dir.join(serializer.derive_filename(&artifact));

    confirm_overwrite(&path, config.overwrite, services.overwrite_gate.as_ref(), &serializer)?;
    cancel.check()?;

    progress(JobStage::Writing { path: path.clone() });
    write_atomic(&text, &path, &scratch)?;
    info!(path = %path.display(), kind = %artifact.kind(), "Wrote correction");

    let repository = match (&services.repository, config.repository.enabled) {
        (Some(repo), true) => {
            progress(JobStage::Repository);
            Some(RepositoryDedupClient::new(repo.as_ref()).check_and_maybe_upload(text.as_bytes(), &query_key))
        }
        _ => None,
    };

    Ok(JobReport {
        artifact,
        text,
        path,
        query_key,
        evaluation,
        repository,
    })
}

fn instrument_name(profile: &InstrumentProfile) -> Option<String> {
    match profile {
        InstrumentProfile::Unknown => None,
        other => Some(other.name().to_string()),
    }
}

fn build_metadata(config: &FitJobConfig, paired: &PairedPatches) -> ArtifactMetadata {
    let kind = paired.kind();
    let reference = paired.reference();
    let colorimeter = paired.colorimeter();
    let instrument = colorimeter.and_then(|set| instrument_name(&set.instrument));
    // Operator text ends up in quoted keyword values
    let text = |value: &Option<String>| value.as_deref().map(single_line);
    let display = text(&config.display);
    let technology = match &config.technology {
        Technology::Other(name) => Technology::parse(&single_line(name)),
        other => other.clone(),
    };

    let description = text(&config.description)
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| {
            ArtifactMetadata::fallback_description(kind, instrument.as_deref(), display.as_deref(), &technology)
        });
    let display_source = colorimeter.unwrap_or(reference);

    ArtifactMetadata {
        description,
        originator: text(&config.originator).unwrap_or_else(|| DEFAULT_ORIGINATOR.to_string()),
        created: Some(now_created_string()),
        instrument,
        reference_instrument: instrument_name(&reference.instrument),
        display,
        technology,
        manufacturer: text(&config.manufacturer),
        manufacturer_id: config.manufacturer_id.clone(),
        display_type: display_source.display_type.or(reference.display_type),
        display_type_base_id: display_source.display_type_base_id.or(reference.display_type_base_id),
        observer: (kind == CorrectionKind::Matrix).then_some(config.observer),
        reference_observer: Some(reference.observer),
    }
}

fn provenance(paired: &PairedPatches) -> Provenance {
    Provenance {
        reference: Some(SourceRecord::of(paired.reference())),
        target: paired.colorimeter().map(SourceRecord::of),
    }
}

fn prepare_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|source| CorrectionError::WriteDenied {
        path: dir.to_path_buf(),
        source,
    })
}

fn confirm_overwrite(
    path: &Path,
    policy: OverwritePolicy,
    gate: &dyn OverwriteGate,
    serializer: &ArtifactSerializer,
) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let declined = || CorrectionError::OverwriteDeclined {
        path: path.to_path_buf(),
    };
    match policy {
        OverwritePolicy::Always => Ok(()),
        OverwritePolicy::Never => Err(declined()),
        OverwritePolicy::Ask => {
            let existing = fs::read_to_string(path)
                .ok()
                .and_then(|text| serializer.parse(&text, &path.display().to_string()).ok());
            if let Some(stats) = existing.as_ref().and_then(|a| a.statistics) {
                debug!(
                    path = %path.display(),
                    avg_de94 = stats.avg_de94,
                    max_de94 = stats.max_de94,
                    "Existing correction statistics"
                );
            }
            if gate.confirm(path, existing.as_ref()) {
                Ok(())
            } else {
                Err(declined())
            }
        }
    }
}

/// Stage `text` in scratch, then move it over `target`
///
/// Falls back to a temporary file in the target directory when a rename
/// across filesystems is refused.
fn write_atomic(text: &str, target: &Path, scratch: &ScratchDir) -> Result<()> {
    let denied = |source: std::io::Error| CorrectionError::WriteDenied {
        path: target.to_path_buf(),
        source,
    };
    let staged = scratch.file("artifact.out")?;
    fs::write(&staged, text).map_err(|e| CorrectionError::io("staging correction", e))?;

    if let Err(err) = fs::rename(&staged, target) {
        debug!(error = %err, "Rename into place failed, writing beside target");
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = NamedTempFile::new_in(dir).map_err(denied)?;
        temp.write_all(text.as_bytes()).map_err(denied)?;
        temp.as_file().sync_all().map_err(denied)?;
        temp.persist(target).map_err(|e| denied(e.error))?;
    }
    Ok(())
}
