//! # Colorimeter Correction
//!
//! A Rust crate for fitting colorimeter corrections from display measurements.
//!
//! This library turns paired reference-instrument and colorimeter readings,
//! or a single spectral reading set, into a portable correction artifact:
//! - Loading and validating CGATS measurement tables
//! - Scaling readings to absolute luminance and re-observing spectral data
//! - Pairing reference and colorimeter patches by device coordinate
//! - Fitting a 3×3 matrix (CCMX) or passing spectral samples through (CCSS)
//! - Grading the fit with ΔE94 and ΔE2000 statistics
//! - Importing iColorDisplay device corrections as CCMX artifacts
//! - Writing the artifact atomically and deduplicating against a shared
//!   repository
//!
//! ## Example
//!
//! ```rust,no_run
//! use colorimeter_correction::{fit_correction, FitJobConfig, FitMethod};
//! use std::path::PathBuf;
//!
//! let config = FitJobConfig {
//!     method: FitMethod::FourColor,
//!     display: Some("Dell U2413".to_string()),
//!     ..FitJobConfig::default()
//! };
//! let report = fit_correction(
//!     &[PathBuf::from("reference.ti3"), PathBuf::from("colorimeter.ti3")],
//!     config,
//! )?;
//! println!("Wrote {}", report.path.display());
//! # Ok::<(), colorimeter_correction::CorrectionError>(())
//! ```

use std::path::PathBuf;

pub mod artifact;
pub mod calibration;
pub mod color;
pub mod config;
pub mod constants;
pub mod device_corrections;
pub mod error;
pub mod evaluate;
pub mod fit;
pub mod job;
pub mod kernel;
pub mod measurement;
pub mod pairing;
pub mod repository;
pub mod util;
pub mod worker;

pub use artifact::{ArtifactMetadata, ArtifactSerializer, CorrectionArtifact, Provenance, SourceRecord, Technology};
pub use calibration::{PatchPreview, PhotometricNormalizer};
pub use config::{FitJobConfig, KernelConfig, OverwritePolicy, RepositoryConfig};
pub use device_corrections::{from_device_corrections, DeviceCorrectionImport};
pub use error::{CorrectionError, FitError, PairingError, Result};
pub use evaluate::{recompute, FitEvaluation, FitQualityEvaluator, FitStatistics, PatchEdit, Recomputed};
pub use fit::{CorrectionBody, CorrectionFitter, FitMethod};
pub use job::{run_job, FitJob, JobInput, JobReport, JobServices, JobStage, OverwriteGate};
pub use kernel::CancelToken;
pub use measurement::{MeasurementSet, MeasurementSetLoader, Observer};
pub use pairing::{CorrectionKind, PairedPatches, PatchPairingMatcher};
pub use repository::{RepositoryDedupClient, RepositoryOutcome};
pub use worker::{CorrectionWorker, JobHandle, WorkerEvent};

/// Fit a correction from measurement files and write it
///
/// Runs the whole job on the calling thread with the Argyll kernels and the
/// HTTP repository from `config`. An existing output file is only replaced
/// under [`OverwritePolicy::Always`].
///
/// # Arguments
///
/// * `inputs` - Measurement files; reference and colorimeter for a matrix
///   correction, a spectral reference for a spectral one
/// * `config` - Job configuration
///
/// # Errors
///
/// Returns `CorrectionError` for unusable inputs, pairing or fit failures,
/// and write failures. Repository problems are reported in
/// [`JobReport::repository`] instead.
pub fn fit_correction(inputs: &[PathBuf], config: FitJobConfig) -> Result<JobReport> {
    let services = JobServices::from_config(&config);
    let job = FitJob::new(inputs.iter().cloned().map(JobInput::Path).collect(), config);
    run_job(&job, &services, &CancelToken::new(), &|_| {})
}
