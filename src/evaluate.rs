//! Fit quality evaluation
//!
//! Grades a fitted matrix by applying it to every paired colorimeter reading
//! and comparing the result with the reference reading in CIE Lab. Lab is
//! taken relative to the white measured by the reference instrument, so the
//! figures describe this display rather than a standard illuminant.
//!
//! Also provides [`recompute`], the pure edit-and-refit step behind
//! interactive patch editing.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::color::{delta_e2000, delta_e94, ColorConverter, Lab, Xyz};
use crate::constants::fitting::SINGULAR_DETERMINANT_EPSILON;
use crate::error::{CorrectionError, FitError, Result, SetRole};
use crate::fit::{CorrectionBody, CorrectionFitter, FitMethod, SpectralSamples};
use crate::measurement::{device_key, DeviceRgb};
use crate::pairing::{MatrixPairing, PairedPatches, PatchPair};

/// Aggregate color differences after correction
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FitStatistics {
    pub avg_de94: f64,
    pub max_de94: f64,
    pub avg_de00: f64,
    pub max_de00: f64,
}

/// Residual of one paired patch
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PatchResidual {
    pub device: DeviceRgb,
    pub reference_id: u32,
    pub reference_lab: Lab,
    pub corrected_lab: Lab,
    pub de94: f64,
    pub de00: f64,
}

/// Statistics with the per-patch detail they were computed from
#[derive(Debug, Clone, PartialEq)]
pub struct FitEvaluation {
    pub statistics: FitStatistics,
    pub residuals: Vec<PatchResidual>,
}

/// Fit quality evaluator
#[derive(Debug, Clone, Default)]
pub struct FitQualityEvaluator;

impl FitQualityEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `matrix` over every paired patch
    ///
    /// # Errors
    ///
    /// `InvalidParameter` when the reference white has no luminance.
    pub fn evaluate(&self, pairing: &MatrixPairing, matrix: &Matrix3<f64>) -> Result<FitEvaluation> {
        let white = pairing.white().reference;
        if !(white.y > 0.0 && white.is_finite()) {
            return Err(CorrectionError::InvalidParameter {
                parameter: "reference_white".to_string(),
                value: format!("{:?}", white.to_array()),
            });
        }
        let converter = ColorConverter::with_white(white);
        let pairs: &[PatchPair] = if pairing.all.is_empty() {
            &pairing.canonical
        } else {
            &pairing.all
        };

        let residuals: Vec<PatchResidual> = pairs
            .iter()
            .map(|pair| {
                let reference_lab = converter.xyz_to_lab(pair.reference);
                let corrected_lab = converter.xyz_to_lab(pair.colorimeter.transformed(matrix));
                PatchResidual {
                    device: pair.device,
                    reference_id: pair.reference_id,
                    reference_lab,
                    corrected_lab,
                    de94: delta_e94(reference_lab, corrected_lab),
                    de00: delta_e2000(reference_lab, corrected_lab),
                }
            })
            .collect();

        let statistics = aggregate(&residuals);
        info!(
            patches = residuals.len(),
            avg_de94 = statistics.avg_de94,
            max_de94 = statistics.max_de94,
            avg_de00 = statistics.avg_de00,
            max_de00 = statistics.max_de00,
            "Evaluated fit quality"
        );
        Ok(FitEvaluation { statistics, residuals })
    }

    /// Evaluate a fitted body, `None` for spectral corrections
    pub fn evaluate_body(&self, paired: &PairedPatches, body: &CorrectionBody) -> Result<Option<FitEvaluation>> {
        match (paired, body) {
            (PairedPatches::Matrix(pairing), CorrectionBody::Matrix { matrix, .. }) => {
                self.evaluate(pairing, matrix).map(Some)
            }
            _ => Ok(None),
        }
    }
}

fn aggregate(residuals: &[PatchResidual]) -> FitStatistics {
    if residuals.is_empty() {
        return FitStatistics::default();
    }
    let n = residuals.len() as f64;
    FitStatistics {
        avg_de94: residuals.iter().map(|r| r.de94).sum::<f64>() / n,
        max_de94: residuals.iter().map(|r| r.de94).fold(0.0, f64::max),
        avg_de00: residuals.iter().map(|r| r.de00).sum::<f64>() / n,
        max_de00: residuals.iter().map(|r| r.de00).fold(0.0, f64::max),
    }
}

/// Operator edit of one patch
#[derive(Debug, Clone, PartialEq)]
pub enum PatchEdit {
    /// Replace the XYZ reading of one side of a matrix pairing
    Xyz {
        device: DeviceRgb,
        role: SetRole,
        xyz: Xyz,
    },
    /// Replace the spectrum of a spectral sample
    Spectrum { sample_id: u32, values: Vec<f64> },
}

/// Result of [`recompute`]
#[derive(Debug, Clone, PartialEq)]
pub struct Recomputed {
    pub body: CorrectionBody,
    /// `None` for spectral corrections
    pub evaluation: Option<FitEvaluation>,
}

/// Apply edits to a copy of `original` and refit
///
/// The inputs are not modified. Matrix corrections are refitted in process:
/// the four-color solve, or a least-squares fit over all pairs when the
/// fitter's method is the general fit and more than four patches are paired.
///
/// # Errors
///
/// `InvalidParameter` for an edit that does not match the pairing, plus any
/// fitting or evaluation error.
pub fn recompute(original: &PairedPatches, edits: &[PatchEdit], fitter: &CorrectionFitter) -> Result<Recomputed> {
    match original {
        PairedPatches::Matrix(pairing) => {
            let mut edited = pairing.clone();
            for edit in edits {
                apply_xyz_edit(&mut edited, edit)?;
            }
            let (matrix, method) =
                if fitter.method() == FitMethod::General && edited.all.len() > edited.canonical.len() {
                    (least_squares_matrix(&edited.all)?, FitMethod::General)
                } else {
                    (fitter.solve_four_color(&edited)?, FitMethod::FourColor)
                };
            let evaluation = FitQualityEvaluator::new().evaluate(&edited, &matrix)?;
            Ok(Recomputed {
                body: CorrectionBody::Matrix { matrix, method },
                evaluation: Some(evaluation),
            })
        }
        PairedPatches::Spectral(pairing) => {
            let mut samples = SpectralSamples::from_set(&pairing.reference)?;
            for edit in edits {
                let PatchEdit::Spectrum { sample_id, values } = edit else {
                    return Err(invalid_edit(edit, "XYZ edits do not apply to spectral corrections"));
                };
                let sample = samples
                    .samples
                    .iter_mut()
                    .find(|s| s.sample_id == *sample_id)
                    .ok_or_else(|| invalid_edit(edit, "unknown sample"))?;
                if values.len() != sample.values.len() {
                    return Err(invalid_edit(edit, "band count mismatch"));
                }
                sample.values = values.clone();
            }
            Ok(Recomputed {
                body: CorrectionBody::Spectral(samples),
                evaluation: None,
            })
        }
    }
}

fn apply_xyz_edit(pairing: &mut MatrixPairing, edit: &PatchEdit) -> Result<()> {
    let PatchEdit::Xyz { device, role, xyz } = edit else {
        return Err(invalid_edit(edit, "spectrum edits do not apply to matrix corrections"));
    };
    let key = device_key(*device);
    let mut matched = false;
    for pair in pairing.canonical.iter_mut().chain(pairing.all.iter_mut()) {
        if device_key(pair.device) == key {
            match role {
                SetRole::Reference => pair.reference = *xyz,
                SetRole::Colorimeter => pair.colorimeter = *xyz,
            }
            matched = true;
        }
    }
    if matched {
        Ok(())
    } else {
        Err(invalid_edit(edit, "no paired patch at this device coordinate"))
    }
}

fn invalid_edit(edit: &PatchEdit, reason: &str) -> CorrectionError {
    CorrectionError::InvalidParameter {
        parameter: "patch_edit".to_string(),
        value: format!("{:?}: {}", edit, reason),
    }
}

/// Least-squares matrix `M` minimizing Σ‖M·c − r‖² over the pairs
pub fn least_squares_matrix(pairs: &[PatchPair]) -> Result<Matrix3<f64>> {
    let mut cross = Matrix3::zeros();
    let mut gram = Matrix3::zeros();
    for pair in pairs {
        let c = pair.colorimeter.to_vector();
        let r = pair.reference.to_vector();
        cross += r * c.transpose();
        gram += c * c.transpose();
    }
    let determinant = gram.determinant();
    if determinant.abs() < SINGULAR_DETERMINANT_EPSILON {
        return Err(FitError::Singular { determinant }.into());
    }
    let inverse = gram
        .try_inverse()
        .ok_or(CorrectionError::Fit(FitError::Singular { determinant }))?;
    Ok(cross * inverse)
}
