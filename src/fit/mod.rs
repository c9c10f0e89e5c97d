//! Correction fitting
//!
//! Produces the body of a correction artifact from paired patches: a 3×3
//! matrix from the closed-form four-color solve or the delegated general
//! fit, or the reference spectral samples passed through unchanged.

pub mod four_color;

use std::fmt;

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CorrectionError, FitError, Result};
use crate::kernel::{FitSample, GeneralFitKernel, GeneralFitRequest, KernelContext};
use crate::measurement::{MeasurementSet, SpectralRange};
use crate::pairing::{MatrixPairing, PairedPatches};

pub use four_color::four_color_matrix;

/// Matrix fitting method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    /// Closed-form solve from white, red, green and blue
    FourColor,
    /// Many-patch fit minimizing ΔE94, delegated to the general fit kernel
    #[default]
    General,
}

impl FitMethod {
    /// `FIT_METHOD` keyword value
    pub fn keyword_value(self) -> &'static str {
        match self {
            FitMethod::FourColor => "xy",
            FitMethod::General => "DE94",
        }
    }

    pub fn from_keyword(value: &str) -> Option<Self> {
        match value.trim() {
            "xy" => Some(FitMethod::FourColor),
            "DE94" => Some(FitMethod::General),
            _ => None,
        }
    }
}

impl fmt::Display for FitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitMethod::FourColor => f.write_str("four-color matrix"),
            FitMethod::General => f.write_str("general fit"),
        }
    }
}

/// Spectral samples carried by a CCSS body
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralSamples {
    pub range: SpectralRange,
    /// Column names, one per band
    pub fields: Vec<String>,
    pub norm: Option<f64>,
    pub samples: Vec<SpectralSample>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpectralSample {
    pub sample_id: u32,
    pub values: Vec<f64>,
}

impl SpectralSamples {
    /// Copy the spectral table of a set
    ///
    /// # Errors
    ///
    /// `MalformedInput` when the set is not spectral or a patch has the
    /// wrong number of bands.
    pub fn from_set(set: &MeasurementSet) -> Result<Self> {
        let range = set
            .spectral_range
            .ok_or_else(|| CorrectionError::malformed(&set.source_filename, "no spectral data"))?;
        let samples = set
            .patches
            .iter()
            .map(|patch| match patch.spectrum() {
                Some(values) if values.len() == range.bands => Ok(SpectralSample {
                    sample_id: patch.sample_id,
                    values: values.to_vec(),
                }),
                _ => Err(CorrectionError::malformed(
                    &set.source_filename,
                    format!("sample {} has no {}-band spectrum", patch.sample_id, range.bands),
                )),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            range,
            fields: set.spectral_fields.clone(),
            norm: set.spectral_norm,
            samples,
        })
    }
}

/// Fitted correction content
#[derive(Debug, Clone, PartialEq)]
pub enum CorrectionBody {
    Matrix { matrix: Matrix3<f64>, method: FitMethod },
    Spectral(SpectralSamples),
}

impl CorrectionBody {
    pub fn matrix(&self) -> Option<&Matrix3<f64>> {
        match self {
            CorrectionBody::Matrix { matrix, .. } => Some(matrix),
            CorrectionBody::Spectral(_) => None,
        }
    }

    pub fn method(&self) -> Option<FitMethod> {
        match self {
            CorrectionBody::Matrix { method, .. } => Some(*method),
            CorrectionBody::Spectral(_) => None,
        }
    }
}

/// Correction fitter
#[derive(Debug, Clone)]
pub struct CorrectionFitter {
    method: FitMethod,
    y_correction: bool,
}

impl Default for CorrectionFitter {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrectionFitter {
    pub fn new() -> Self {
        Self {
            method: FitMethod::default(),
            y_correction: true,
        }
    }

    pub fn with_method(method: FitMethod) -> Self {
        Self {
            method,
            ..Self::new()
        }
    }

    pub fn with_params(method: FitMethod, y_correction: bool) -> Self {
        Self { method, y_correction }
    }

    pub fn method(&self) -> FitMethod {
        self.method
    }

    /// Fit the correction body
    ///
    /// The general kernel runs only when it is the selected method and more
    /// than the four canonical patches are paired; otherwise the closed-form
    /// four-color solve is used.
    ///
    /// # Errors
    ///
    /// * `Fit(Singular)` - degenerate primaries
    /// * `Fit(KernelFailed)` - the general fit kernel failed
    /// * `Cancelled` - cancelled while the kernel was running
    pub fn fit(
        &self,
        paired: &PairedPatches,
        kernel: &dyn GeneralFitKernel,
        request: &GeneralFitRequest,
        ctx: KernelContext<'_>,
    ) -> Result<CorrectionBody> {
        match paired {
            PairedPatches::Matrix(pairing) => self.fit_matrix(pairing, kernel, request, ctx),
            PairedPatches::Spectral(pairing) => {
                let samples = SpectralSamples::from_set(&pairing.reference)?;
                info!(
                    samples = samples.samples.len(),
                    bands = samples.range.bands,
                    "Spectral correction passes reference data through"
                );
                Ok(CorrectionBody::Spectral(samples))
            }
        }
    }

    fn fit_matrix(
        &self,
        pairing: &MatrixPairing,
        kernel: &dyn GeneralFitKernel,
        request: &GeneralFitRequest,
        ctx: KernelContext<'_>,
    ) -> Result<CorrectionBody> {
        let use_kernel = self.method == FitMethod::General && pairing.all.len() > pairing.canonical.len();
        let (matrix, method) = if use_kernel {
            let samples: Vec<FitSample> = pairing
                .all
                .iter()
                .map(|pair| FitSample {
                    device: pair.device,
                    reference: pair.reference,
                    colorimeter: pair.colorimeter,
                })
                .collect();
            (kernel.fit_matrix(&samples, request, ctx)?, FitMethod::General)
        } else {
            (self.solve_four_color(pairing)?, FitMethod::FourColor)
        };

        if !matrix.iter().all(|v| v.is_finite()) {
            return Err(FitError::KernelFailed {
                diagnostics: "matrix contains non-finite values".to_string(),
            }
            .into());
        }
        info!(
            method = %method,
            determinant = matrix.determinant(),
            patches = pairing.all.len(),
            "Fitted correction matrix"
        );
        Ok(CorrectionBody::Matrix { matrix, method })
    }

    /// Closed-form solve over the canonical patches
    pub fn solve_four_color(&self, pairing: &MatrixPairing) -> Result<Matrix3<f64>> {
        let reference = pairing.canonical.map(|pair| pair.reference);
        let colorimeter = pairing.canonical.map(|pair| pair.colorimeter);
        Ok(four_color_matrix(&reference, &colorimeter, self.y_correction)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{CancelToken, ScratchDir};
    use crate::measurement::MeasurementSetLoader;
    use crate::pairing::{CorrectionKind, PatchPairingMatcher};
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Kernel returning a fixed matrix and counting invocations
    struct FixedKernel {
        matrix: Matrix3<f64>,
        calls: AtomicUsize,
    }

    impl GeneralFitKernel for FixedKernel {
        fn fit_matrix(
            &self,
            samples: &[FitSample],
            _request: &GeneralFitRequest,
            ctx: KernelContext<'_>,
        ) -> Result<Matrix3<f64>> {
            ctx.cancel.check()?;
            assert!(samples.len() > 4);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.matrix)
        }
    }

    fn fixed() -> FixedKernel {
        FixedKernel {
            matrix: Matrix3::identity() * 2.0,
            calls: AtomicUsize::new(0),
        }
    }

    fn table(instrument: &str, extra: bool) -> String {
        let mut rows = vec![
            "1 100 100 100 95.05 100.0 108.9",
            "2 100 0 0 41.24 21.26 1.93",
            "3 0 100 0 35.76 71.52 11.92",
            "4 0 0 100 18.05 7.22 95.05",
        ];
        if extra {
            rows.push("5 50 50 50 20.3 21.4 23.3");
        }
        format!(
            "CTI3\nKEYWORD \"TARGET_INSTRUMENT\"\nTARGET_INSTRUMENT \"{}\"\nBEGIN_DATA_FORMAT\nSAMPLE_ID RGB_R RGB_G RGB_B XYZ_X XYZ_Y XYZ_Z\nEND_DATA_FORMAT\nBEGIN_DATA\n{}\nEND_DATA\n",
            instrument,
            rows.join("\n")
        )
    }

    fn paired(extra: bool) -> PairedPatches {
        let loader = MeasurementSetLoader::new();
        let reference = loader.load_text(&table("i1 Pro 2", extra), "ref.ti3").unwrap();
        let colorimeter = loader.load_text(&table("Spyder5", extra), "col.ti3").unwrap();
        PatchPairingMatcher::new()
            .pair(&[reference, colorimeter], CorrectionKind::Matrix)
            .unwrap()
    }

    fn fit(fitter: &CorrectionFitter, paired: &PairedPatches, kernel: &FixedKernel) -> Result<CorrectionBody> {
        let scratch = ScratchDir::new();
        let cancel = CancelToken::new();
        let ctx = KernelContext {
            scratch: &scratch,
            cancel: &cancel,
        };
        fitter.fit(paired, kernel, &GeneralFitRequest::default(), ctx)
    }

    #[test]
    fn test_four_color_identity() {
        let kernel = fixed();
        let body = fit(&CorrectionFitter::with_method(FitMethod::FourColor), &paired(true), &kernel).unwrap();
        assert_eq!(body.method(), Some(FitMethod::FourColor));
        assert_relative_eq!(*body.matrix().unwrap(), Matrix3::identity(), epsilon = 1e-9);
        assert_eq!(kernel.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_general_fit_uses_kernel_with_extra_patches() {
        let kernel = fixed();
        let body = fit(&CorrectionFitter::with_method(FitMethod::General), &paired(true), &kernel).unwrap();
        assert_eq!(body.method(), Some(FitMethod::General));
        assert_eq!(body.matrix().unwrap()[(0, 0)], 2.0);
        assert_eq!(kernel.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_general_fit_with_four_patches_is_closed_form() {
        let kernel = fixed();
        let body = fit(&CorrectionFitter::new(), &paired(false), &kernel).unwrap();
        assert_eq!(body.method(), Some(FitMethod::FourColor));
        assert_eq!(kernel.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_singular_primaries() {
        let text = table("Spyder5", false).replace("4 0 0 100 18.05 7.22 95.05", "4 0 0 100 41.24 21.26 1.93");
        let loader = MeasurementSetLoader::new();
        let reference = loader.load_text(&table("i1 Pro 2", false), "ref.ti3").unwrap();
        let colorimeter = loader.load_text(&text, "col.ti3").unwrap();
        let paired = PatchPairingMatcher::new()
            .pair(&[reference, colorimeter], CorrectionKind::Matrix)
            .unwrap();
        let err = fit(&CorrectionFitter::new(), &paired, &fixed()).unwrap_err();
        assert!(matches!(err, CorrectionError::Fit(FitError::Singular { .. })));
    }

    #[test]
    fn test_spectral_body_is_reference_data() {
        let text = "CTI3\nBEGIN_DATA_FORMAT\nSAMPLE_ID RGB_R RGB_G RGB_B SPEC_400 SPEC_500\nEND_DATA_FORMAT\nBEGIN_DATA\n1 100 100 100 0.5 0.625\n2 0 0 0 0.001 0.002\nEND_DATA\n";
        let reference = MeasurementSetLoader::new().load_text(text, "spectral.ti3").unwrap();
        let paired = PatchPairingMatcher::new()
            .pair(&[reference], CorrectionKind::Spectral)
            .unwrap();
        let body = fit(&CorrectionFitter::new(), &paired, &fixed()).unwrap();
        let CorrectionBody::Spectral(samples) = body else {
            panic!("expected spectral body");
        };
        assert_eq!(samples.fields, vec!["SPEC_400", "SPEC_500"]);
        assert_eq!(samples.samples[0].values, vec![0.5, 0.625]);
        assert_eq!(samples.samples[1].sample_id, 2);
    }

    #[test]
    fn test_fit_method_keywords() {
        for method in [FitMethod::FourColor, FitMethod::General] {
            assert_eq!(FitMethod::from_keyword(method.keyword_value()), Some(method));
        }
        assert_eq!(FitMethod::from_keyword("lsq"), None);
    }
}
