//! Photometric normalization
//!
//! Brings a loaded measurement set into the absolute photometric space used
//! for fitting. Input sets are never mutated; each step returns a derived
//! copy that keeps the source text and digest of the original file.

use palette::{FromColor, Srgb, Xyz as PaletteXyz};
use palette::white_point::D65;
use tracing::{debug, warn};

use super::illuminant::{AdaptationMethod, ChromaticAdaptation, Illuminant};
use crate::color::{ColorConverter, Lab, Xyz};
use crate::error::{CorrectionError, Result};
use crate::kernel::{KernelContext, SpectralReobserver};
use crate::measurement::{MeasurementSet, Observer, PatchRecord, PhotometricState};

/// Y value of the white in PCS-normalized measurement files
const RELATIVE_WHITE_Y: f64 = 100.0;

/// D65 preview of one patch
#[derive(Debug, Clone, PartialEq)]
pub struct PatchPreview {
    pub sample_id: u32,
    pub device: [f64; 3],
    /// Lab relative to D65 after adaptation from the display white
    pub lab: Lab,
    /// Clipped 8-bit sRGB, `#RRGGBB`
    pub hex: String,
}

/// Photometric normalizer
#[derive(Debug, Clone, Default)]
pub struct PhotometricNormalizer {
    adaptation: AdaptationMethod,
}

impl PhotometricNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adaptation(adaptation: AdaptationMethod) -> Self {
        Self { adaptation }
    }

    /// Normalize a set for fitting
    ///
    /// If the set is spectral and either `observer` differs from the recorded
    /// observer or some patches carry no XYZ, XYZ is first recomputed through
    /// `reobserver`, luminance is renormalized to a white of Y = 100 and stale
    /// Lab values are dropped.
    /// The set is then scaled to cd/m² when an absolute white is recorded.
    ///
    /// # Arguments
    ///
    /// * `set` - Loaded measurement set
    /// * `observer` - Requested observer, `None` to keep the recorded one
    /// * `reobserver` - Spectral re-observation kernel
    /// * `ctx` - Scratch directory and cancellation for kernel calls
    ///
    /// # Errors
    ///
    /// Propagates kernel failures and `Cancelled`.
    pub fn normalize(
        &self,
        set: &MeasurementSet,
        observer: Option<Observer>,
        reobserver: &dyn SpectralReobserver,
        ctx: KernelContext<'_>,
    ) -> Result<MeasurementSet> {
        let target = observer.unwrap_or(set.observer);
        let missing_xyz = set.patches.iter().any(|patch| patch.xyz().is_none());
        let observed = if set.is_spectral && (target != set.observer || missing_xyz) {
            debug!(
                source = %set.source_filename,
                from = %set.observer,
                to = %target,
                "Re-observing spectral measurements"
            );
            let reobserved = reobserver.reobserve(set, target, ctx)?;
            renormalize_luminance(&reobserved)
        } else {
            if target != set.observer {
                warn!(
                    source = %set.source_filename,
                    observer = %target,
                    "Observer override ignored for non-spectral measurements"
                );
            }
            set.clone()
        };
        ctx.cancel.check()?;
        Ok(self.to_absolute(&observed))
    }

    /// Scale XYZ to cd/m² using the recorded absolute white
    ///
    /// Sets without an absolute white, or already absolute, are returned
    /// unchanged.
    pub fn to_absolute(&self, set: &MeasurementSet) -> MeasurementSet {
        let white = match (set.photometric, set.absolute_white) {
            (PhotometricState::Relative, Some(white)) => white,
            _ => {
                debug!(source = %set.source_filename, "No absolute scaling applied");
                return set.clone();
            }
        };
        let factor = white.y / RELATIVE_WHITE_Y;
        let patches = set
            .patches
            .iter()
            .map(|patch| match patch.xyz() {
                Some(xyz) => patch.with_xyz(xyz.scaled(factor)),
                None => patch.clone(),
            })
            .collect();
        let mut absolute = set.with_patches(patches);
        absolute.photometric = PhotometricState::Absolute;
        debug!(source = %set.source_filename, factor, "Scaled to absolute luminance");
        absolute
    }

    /// White used as the adaptation source for previews
    fn display_white(set: &MeasurementSet) -> Option<Xyz> {
        set.white_xyz().or(match set.photometric {
            PhotometricState::Absolute => set.absolute_white,
            PhotometricState::Relative => set
                .absolute_white
                .map(|w| w.scaled(RELATIVE_WHITE_Y / w.y)),
        })
    }

    /// Adapt every patch onto D65 and compute Lab and sRGB previews
    ///
    /// # Errors
    ///
    /// `InvalidParameter` when the set has neither a white patch nor an
    /// absolute white, or the white is black.
    pub fn preview(&self, set: &MeasurementSet) -> Result<Vec<PatchPreview>> {
        let white = Self::display_white(set).ok_or_else(|| CorrectionError::InvalidParameter {
            parameter: "white_point".to_string(),
            value: format!("{} has no white reference", set.source_filename),
        })?;
        Illuminant::from_measured(white)?;
        let adaptation = ChromaticAdaptation::to_d65(white, self.adaptation)?;
        let d65_white = Illuminant::d65().white_at(white.y);
        let converter = ColorConverter::with_white(d65_white);

        Ok(set
            .patches
            .iter()
            .filter_map(|patch| {
                let adapted = adaptation.apply(patch.xyz()?);
                Some(PatchPreview {
                    sample_id: patch.sample_id,
                    device: patch.device,
                    lab: converter.xyz_to_lab(adapted),
                    hex: srgb_hex(adapted.scaled(1.0 / white.y)),
                })
            })
            .collect())
    }
}

/// Rescale so the white patch (or brightest patch) has Y = 100, dropping Lab
fn renormalize_luminance(set: &MeasurementSet) -> MeasurementSet {
    let white_y = set.white_xyz().map(|w| w.y).or_else(|| {
        set.patches
            .iter()
            .filter_map(PatchRecord::xyz)
            .map(|xyz| xyz.y)
            .fold(None, |max: Option<f64>, y| Some(max.map_or(y, |m| m.max(y))))
    });
    let factor = match white_y {
        Some(y) if y > 0.0 => RELATIVE_WHITE_Y / y,
        _ => 1.0,
    };
    let patches = set
        .patches
        .iter()
        .map(|patch| {
            let mut updated = match patch.xyz() {
                Some(xyz) => patch.with_xyz(xyz.scaled(factor)),
                None => patch.clone(),
            };
            updated.lab = None;
            updated
        })
        .collect();
    debug!(source = %set.source_filename, factor, "Renormalized luminance after re-observation");
    set.with_patches(patches)
}

/// Relative XYZ (white Y = 1) under D65 to clipped sRGB hex
fn srgb_hex(xyz: Xyz) -> String {
    let linear: palette::LinSrgb<f64> = palette::LinSrgb::from_color(PaletteXyz::<D65, f64>::new(xyz.x, xyz.y, xyz.z));
    let clipped = palette::LinSrgb::new(
        linear.red.clamp(0.0, 1.0),
        linear.green.clamp(0.0, 1.0),
        linear.blue.clamp(0.0, 1.0),
    );
    let rgb: Srgb<u8> = Srgb::<f64>::from_linear(clipped).into_format();
    format!("#{:02X}{:02X}{:02X}", rgb.red, rgb.green, rgb.blue)
}
