//! Patch pairing between reference and colorimeter measurements
//!
//! Decides which input plays which role and aligns patches by exact device
//! coordinate. Nothing is guessed: a missing canonical patch or a second
//! candidate for a role is an error naming the offending file.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::color::Xyz;
use crate::constants::artifact::{CCMX_EXTENSION, CCSS_EXTENSION};
use crate::error::{PairingError, Result, SetRole};
use crate::measurement::{device_key, DeviceRgb, MeasurementSet, PatchRecord};

/// Kind of correction being produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    /// 3×3 XYZ matrix (CCMX)
    #[default]
    Matrix,
    /// Spectral sample calibration (CCSS)
    Spectral,
}

impl CorrectionKind {
    /// CGATS file identifier
    pub fn file_type(self) -> &'static str {
        match self {
            CorrectionKind::Matrix => "CCMX",
            CorrectionKind::Spectral => "CCSS",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            CorrectionKind::Matrix => CCMX_EXTENSION,
            CorrectionKind::Spectral => CCSS_EXTENSION,
        }
    }
}

impl fmt::Display for CorrectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_type())
    }
}

/// The four patches the closed-form matrix solve is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalPatch {
    White,
    Red,
    Green,
    Blue,
}

impl CanonicalPatch {
    pub const ALL: [CanonicalPatch; 4] = [
        CanonicalPatch::White,
        CanonicalPatch::Red,
        CanonicalPatch::Green,
        CanonicalPatch::Blue,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CanonicalPatch::White => "white",
            CanonicalPatch::Red => "red",
            CanonicalPatch::Green => "green",
            CanonicalPatch::Blue => "blue",
        }
    }

    pub fn device(self) -> DeviceRgb {
        match self {
            CanonicalPatch::White => [100.0, 100.0, 100.0],
            CanonicalPatch::Red => [100.0, 0.0, 0.0],
            CanonicalPatch::Green => [0.0, 100.0, 0.0],
            CanonicalPatch::Blue => [0.0, 0.0, 100.0],
        }
    }
}

/// One device coordinate measured by both instruments
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchPair {
    pub device: DeviceRgb,
    pub reference_id: u32,
    pub colorimeter_id: u32,
    pub reference: Xyz,
    pub colorimeter: Xyz,
}

/// Pairing result for the matrix strategy
#[derive(Debug, Clone)]
pub struct MatrixPairing {
    /// White, red, green, blue in that order
    pub canonical: [PatchPair; 4],
    /// Every shared device coordinate, in reference file order
    pub all: Vec<PatchPair>,
    pub reference: MeasurementSet,
    pub colorimeter: MeasurementSet,
}

impl MatrixPairing {
    pub fn white(&self) -> &PatchPair {
        &self.canonical[0]
    }
}

/// Pairing result for the spectral strategy
#[derive(Debug, Clone)]
pub struct SpectralPairing {
    pub reference: MeasurementSet,
}

/// Output of [`PatchPairingMatcher::pair`]
#[derive(Debug, Clone)]
pub enum PairedPatches {
    Matrix(MatrixPairing),
    Spectral(SpectralPairing),
}

impl PairedPatches {
    pub fn kind(&self) -> CorrectionKind {
        match self {
            PairedPatches::Matrix(_) => CorrectionKind::Matrix,
            PairedPatches::Spectral(_) => CorrectionKind::Spectral,
        }
    }

    /// Reference side of the pairing
    pub fn reference(&self) -> &MeasurementSet {
        match self {
            PairedPatches::Matrix(pairing) => &pairing.reference,
            PairedPatches::Spectral(pairing) => &pairing.reference,
        }
    }

    /// Colorimeter side, absent for spectral corrections
    pub fn colorimeter(&self) -> Option<&MeasurementSet> {
        match self {
            PairedPatches::Matrix(pairing) => Some(&pairing.colorimeter),
            PairedPatches::Spectral(_) => None,
        }
    }
}

/// Role assignment and patch alignment
#[derive(Debug, Clone, Default)]
pub struct PatchPairingMatcher;

impl PatchPairingMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Pair the supplied measurement sets for `kind`
    ///
    /// # Arguments
    ///
    /// * `sets` - Candidate inputs in any order
    /// * `kind` - Requested correction kind
    ///
    /// # Errors
    ///
    /// * `AmbiguousRole` - more than one set qualifies for a role
    /// * `MissingRole` - no set qualifies for a required role
    /// * `MissingPatch` - a canonical white/red/green/blue coordinate is absent
    /// * `MissingXyz` - a canonical patch carries no XYZ reading
    pub fn pair(&self, sets: &[MeasurementSet], kind: CorrectionKind) -> Result<PairedPatches> {
        match kind {
            CorrectionKind::Matrix => self.pair_matrix(sets).map(PairedPatches::Matrix),
            CorrectionKind::Spectral => self.pair_spectral(sets).map(PairedPatches::Spectral),
        }
    }

    /// Pair a matrix correction with roles fixed by the caller
    ///
    /// Skips role detection, so a simulated reference (see
    /// [`crate::kernel::simulate_reference`]) pairs with the colorimeter set
    /// it was derived from.
    ///
    /// # Errors
    ///
    /// `MissingPatch` or `MissingXyz` as for [`Self::pair`].
    pub fn pair_roles(&self, reference: &MeasurementSet, colorimeter: &MeasurementSet) -> Result<PairedPatches> {
        self.pair_assigned(reference, colorimeter).map(PairedPatches::Matrix)
    }

    fn pair_matrix(&self, sets: &[MeasurementSet]) -> Result<MatrixPairing> {
        let (references, colorimeters): (Vec<&MeasurementSet>, Vec<&MeasurementSet>) =
            sets.iter().partition(|set| set.is_reference_capable());
        let reference = single_role(&references, SetRole::Reference)?;
        let colorimeter = single_role(&colorimeters, SetRole::Colorimeter)?;
        self.pair_assigned(reference, colorimeter)
    }

    fn pair_assigned(&self, reference: &MeasurementSet, colorimeter: &MeasurementSet) -> Result<MatrixPairing> {
        debug!(
            reference = %reference.source_filename,
            colorimeter = %colorimeter.source_filename,
            "Assigned matrix roles"
        );

        let mut canonical = Vec::with_capacity(CanonicalPatch::ALL.len());
        for patch in CanonicalPatch::ALL {
            let ref_patch = canonical_patch(reference, patch)?;
            let col_patch = canonical_patch(colorimeter, patch)?;
            canonical.push(PatchPair {
                device: patch.device(),
                reference_id: ref_patch.sample_id,
                colorimeter_id: col_patch.sample_id,
                reference: xyz_of(ref_patch, reference, patch.name())?,
                colorimeter: xyz_of(col_patch, colorimeter, patch.name())?,
            });
        }
        let canonical: [PatchPair; 4] = [canonical[0], canonical[1], canonical[2], canonical[3]];

        let mut seen = HashSet::new();
        let mut all = Vec::new();
        for ref_patch in &reference.patches {
            if !seen.insert(device_key(ref_patch.device)) {
                debug!(sample_id = ref_patch.sample_id, "Duplicate reference device coordinate skipped");
                continue;
            }
            let (Some(col_patch), Some(ref_xyz)) = (colorimeter.find_by_device(ref_patch.device), ref_patch.xyz())
            else {
                continue;
            };
            let Some(col_xyz) = col_patch.xyz() else { continue };
            all.push(PatchPair {
                device: ref_patch.device,
                reference_id: ref_patch.sample_id,
                colorimeter_id: col_patch.sample_id,
                reference: ref_xyz,
                colorimeter: col_xyz,
            });
        }
        debug!(paired = all.len(), "Paired patches by device coordinate");

        Ok(MatrixPairing {
            canonical,
            all,
            reference: reference.clone(),
            colorimeter: colorimeter.clone(),
        })
    }

    fn pair_spectral(&self, sets: &[MeasurementSet]) -> Result<SpectralPairing> {
        let spectral: Vec<&MeasurementSet> = sets.iter().filter(|set| set.is_spectral).collect();
        let reference = single_role(&spectral, SetRole::Reference)?;
        for ignored in sets.iter().filter(|set| !set.is_spectral) {
            debug!(source = %ignored.source_filename, "Non-spectral input unused for spectral correction");
        }
        Ok(SpectralPairing {
            reference: reference.clone(),
        })
    }
}

fn single_role<'a>(candidates: &[&'a MeasurementSet], role: SetRole) -> Result<&'a MeasurementSet> {
    match candidates {
        [single] => Ok(*single),
        [] => Err(PairingError::MissingRole { role }.into()),
        _ => Err(PairingError::AmbiguousRole {
            role,
            candidates: candidates.iter().map(|set| set.source_filename.clone()).collect(),
        }
        .into()),
    }
}

fn canonical_patch(set: &MeasurementSet, patch: CanonicalPatch) -> Result<&PatchRecord> {
    set.find_by_device(patch.device()).ok_or_else(|| {
        PairingError::MissingPatch {
            patch: patch.name().to_string(),
            filename: set.source_filename.clone(),
        }
        .into()
    })
}

fn xyz_of(patch: &PatchRecord, set: &MeasurementSet, name: &str) -> Result<Xyz> {
    patch.xyz().ok_or_else(|| {
        PairingError::MissingXyz {
            patch: name.to_string(),
            filename: set.source_filename.clone(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CorrectionError;
    use crate::measurement::MeasurementSetLoader;

    fn table(instrument: &str, rows: &[&str]) -> String {
        format!(
            "CTI3\nKEYWORD \"TARGET_INSTRUMENT\"\nTARGET_INSTRUMENT \"{}\"\nBEGIN_DATA_FORMAT\nSAMPLE_ID RGB_R RGB_G RGB_B XYZ_X XYZ_Y XYZ_Z\nEND_DATA_FORMAT\nBEGIN_DATA\n{}\nEND_DATA\n",
            instrument,
            rows.join("\n")
        )
    }

    const PRIMARIES: [&str; 5] = [
        "1 100 100 100 95.05 100.0 108.9",
        "2 100 0 0 41.24 21.26 1.93",
        "3 0 100 0 35.76 71.52 11.92",
        "4 0 0 100 18.05 7.22 95.05",
        "5 50 50 50 20.3 21.4 23.3",
    ];

    fn load(name: &str, instrument: &str, rows: &[&str]) -> MeasurementSet {
        MeasurementSetLoader::new().load_text(&table(instrument, rows), name).unwrap()
    }

    #[test]
    fn test_matrix_pairing_assigns_roles() {
        let col = load("col.ti3", "i1 DisplayPro", &PRIMARIES);
        let reference = load("ref.ti3", "i1 Pro 2", &PRIMARIES);
        let paired = PatchPairingMatcher::new()
            .pair(&[col, reference], CorrectionKind::Matrix)
            .unwrap();
        assert_eq!(paired.kind(), CorrectionKind::Matrix);
        assert_eq!(paired.reference().source_filename, "ref.ti3");
        assert_eq!(paired.colorimeter().unwrap().source_filename, "col.ti3");
        let PairedPatches::Matrix(pairing) = paired else {
            panic!("expected matrix pairing");
        };
        assert_eq!(pairing.white().reference.y, 100.0);
        assert_eq!(pairing.canonical[2].device, [0.0, 100.0, 0.0]);
        assert_eq!(pairing.all.len(), 5);
    }

    #[test]
    fn test_missing_green_names_colorimeter_file() {
        let col_rows: Vec<&str> = PRIMARIES.iter().copied().filter(|r| !r.starts_with("3 ")).collect();
        let col = load("colorimeter.ti3", "Spyder5", &col_rows);
        let reference = load("ref.ti3", "i1 Pro", &PRIMARIES);
        let err = PatchPairingMatcher::new()
            .pair(&[reference, col], CorrectionKind::Matrix)
            .unwrap_err();
        match err {
            CorrectionError::Pairing(PairingError::MissingPatch { patch, filename }) => {
                assert_eq!(patch, "green");
                assert_eq!(filename, "colorimeter.ti3");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_nearby_patch_is_not_substituted() {
        let mut col_rows: Vec<&str> = PRIMARIES.iter().copied().filter(|r| !r.starts_with("2 ")).collect();
        col_rows.push("9 99.9 0 0 41.0 21.0 2.0");
        let col = load("col.ti3", "Spyder5", &col_rows);
        let reference = load("ref.ti3", "i1 Pro", &PRIMARIES);
        let err = PatchPairingMatcher::new()
            .pair(&[reference, col], CorrectionKind::Matrix)
            .unwrap_err();
        assert!(matches!(
            err,
            CorrectionError::Pairing(PairingError::MissingPatch { ref patch, .. }) if patch == "red"
        ));
    }

    #[test]
    fn test_two_reference_candidates_are_ambiguous() {
        let sets = [
            load("a.ti3", "i1 Pro", &PRIMARIES),
            load("b.ti3", "ColorMunki", &PRIMARIES),
            load("c.ti3", "Spyder5", &PRIMARIES),
        ];
        let err = PatchPairingMatcher::new().pair(&sets, CorrectionKind::Matrix).unwrap_err();
        match err {
            CorrectionError::Pairing(PairingError::AmbiguousRole { role, candidates }) => {
                assert_eq!(role, SetRole::Reference);
                assert_eq!(candidates, vec!["a.ti3", "b.ti3"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_two_colorimeters_are_ambiguous() {
        let sets = [
            load("a.ti3", "i1 Pro", &PRIMARIES),
            load("b.ti3", "Spyder4", &PRIMARIES),
            load("c.ti3", "Spyder5", &PRIMARIES),
        ];
        let err = PatchPairingMatcher::new().pair(&sets, CorrectionKind::Matrix).unwrap_err();
        assert!(matches!(
            err,
            CorrectionError::Pairing(PairingError::AmbiguousRole {
                role: SetRole::Colorimeter,
                ..
            })
        ));
    }

    #[test]
    fn test_missing_reference_role() {
        let sets = [load("c.ti3", "Spyder5", &PRIMARIES)];
        let err = PatchPairingMatcher::new().pair(&sets, CorrectionKind::Matrix).unwrap_err();
        assert!(matches!(
            err,
            CorrectionError::Pairing(PairingError::MissingRole {
                role: SetRole::Reference
            })
        ));
    }

    #[test]
    fn test_spectral_strategy_ignores_colorimeter() {
        let spectral = MeasurementSetLoader::new()
            .load_text(
                "CTI3\nBEGIN_DATA_FORMAT\nSAMPLE_ID RGB_R RGB_G RGB_B SPEC_400 SPEC_500\nEND_DATA_FORMAT\nBEGIN_DATA\n1 100 100 100 0.5 0.6\nEND_DATA\n",
                "spectral.ti3",
            )
            .unwrap();
        let col = load("col.ti3", "Spyder5", &PRIMARIES);
        let paired = PatchPairingMatcher::new()
            .pair(&[col, spectral], CorrectionKind::Spectral)
            .unwrap();
        assert_eq!(paired.kind(), CorrectionKind::Spectral);
        assert_eq!(paired.reference().source_filename, "spectral.ti3");
        assert!(paired.colorimeter().is_none());
    }

    #[test]
    fn test_spectral_strategy_requires_spectral_set() {
        let col = load("col.ti3", "Spyder5", &PRIMARIES);
        assert!(PatchPairingMatcher::new().pair(&[col], CorrectionKind::Spectral).is_err());
    }

    #[test]
    fn test_kind_naming() {
        assert_eq!(CorrectionKind::Matrix.file_type(), "CCMX");
        assert_eq!(CorrectionKind::Spectral.extension(), "ccss");
    }
}
