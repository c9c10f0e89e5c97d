//! Measurement data model
//!
//! A [`MeasurementSet`] is the in-memory form of one measurement table: the
//! ordered patch records plus the header metadata the fitting pipeline
//! needs. Sets are immutable once loaded; normalization and re-observation
//! produce derived copies that keep the raw source text (and therefore the
//! content digest) of the file they came from.

pub mod cgats;
pub mod instrument;
pub mod loader;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::color::{Lab, Xyz};
use crate::constants::fitting::{DEVICE_KEY_SCALE, FULL_DRIVE};
use crate::error::CorrectionError;
use crate::util::sha256_hex;

pub use cgats::CgatsTable;
pub use instrument::InstrumentProfile;
pub use loader::MeasurementSetLoader;

/// Device RGB coordinate in channel percent (0-100)
pub type DeviceRgb = [f64; 3];

/// Integer key used for exact device coordinate lookup
pub type DeviceKey = [i64; 3];

/// Quantize a device coordinate for exact matching
pub fn device_key(rgb: DeviceRgb) -> DeviceKey {
    rgb.map(|v| (v * DEVICE_KEY_SCALE).round() as i64)
}

/// CIE standard observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Observer {
    /// CIE 1931 2°
    #[default]
    #[serde(rename = "1931_2")]
    Cie1931TwoDegree,
    /// Stiles & Burch 1955 2°
    #[serde(rename = "1955_2")]
    StilesBurch1955TwoDegree,
    /// CIE 1964 10°
    #[serde(rename = "1964_10")]
    Cie1964TenDegree,
    /// CIE 1964 10° with Judd-Vos style 2° compensation
    #[serde(rename = "1964_10c")]
    Cie1964TenDegreeCompensated,
    /// Judd & Voss 1978 2°
    #[serde(rename = "1978_2")]
    JuddVos1978TwoDegree,
    /// Shaw & Fairchild 1997 2°
    #[serde(rename = "shaw")]
    ShawFairchild,
}

impl Observer {
    pub const ALL: [Observer; 6] = [
        Observer::Cie1931TwoDegree,
        Observer::StilesBurch1955TwoDegree,
        Observer::Cie1964TenDegree,
        Observer::Cie1964TenDegreeCompensated,
        Observer::JuddVos1978TwoDegree,
        Observer::ShawFairchild,
    ];

    /// Code as written to the `OBSERVER` keyword
    pub fn code(self) -> &'static str {
        match self {
            Observer::Cie1931TwoDegree => "1931_2",
            Observer::StilesBurch1955TwoDegree => "1955_2",
            Observer::Cie1964TenDegree => "1964_10",
            Observer::Cie1964TenDegreeCompensated => "1964_10c",
            Observer::JuddVos1978TwoDegree => "1978_2",
            Observer::ShawFairchild => "shaw",
        }
    }
}

impl fmt::Display for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Observer {
    type Err = CorrectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Observer::ALL
            .into_iter()
            .find(|observer| observer.code().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| CorrectionError::InvalidParameter {
                parameter: "observer".to_string(),
                value: s.to_string(),
            })
    }
}

/// Display refresh behavior, as reported by the instrument driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayType {
    Refresh,
    NonRefresh,
}

impl DisplayType {
    /// `DISPLAY_TYPE_REFRESH` keyword value
    pub fn keyword_value(self) -> &'static str {
        match self {
            DisplayType::Refresh => "YES",
            DisplayType::NonRefresh => "NO",
        }
    }

    pub fn from_keyword(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "YES" => Some(DisplayType::Refresh),
            "NO" => Some(DisplayType::NonRefresh),
            _ => None,
        }
    }
}

/// Wavelength sampling of spectral columns
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralRange {
    pub start_nm: f64,
    pub end_nm: f64,
    pub bands: usize,
}

impl SpectralRange {
    /// Band spacing in nm, zero for a single band
    pub fn step_nm(&self) -> f64 {
        if self.bands < 2 {
            0.0
        } else {
            (self.end_nm - self.start_nm) / (self.bands - 1) as f64
        }
    }
}

/// Measured color of a patch
#[derive(Debug, Clone, PartialEq)]
pub enum ColorimetricValue {
    /// Tri-stimulus reading
    Xyz(Xyz),
    /// Spectral power reading, optionally with XYZ computed by the instrument
    Spectral { spectrum: Vec<f64>, xyz: Option<Xyz> },
}

/// One measured color sample
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRecord {
    pub sample_id: u32,
    pub device: DeviceRgb,
    pub value: ColorimetricValue,
    /// Derived Lab, never authoritative
    pub lab: Option<Lab>,
}

impl PatchRecord {
    pub fn xyz(&self) -> Option<Xyz> {
        match &self.value {
            ColorimetricValue::Xyz(xyz) => Some(*xyz),
            ColorimetricValue::Spectral { xyz, .. } => *xyz,
        }
    }

    pub fn spectrum(&self) -> Option<&[f64]> {
        match &self.value {
            ColorimetricValue::Spectral { spectrum, .. } => Some(spectrum),
            ColorimetricValue::Xyz(_) => None,
        }
    }

    /// Copy of this patch carrying a different XYZ reading
    pub fn with_xyz(&self, xyz: Xyz) -> Self {
        let value = match &self.value {
            ColorimetricValue::Xyz(_) => ColorimetricValue::Xyz(xyz),
            ColorimetricValue::Spectral { spectrum, .. } => ColorimetricValue::Spectral {
                spectrum: spectrum.clone(),
                xyz: Some(xyz),
            },
        };
        Self {
            sample_id: self.sample_id,
            device: self.device,
            value,
            lab: self.lab,
        }
    }
}

/// Luminance scale of the XYZ values held by a set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhotometricState {
    /// As loaded: white normalized to Y = 100, or unknown relative scale
    #[default]
    Relative,
    /// Scaled to cd/m² using the recorded absolute white
    Absolute,
}

/// A validated measurement table
#[derive(Debug, Clone)]
pub struct MeasurementSet {
    pub patches: Vec<PatchRecord>,
    /// Absolute white in cd/m², absent for relative-only data
    pub absolute_white: Option<Xyz>,
    pub instrument: InstrumentProfile,
    pub is_spectral: bool,
    pub spectral_range: Option<SpectralRange>,
    /// Spectral field names in file order
    pub spectral_fields: Vec<String>,
    pub spectral_norm: Option<f64>,
    pub observer: Observer,
    pub display_type: Option<DisplayType>,
    pub display_type_base_id: Option<u32>,
    pub source_filename: String,
    pub photometric: PhotometricState,
    raw_text: Arc<str>,
    digest: Arc<OnceLock<String>>,
}

impl MeasurementSet {
    pub(crate) fn new(source_filename: impl Into<String>, raw_text: impl Into<Arc<str>>) -> Self {
        Self {
            patches: Vec::new(),
            absolute_white: None,
            instrument: InstrumentProfile::Unknown,
            is_spectral: false,
            spectral_range: None,
            spectral_fields: Vec::new(),
            spectral_norm: None,
            observer: Observer::default(),
            display_type: None,
            display_type_base_id: None,
            source_filename: source_filename.into(),
            photometric: PhotometricState::Relative,
            raw_text: raw_text.into(),
            digest: Arc::new(OnceLock::new()),
        }
    }

    /// SHA-256 of the raw source text, computed on first use
    ///
    /// Derived copies share the digest of the file they were loaded from.
    pub fn content_digest(&self) -> &str {
        self.digest.get_or_init(|| sha256_hex(self.raw_text.as_bytes()))
    }

    /// Unparsed table text as loaded
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    /// Patch measured at exactly `rgb`, first occurrence wins
    pub fn find_by_device(&self, rgb: DeviceRgb) -> Option<&PatchRecord> {
        let key = device_key(rgb);
        self.patches.iter().find(|patch| device_key(patch.device) == key)
    }

    /// XYZ of the full-drive white patch, if measured
    pub fn white_xyz(&self) -> Option<Xyz> {
        self.find_by_device([FULL_DRIVE; 3]).and_then(PatchRecord::xyz)
    }

    /// Whether the set can act as the reference side of a matrix fit
    pub fn is_reference_capable(&self) -> bool {
        self.is_spectral || self.instrument.supports_spectral()
    }

    /// Derived copy with replaced patches, sharing source identity
    pub(crate) fn with_patches(&self, patches: Vec<PatchRecord>) -> Self {
        Self {
            patches,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xyz_patch(id: u32, device: DeviceRgb, xyz: Xyz) -> PatchRecord {
        PatchRecord {
            sample_id: id,
            device,
            value: ColorimetricValue::Xyz(xyz),
            lab: None,
        }
    }

    #[test]
    fn test_observer_codes_round_trip() {
        for observer in Observer::ALL {
            assert_eq!(observer.code().parse::<Observer>().unwrap(), observer);
        }
        assert_eq!("1964_10C".parse::<Observer>().unwrap(), Observer::Cie1964TenDegreeCompensated);
        assert!("1931_10".parse::<Observer>().is_err());
        assert_eq!(Observer::default().to_string(), "1931_2");
    }

    #[test]
    fn test_observer_serde_uses_codes() {
        let json = serde_json::to_string(&Observer::Cie1964TenDegree).unwrap();
        assert_eq!(json, "\"1964_10\"");
        let parsed: Observer = serde_json::from_str("\"shaw\"").unwrap();
        assert_eq!(parsed, Observer::ShawFairchild);
    }

    #[test]
    fn test_device_key_is_exact_to_resolution() {
        assert_eq!(device_key([100.0, 0.0, 0.0]), device_key([100.00001, 0.0, -0.00001]));
        assert_ne!(device_key([100.0, 0.0, 0.0]), device_key([99.99, 0.0, 0.0]));
    }

    #[test]
    fn test_find_by_device_first_occurrence() {
        let mut set = MeasurementSet::new("a.ti3", "raw");
        set.patches = vec![
            xyz_patch(1, [100.0, 100.0, 100.0], Xyz::new(95.0, 100.0, 108.0)),
            xyz_patch(2, [100.0, 100.0, 100.0], Xyz::new(1.0, 1.0, 1.0)),
        ];
        assert_eq!(set.find_by_device([100.0; 3]).unwrap().sample_id, 1);
        assert_eq!(set.white_xyz().unwrap().y, 100.0);
        assert!(set.find_by_device([0.0, 100.0, 0.0]).is_none());
    }

    #[test]
    fn test_digest_is_over_raw_text_and_shared() {
        let set = MeasurementSet::new("a.ti3", "CTI3\nraw table\n");
        let derived = set.with_patches(Vec::new());
        assert_eq!(set.content_digest(), sha256_hex(b"CTI3\nraw table\n"));
        assert_eq!(derived.content_digest(), set.content_digest());
        assert_eq!(derived.raw_text(), "CTI3\nraw table\n");
    }

    #[test]
    fn test_with_xyz_keeps_spectrum() {
        let patch = PatchRecord {
            sample_id: 1,
            device: [100.0; 3],
            value: ColorimetricValue::Spectral {
                spectrum: vec![0.1, 0.2],
                xyz: None,
            },
            lab: None,
        };
        let updated = patch.with_xyz(Xyz::new(1.0, 2.0, 3.0));
        assert_eq!(updated.spectrum(), Some(&[0.1, 0.2][..]));
        assert_eq!(updated.xyz(), Some(Xyz::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_spectral_range_step() {
        let range = SpectralRange {
            start_nm: 380.0,
            end_nm: 780.0,
            bands: 81,
        };
        assert_eq!(range.step_nm(), 5.0);
    }
}
