//! Instrument identification
//!
//! Instrument names arrive as free text in `TARGET_INSTRUMENT`, `INSTRUMENT`
//! and `REFERENCE` keywords, often with vendor prefixes. They are resolved
//! once, at load time, into an [`InstrumentProfile`] carrying the capability
//! flags downstream components need.

use std::fmt;

/// Vendor prefixes stripped during canonicalization
const VENDORS: &[&str] = &[
    "ColorVision",
    "Datacolor",
    "GretagMacbeth",
    "Hughski",
    "Image Engineering",
    "JETI",
    "Klein",
    "X-Rite",
    "Xrite",
];

/// Known measurement instruments
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum InstrumentProfile {
    // Spectrometers
    I1Pro,
    I1Pro2,
    I1Monitor,
    ColorMunki,
    Spectrolino,
    SpectroScan,
    Ex1,
    Specbos,
    Specbos1201,
    Spectraval,
    // Colorimeters
    I1Display,
    I1Display2,
    I1DisplayPro,
    ColorMunkiSmile,
    Dtp92,
    Dtp94,
    Spyder2,
    Spyder3,
    Spyder4,
    Spyder5,
    SpyderX,
    ColorHug,
    ColorHug2,
    Huey,
    K10,
    /// Instrument not in the table, by canonical name
    Other(String),
    /// No instrument recorded
    #[default]
    Unknown,
}

/// Canonical name table, matched case-insensitively
const KNOWN: &[(&str, InstrumentProfile)] = &[
    ("i1 DisplayPro, ColorMunki Display", InstrumentProfile::I1DisplayPro),
    ("ColorMunki Smile", InstrumentProfile::ColorMunkiSmile),
    ("ColorMunki Display", InstrumentProfile::I1DisplayPro),
    ("i1 DisplayPro", InstrumentProfile::I1DisplayPro),
    ("i1 Display 2", InstrumentProfile::I1Display2),
    ("i1 Display 1", InstrumentProfile::I1Display),
    ("i1 Display", InstrumentProfile::I1Display),
    ("i1 Monitor", InstrumentProfile::I1Monitor),
    ("specbos 1201", InstrumentProfile::Specbos1201),
    ("SpectroScan", InstrumentProfile::SpectroScan),
    ("Spectrolino", InstrumentProfile::Spectrolino),
    ("spectraval", InstrumentProfile::Spectraval),
    ("ColorHug2", InstrumentProfile::ColorHug2),
    ("ColorHug", InstrumentProfile::ColorHug),
    ("ColorMunki", InstrumentProfile::ColorMunki),
    ("i1 Pro 2", InstrumentProfile::I1Pro2),
    ("i1 Pro", InstrumentProfile::I1Pro),
    ("specbos", InstrumentProfile::Specbos),
    ("SpyderX", InstrumentProfile::SpyderX),
    ("Spyder5", InstrumentProfile::Spyder5),
    ("Spyder4", InstrumentProfile::Spyder4),
    ("Spyder3", InstrumentProfile::Spyder3),
    ("Spyder2", InstrumentProfile::Spyder2),
    ("DTP92", InstrumentProfile::Dtp92),
    ("DTP94", InstrumentProfile::Dtp94),
    ("Huey", InstrumentProfile::Huey),
    ("K-10", InstrumentProfile::K10),
    ("EX1", InstrumentProfile::Ex1),
];

impl InstrumentProfile {
    /// Resolve a free-text instrument name
    ///
    /// Vendor names are removed and the remainder matched case-insensitively
    /// against the known instrument table. Unrecognized names are kept as
    /// [`InstrumentProfile::Other`] with vendor names stripped.
    pub fn resolve(name: &str) -> Self {
        let canonical = canonical_instrument_name(name);
        if canonical.is_empty() {
            return InstrumentProfile::Unknown;
        }
        let lowered = canonical.to_lowercase();
        KNOWN
            .iter()
            .find(|(known, _)| lowered == known.to_lowercase())
            .map(|(_, profile)| profile.clone())
            .unwrap_or(InstrumentProfile::Other(canonical))
    }

    /// Canonical display name
    pub fn name(&self) -> &str {
        match self {
            InstrumentProfile::I1Pro => "i1 Pro",
            InstrumentProfile::I1Pro2 => "i1 Pro 2",
            InstrumentProfile::I1Monitor => "i1 Monitor",
            InstrumentProfile::ColorMunki => "ColorMunki",
            InstrumentProfile::Spectrolino => "Spectrolino",
            InstrumentProfile::SpectroScan => "SpectroScan",
            InstrumentProfile::Ex1 => "EX1",
            InstrumentProfile::Specbos => "specbos",
            InstrumentProfile::Specbos1201 => "specbos 1201",
            InstrumentProfile::Spectraval => "spectraval",
            InstrumentProfile::I1Display => "i1 Display",
            InstrumentProfile::I1Display2 => "i1 Display 2",
            InstrumentProfile::I1DisplayPro => "i1 DisplayPro, ColorMunki Display",
            InstrumentProfile::ColorMunkiSmile => "ColorMunki Smile",
            InstrumentProfile::Dtp92 => "DTP92",
            InstrumentProfile::Dtp94 => "DTP94",
            InstrumentProfile::Spyder2 => "Spyder2",
            InstrumentProfile::Spyder3 => "Spyder3",
            InstrumentProfile::Spyder4 => "Spyder4",
            InstrumentProfile::Spyder5 => "Spyder5",
            InstrumentProfile::SpyderX => "SpyderX",
            InstrumentProfile::ColorHug => "ColorHug",
            InstrumentProfile::ColorHug2 => "ColorHug2",
            InstrumentProfile::Huey => "Huey",
            InstrumentProfile::K10 => "K-10",
            InstrumentProfile::Other(name) => name,
            InstrumentProfile::Unknown => "Unknown",
        }
    }

    /// Whether the instrument measures spectral power distributions
    pub fn supports_spectral(&self) -> bool {
        matches!(
            self,
            InstrumentProfile::I1Pro
                | InstrumentProfile::I1Pro2
                | InstrumentProfile::I1Monitor
                | InstrumentProfile::ColorMunki
                | InstrumentProfile::Spectrolino
                | InstrumentProfile::SpectroScan
                | InstrumentProfile::Ex1
                | InstrumentProfile::Specbos
                | InstrumentProfile::Specbos1201
                | InstrumentProfile::Spectraval
        )
    }

    /// Whether the instrument accepts spectral sample (CCSS) calibrations
    pub fn supports_ccss(&self) -> bool {
        matches!(
            self,
            InstrumentProfile::I1DisplayPro
                | InstrumentProfile::Spyder4
                | InstrumentProfile::Spyder5
                | InstrumentProfile::SpyderX
        )
    }

    /// Whether readings can be recomputed under another CIE observer
    pub fn supports_observer_override(&self) -> bool {
        self.supports_spectral() || self.supports_ccss()
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, InstrumentProfile::Other(_) | InstrumentProfile::Unknown)
    }
}

impl fmt::Display for InstrumentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Strip vendor names and surrounding whitespace from an instrument name
pub fn canonical_instrument_name(name: &str) -> String {
    let mut text = name.to_string();
    for vendor in VENDORS {
        text = remove_case_insensitive(&text, vendor);
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn remove_case_insensitive(haystack: &str, needle: &str) -> String {
    let lowered = haystack.to_lowercase();
    let needle_lower = needle.to_lowercase();
    // Lowercasing can change byte lengths outside ASCII; leave such names alone
    if lowered.len() != haystack.len() {
        return haystack.to_string();
    }
    let mut out = String::with_capacity(haystack.len());
    let mut cursor = 0;
    while let Some(found) = lowered[cursor..].find(&needle_lower) {
        let start = cursor + found;
        out.push_str(&haystack[cursor..start]);
        cursor = start + needle.len();
    }
    out.push_str(&haystack[cursor..]);
    out
}
