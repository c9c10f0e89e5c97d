//! Correction artifact rendering and parsing
//!
//! A fitted correction is written as CGATS text: `CCMX` for a 3×3 matrix,
//! `CCSS` for spectral samples. Header keywords are emitted in a fixed order
//! so identical inputs render identical bytes apart from `CREATED`, which is
//! excluded from the repository query key.

use std::fmt;

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::artifact::{
    FALLBACK_FILENAME_STEM, MATRIX_DECIMALS, MAX_FILENAME_STEM, RESERVED_FILENAME_CHARS, STATISTIC_DECIMALS,
};
use crate::error::{CorrectionError, Result};
use crate::evaluate::FitStatistics;
use crate::fit::{CorrectionBody, FitMethod, SpectralSample, SpectralSamples};
use crate::measurement::{CgatsTable, DisplayType, MeasurementSet, Observer, SpectralRange};
use crate::pairing::CorrectionKind;
use crate::util::{format_fixed, now_created_string, sha256_hex};

const MATRIX_FIELDS: [&str; 3] = ["XYZ_X", "XYZ_Y", "XYZ_Z"];
/// `ORIGINATOR` written when none is configured
pub const DEFAULT_ORIGINATOR: &str = concat!("colorimeter-correction ", env!("CARGO_PKG_VERSION"));

/// Display technology
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Technology {
    Lcd,
    LcdCcfl,
    LcdWhiteLed,
    LcdRgbLed,
    Oled,
    Crt,
    Plasma,
    Projector,
    #[default]
    Unknown,
    Other(String),
}

impl Technology {
    const NAMED: [(&'static str, Technology); 9] = [
        ("LCD", Technology::Lcd),
        ("LCD CCFL", Technology::LcdCcfl),
        ("LCD White LED", Technology::LcdWhiteLed),
        ("LCD RGB LED", Technology::LcdRgbLed),
        ("OLED", Technology::Oled),
        ("CRT", Technology::Crt),
        ("Plasma", Technology::Plasma),
        ("Projector", Technology::Projector),
        ("Unknown", Technology::Unknown),
    ];

    /// `TECHNOLOGY` keyword value
    pub fn name(&self) -> &str {
        match self {
            Technology::Other(name) => name,
            named => Self::NAMED
                .iter()
                .find(|(_, tech)| tech == named)
                .map(|(name, _)| *name)
                .unwrap_or("Unknown"),
        }
    }

    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        Self::NAMED
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(trimmed))
            .map(|(_, tech)| tech.clone())
            .unwrap_or_else(|| Technology::Other(trimmed.to_string()))
    }
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for Technology {
    fn from(value: String) -> Self {
        Technology::parse(&value)
    }
}

impl From<Technology> for String {
    fn from(value: Technology) -> Self {
        value.name().to_string()
    }
}

/// Descriptive header of an artifact
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArtifactMetadata {
    pub description: String,
    pub originator: String,
    /// `CREATED` text; filled at render time when absent
    pub created: Option<String>,
    /// Colorimeter canonical name (matrix corrections)
    pub instrument: Option<String>,
    /// Reference instrument canonical name
    pub reference_instrument: Option<String>,
    pub display: Option<String>,
    pub technology: Technology,
    pub manufacturer: Option<String>,
    pub manufacturer_id: Option<String>,
    pub display_type: Option<DisplayType>,
    pub display_type_base_id: Option<u32>,
    pub observer: Option<Observer>,
    pub reference_observer: Option<Observer>,
}

impl ArtifactMetadata {
    /// Descriptor used when none is configured
    ///
    /// Matrix: `<colorimeter> & <display>`. Spectral: `<technology> (<display>)`,
    /// or `CCSS for <technology>` without a display name.
    pub fn fallback_description(kind: CorrectionKind, instrument: Option<&str>, display: Option<&str>, technology: &Technology) -> String {
        match kind {
            CorrectionKind::Matrix => {
                let instrument = instrument.unwrap_or("Unknown");
                let display = display.map(str::to_string).unwrap_or_else(|| technology.to_string());
                format!("{} & {}", instrument, display)
            }
            CorrectionKind::Spectral => match display {
                Some(display) => format!("{} ({})", technology, display),
                None => format!("CCSS for {}", technology),
            },
        }
    }
}

/// Origin of one contributing measurement file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub filename: String,
    /// SHA-256 of the raw file text
    pub hash: String,
}

impl SourceRecord {
    pub fn of(set: &MeasurementSet) -> Self {
        Self {
            filename: set.source_filename.clone(),
            hash: set.content_digest().to_string(),
        }
    }
}

/// Contributing inputs of an artifact
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub reference: Option<SourceRecord>,
    /// Colorimeter input, matrix corrections only
    pub target: Option<SourceRecord>,
}

/// A complete correction artifact
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionArtifact {
    pub body: CorrectionBody,
    pub metadata: ArtifactMetadata,
    pub statistics: Option<FitStatistics>,
    pub provenance: Provenance,
}

impl CorrectionArtifact {
    pub fn kind(&self) -> CorrectionKind {
        match self.body {
            CorrectionBody::Matrix { .. } => CorrectionKind::Matrix,
            CorrectionBody::Spectral(_) => CorrectionKind::Spectral,
        }
    }
}

/// Artifact text codec
#[derive(Debug, Clone, Default)]
pub struct ArtifactSerializer;

impl ArtifactSerializer {
    pub fn new() -> Self {
        Self
    }

    /// Render an artifact as CGATS text
    ///
    /// Keyword order is fixed. Matrix values use fixed precision; spectral
    /// values are written with the shortest text that reads back exactly.
    pub fn serialize(&self, artifact: &CorrectionArtifact) -> String {
        let kind = artifact.kind();
        let meta = &artifact.metadata;
        let mut table = CgatsTable::new(kind.file_type());

        table.push_keyword("DESCRIPTOR", &meta.description);
        let originator = if meta.originator.is_empty() {
            DEFAULT_ORIGINATOR
        } else {
            &meta.originator
        };
        table.push_keyword("ORIGINATOR", originator);
        table.push_keyword("CREATED", meta.created.clone().unwrap_or_else(now_created_string));
        push_opt(&mut table, "INSTRUMENT", meta.instrument.as_deref());
        push_opt(&mut table, "DISPLAY", meta.display.as_deref());
        table.push_keyword("TECHNOLOGY", meta.technology.name());
        push_opt(&mut table, "MANUFACTURER", meta.manufacturer.as_deref());
        push_opt(&mut table, "MANUFACTURER_ID", meta.manufacturer_id.as_deref());
        if let Some(display_type) = meta.display_type {
            table.push_keyword("DISPLAY_TYPE_REFRESH", display_type.keyword_value());
        }
        if let Some(base_id) = meta.display_type_base_id {
            table.push_keyword("DISPLAY_TYPE_BASE_ID", base_id.to_string());
        }
        push_opt(&mut table, "REFERENCE", meta.reference_instrument.as_deref());
        push_opt(&mut table, "OBSERVER", meta.observer.map(Observer::code));
        push_opt(&mut table, "REFERENCE_OBSERVER", meta.reference_observer.map(Observer::code));

        if let Some(method) = artifact.body.method() {
            table.push_keyword("FIT_METHOD", method.keyword_value());
        }
        if let Some(stats) = &artifact.statistics {
            table.push_keyword("FIT_AVG_DE94", format_fixed(stats.avg_de94, STATISTIC_DECIMALS));
            table.push_keyword("FIT_MAX_DE94", format_fixed(stats.max_de94, STATISTIC_DECIMALS));
            table.push_keyword("FIT_AVG_DE00", format_fixed(stats.avg_de00, STATISTIC_DECIMALS));
            table.push_keyword("FIT_MAX_DE00", format_fixed(stats.max_de00, STATISTIC_DECIMALS));
        }
        if let Some(reference) = &artifact.provenance.reference {
            table.push_keyword("REFERENCE_FILENAME", &reference.filename);
            table.push_keyword("REFERENCE_HASH", &reference.hash);
        }
        if let Some(target) = &artifact.provenance.target {
            table.push_keyword("TARGET_FILENAME", &target.filename);
            table.push_keyword("TARGET_HASH", &target.hash);
        }

        match &artifact.body {
            CorrectionBody::Matrix { matrix, .. } => {
                table.push_keyword("COLOR_REP", "XYZ");
                table.fields = MATRIX_FIELDS.iter().map(|f| f.to_string()).collect();
                table.rows = matrix
                    .row_iter()
                    .map(|row| row.iter().map(|v| format_fixed(*v, MATRIX_DECIMALS)).collect())
                    .collect();
            }
            CorrectionBody::Spectral(spectral) => {
                table.push_keyword("SPECTRAL_BANDS", spectral.range.bands.to_string());
                table.push_keyword("SPECTRAL_START_NM", format_fixed(spectral.range.start_nm, 6));
                table.push_keyword("SPECTRAL_END_NM", format_fixed(spectral.range.end_nm, 6));
                table.push_keyword("SPECTRAL_NORM", format_fixed(spectral.norm.unwrap_or(1.0), 6));
                table.fields = std::iter::once("SAMPLE_ID".to_string())
                    .chain(spectral.fields.iter().cloned())
                    .collect();
                table.rows = spectral
                    .samples
                    .iter()
                    .map(|sample| {
                        std::iter::once(sample.sample_id.to_string())
                            .chain(sample.values.iter().map(|v| v.to_string()))
                            .collect()
                    })
                    .collect();
            }
        }

        let text = table.to_text();
        debug!(kind = %kind, bytes = text.len(), "Serialized correction artifact");
        text
    }

    /// Parse CCMX or CCSS text
    ///
    /// # Errors
    ///
    /// `MalformedInput` for an unknown file type, a missing or malformed
    /// data block, or unparsable keywords.
    pub fn parse(&self, text: &str, source_name: &str) -> Result<CorrectionArtifact> {
        let table = CgatsTable::parse(text, source_name)?;
        let keyword = |name: &str| table.keyword(name).map(str::to_string);

        let body = match table.file_type.as_str() {
            "CCMX" => {
                let method = keyword("FIT_METHOD")
                    .and_then(|v| FitMethod::from_keyword(&v))
                    .unwrap_or(FitMethod::General);
                CorrectionBody::Matrix {
                    matrix: matrix_from_table(&table, source_name)?,
                    method,
                }
            }
            "CCSS" => CorrectionBody::Spectral(spectral_from_table(&table, source_name)?),
            other => {
                return Err(CorrectionError::malformed(
                    source_name,
                    format!("unknown correction type '{}'", other),
                ))
            }
        };

        let observer = |name: &str| -> Result<Option<Observer>> {
            keyword(name)
                .map(|code| {
                    code.parse::<Observer>().map_err(|_| {
                        CorrectionError::malformed(source_name, format!("unknown {} '{}'", name, code))
                    })
                })
                .transpose()
        };
        let display_type = keyword("DISPLAY_TYPE_REFRESH")
            .map(|v| {
                DisplayType::from_keyword(&v).ok_or_else(|| {
                    CorrectionError::malformed(source_name, format!("invalid DISPLAY_TYPE_REFRESH '{}'", v))
                })
            })
            .transpose()?;
        let display_type_base_id = keyword("DISPLAY_TYPE_BASE_ID")
            .map(|v| {
                v.trim().parse::<u32>().map_err(|_| {
                    CorrectionError::malformed(source_name, format!("invalid DISPLAY_TYPE_BASE_ID '{}'", v))
                })
            })
            .transpose()?;

        let metadata = ArtifactMetadata {
            description: keyword("DESCRIPTOR").unwrap_or_default(),
            originator: keyword("ORIGINATOR").unwrap_or_default(),
            created: keyword("CREATED"),
            instrument: keyword("INSTRUMENT"),
            reference_instrument: keyword("REFERENCE"),
            display: keyword("DISPLAY"),
            technology: keyword("TECHNOLOGY").map(|t| Technology::parse(&t)).unwrap_or_default(),
            manufacturer: keyword("MANUFACTURER"),
            manufacturer_id: keyword("MANUFACTURER_ID"),
            display_type,
            display_type_base_id,
            observer: observer("OBSERVER")?,
            reference_observer: observer("REFERENCE_OBSERVER")?,
        };

        let stat = |name: &str| keyword(name).and_then(|v| v.trim().parse::<f64>().ok());
        let statistics = match (
            stat("FIT_AVG_DE94"),
            stat("FIT_MAX_DE94"),
            stat("FIT_AVG_DE00"),
            stat("FIT_MAX_DE00"),
        ) {
            (Some(avg_de94), Some(max_de94), Some(avg_de00), Some(max_de00)) => Some(FitStatistics {
                avg_de94,
                max_de94,
                avg_de00,
                max_de00,
            }),
            _ => None,
        };

        let source = |file: &str, hash: &str| match (keyword(file), keyword(hash)) {
            (Some(filename), Some(hash)) => Some(SourceRecord { filename, hash }),
            _ => None,
        };
        let provenance = Provenance {
            reference: source("REFERENCE_FILENAME", "REFERENCE_HASH"),
            target: source("TARGET_FILENAME", "TARGET_HASH"),
        };

        Ok(CorrectionArtifact {
            body,
            metadata,
            statistics,
            provenance,
        })
    }

    /// Output filename derived from the descriptor
    ///
    /// Reserved and control characters become `_`, the stem is cut on a
    /// character boundary to at most `MAX_FILENAME_STEM` bytes, and the
    /// extension follows the correction kind.
    pub fn derive_filename(&self, artifact: &CorrectionArtifact) -> String {
        let sanitized: String = artifact
            .metadata
            .description
            .chars()
            .map(|c| {
                if RESERVED_FILENAME_CHARS.contains(&c) || c.is_control() {
                    '_'
                } else {
                    c
                }
            })
            .collect();
        let trimmed = sanitized.trim().trim_end_matches('.');
        let end = trimmed
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .take_while(|&end| end <= MAX_FILENAME_STEM)
            .last()
            .unwrap_or(0);
        let stem = trimmed[..end].trim_end();
        let stem = if stem.is_empty() { FALLBACK_FILENAME_STEM } else { stem };
        format!("{}.{}", stem, artifact.kind().extension())
    }

    /// Repository query key: SHA-256 of the text without its `CREATED` line
    pub fn query_key(&self, text: &str) -> String {
        let stripped: Vec<&str> = text
            .lines()
            .filter(|line| !line.trim_start().starts_with("CREATED "))
            .collect();
        sha256_hex(stripped.join("\n").as_bytes())
    }
}

fn push_opt(table: &mut CgatsTable, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        table.push_keyword(name, value);
    }
}

/// Read the 3×3 matrix block of a CCMX table
pub(crate) fn matrix_from_table(table: &CgatsTable, source_name: &str) -> Result<Matrix3<f64>> {
    let idx = MATRIX_FIELDS.map(|f| table.field_index(f));
    let [Some(x), Some(y), Some(z)] = idx else {
        return Err(CorrectionError::malformed(source_name, "missing XYZ_X/XYZ_Y/XYZ_Z columns"));
    };
    if table.rows.len() != 3 {
        return Err(CorrectionError::malformed(
            source_name,
            format!("matrix has {} rows, expected 3", table.rows.len()),
        ));
    }
    let mut matrix = Matrix3::zeros();
    for (r, row) in table.rows.iter().enumerate() {
        for (c, idx) in [x, y, z].into_iter().enumerate() {
            matrix[(r, c)] = row[idx].parse::<f64>().map_err(|_| {
                CorrectionError::malformed(source_name, format!("invalid matrix value '{}'", row[idx]))
            })?;
        }
    }
    Ok(matrix)
}

fn spectral_from_table(table: &CgatsTable, source_name: &str) -> Result<SpectralSamples> {
    let number = |name: &str| -> Result<f64> {
        table
            .keyword(name)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .ok_or_else(|| CorrectionError::malformed(source_name, format!("missing or invalid {}", name)))
    };
    let band_idx: Vec<usize> = table
        .fields
        .iter()
        .enumerate()
        .filter(|(_, name)| name.starts_with("SPEC_"))
        .map(|(i, _)| i)
        .collect();
    let bands = number("SPECTRAL_BANDS")? as usize;
    if bands != band_idx.len() {
        return Err(CorrectionError::malformed(
            source_name,
            format!("SPECTRAL_BANDS is {} but {} spectral columns", bands, band_idx.len()),
        ));
    }
    let range = SpectralRange {
        start_nm: number("SPECTRAL_START_NM")?,
        end_nm: number("SPECTRAL_END_NM")?,
        bands,
    };
    let id_idx = table.field_index("SAMPLE_ID");

    let samples = table
        .rows
        .iter()
        .enumerate()
        .map(|(row_no, row)| {
            let sample_id = match id_idx {
                Some(i) => row[i].parse::<u32>().map_err(|_| {
                    CorrectionError::malformed(source_name, format!("invalid SAMPLE_ID '{}'", row[i]))
                })?,
                None => row_no as u32 + 1,
            };
            let values = band_idx
                .iter()
                .map(|&i| {
                    row[i].parse::<f64>().map_err(|_| {
                        CorrectionError::malformed(source_name, format!("invalid spectral value '{}'", row[i]))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(SpectralSample { sample_id, values })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SpectralSamples {
        range,
        fields: band_idx.iter().map(|&i| table.fields[i].clone()).collect(),
        norm: table.keyword("SPECTRAL_NORM").and_then(|v| v.trim().parse().ok()),
        samples,
    })
}
