//! Measurement table loading and validation
//!
//! Turns CGATS measurement text into a [`MeasurementSet`]. Input may be a
//! standalone `.ti3` file or a table embedded in a binary container such as
//! an ICC profile text tag; embedded tables are cut out first so there is a
//! single parsing path.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info, warn};

use super::cgats::CgatsTable;
use super::instrument::InstrumentProfile;
use super::{
    ColorimetricValue, DisplayType, MeasurementSet, Observer, PatchRecord, SpectralRange,
};
use crate::color::{Lab, Xyz};
use crate::error::{CorrectionError, Result};

const DEVICE_FIELDS: [&str; 3] = ["RGB_R", "RGB_G", "RGB_B"];
const XYZ_FIELDS: [&str; 3] = ["XYZ_X", "XYZ_Y", "XYZ_Z"];
const LAB_FIELDS: [&str; 3] = ["LAB_L", "LAB_A", "LAB_B"];
const SPECTRAL_PREFIX: &str = "SPEC_";

/// Color representations accepted on the device side
const SUPPORTED_DEVICE_REPS: &[&str] = &["RGB", "iRGB"];

/// Loader for measurement tables
#[derive(Debug, Clone)]
pub struct MeasurementSetLoader {
    /// Warn about patches whose Y exceeds the white by more than this factor
    luminance_tolerance: f64,
}

impl Default for MeasurementSetLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasurementSetLoader {
    pub fn new() -> Self {
        Self {
            luminance_tolerance: 1.05,
        }
    }

    /// Load a measurement file from disk
    ///
    /// # Errors
    ///
    /// Returns `MalformedInput` when the file cannot be read or does not
    /// contain a usable measurement table.
    pub fn load_path(&self, path: &Path) -> Result<MeasurementSet> {
        let source_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let bytes = std::fs::read(path)
            .map_err(|e| CorrectionError::malformed(&source_name, format!("cannot read file: {}", e)))?;
        self.load_bytes(&bytes, &source_name)
    }

    /// Load from raw bytes, extracting an embedded table when needed
    pub fn load_bytes(&self, bytes: &[u8], source_name: &str) -> Result<MeasurementSet> {
        match std::str::from_utf8(bytes) {
            Ok(text) if is_standalone_table(text) => self.load_text(text, source_name),
            _ => {
                let text = extract_embedded_table(bytes).ok_or_else(|| {
                    CorrectionError::malformed(source_name, "no measurement table found")
                })?;
                debug!(source = source_name, bytes = text.len(), "Extracted embedded measurement table");
                self.load_text(&text, source_name)
            }
        }
    }

    /// Parse and validate measurement table text
    ///
    /// # Arguments
    ///
    /// * `text` - Raw table text; kept verbatim for the content digest
    /// * `source_name` - Filename recorded in the set and in error messages
    ///
    /// # Errors
    ///
    /// Returns `MalformedInput` when the table has no DATA section, lacks
    /// device or colorimetric columns, uses a non-RGB device representation,
    /// repeats a sample id, or carries unparsable numbers or keywords.
    pub fn load_text(&self, text: &str, source_name: &str) -> Result<MeasurementSet> {
        let table = CgatsTable::parse(text, source_name)?;
        let mut set = MeasurementSet::new(source_name, text);

        check_color_rep(&table, source_name)?;
        let device_idx = column_triplet(&table, &DEVICE_FIELDS, source_name)?.ok_or_else(|| {
            CorrectionError::malformed(source_name, "missing RGB_R/RGB_G/RGB_B columns")
        })?;
        let xyz_idx = column_triplet(&table, &XYZ_FIELDS, source_name)?;
        let lab_idx = column_triplet(&table, &LAB_FIELDS, source_name)?;
        let spectral: Vec<(usize, &String)> = table
            .fields
            .iter()
            .enumerate()
            .filter(|(_, name)| name.starts_with(SPECTRAL_PREFIX))
            .collect();
        if xyz_idx.is_none() && spectral.is_empty() {
            return Err(CorrectionError::malformed(
                source_name,
                "no XYZ or spectral columns",
            ));
        }

        set.is_spectral = !spectral.is_empty();
        set.spectral_fields = spectral.iter().map(|(_, name)| (*name).clone()).collect();
        if set.is_spectral {
            set.spectral_range = Some(spectral_range(&table, &set.spectral_fields, source_name)?);
            set.spectral_norm = optional_number(&table, "SPECTRAL_NORM", source_name)?;
        }
        read_header(&table, &mut set, source_name)?;

        let sample_idx = table.field_index("SAMPLE_ID");
        let mut seen = HashSet::new();
        for (row_no, row) in table.rows.iter().enumerate() {
            let sample_id = match sample_idx {
                Some(idx) => row[idx].parse::<u32>().map_err(|_| {
                    CorrectionError::malformed(
                        source_name,
                        format!("row {}: invalid SAMPLE_ID '{}'", row_no + 1, row[idx]),
                    )
                })?,
                None => row_no as u32 + 1,
            };
            if !seen.insert(sample_id) {
                return Err(CorrectionError::malformed(
                    source_name,
                    format!("duplicate SAMPLE_ID {}", sample_id),
                ));
            }

            let device = triplet(row, device_idx, row_no, &table, source_name)?;
            let xyz = xyz_idx
                .map(|idx| triplet(row, idx, row_no, &table, source_name).map(Xyz::from_array))
                .transpose()?;
            let lab = lab_idx
                .map(|idx| {
                    triplet(row, idx, row_no, &table, source_name).map(|v| Lab::new(v[0], v[1], v[2]))
                })
                .transpose()?;
            let value = if set.is_spectral {
                let spectrum = spectral
                    .iter()
                    .map(|(idx, _)| number(row, *idx, row_no, &table, source_name))
                    .collect::<Result<Vec<_>>>()?;
                ColorimetricValue::Spectral { spectrum, xyz }
            } else {
                // xyz_idx is present whenever there are no spectral columns
                ColorimetricValue::Xyz(xyz.unwrap_or(Xyz::new(0.0, 0.0, 0.0)))
            };

            set.patches.push(PatchRecord {
                sample_id,
                device,
                value,
                lab,
            });
        }

        if set.patches.is_empty() {
            return Err(CorrectionError::malformed(source_name, "DATA section has no patches"));
        }
        self.check_luminance(&set);

        info!(
            source = source_name,
            patches = set.patches.len(),
            spectral = set.is_spectral,
            instrument = %set.instrument,
            observer = %set.observer,
            "Loaded measurement set"
        );
        Ok(set)
    }

    fn check_luminance(&self, set: &MeasurementSet) {
        let Some(white_y) = set.white_xyz().map(|w| w.y) else {
            return;
        };
        for patch in &set.patches {
            let Some(xyz) = patch.xyz() else { continue };
            if xyz.y < 0.0 || xyz.y > white_y * self.luminance_tolerance {
                warn!(
                    source = %set.source_filename,
                    sample_id = patch.sample_id,
                    y = xyz.y,
                    white_y,
                    "Patch luminance outside the white range"
                );
            }
        }
    }
}

/// Whether `text` starts with a table identifier rather than container bytes
fn is_standalone_table(text: &str) -> bool {
    let first = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'));
    match first {
        Some(line) => {
            let ident = line.split_whitespace().next().unwrap_or_default();
            !ident.is_empty()
                && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
                && text.contains("BEGIN_DATA_FORMAT")
        }
        None => false,
    }
}

/// Cut the first CGATS table out of a binary container
///
/// The table is the printable ASCII run that contains `BEGIN_DATA_FORMAT`,
/// from its identifier line through the first `END_DATA` after `BEGIN_DATA`.
pub fn extract_embedded_table(bytes: &[u8]) -> Option<String> {
    let format_at = find(bytes, b"BEGIN_DATA_FORMAT", 0)?;

    let printable = |b: u8| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..0x7f).contains(&b);
    let mut start = format_at;
    while start > 0 && printable(bytes[start - 1]) {
        start -= 1;
    }
    // Skip leading whitespace and anything before the identifier line
    while start < format_at && bytes[start].is_ascii_whitespace() {
        start += 1;
    }

    let data_at = find(bytes, b"BEGIN_DATA\n", format_at)
        .or_else(|| find(bytes, b"BEGIN_DATA\r", format_at))?;
    let end_at = find(bytes, b"END_DATA", data_at + b"BEGIN_DATA".len())?;
    let end = end_at + b"END_DATA".len();

    let text = String::from_utf8_lossy(&bytes[start..end]).into_owned();
    Some(format!("{}\n", text))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn check_color_rep(table: &CgatsTable, source_name: &str) -> Result<()> {
    let Some(rep) = table.keyword("COLOR_REP") else {
        return Ok(());
    };
    let device = rep.split('_').next().unwrap_or_default();
    if SUPPORTED_DEVICE_REPS.contains(&device) {
        Ok(())
    } else {
        Err(CorrectionError::malformed(
            source_name,
            format!("unsupported color representation '{}'", rep),
        ))
    }
}

/// Indices of a three-column group; all or none must be present
fn column_triplet(table: &CgatsTable, names: &[&str; 3], source_name: &str) -> Result<Option<[usize; 3]>> {
    let found = names.map(|name| table.field_index(name));
    match found {
        [Some(a), Some(b), Some(c)] => Ok(Some([a, b, c])),
        [None, None, None] => Ok(None),
        _ => Err(CorrectionError::malformed(
            source_name,
            format!("incomplete column group {}", names.join("/")),
        )),
    }
}

fn number(row: &[String], idx: usize, row_no: usize, table: &CgatsTable, source_name: &str) -> Result<f64> {
    let text = &row[idx];
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            CorrectionError::malformed(
                source_name,
                format!("row {}: invalid {} value '{}'", row_no + 1, table.fields[idx], text),
            )
        })
}

fn triplet(
    row: &[String],
    idx: [usize; 3],
    row_no: usize,
    table: &CgatsTable,
    source_name: &str,
) -> Result<[f64; 3]> {
    Ok([
        number(row, idx[0], row_no, table, source_name)?,
        number(row, idx[1], row_no, table, source_name)?,
        number(row, idx[2], row_no, table, source_name)?,
    ])
}

fn optional_number(table: &CgatsTable, keyword: &str, source_name: &str) -> Result<Option<f64>> {
    table
        .keyword(keyword)
        .map(|value| {
            value.trim().parse::<f64>().map_err(|_| {
                CorrectionError::malformed(source_name, format!("invalid {} '{}'", keyword, value))
            })
        })
        .transpose()
}

fn spectral_range(table: &CgatsTable, fields: &[String], source_name: &str) -> Result<SpectralRange> {
    let wavelengths: Vec<f64> = fields
        .iter()
        .map(|name| {
            name[SPECTRAL_PREFIX.len()..].parse::<f64>().map_err(|_| {
                CorrectionError::malformed(source_name, format!("invalid spectral column '{}'", name))
            })
        })
        .collect::<Result<_>>()?;

    let bands = match optional_number(table, "SPECTRAL_BANDS", source_name)? {
        Some(bands) => bands as usize,
        None => wavelengths.len(),
    };
    if bands != wavelengths.len() {
        return Err(CorrectionError::malformed(
            source_name,
            format!("SPECTRAL_BANDS is {} but {} spectral columns", bands, wavelengths.len()),
        ));
    }
    let start_nm = optional_number(table, "SPECTRAL_START_NM", source_name)?
        .unwrap_or(wavelengths[0]);
    let end_nm = optional_number(table, "SPECTRAL_END_NM", source_name)?
        .unwrap_or(wavelengths[wavelengths.len() - 1]);

    Ok(SpectralRange {
        start_nm,
        end_nm,
        bands,
    })
}

fn read_header(table: &CgatsTable, set: &mut MeasurementSet, source_name: &str) -> Result<()> {
    if let Some(value) = table.keyword("LUMINANCE_XYZ_CDM2") {
        let parts: Vec<f64> = value
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| {
                CorrectionError::malformed(source_name, format!("invalid LUMINANCE_XYZ_CDM2 '{}'", value))
            })?;
        match parts.as_slice() {
            [x, y, z] if *y > 0.0 => set.absolute_white = Some(Xyz::new(*x, *y, *z)),
            _ => {
                return Err(CorrectionError::malformed(
                    source_name,
                    format!("invalid LUMINANCE_XYZ_CDM2 '{}'", value),
                ))
            }
        }
    }

    if let Some(name) = table
        .keyword("TARGET_INSTRUMENT")
        .or_else(|| table.keyword("INSTRUMENT"))
    {
        set.instrument = InstrumentProfile::resolve(name);
    }

    if let Some(code) = table.keyword("OBSERVER") {
        set.observer = code
            .parse::<Observer>()
            .map_err(|_| CorrectionError::malformed(source_name, format!("unknown observer '{}'", code)))?;
    }

    if let Some(value) = table.keyword("DISPLAY_TYPE_REFRESH") {
        set.display_type = Some(DisplayType::from_keyword(value).ok_or_else(|| {
            CorrectionError::malformed(source_name, format!("invalid DISPLAY_TYPE_REFRESH '{}'", value))
        })?);
    }
    if let Some(value) = table.keyword("DISPLAY_TYPE_BASE_ID") {
        set.display_type_base_id = Some(value.trim().parse::<u32>().map_err(|_| {
            CorrectionError::malformed(source_name, format!("invalid DISPLAY_TYPE_BASE_ID '{}'", value))
        })?);
    }

    Ok(())
}
