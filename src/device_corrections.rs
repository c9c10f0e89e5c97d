//! iColorDisplay `DeviceCorrections.txt` import
//!
//! Quato iColorDisplay keeps its colorimeter matrices in one text file of
//! brace-delimited entries:
//!
//! ```text
//! "Spyder3 for CG241W" =
//! {
//!     Name = "Spyder3 for CG241W"
//!     Device = "Spyder3"
//!     Display = "CG241W"
//!     ReferenceDevice = "eye-one Pro Rev.D"
//!     MatrixXYZ = "3 3 1482250784 1.0 0.0 0.0 0.0 1.0 0.0 0.0 0.0 1.0 "
//! }
//! ```
//!
//! Each complete entry becomes a matrix [`CorrectionArtifact`]. The first
//! three numbers of `MatrixXYZ` are a dimension/tag prefix and are ignored.

use nalgebra::Matrix3;
use tracing::{debug, info};

use crate::artifact::{ArtifactMetadata, CorrectionArtifact, Provenance};
use crate::error::{CorrectionError, Result};
use crate::fit::{CorrectionBody, FitMethod};
use crate::measurement::cgats::single_line;
use crate::util::now_created_string;

/// `ORIGINATOR` of imported corrections
pub const ICOLORDISPLAY_ORIGINATOR: &str = "Quato iColorDisplay";

/// Numbers preceding the nine matrix coefficients in `MatrixXYZ`
const MATRIX_PREFIX_LEN: usize = 3;

/// Result of importing a `DeviceCorrections.txt`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceCorrectionImport {
    pub artifacts: Vec<CorrectionArtifact>,
    /// Entries lacking `Device`, `Display`, `ReferenceDevice` or `MatrixXYZ`
    pub skipped: usize,
}

#[derive(Debug, Default)]
struct Entry {
    name: String,
    fields: Vec<(String, String)>,
}

impl Entry {
    fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Convert iColorDisplay device corrections into CCMX artifacts
///
/// # Arguments
///
/// * `text` - Contents of `DeviceCorrections.txt`
/// * `source_name` - Name used in error messages
///
/// # Errors
///
/// Returns `MalformedInput` for unbalanced braces, a field line outside an
/// entry, or a `MatrixXYZ` value without nine numeric coefficients.
pub fn from_device_corrections(text: &str, source_name: &str) -> Result<DeviceCorrectionImport> {
    let malformed = |line_no: usize, reason: &str| {
        CorrectionError::malformed(source_name, format!("line {}: {}", line_no + 1, reason))
    };
    let mut entries = Vec::new();
    let mut pending_name: Option<String> = None;
    let mut current: Option<Entry> = None;

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "{" => {
                if current.is_some() {
                    return Err(malformed(line_no, "nested entry"));
                }
                current = Some(Entry {
                    name: pending_name.take().unwrap_or_default(),
                    fields: Vec::new(),
                });
            }
            "}" => {
                let entry = current.take().ok_or_else(|| malformed(line_no, "unbalanced '}'"))?;
                entries.push(entry);
            }
            _ => {
                let (key, value) = line.split_once('=').ok_or_else(|| malformed(line_no, "expected 'key = value'"))?;
                let key = unquote(key);
                let value = unquote(value);
                match current.as_mut() {
                    Some(entry) => entry.fields.push((key, value)),
                    None if value.is_empty() => pending_name = Some(key),
                    None => return Err(malformed(line_no, "field outside an entry")),
                }
            }
        }
    }
    if current.is_some() {
        return Err(CorrectionError::malformed(source_name, "unterminated entry"));
    }

    let created = now_created_string();
    let mut import = DeviceCorrectionImport::default();
    for entry in entries {
        let (Some(device), Some(display), Some(reference), Some(matrix)) = (
            entry.field("Device"),
            entry.field("Display"),
            entry.field("ReferenceDevice"),
            entry.field("MatrixXYZ"),
        ) else {
            debug!(entry = %entry.name, "Skipping incomplete device correction");
            import.skipped += 1;
            continue;
        };
        let matrix = parse_matrix(matrix).ok_or_else(|| {
            CorrectionError::malformed(
                source_name,
                format!("entry '{}': MatrixXYZ needs nine coefficients", entry.name),
            )
        })?;
        let (device, display) = (single_line(device), single_line(display));
        import.artifacts.push(CorrectionArtifact {
            body: CorrectionBody::Matrix {
                matrix,
                method: FitMethod::General,
            },
            metadata: ArtifactMetadata {
                description: format!("{} & {}", device, display),
                originator: ICOLORDISPLAY_ORIGINATOR.to_string(),
                created: Some(created.clone()),
                instrument: Some(device),
                reference_instrument: Some(single_line(reference)),
                display: Some(display),
                display_type_base_id: Some(1),
                ..ArtifactMetadata::default()
            },
            statistics: None,
            provenance: Provenance::default(),
        });
    }

    info!(
        source = source_name,
        imported = import.artifacts.len(),
        skipped = import.skipped,
        "Imported device corrections"
    );
    Ok(import)
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

fn parse_matrix(value: &str) -> Option<Matrix3<f64>> {
    let coefficients: Vec<f64> = value
        .split_whitespace()
        .skip(MATRIX_PREFIX_LEN)
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    (coefficients.len() == 9).then(|| Matrix3::from_row_slice(&coefficients))
}
