//! CGATS keyword/table text codec
//!
//! Reads and writes the plain-text tabular format shared by measurement
//! files (`CTI3`) and correction artifacts (`CCMX`, `CCSS`):
//!
//! ```text
//! CTI3
//!
//! KEYWORD "LUMINANCE_XYZ_CDM2"
//! LUMINANCE_XYZ_CDM2 "114.1 120.0 125.3"
//!
//! NUMBER_OF_FIELDS 7
//! BEGIN_DATA_FORMAT
//! SAMPLE_ID RGB_R RGB_G RGB_B XYZ_X XYZ_Y XYZ_Z
//! END_DATA_FORMAT
//!
//! NUMBER_OF_SETS 1
//! BEGIN_DATA
//! 1 100.0 100.0 100.0 95.05 100.0 108.9
//! END_DATA
//! ```
//!
//! Only the first table of a file is read. Values are kept as text; typed
//! interpretation belongs to the callers.

use crate::error::{CorrectionError, Result};

/// Keywords defined by the CGATS standard that need no `KEYWORD` declaration
const STANDARD_KEYWORDS: &[&str] = &[
    "ORIGINATOR",
    "DESCRIPTOR",
    "CREATED",
    "MANUFACTURER",
    "PROD_DATE",
    "SERIAL",
    "MATERIAL",
    "INSTRUMENTATION",
    "MEASUREMENT_SOURCE",
    "PRINT_CONDITIONS",
];

/// One parsed CGATS table
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CgatsTable {
    /// File identifier on the first line (e.g. `CTI3`, `CCMX`)
    pub file_type: String,
    /// Header keywords in file order
    pub keywords: Vec<(String, String)>,
    /// DATA_FORMAT field names
    pub fields: Vec<String>,
    /// DATA rows, one value per field
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Header,
    DataFormat,
    Data,
}

impl CgatsTable {
    /// Create an empty table of the given type
    pub fn new(file_type: impl Into<String>) -> Self {
        Self {
            file_type: file_type.into(),
            ..Self::default()
        }
    }

    /// Parse the first table in `text`
    ///
    /// # Arguments
    ///
    /// * `text` - Raw CGATS text
    /// * `source_name` - Name used in error messages
    ///
    /// # Errors
    ///
    /// Returns `MalformedInput` if the identifier, DATA_FORMAT or DATA
    /// section is missing, a row does not match the field count, or the
    /// declared NUMBER_OF_SETS disagrees with the data.
    pub fn parse(text: &str, source_name: &str) -> Result<Self> {
        let mut table = CgatsTable::default();
        let mut section = Section::Header;
        let mut saw_format = false;
        let mut saw_data = false;
        let mut data_closed = false;
        let mut declared_sets: Option<usize> = None;
        let mut pending: Vec<String> = Vec::new();

        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if table.file_type.is_empty() {
                table.file_type = line.split_whitespace().next().unwrap_or_default().to_string();
                continue;
            }

            match section {
                Section::Header => {
                    let tokens = tokenize(line).map_err(|reason| {
                        CorrectionError::malformed(source_name, format!("line {}: {}", line_no + 1, reason))
                    })?;
                    let Some((key, rest)) = tokens.split_first() else {
                        continue;
                    };
                    match key.as_str() {
                        "BEGIN_DATA_FORMAT" => {
                            section = Section::DataFormat;
                            saw_format = true;
                        }
                        "BEGIN_DATA" => {
                            if !saw_format {
                                return Err(CorrectionError::malformed(
                                    source_name,
                                    "BEGIN_DATA before DATA_FORMAT",
                                ));
                            }
                            section = Section::Data;
                            saw_data = true;
                        }
                        "KEYWORD" | "NUMBER_OF_FIELDS" => {}
                        "NUMBER_OF_SETS" => {
                            declared_sets = rest.first().and_then(|v| v.parse().ok());
                        }
                        _ => {
                            let value = rest.join(" ");
                            table.keywords.push((key.clone(), value));
                        }
                    }
                }
                Section::DataFormat => {
                    if line.starts_with("END_DATA_FORMAT") {
                        section = Section::Header;
                    } else {
                        table.fields.extend(line.split_whitespace().map(str::to_string));
                    }
                }
                Section::Data => {
                    if line.starts_with("END_DATA") {
                        data_closed = true;
                        break;
                    }
                    let tokens = tokenize(line).map_err(|reason| {
                        CorrectionError::malformed(source_name, format!("line {}: {}", line_no + 1, reason))
                    })?;
                    pending.extend(tokens);
                    while pending.len() >= table.fields.len() && !table.fields.is_empty() {
                        let rest = pending.split_off(table.fields.len());
                        table.rows.push(std::mem::replace(&mut pending, rest));
                    }
                }
            }
        }

        if table.file_type.is_empty() {
            return Err(CorrectionError::malformed(source_name, "empty file"));
        }
        if !saw_data {
            return Err(CorrectionError::malformed(source_name, "no DATA section"));
        }
        if !data_closed {
            return Err(CorrectionError::malformed(source_name, "unterminated DATA section"));
        }
        if table.fields.is_empty() {
            return Err(CorrectionError::malformed(source_name, "empty DATA_FORMAT"));
        }
        if !pending.is_empty() {
            return Err(CorrectionError::malformed(
                source_name,
                format!("incomplete DATA row ({} values left over)", pending.len()),
            ));
        }
        if let Some(expected) = declared_sets {
            if expected != table.rows.len() {
                return Err(CorrectionError::malformed(
                    source_name,
                    format!("NUMBER_OF_SETS is {} but DATA has {} rows", expected, table.rows.len()),
                ));
            }
        }

        Ok(table)
    }

    /// First value of a header keyword
    pub fn keyword(&self, name: &str) -> Option<&str> {
        self.keywords
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Append a header keyword
    pub fn push_keyword(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.keywords.push((name.into(), value.into()));
    }

    /// Column index of a field
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field == name)
    }

    /// Render the table as CGATS text
    ///
    /// Keyword order is the insertion order, so identical tables always
    /// render to identical bytes.
    pub fn to_text(&self) -> String {
        let mut out = Vec::new();
        out.push(format!("{:<7}", self.file_type));
        out.push(String::new());

        for (key, value) in &self.keywords {
            if !STANDARD_KEYWORDS.contains(&key.as_str()) {
                out.push(format!("KEYWORD \"{}\"", key));
            }
            out.push(format!("{} \"{}\"", key, single_line(value).replace('"', "\"\"")));
        }
        out.push(String::new());

        out.push(format!("NUMBER_OF_FIELDS {}", self.fields.len()));
        out.push("BEGIN_DATA_FORMAT".to_string());
        out.push(self.fields.join(" "));
        out.push("END_DATA_FORMAT".to_string());
        out.push(String::new());

        out.push(format!("NUMBER_OF_SETS {}", self.rows.len()));
        out.push("BEGIN_DATA".to_string());
        for row in &self.rows {
            out.push(row.join(" "));
        }
        out.push("END_DATA".to_string());
        out.push(String::new());

        out.join("\n")
    }
}

/// Keyword value with line breaks and other control characters as spaces
///
/// A quoted keyword value must stay on one line to be read back.
pub fn single_line(value: &str) -> String {
    value.chars().map(|c| if c.is_control() { ' ' } else { c }).collect()
}

/// Split a line into tokens, honoring double-quoted strings with `""` escapes
fn tokenize(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some('"') => {
                        if chars.peek() == Some(&'"') {
                            chars.next();
                            value.push('"');
                        } else {
                            break;
                        }
                    }
                    Some(other) => value.push(other),
                    None => return Err("unterminated string".to_string()),
                }
            }
            tokens.push(value);
        } else {
            let mut value = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
            tokens.push(value);
        }
    }

    Ok(tokens)
}
