//! Error types for the colorimeter_correction library

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for colorimeter_correction operations
pub type Result<T> = std::result::Result<T, CorrectionError>;

/// Role a measurement set plays in a matrix fit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetRole {
    /// Spectrally accurate reference instrument
    Reference,
    /// Tri-stimulus colorimeter being corrected
    Colorimeter,
}

impl std::fmt::Display for SetRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetRole::Reference => f.write_str("reference"),
            SetRole::Colorimeter => f.write_str("colorimeter"),
        }
    }
}

/// Failures while aligning reference and colorimeter patches
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PairingError {
    /// One of the canonical white/red/green/blue device coordinates is absent
    #[error("Patch '{patch}' is missing from {filename}")]
    MissingPatch { patch: String, filename: String },

    /// More than one input qualifies for the same role
    #[error("Ambiguous {role} role: {} candidate measurement sets ({})", .candidates.len(), .candidates.join(", "))]
    AmbiguousRole { role: SetRole, candidates: Vec<String> },

    /// No input qualifies for a required role
    #[error("No {role} measurement set supplied")]
    MissingRole { role: SetRole },

    /// A paired patch carries no XYZ reading
    #[error("Patch '{patch}' in {filename} has no XYZ values")]
    MissingXyz { patch: String, filename: String },
}

/// Failures while computing the correction body
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// The linear system has no unique solution
    #[error("Singular system (determinant {determinant:e})")]
    Singular { determinant: f64 },

    /// The delegated numeric kernel failed or produced no output
    #[error("Correction kernel failed: {diagnostics}")]
    KernelFailed { diagnostics: String },
}

/// Comprehensive error types for correction fitting jobs
#[derive(Error, Debug)]
pub enum CorrectionError {
    /// Source file is unparsable or lacks required fields
    #[error("Malformed input {source_name}: {reason}")]
    MalformedInput { source_name: String, reason: String },

    /// Reference and colorimeter data could not be paired
    #[error(transparent)]
    Pairing(#[from] PairingError),

    /// Correction could not be fitted
    #[error(transparent)]
    Fit(#[from] FitError),

    /// Correction repository could not be reached
    #[error("Correction repository unavailable: {reason}")]
    NetworkUnavailable { reason: String },

    /// Destination is not writable
    #[error("Cannot write {}", .path.display())]
    WriteDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Operator declined to replace an existing artifact
    #[error("Not overwriting existing file {}", .path.display())]
    OverwriteDeclined { path: PathBuf },

    /// Job was cancelled by the operator
    #[error("Operation cancelled")]
    Cancelled,

    /// A fitting job is already running
    #[error("Another correction job is already in progress")]
    Busy,

    /// Invalid input parameters
    #[error("Invalid parameter: {parameter} = {value}")]
    InvalidParameter { parameter: String, value: String },

    /// Filesystem error outside the output location
    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl CorrectionError {
    /// Create a malformed input error for a named source
    pub fn malformed(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Create an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a kernel failure carrying diagnostics
    pub fn kernel(diagnostics: impl Into<String>) -> Self {
        Self::Fit(FitError::KernelFailed {
            diagnostics: diagnostics.into(),
        })
    }

    /// Check if this error indicates a recoverable condition
    ///
    /// Only the repository step may degrade without failing the job.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CorrectionError::NetworkUnavailable { .. })
    }

    /// Get user-friendly error description for operator display
    pub fn user_message(&self) -> String {
        match self {
            CorrectionError::MalformedInput { source_name, reason } => {
                format!("The measurement file {} could not be used: {}.", source_name, reason)
            }
            CorrectionError::Pairing(PairingError::MissingPatch { patch, filename }) => {
                format!(
                    "The {} patch was not measured in {}. Both files must contain white, red, green and blue.",
                    patch, filename
                )
            }
            CorrectionError::Pairing(PairingError::AmbiguousRole { role, .. }) => {
                format!("More than one {} measurement was supplied. Please select exactly one.", role)
            }
            CorrectionError::Fit(FitError::Singular { .. }) => {
                "The measurements do not define a usable correction (the primaries are degenerate).".to_string()
            }
            CorrectionError::Fit(FitError::KernelFailed { diagnostics }) => {
                format!("The correction tool reported an error:\n{}", diagnostics)
            }
            CorrectionError::WriteDenied { path, .. } => {
                format!("Cannot write to {}. Please choose another location.", path.display())
            }
            CorrectionError::Cancelled => "The operation was cancelled.".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_errors_are_recoverable() {
        let network = CorrectionError::NetworkUnavailable {
            reason: "timeout".into(),
        };
        assert!(network.is_recoverable());

        let singular = CorrectionError::from(FitError::Singular { determinant: 0.0 });
        assert!(!singular.is_recoverable());
        assert!(!CorrectionError::Cancelled.is_recoverable());
    }

    #[test]
    fn test_missing_patch_message_names_patch_and_file() {
        let err = CorrectionError::from(PairingError::MissingPatch {
            patch: "green".into(),
            filename: "colorimeter.ti3".into(),
        });
        let text = err.to_string();
        assert!(text.contains("green"));
        assert!(text.contains("colorimeter.ti3"));
        assert!(err.user_message().contains("colorimeter.ti3"));
    }

    #[test]
    fn test_ambiguous_role_lists_candidates() {
        let err = PairingError::AmbiguousRole {
            role: SetRole::Reference,
            candidates: vec!["a.ti3".into(), "b.ti3".into()],
        };
        let text = err.to_string();
        assert!(text.contains("reference"));
        assert!(text.contains("a.ti3, b.ti3"));
    }
}
