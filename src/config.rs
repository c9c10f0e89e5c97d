//! Configuration structures for correction fitting jobs.
//!
//! Every component entry point receives its settings from a [`FitJobConfig`]
//! passed by value; nothing reads global state.
//!
//! # Configuration Loading
//!
//! Configuration can be loaded from JSON files or constructed programmatically:
//!
//! ```no_run
//! use colorimeter_correction::FitJobConfig;
//! use std::path::Path;
//!
//! // Load from file
//! let config = FitJobConfig::from_json_file(Path::new("fit.json"))?;
//!
//! // Or use defaults
//! let config = FitJobConfig::default();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Configuration Sections
//!
//! - [`FitJobConfig`]: correction type, method, observers and artifact metadata
//! - [`KernelConfig`]: locations of the Argyll utilities
//! - [`RepositoryConfig`]: shared correction repository access

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::artifact::Technology;
use crate::constants::external::{
    GENERAL_FIT_PROGRAM, REOBSERVE_PROGRAM, REPOSITORY_TIMEOUT_SECS, REPOSITORY_URL,
};
use crate::error::{CorrectionError, Result};
use crate::fit::FitMethod;
use crate::measurement::Observer;
use crate::pairing::CorrectionKind;

/// What to do when the derived output file already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    /// Ask the confirmation gate
    #[default]
    Ask,
    Always,
    Never,
}

/// Complete configuration of one correction fitting job.
///
/// Can be serialized to/from JSON for reproducible fits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitJobConfig {
    /// Matrix (CCMX) or spectral (CCSS) correction
    pub kind: CorrectionKind,

    /// Matrix fit method
    pub method: FitMethod,

    /// Scale the four-color matrix to match the reference white luminance
    pub y_correction: bool,

    /// Observer the colorimeter is used with
    pub observer: Observer,

    /// Observer for the reference readings; spectral sets are re-observed
    /// when it differs from the recorded one
    pub reference_observer: Observer,

    /// Free-text descriptor; derived from instrument and display if absent
    pub description: Option<String>,

    /// `ORIGINATOR` override
    pub originator: Option<String>,

    /// Display model name
    pub display: Option<String>,

    pub manufacturer: Option<String>,

    /// Three-letter PNP manufacturer id
    pub manufacturer_id: Option<String>,

    pub technology: Technology,

    /// Directory receiving the artifact
    pub output_dir: PathBuf,

    pub overwrite: OverwritePolicy,

    /// External utility locations
    pub kernel: KernelConfig,

    /// Shared repository access
    pub repository: RepositoryConfig,
}

/// Locations of the external numeric kernels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Directory holding the Argyll executables; `PATH` lookup if absent
    pub argyll_dir: Option<PathBuf>,

    /// General matrix fit utility
    pub ccxxmake: PathBuf,

    /// Spectral-to-CIE re-observation utility
    pub spec2cie: PathBuf,
}

/// Correction repository parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Query and upload after writing the artifact
    pub enabled: bool,

    pub base_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    pub user_agent: String,
}

impl Default for FitJobConfig {
    fn default() -> Self {
        Self {
            kind: CorrectionKind::Matrix,
            method: FitMethod::General,
            y_correction: true,
            observer: Observer::default(),
            reference_observer: Observer::default(),
            description: None,
            originator: None,
            display: None,
            manufacturer: None,
            manufacturer_id: None,
            technology: Technology::Unknown,
            output_dir: PathBuf::from("."),
            overwrite: OverwritePolicy::Ask,
            kernel: KernelConfig::default(),
            repository: RepositoryConfig::default(),
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            argyll_dir: None,
            ccxxmake: PathBuf::from(GENERAL_FIT_PROGRAM),
            spec2cie: PathBuf::from(REOBSERVE_PROGRAM),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: REPOSITORY_URL.to_string(),
            timeout_secs: REPOSITORY_TIMEOUT_SECS,
            user_agent: concat!("colorimeter-correction/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl KernelConfig {
    /// Resolve a program path against `argyll_dir`
    ///
    /// Absolute paths and configurations without an Argyll directory are
    /// returned unchanged.
    pub fn resolve(&self, program: &Path) -> PathBuf {
        match &self.argyll_dir {
            Some(dir) if program.is_relative() => dir.join(program),
            _ => program.to_path_buf(),
        }
    }

    pub fn ccxxmake_path(&self) -> PathBuf {
        self.resolve(&self.ccxxmake)
    }

    pub fn spec2cie_path(&self) -> PathBuf {
        self.resolve(&self.spec2cie)
    }
}

impl FitJobConfig {
    /// Check parameter ranges
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a zero repository timeout, an empty repository
    /// URL while the repository is enabled, or a manufacturer id that is not
    /// three ASCII letters.
    pub fn validate(&self) -> Result<()> {
        if self.repository.enabled {
            if self.repository.timeout_secs == 0 {
                return Err(invalid("repository.timeout_secs", "0"));
            }
            if self.repository.base_url.trim().is_empty() {
                return Err(invalid("repository.base_url", ""));
            }
        }
        if let Some(id) = &self.manufacturer_id {
            if id.len() != 3 || !id.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(invalid("manufacturer_id", id));
            }
        }
        if self.kernel.ccxxmake.as_os_str().is_empty() {
            return Err(invalid("kernel.ccxxmake", ""));
        }
        if self.kernel.spec2cie.as_os_str().is_empty() {
            return Err(invalid("kernel.spec2cie", ""));
        }
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json_file(path: &Path) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn invalid(parameter: &str, value: &str) -> CorrectionError {
    CorrectionError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
    }
}
