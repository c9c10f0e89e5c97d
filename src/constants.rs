//! Colorimetric constants and engine limits
//!
//! Reference white points and cone-response matrices follow CIE 15:2004 and
//! the Lindbloom chromatic adaptation tables.

/// D65 Standard Illuminant Reference
///
/// Common reference white for display previews.
pub mod d65 {
    /// D65 white point in CIE XYZ (Y = 1)
    pub const WHITE_POINT_XYZ: [f64; 3] = [0.95047, 1.00000, 1.08883];

    /// D65 chromaticity coordinates
    pub const CHROMATICITY_X: f64 = 0.31271;
    pub const CHROMATICITY_Y: f64 = 0.32902;
}

/// D50 Standard Illuminant Reference (ICC PCS white)
pub mod d50 {
    /// D50 white point in CIE XYZ (Y = 1)
    pub const WHITE_POINT_XYZ: [f64; 3] = [0.96422, 1.00000, 0.82521];
}

/// Re-export D65 white point at top level for convenience
pub const D65_WHITE_POINT_XYZ: [f64; 3] = d65::WHITE_POINT_XYZ;

/// Cone response matrices for von Kries class chromatic adaptation
pub mod cat {
    /// Bradford cone response matrix
    pub const BRADFORD: [[f64; 3]; 3] = [
        [0.8951, 0.2664, -0.1614],
        [-0.7502, 1.7135, 0.0367],
        [0.0389, -0.0685, 1.0296],
    ];

    /// Von Kries (Hunt-Pointer-Estevez) cone response matrix
    pub const VON_KRIES: [[f64; 3]; 3] = [
        [0.40024, 0.7076, -0.08081],
        [-0.2263, 1.16532, 0.0457],
        [0.0, 0.0, 0.91822],
    ];

    /// Plain XYZ scaling
    pub const XYZ_SCALING: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
}

/// CIE L*a*b* conversion constants
pub mod lab {
    /// Actual CIE standard epsilon (216 / 24389)
    pub const EPSILON: f64 = 216.0 / 24389.0;

    /// Actual CIE standard kappa (24389 / 27)
    pub const KAPPA: f64 = 24389.0 / 27.0;
}

/// Fitting and pairing limits
pub mod fitting {
    /// Determinants below this magnitude are treated as singular
    pub const SINGULAR_DETERMINANT_EPSILON: f64 = 1e-12;

    /// Device coordinates are compared after scaling to this resolution
    pub const DEVICE_KEY_SCALE: f64 = 1e4;

    /// Full-drive channel value in percent
    pub const FULL_DRIVE: f64 = 100.0;
}

/// Artifact rendering and naming
pub mod artifact {
    /// Decimal places for fitted matrix coefficients
    pub const MATRIX_DECIMALS: usize = 10;

    /// Decimal places for embedded fit statistics
    pub const STATISTIC_DECIMALS: usize = 6;

    /// Maximum length of the derived filename stem, in UTF-8 bytes
    pub const MAX_FILENAME_STEM: usize = 120;

    /// Stem used when the descriptor sanitizes to nothing
    pub const FALLBACK_FILENAME_STEM: &str = "correction";

    /// Characters that are reserved on common filesystems
    pub const RESERVED_FILENAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

    /// File extension for matrix corrections
    pub const CCMX_EXTENSION: &str = "ccmx";

    /// File extension for spectral corrections
    pub const CCSS_EXTENSION: &str = "ccss";
}

/// External kernel and repository defaults
pub mod external {
    use std::time::Duration;

    /// Argyll utility that builds corrections from paired measurements
    pub const GENERAL_FIT_PROGRAM: &str = "ccxxmake";

    /// Argyll utility that recomputes XYZ from spectral data
    pub const REOBSERVE_PROGRAM: &str = "spec2cie";

    /// Interval at which running kernels are polled for completion or cancellation
    pub const KERNEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Public colorimeter correction repository
    pub const REPOSITORY_URL: &str = "https://colorimetercorrections.displaycal.net/";

    /// Repository round trip timeout in seconds
    pub const REPOSITORY_TIMEOUT_SECS: u64 = 10;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_white_point_constants() {
        assert!((d65::WHITE_POINT_XYZ[1] - 1.0).abs() < 1e-12);
        assert!((d50::WHITE_POINT_XYZ[1] - 1.0).abs() < 1e-12);

        let sum: f64 = d65::WHITE_POINT_XYZ.iter().sum();
        assert!((d65::WHITE_POINT_XYZ[0] / sum - d65::CHROMATICITY_X).abs() < 1e-4);
        assert!((d65::WHITE_POINT_XYZ[1] / sum - d65::CHROMATICITY_Y).abs() < 1e-4);
    }

    #[test]
    fn test_lab_constants() {
        // Continuity of the L* function at the knee
        let lhs = lab::KAPPA * lab::EPSILON;
        let rhs = 116.0 * lab::EPSILON.cbrt() - 16.0;
        assert!((lhs - rhs).abs() < 1e-9);
    }
}
