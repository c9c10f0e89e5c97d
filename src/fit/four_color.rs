//! Four-color matrix method
//!
//! Closed-form colorimeter correction from white, red, green and blue
//! readings (Ohno & Hardis, IS&T Color Imaging Conference 1997/1998).
//!
//! For each instrument the chromaticity columns of the three primaries form
//! `M`; solving `M·k = w` for the white chromaticity gives the per-primary
//! weights, and `N = M·diag(k)` maps normalized primary amounts to
//! chromaticity. The correction is `R = N_ref·N_col⁻¹`, optionally scaled so
//! the corrected colorimeter white matches the reference white luminance.

use nalgebra::Matrix3;
use tracing::debug;

use crate::color::Xyz;
use crate::constants::fitting::SINGULAR_DETERMINANT_EPSILON;
use crate::error::FitError;

/// Readings of one instrument in white, red, green, blue order
pub type FourColorReadings = [Xyz; 4];

/// Solve the four-color correction matrix
///
/// # Arguments
///
/// * `reference` - Reference instrument readings (white, red, green, blue)
/// * `colorimeter` - Colorimeter readings of the same patches
/// * `y_correction` - Scale so corrected white Y equals reference white Y
///
/// # Errors
///
/// Returns `FitError::Singular` when a primary has no chromaticity, the
/// primaries are collinear, or the corrected white has no luminance.
pub fn four_color_matrix(
    reference: &FourColorReadings,
    colorimeter: &FourColorReadings,
    y_correction: bool,
) -> Result<Matrix3<f64>, FitError> {
    let n_ref = primaries_matrix(reference)?;
    let n_col = primaries_matrix(colorimeter)?;
    let n_col_inv = invert(&n_col)?;
    let mut correction = n_ref * n_col_inv;

    if y_correction {
        let corrected_white = colorimeter[0].transformed(&correction);
        if corrected_white.y.abs() < SINGULAR_DETERMINANT_EPSILON {
            return Err(FitError::Singular {
                determinant: corrected_white.y,
            });
        }
        let k_y = reference[0].y / corrected_white.y;
        correction *= k_y;
        debug!(k_y, "Applied luminance correction factor");
    }

    Ok(correction)
}

/// `N = M·diag(M⁻¹·w)` from chromaticity columns
fn primaries_matrix(readings: &FourColorReadings) -> Result<Matrix3<f64>, FitError> {
    let [white, red, green, blue] = readings.map(|xyz| xyz.chromaticity_column());
    let (Some(white), Some(red), Some(green), Some(blue)) = (white, red, green, blue) else {
        return Err(FitError::Singular { determinant: 0.0 });
    };
    let m = Matrix3::from_columns(&[red, green, blue]);
    let k = invert(&m)? * white;
    let n = m * Matrix3::from_diagonal(&k);
    let determinant = n.determinant();
    if determinant.abs() < SINGULAR_DETERMINANT_EPSILON {
        return Err(FitError::Singular { determinant });
    }
    Ok(n)
}

fn invert(m: &Matrix3<f64>) -> Result<Matrix3<f64>, FitError> {
    let determinant = m.determinant();
    if determinant.abs() < SINGULAR_DETERMINANT_EPSILON || !determinant.is_finite() {
        return Err(FitError::Singular { determinant });
    }
    m.try_inverse().ok_or(FitError::Singular { determinant })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn srgb_primaries() -> FourColorReadings {
        [
            Xyz::new(95.05, 100.0, 108.9),
            Xyz::new(41.24, 21.26, 1.93),
            Xyz::new(35.76, 71.52, 11.92),
            Xyz::new(18.05, 7.22, 95.05),
        ]
    }

    #[test]
    fn test_identical_readings_give_identity() {
        let readings = srgb_primaries();
        let m = four_color_matrix(&readings, &readings, true).unwrap();
        assert_relative_eq!(m, Matrix3::identity(), epsilon = 1e-9);
    }

    #[test]
    fn test_luminance_scale_only() {
        let reference = srgb_primaries();
        let colorimeter = reference.map(|xyz| xyz.scaled(0.8));
        let m = four_color_matrix(&reference, &colorimeter, true).unwrap();
        assert_relative_eq!(m, Matrix3::identity() * 1.25, epsilon = 1e-9);

        // Without Y correction chromaticity-only solve ignores luminance
        let unscaled = four_color_matrix(&reference, &colorimeter, false).unwrap();
        let corrected = colorimeter[0].transformed(&unscaled);
        let (x, y) = corrected.chromaticity().unwrap();
        let (rx, ry) = reference[0].chromaticity().unwrap();
        assert_relative_eq!(x, rx, epsilon = 1e-9);
        assert_relative_eq!(y, ry, epsilon = 1e-9);
    }

    #[test]
    fn test_recovers_known_distortion() {
        let reference = srgb_primaries();
        let distortion = Matrix3::new(1.02, 0.03, -0.01, 0.01, 0.97, 0.02, -0.02, 0.04, 1.05);
        let colorimeter = reference.map(|xyz| xyz.transformed(&distortion));
        let m = four_color_matrix(&reference, &colorimeter, true).unwrap();

        for (r, c) in reference.iter().zip(colorimeter.iter()) {
            let corrected = c.transformed(&m);
            let (x, y) = corrected.chromaticity().unwrap();
            let (rx, ry) = r.chromaticity().unwrap();
            assert_relative_eq!(x, rx, epsilon = 1e-9);
            assert_relative_eq!(y, ry, epsilon = 1e-9);
        }
        assert_relative_eq!(colorimeter[0].transformed(&m).y, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_collinear_primaries_are_singular() {
        let mut readings = srgb_primaries();
        readings[3] = Xyz::new(41.24, 21.26, 1.93);
        let err = four_color_matrix(&readings, &srgb_primaries(), true).unwrap_err();
        assert!(matches!(err, FitError::Singular { .. }));
    }

    #[test]
    fn test_black_primary_is_singular() {
        let mut readings = srgb_primaries();
        readings[1] = Xyz::new(0.0, 0.0, 0.0);
        assert!(four_color_matrix(&srgb_primaries(), &readings, true).is_err());
    }
}
