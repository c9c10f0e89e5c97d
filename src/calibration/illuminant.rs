//! Reference whites and chromatic adaptation
//!
//! Implements von Kries class chromatic adaptation transforms for moving
//! absolute display measurements onto a common reference white before
//! Lab or RGB previews are computed.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::color::Xyz;
use crate::constants::{cat, d50, d65};
use crate::error::{CorrectionError, Result};

/// Illuminant characteristics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Illuminant {
    /// Chromaticity coordinates (x, y)
    pub chromaticity: (f64, f64),
    /// XYZ white point values
    pub white_point: Xyz,
}

impl Illuminant {
    /// D65 standard illuminant (Y = 1)
    pub fn d65() -> Self {
        Self {
            chromaticity: (d65::CHROMATICITY_X, d65::CHROMATICITY_Y),
            white_point: Xyz::from_array(d65::WHITE_POINT_XYZ),
        }
    }

    /// D50 standard illuminant (Y = 1)
    pub fn d50() -> Self {
        let white_point = Xyz::from_array(d50::WHITE_POINT_XYZ);
        Self {
            chromaticity: white_point.chromaticity().unwrap_or((0.3457, 0.3585)),
            white_point,
        }
    }

    /// Illuminant described by a measured white
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a black or non-finite white.
    pub fn from_measured(white: Xyz) -> Result<Self> {
        match white.chromaticity() {
            Some(chromaticity) if white.is_finite() && white.y > 0.0 => Ok(Self {
                chromaticity,
                white_point: white,
            }),
            _ => Err(CorrectionError::InvalidParameter {
                parameter: "white_point".to_string(),
                value: format!("{:?}", white.to_array()),
            }),
        }
    }

    /// White point with luminance normalized to `y`
    pub fn white_at(&self, y: f64) -> Xyz {
        self.white_point.scaled(y / self.white_point.y)
    }
}

/// Cone response space used for adaptation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationMethod {
    /// Bradford cone response (default)
    #[default]
    Bradford,
    /// Hunt-Pointer-Estevez cone response
    VonKries,
    /// Scaling directly in XYZ
    XyzScaling,
}

impl AdaptationMethod {
    fn cone_matrix(self) -> Matrix3<f64> {
        let m = match self {
            AdaptationMethod::Bradford => cat::BRADFORD,
            AdaptationMethod::VonKries => cat::VON_KRIES,
            AdaptationMethod::XyzScaling => cat::XYZ_SCALING,
        };
        Matrix3::from_fn(|r, c| m[r][c])
    }
}

/// Chromatic adaptation between two white points
#[derive(Debug, Clone, Copy)]
pub struct ChromaticAdaptation {
    matrix: Matrix3<f64>,
}

impl ChromaticAdaptation {
    /// Build the adaptation from `source` white to `destination` white
    ///
    /// Both whites are brought to the same luminance first, so an absolute
    /// display white (cd/m²) can be adapted onto a Y = 1 standard white
    /// without changing the sample's luminance scale.
    pub fn new(source: Xyz, destination: Xyz, method: AdaptationMethod) -> Result<Self> {
        let cone = method.cone_matrix();
        let cone_inv = cone.try_inverse().ok_or_else(|| CorrectionError::InvalidParameter {
            parameter: "adaptation_method".to_string(),
            value: format!("{:?}", method),
        })?;
        if source.y <= 0.0 || destination.y <= 0.0 {
            return Err(CorrectionError::InvalidParameter {
                parameter: "white_point".to_string(),
                value: format!("{:?} -> {:?}", source.to_array(), destination.to_array()),
            });
        }
        let destination = destination.scaled(source.y / destination.y);

        let lms_src = cone * source.to_vector();
        let lms_dst = cone * destination.to_vector();
        if lms_src.iter().any(|v| v.abs() <= f64::EPSILON) {
            return Err(CorrectionError::InvalidParameter {
                parameter: "white_point".to_string(),
                value: format!("{:?}", source.to_array()),
            });
        }
        let scale = Matrix3::from_diagonal(&lms_dst.component_div(&lms_src));
        Ok(Self {
            matrix: cone_inv * scale * cone,
        })
    }

    /// Adaptation onto D65
    pub fn to_d65(source: Xyz, method: AdaptationMethod) -> Result<Self> {
        Self::new(source, Illuminant::d65().white_point, method)
    }

    /// Transform XYZ under the source white to XYZ under the destination white
    pub fn apply(&self, xyz: Xyz) -> Xyz {
        xyz.transformed(&self.matrix)
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }
}
