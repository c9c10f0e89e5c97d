//! Color space conversion utilities
//!
//! Provides the tristimulus and perceptual representations used by the
//! fitting engine:
//! - CIE XYZ triplets (relative or absolute cd/m²)
//! - xyY chromaticity
//! - CIE L*a*b* relative to an arbitrary measured white
//!
//! Lab conversion follows the CIE formula with the exact epsilon/kappa
//! constants. The reference white is not fixed to D50 or D65: fit quality is
//! graded against the display white actually measured by the reference
//! instrument.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::constants::{lab, D65_WHITE_POINT_XYZ};

/// CIE XYZ tristimulus value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Xyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// CIE L*a*b* value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

impl Xyz {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Build from a `[X, Y, Z]` array
    pub const fn from_array(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn to_vector(self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn from_vector(v: Vector3<f64>) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    /// Multiply every component by `factor`
    pub fn scaled(self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    /// Apply a 3×3 matrix to this value
    pub fn transformed(self, matrix: &Matrix3<f64>) -> Self {
        Self::from_vector(matrix * self.to_vector())
    }

    /// Sum of the three components
    pub fn sum(self) -> f64 {
        self.x + self.y + self.z
    }

    /// CIE 1931 xy chromaticity, `None` for a zero-sum (black) sample
    pub fn chromaticity(self) -> Option<(f64, f64)> {
        let sum = self.sum();
        if sum.abs() <= f64::EPSILON {
            return None;
        }
        Some((self.x / sum, self.y / sum))
    }

    /// Normalized chromaticity column `[x, y, z]` with `x + y + z = 1`
    pub fn chromaticity_column(self) -> Option<Vector3<f64>> {
        self.chromaticity()
            .map(|(x, y)| Vector3::new(x, y, 1.0 - x - y))
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Lab {
    pub const fn new(l: f64, a: f64, b: f64) -> Self {
        Self { l, a, b }
    }

    /// Chroma C*ab
    pub fn chroma(self) -> f64 {
        self.a.hypot(self.b)
    }
}

/// Color converter anchored to a reference white
#[derive(Debug, Clone, Copy)]
pub struct ColorConverter {
    /// Reference white, any luminance scale
    reference_white: Xyz,
}

impl Default for ColorConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorConverter {
    /// Create a new color converter with D65 as reference white
    pub fn new() -> Self {
        Self {
            reference_white: Xyz::from_array(D65_WHITE_POINT_XYZ),
        }
    }

    /// Create a converter using a measured white
    ///
    /// The white may be absolute (cd/m²) or relative; samples passed to
    /// [`ColorConverter::xyz_to_lab`] must use the same scale.
    pub fn with_white(reference_white: Xyz) -> Self {
        Self { reference_white }
    }

    pub fn reference_white(&self) -> Xyz {
        self.reference_white
    }

    /// Convert XYZ to Lab relative to the converter's reference white
    ///
    /// # Arguments
    ///
    /// * `xyz` - Sample on the same luminance scale as the reference white
    ///
    /// # Returns
    ///
    /// Lab color with L* in nominal range [0, 100]
    pub fn xyz_to_lab(&self, xyz: Xyz) -> Lab {
        let w = self.reference_white;
        let fx = lab_f(xyz.x / w.x);
        let fy = lab_f(xyz.y / w.y);
        let fz = lab_f(xyz.z / w.z);
        Lab::new(116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz))
    }

    /// Convert Lab back to XYZ on the reference white's scale
    pub fn lab_to_xyz(&self, lab: Lab) -> Xyz {
        let fy = (lab.l + 16.0) / 116.0;
        let fx = lab.a / 500.0 + fy;
        let fz = fy - lab.b / 200.0;
        let xr = lab_f_inv(fx);
        let yr = if lab.l > lab::KAPPA * lab::EPSILON {
            fy.powi(3)
        } else {
            lab.l / lab::KAPPA
        };
        let zr = lab_f_inv(fz);
        let w = self.reference_white;
        Xyz::new(xr * w.x, yr * w.y, zr * w.z)
    }
}

fn lab_f(t: f64) -> f64 {
    if t > lab::EPSILON {
        t.cbrt()
    } else {
        (lab::KAPPA * t + 16.0) / 116.0
    }
}

fn lab_f_inv(f: f64) -> f64 {
    let cubed = f.powi(3);
    if cubed > lab::EPSILON {
        cubed
    } else {
        (116.0 * f - 16.0) / lab::KAPPA
    }
}
