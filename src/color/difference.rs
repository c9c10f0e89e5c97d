//! Perceptual color difference metrics
//!
//! - ΔE*94 (graphic arts weighting, symmetric chrominance)
//! - ΔE*00 (CIEDE2000, via the `palette` implementation)

use palette::color_difference::Ciede2000;
use palette::white_point::Any;

use super::conversion::Lab;

/// CIE94 graphic arts constants
const CIE94_K1: f64 = 0.045;
const CIE94_K2: f64 = 0.015;

/// Compute ΔE*94 between two Lab colors
///
/// Uses the graphic arts weighting (kL = kC = kH = 1) and the symmetric
/// chroma mean `sqrt(C1 * C2)` for the weighting functions, so that
/// `delta_e94(a, b) == delta_e94(b, a)`.
pub fn delta_e94(lab1: Lab, lab2: Lab) -> f64 {
    let dl = lab2.l - lab1.l;
    let c1 = lab1.chroma();
    let c2 = lab2.chroma();
    let dc = c2 - c1;
    let da = lab1.a - lab2.a;
    let db = lab1.b - lab2.b;
    let dh2 = da * da + db * db - dc * dc;
    let dh = if dh2 > 0.0 { dh2.sqrt() } else { 0.0 };

    let c_mean = (c1 * c2).sqrt();
    let sc = 1.0 + CIE94_K1 * c_mean;
    let sh = 1.0 + CIE94_K2 * c_mean;

    let dcw = dc / sc;
    let dhw = dh / sh;
    (dl * dl + dcw * dcw + dhw * dhw).sqrt()
}

/// Compute ΔE*00 (CIEDE2000) between two Lab colors
pub fn delta_e2000(lab1: Lab, lab2: Lab) -> f64 {
    let a = palette::Lab::<Any, f64>::new(lab1.l, lab1.a, lab1.b);
    let b = palette::Lab::<Any, f64>::new(lab2.l, lab2.a, lab2.b);
    a.difference(b)
}
