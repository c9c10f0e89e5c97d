//! Photometric normalization and chromatic adaptation module
//!
//! This module scales measurements to absolute luminance and adapts them
//! between white points for previews and metrics.

pub mod illuminant;
pub mod normalize;

pub use illuminant::{AdaptationMethod, ChromaticAdaptation, Illuminant};
pub use normalize::{PatchPreview, PhotometricNormalizer};
