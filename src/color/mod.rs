//! Color representation and metric module
//!
//! This module handles tristimulus and perceptual color representations
//! and the color difference metrics used to grade a correction.

pub mod conversion;
pub mod difference;

pub use conversion::{ColorConverter, Lab, Xyz};
pub use difference::{delta_e2000, delta_e94};
