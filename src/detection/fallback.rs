//! Heuristic fallback used when the detection provider is unavailable or
//! the caller's quota is spent.
//!
//! This is a placeholder generator, not a detector: the confidence is drawn
//! uniformly from [0.6, 1.0) and the verdict is an independent coin flip
//! weighted towards "authentic".

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Lower bound (inclusive) of a fallback confidence.
pub const CONFIDENCE_MIN: f64 = 0.6;
/// Upper bound (exclusive) of a fallback confidence.
pub const CONFIDENCE_MAX: f64 = 1.0;
/// Probability that a fallback verdict flags the file as a deepfake.
pub const DEEPFAKE_PROBABILITY: f64 = 0.2;

pub const DEEPFAKE_PREDICTION: &str = "Potential Deepfake Detected";
pub const AUTHENTIC_PREDICTION: &str = "Authentic Content";

const ANALYSIS_METHOD: &str = "heuristic_fallback";
const NOTE: &str = "Analysis performed using fallback heuristic method";

/// Result produced by the fallback generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackResult {
    pub confidence: f64,
    pub is_deepfake: bool,
    pub prediction: String,
    pub analysis_method: String,
    pub note: String,
}

/// Generate a fallback result from the given random source.
pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> FallbackResult {
    let confidence = round_confidence(rng.gen_range(CONFIDENCE_MIN..CONFIDENCE_MAX));
    let is_deepfake = rng.gen_bool(DEEPFAKE_PROBABILITY);

    let prediction = if is_deepfake {
        DEEPFAKE_PREDICTION
    } else {
        AUTHENTIC_PREDICTION
    };

    FallbackResult {
        confidence,
        is_deepfake,
        prediction: prediction.to_string(),
        analysis_method: ANALYSIS_METHOD.to_string(),
        note: NOTE.to_string(),
    }
}

/// Round to four decimal places without ever reaching the exclusive upper
/// bound.
fn round_confidence(raw: f64) -> f64 {
    let rounded = (raw * 10_000.0).round() / 10_000.0;
    if rounded >= CONFIDENCE_MAX {
        0.9999
    } else {
        rounded
    }
}
