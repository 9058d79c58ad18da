//! Face matching against a single enrolled template.

use crate::types::FaceDescriptor;

/// Result of comparing a live descriptor with the stored template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance (0 = identical).
    pub distance: f32,
    /// Normalised inverse distance in [0, 100], two decimals.
    pub confidence: f32,
}

/// Strategy for comparing a live descriptor with a known one.
pub trait Matcher {
    fn compare(&self, known: &FaceDescriptor, candidate: &FaceDescriptor, threshold: f32) -> MatchResult;
}

/// Euclidean-distance matcher with a strict `distance < threshold` rule.
pub struct DistanceMatcher;

impl Matcher for DistanceMatcher {
    fn compare(&self, known: &FaceDescriptor, candidate: &FaceDescriptor, threshold: f32) -> MatchResult {
        let distance = known.distance(candidate);
        MatchResult {
            matched: is_match(distance, threshold),
            distance,
            confidence: confidence(distance),
        }
    }
}

/// A match needs the distance strictly below the threshold.
pub fn is_match(distance: f32, threshold: f32) -> bool {
    distance.is_finite() && distance < threshold
}

/// `(1 - distance) * 100`, clamped to [0, 100] and rounded to 2 decimals.
pub fn confidence(distance: f32) -> f32 {
    let raw = ((1.0 - distance) * 100.0).clamp(0.0, 100.0);
    (raw * 100.0).round() / 100.0
}
