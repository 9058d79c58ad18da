use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Smallest square around the box centre that contains the box,
    /// grown by `margin` (0.1 = 10% per side).
    pub fn square(&self, margin: f32) -> (f32, f32, f32) {
        let side = self.width.max(self.height) * (1.0 + 2.0 * margin);
        let cx = self.x + self.width / 2.0;
        let cy = self.y + self.height / 2.0;
        (cx - side / 2.0, cy - side / 2.0, side)
    }
}

/// Fixed-length face descriptor summarising facial geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDescriptor {
    pub values: Vec<f32>,
}

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance. 0 is identical; there is no upper bound.
    ///
    /// Descriptors of different length are never comparable; callers check
    /// [`dim`](Self::dim) before matching.
    pub fn distance(&self, other: &FaceDescriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// True if every component is finite and the vector is non-empty.
    pub fn is_valid(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|v| v.is_finite())
    }
}

/// The stored face template of one enrolled identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityTemplate {
    pub identity_key: String,
    pub display_name: String,
    pub descriptor: FaceDescriptor,
}

/// A WGS84 latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// `None` unless both components are finite and in range.
    pub fn checked(lat: f64, lng: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        valid.then_some(Self { lat, lng })
    }
}

/// Six-point eye contours, in frame coordinates.
///
/// Point order follows the 68-point convention: p1 and p4 are the eye
/// corners, p2/p3 the upper lid, p6/p5 the lower lid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeLandmarks {
    pub left: [(f32, f32); 6],
    pub right: [(f32, f32); 6],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_identical_is_zero() {
        let a = FaceDescriptor::new(vec![0.1, 0.2, 0.3]);
        assert_eq!(a.distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_distance_known_geometry() {
        let a = FaceDescriptor::new(vec![0.0, 0.0]);
        let b = FaceDescriptor::new(vec![3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
        assert!((b.distance(&a) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_descriptor_validity() {
        assert!(FaceDescriptor::new(vec![0.5; 128]).is_valid());
        assert!(!FaceDescriptor::new(vec![]).is_valid());
        assert!(!FaceDescriptor::new(vec![0.5, f32::NAN]).is_valid());
        assert!(!FaceDescriptor::new(vec![f32::INFINITY]).is_valid());
    }

    #[test]
    fn test_coordinates_checked() {
        assert!(Coordinates::checked(28.7041, 77.1025).is_some());
        assert!(Coordinates::checked(f64::NAN, 77.1025).is_none());
        assert!(Coordinates::checked(91.0, 0.0).is_none());
        assert!(Coordinates::checked(0.0, -181.0).is_none());
    }

    #[test]
    fn test_square_contains_box() {
        let bbox = BoundingBox {
            x: 10.0, y: 20.0, width: 40.0, height: 60.0,
            confidence: 0.9, landmarks: None,
        };
        let (x, y, side) = bbox.square(0.0);
        assert_eq!(side, 60.0);
        assert_eq!(x, 0.0);
        assert_eq!(y, 20.0);
    }
}
