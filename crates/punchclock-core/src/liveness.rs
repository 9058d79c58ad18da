//! Blink-based liveness detection via the eye aspect ratio (EAR).
//!
//! For a six-point eye contour p1..p6 (corners p1/p4, upper lid p2/p3,
//! lower lid p6/p5) the ratio
//!
//! ```text
//! EAR = (|p2 - p6| + |p3 - p5|) / (2 * |p1 - p4|)
//! ```
//!
//! stays roughly constant while the eye is open and collapses toward zero
//! during a blink. A printed photo never blinks.
//!
//! # Threat Coverage
//!
//! - **Blocks:** printed photographs and static images on a screen.
//! - **Does not block:** video replay containing a blink, or a single
//!   spoofed low-ratio frame when `required_frames` is 1.

/// Default EAR threshold below which the eyes count as closed.
pub const DEFAULT_BLINK_THRESHOLD: f32 = 0.21;

fn dist(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Eye aspect ratio of a six-point eye contour.
///
/// A degenerate eye (coincident corners) yields 0.0.
pub fn eye_aspect_ratio(eye: &[(f32, f32); 6]) -> f32 {
    let vertical = dist(eye[1], eye[5]) + dist(eye[2], eye[4]);
    let horizontal = dist(eye[0], eye[3]);
    if horizontal <= f32::EPSILON {
        return 0.0;
    }
    vertical / (2.0 * horizontal)
}

/// True when the mean of both eye ratios is below `threshold`.
pub fn is_blink(left_ratio: f32, right_ratio: f32, threshold: f32) -> bool {
    (left_ratio + right_ratio) / 2.0 < threshold
}

/// Counts consecutive closed-eye frames until a blink is confirmed.
#[derive(Debug, Clone)]
pub struct BlinkTracker {
    threshold: f32,
    required_frames: u32,
    consecutive: u32,
}

/// One frame's liveness reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlinkReading {
    /// Mean EAR of both eyes for this frame.
    pub ratio: f32,
    pub eyes_closed: bool,
    pub confirmed: bool,
}

impl BlinkTracker {
    /// `required_frames` of 0 is treated as 1.
    pub fn new(threshold: f32, required_frames: u32) -> Self {
        Self {
            threshold,
            required_frames: required_frames.max(1),
            consecutive: 0,
        }
    }

    /// Feed one frame's eye contours.
    pub fn observe(&mut self, left: &[(f32, f32); 6], right: &[(f32, f32); 6]) -> BlinkReading {
        let (l, r) = (eye_aspect_ratio(left), eye_aspect_ratio(right));
        let eyes_closed = is_blink(l, r, self.threshold);
        if eyes_closed {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.consecutive = 0;
        }
        BlinkReading {
            ratio: (l + r) / 2.0,
            eyes_closed,
            confirmed: self.consecutive >= self.required_frames,
        }
    }

    /// Forget any partial blink (face lost or changed).
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}
