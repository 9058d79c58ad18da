//! The perception seam between the orchestrator and the models.

use crate::detector::{DetectorError, FaceDetector};
use crate::landmarks::{LandmarkError, LandmarkModel};
use crate::obstruction::{ClassifierError, ObstructionClassifier};
use crate::recognizer::{DescriptorExtractor, RecognizerError};
use crate::types::{BoundingBox, EyeLandmarks, FaceDescriptor};
use punchclock_hw::Frame;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("landmarks: {0}")]
    Landmarks(#[from] LandmarkError),
    #[error("obstruction classifier: {0}")]
    Classifier(#[from] ClassifierError),
}

/// What the verification loop needs to know about faces in a frame.
pub trait FacePerception {
    /// Faces in the frame, most confident first.
    fn locate_faces(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, PerceptionError>;
    fn describe(&mut self, frame: &Frame, face: &BoundingBox) -> Result<FaceDescriptor, PerceptionError>;
    fn eye_landmarks(&mut self, frame: &Frame, face: &BoundingBox) -> Result<EyeLandmarks, PerceptionError>;
    fn is_covered(&mut self, frame: &Frame, face: &BoundingBox) -> Result<bool, PerceptionError>;
    /// Length of the descriptors `describe` produces.
    fn descriptor_dim(&self) -> usize;
}

/// Outcome of looking for exactly one face and describing it.
#[derive(Debug, Clone)]
pub enum FaceExtraction {
    Single {
        face: BoundingBox,
        descriptor: FaceDescriptor,
    },
    NoFace,
    MultipleFaces(usize),
}

/// Describe the only face in `frame`. Zero or several faces are outcomes,
/// not errors.
pub fn extract_single<P: FacePerception + ?Sized>(
    perception: &mut P,
    frame: &Frame,
) -> Result<FaceExtraction, PerceptionError> {
    let mut faces = perception.locate_faces(frame)?;
    match faces.len() {
        0 => Ok(FaceExtraction::NoFace),
        1 => {
            let face = faces.remove(0);
            let descriptor = perception.describe(frame, &face)?;
            Ok(FaceExtraction::Single { face, descriptor })
        }
        n => Ok(FaceExtraction::MultipleFaces(n)),
    }
}

/// Default model directory: `$PUNCHCLOCK_MODEL_DIR`, else `/var/lib/punchclock/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("PUNCHCLOCK_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/punchclock/models"))
}

/// File locations of the four models.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub descriptor: PathBuf,
    pub landmarks: PathBuf,
    pub obstruction: PathBuf,
}

impl ModelPaths {
    /// Conventional file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join("det_10g.onnx"),
            descriptor: dir.join("w600k_r50.onnx"),
            landmarks: dir.join("landmarks_68.onnx"),
            obstruction: dir.join("mask_detector.onnx"),
        }
    }
}

/// ONNX Runtime implementation of [`FacePerception`].
pub struct OnnxPerception {
    detector: FaceDetector,
    extractor: DescriptorExtractor,
    landmarks: LandmarkModel,
    classifier: ObstructionClassifier,
}

impl OnnxPerception {
    /// Load all four models. Any missing model is fatal.
    pub fn load(paths: &ModelPaths, descriptor_dim: usize, min_score: f32) -> Result<Self, PerceptionError> {
        Ok(Self {
            detector: FaceDetector::load(&paths.detector.to_string_lossy(), min_score)?,
            extractor: DescriptorExtractor::load(&paths.descriptor.to_string_lossy(), descriptor_dim)?,
            landmarks: LandmarkModel::load(&paths.landmarks.to_string_lossy())?,
            classifier: ObstructionClassifier::load(&paths.obstruction.to_string_lossy())?,
        })
    }
}

impl FacePerception for OnnxPerception {
    fn locate_faces(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, PerceptionError> {
        Ok(self.detector.detect(frame)?)
    }

    fn describe(&mut self, frame: &Frame, face: &BoundingBox) -> Result<FaceDescriptor, PerceptionError> {
        Ok(self.extractor.extract(frame, face)?)
    }

    fn eye_landmarks(&mut self, frame: &Frame, face: &BoundingBox) -> Result<EyeLandmarks, PerceptionError> {
        Ok(self.landmarks.eyes(frame, face)?)
    }

    fn is_covered(&mut self, frame: &Frame, face: &BoundingBox) -> Result<bool, PerceptionError> {
        let scores = self.classifier.classify(frame, face)?;
        tracing::debug!(covered = scores.covered, uncovered = scores.uncovered, "obstruction scores");
        Ok(scores.is_covered())
    }

    fn descriptor_dim(&self) -> usize {
        self.extractor.dim()
    }
}
