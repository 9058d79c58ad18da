//! Face-covering classifier (mask / hand / cloth over the face).
//!
//! A two-class model over a 224x224 face crop: output `[covered, uncovered]`.
//! The face counts as covered when the covered score is strictly higher.

use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use punchclock_hw::Frame;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 224;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scores produced for one face crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverScores {
    pub covered: f32,
    pub uncovered: f32,
}

impl CoverScores {
    pub fn is_covered(&self) -> bool {
        self.covered > self.uncovered
    }
}

/// Binary obstruction classifier.
pub struct ObstructionClassifier {
    session: Session,
}

impl ObstructionClassifier {
    pub fn load(model_path: &str) -> Result<Self, ClassifierError> {
        if !Path::new(model_path).exists() {
            return Err(ClassifierError::ModelNotFound(model_path.to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;
        tracing::info!(path = model_path, "loaded obstruction classifier");
        Ok(Self { session })
    }

    pub fn classify(&mut self, frame: &Frame, face: &BoundingBox) -> Result<CoverScores, ClassifierError> {
        let crop = frame.resample_region(face.x, face.y, face.width, face.height, INPUT_SIZE, INPUT_SIZE);
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("classifier output: {e}")))?;

        match raw {
            [covered, uncovered, ..] => Ok(CoverScores {
                covered: *covered,
                uncovered: *uncovered,
            }),
            _ => Err(ClassifierError::InferenceFailed(format!(
                "expected 2 class scores, got {}",
                raw.len()
            ))),
        }
    }
}

/// Face crop to a 1x224x224x3 NHWC tensor in [0, 1] (channel-replicated).
fn preprocess(crop: &[u8]) -> Array4<f32> {
    Array4::from_shape_fn((1, INPUT_SIZE, INPUT_SIZE, 3), |(_, y, x, _)| {
        crop.get(y * INPUT_SIZE + x).copied().unwrap_or(0) as f32 / 255.0
    })
}
