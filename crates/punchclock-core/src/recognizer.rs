//! Face descriptor extraction via ONNX Runtime (ArcFace-style embedding model).
//!
//! The face is aligned to a 112x112 crop from its detector keypoints and the
//! model output is L2-normalised, so distances between descriptors from the
//! same model are comparable.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, FaceDescriptor};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use punchclock_hw::Frame;
use std::path::Path;
use thiserror::Error;

const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no keypoints; alignment needs detector landmarks")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Embedding-model face descriptor extractor.
pub struct DescriptorExtractor {
    session: Session,
    dim: usize,
}

impl DescriptorExtractor {
    /// Load the model; `dim` is the descriptor length it must produce.
    pub fn load(model_path: &str, dim: usize) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, dim, "loaded descriptor model");
        Ok(Self { session, dim })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Compute the descriptor of one detected face.
    pub fn extract(&mut self, frame: &Frame, face: &BoundingBox) -> Result<FaceDescriptor, RecognizerError> {
        let keypoints = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = alignment::align_face(frame, keypoints);
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor output: {e}")))?;

        if raw.len() != self.dim {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {}-dim descriptor, got {}",
                self.dim,
                raw.len()
            )));
        }
        Ok(FaceDescriptor::new(l2_normalize(raw)))
    }
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

/// 112x112 grayscale crop to a 1x3x112x112 tensor (channel-replicated).
fn preprocess(aligned: &[u8]) -> Array4<f32> {
    let size = ALIGNED_SIZE;
    Array4::from_shape_fn((1, 3, size, size), |(_, _, y, x)| {
        let pixel = aligned.get(y * size + x).copied().unwrap_or(0) as f32;
        (pixel - PIXEL_MEAN) / PIXEL_STD
    })
}
