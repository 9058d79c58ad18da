//! 68-point facial landmark regression, used for the eye contours.
//!
//! The model takes a square face crop and outputs 68 (x, y) pairs normalised
//! to the crop. Points 36-41 outline the left eye and 42-47 the right eye.

use crate::types::{BoundingBox, EyeLandmarks};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use punchclock_hw::Frame;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 112;
const POINTS: usize = 68;
const LEFT_EYE: usize = 36;
const RIGHT_EYE: usize = 42;
const CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// 68-point landmark regressor.
pub struct LandmarkModel {
    session: Session,
}

impl LandmarkModel {
    pub fn load(model_path: &str) -> Result<Self, LandmarkError> {
        if !Path::new(model_path).exists() {
            return Err(LandmarkError::ModelNotFound(model_path.to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;
        tracing::info!(path = model_path, "loaded landmark model");
        Ok(Self { session })
    }

    /// Eye contours of `face`, in frame coordinates.
    pub fn eyes(&mut self, frame: &Frame, face: &BoundingBox) -> Result<EyeLandmarks, LandmarkError> {
        let (x, y, side) = face.square(CROP_MARGIN);
        let crop = frame.resample_region(x, y, side, side, INPUT_SIZE, INPUT_SIZE);
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmark output: {e}")))?;

        if raw.len() < POINTS * 2 {
            return Err(LandmarkError::InferenceFailed(format!(
                "expected {} landmark values, got {}",
                POINTS * 2,
                raw.len()
            )));
        }
        Ok(eyes_from_normalized(raw, x, y, side))
    }
}

/// Pull both six-point eye contours out of a normalised 68-point vector.
fn eyes_from_normalized(raw: &[f32], x: f32, y: f32, side: f32) -> EyeLandmarks {
    let point = |i: usize| (x + raw[i * 2] * side, y + raw[i * 2 + 1] * side);
    EyeLandmarks {
        left: std::array::from_fn(|k| point(LEFT_EYE + k)),
        right: std::array::from_fn(|k| point(RIGHT_EYE + k)),
    }
}

fn preprocess(crop: &[u8]) -> Array4<f32> {
    Array4::from_shape_fn((1, 3, INPUT_SIZE, INPUT_SIZE), |(_, _, y, x)| {
        crop.get(y * INPUT_SIZE + x).copied().unwrap_or(0) as f32 / 255.0
    })
}
