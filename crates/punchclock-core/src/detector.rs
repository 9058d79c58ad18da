//! SCRFD face locator via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. Each detection
//! carries the five SCRFD keypoints used later for descriptor alignment.

use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use punchclock_hw::Frame;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

/// Default minimum detection score.
pub const DEFAULT_MIN_SCORE: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Letterbox placement of the frame inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (INPUT_SIZE as f32 - new_w) / 2.0,
            pad_y: (INPUT_SIZE as f32 - new_h) / 2.0,
        }
    }

    /// Model-input coordinates back to frame coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// (score, bbox, kps) output indices for one stride.
type StrideOutputs = (usize, usize, usize);

/// SCRFD-based face locator.
pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
    min_score: f32,
}

impl FaceDetector {
    pub fn load(model_path: &str, min_score: f32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (3 strides x score/bbox/kps), model has {}",
                names.len()
            )));
        }
        let outputs = output_layout(&names);
        tracing::info!(path = model_path, ?outputs, "loaded face detector");

        Ok(Self {
            session,
            outputs,
            min_score,
        })
    }

    /// Locate faces in a frame, highest score first.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        let letterbox = Letterbox::fit(frame.width as usize, frame.height as usize);
        let input = preprocess(frame, &letterbox);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.outputs[slot];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_idx, "scores")?;
            let bboxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "kps")?;
            detections.extend(decode_stride(scores, bboxes, kps, stride, &letterbox, self.min_score));
        }

        Ok(nms(detections, NMS_IOU))
    }
}

/// Letterbox a grayscale frame into a normalised 1x3x640x640 tensor.
fn preprocess(frame: &Frame, letterbox: &Letterbox) -> Array4<f32> {
    let new_w = (frame.width as f32 * letterbox.scale).round() as usize;
    let new_h = (frame.height as f32 * letterbox.scale).round() as usize;
    let resized = frame.resample_region(0.0, 0.0, frame.width as f32, frame.height as f32, new_w, new_h);
    let (x0, y0) = (letterbox.pad_x.floor() as usize, letterbox.pad_y.floor() as usize);

    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for y in 0..INPUT_SIZE {
        for x in 0..INPUT_SIZE {
            let inside = (y0..y0 + new_h).contains(&y) && (x0..x0 + new_w).contains(&x);
            let pixel = if inside {
                resized[(y - y0) * new_w + (x - x0)] as f32
            } else {
                PIXEL_MEAN
            };
            let v = (pixel - PIXEL_MEAN) / PIXEL_STD;
            for c in 0..3 {
                tensor[[0, c, y, x]] = v;
            }
        }
    }
    tensor
}

/// Map SCRFD output tensors to stride slots.
///
/// Uses `score_8` / `bbox_16` / `kps_32` style names when every one is
/// present, otherwise the conventional positional order
/// (scores 0-2, bboxes 3-5, keypoints 6-8).
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
    }
}

fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    min_score: f32,
) -> Vec<BoundingBox> {
    let grid_w = INPUT_SIZE / stride;
    let anchors = (INPUT_SIZE / stride) * grid_w * ANCHORS_PER_CELL;
    let s = stride as f32;
    let mut out = Vec::new();

    for idx in 0..anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= min_score {
            continue;
        }
        let Some(b) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / ANCHORS_PER_CELL;
        let ax = (cell % grid_w) as f32 * s;
        let ay = (cell / grid_w) as f32 * s;

        let (x1, y1) = letterbox.unmap(ax - b[0] * s, ay - b[1] * s);
        let (x2, y2) = letterbox.unmap(ax + b[2] * s, ay + b[3] * s);

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * s, ay + k[i * 2 + 1] * s))
        });

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
    out
}

/// Greedy non-maximum suppression; returns boxes sorted by confidence.
fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut keep: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let iw = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let ih = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = iw * ih;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
