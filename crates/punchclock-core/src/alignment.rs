//! Face alignment to the canonical 112x112 descriptor crop.
//!
//! A 4-DOF similarity transform (scale, rotation, translation) is fitted by
//! least squares from the five detected keypoints to fixed reference
//! positions, then the frame is warped with bilinear sampling.

use punchclock_hw::Frame;

/// Reference keypoints for a 112x112 crop.
pub const REFERENCE_KEYPOINTS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Similarity transform `[a, b, tx, ty]` mapping `src` onto `dst`:
///
/// ```text
/// x' = a*x - b*y + tx
/// y' = b*x + a*y + ty
/// ```
fn fit_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 4] {
    // Normal equations (A^T A) p = A^T d, two rows per point pair.
    let mut ata = [[0.0f32; 4]; 4];
    let mut atd = [0.0f32; 4];
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        for (row, rhs) in [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)] {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += row[j] * row[k];
                }
                atd[j] += row[j] * rhs;
            }
        }
    }
    solve4(ata, atd).unwrap_or([1.0, 0.0, 0.0, 0.0])
}

/// Gaussian elimination with partial pivoting; `None` if singular.
#[allow(clippy::needless_range_loop)]
fn solve4(mut m: [[f32; 4]; 4], mut rhs: [f32; 4]) -> Option<[f32; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4).max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in col + 1..4 {
            let factor = m[row][col] / pivot;
            for j in col..4 {
                m[row][j] -= factor * m[col][j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = (i + 1..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[i][i];
    }
    Some(x)
}

/// Warp `frame` through the inverse of `params` into an `out` x `out` crop.
/// Out-of-frame samples are black.
fn warp(frame: &Frame, params: &[f32; 4], out: usize) -> Vec<u8> {
    let [a, b, tx, ty] = *params;
    let det = a * a + b * b;
    if det < 1e-12 {
        return vec![0u8; out * out];
    }
    let (ia, ib) = (a / det, b / det);

    let mut crop = vec![0u8; out * out];
    for oy in 0..out {
        for ox in 0..out {
            let (dx, dy) = (ox as f32 - tx, oy as f32 - ty);
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let (x0, y0) = (sx.floor(), sy.floor());
            let (fx, fy) = (sx - x0, sy - y0);
            let (xi, yi) = (x0 as i64, y0 as i64);
            let p = |x: i64, y: i64| frame.pixel(x, y) as f32;

            let val = p(xi, yi) * (1.0 - fx) * (1.0 - fy)
                + p(xi + 1, yi) * fx * (1.0 - fy)
                + p(xi, yi + 1) * (1.0 - fx) * fy
                + p(xi + 1, yi + 1) * fx * fy;
            crop[oy * out + ox] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
    crop
}

/// Align a face to the canonical 112x112 crop from its five keypoints.
pub fn align_face(frame: &Frame, keypoints: &[(f32, f32); 5]) -> Vec<u8> {
    let params = fit_similarity(keypoints, &REFERENCE_KEYPOINTS);
    warp(frame, &params, ALIGNED_SIZE)
}
