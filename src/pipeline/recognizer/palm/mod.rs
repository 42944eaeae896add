mod anchors;

use std::{cmp::Ordering, f32::consts::PI, path::Path};

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    HandLandmarkDetector,
    common::{Letterbox, PALM_INPUT_SIZE, letterbox_frame},
};
use crate::types::{Frame, HandLandmarks};

const PALM_LANDMARKS: usize = 7;
const BOX_FEATURES: usize = 4 + PALM_LANDMARKS * 2;

#[derive(Clone, Debug)]
pub struct PalmDetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for PalmDetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            nms_threshold: 0.3,
            top_k: 32,
        }
    }
}

pub struct PalmDetector {
    session: Option<Session>,
    anchors: Vec<[f32; 2]>,
    cfg: PalmDetectorConfig,
}

impl PalmDetector {
    pub fn new(model_path: &Path, cfg: PalmDetectorConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load palm detector from {}", model_path.display())
            })?;

        Ok(Self {
            session: Some(session),
            anchors: anchors::generate(),
            cfg,
        })
    }

    /// Palms in `frame`, strongest first, at most `top_k`.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<HandLandmarks>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("palm detector already released"))?;

        let (input, letterbox) = letterbox_frame(frame, PALM_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = session
            .run(ort::inputs![tensor])
            .context("failed to run palm detector session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "palm detector returned {} outputs, expected at least 2",
                outputs.len()
            ));
        }

        let boxes = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let raw = RawPalmOutput {
            boxes: boxes
                .as_slice()
                .ok_or_else(|| anyhow!("palm boxes not contiguous"))?,
            box_shape: boxes.shape(),
            scores: scores
                .as_slice()
                .ok_or_else(|| anyhow!("palm scores not contiguous"))?,
            score_shape: scores.shape(),
        };

        decode_palms(&raw, &self.anchors, &letterbox, &self.cfg)
    }
}

impl HandLandmarkDetector for PalmDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<HandLandmarks>> {
        PalmDetector::detect(self, frame)
    }

    fn release(&mut self) {
        if self.session.take().is_some() {
            log::debug!("palm detector session released");
        }
    }
}

struct RawPalmOutput<'a> {
    boxes: &'a [f32],
    box_shape: &'a [usize],
    scores: &'a [f32],
    score_shape: &'a [usize],
}

/// Second-to-last and last dimensions of an output tensor.
fn anchor_and_feature_dims(shape: &[usize], what: &str) -> Result<(usize, usize)> {
    match shape {
        [.., anchors, features] if shape.len() >= 3 => Ok((*anchors, *features)),
        _ => Err(anyhow!(
            "unexpected palm {what} shape {shape:?}, need [batch, anchors, features]"
        )),
    }
}

fn decode_palms(
    raw: &RawPalmOutput<'_>,
    anchors: &[[f32; 2]],
    letterbox: &Letterbox,
    cfg: &PalmDetectorConfig,
) -> Result<Vec<HandLandmarks>> {
    let (box_anchors, features) = anchor_and_feature_dims(raw.box_shape, "box")?;
    let (score_anchors, score_features) = anchor_and_feature_dims(raw.score_shape, "score")?;

    if features < BOX_FEATURES {
        return Err(anyhow!("palm box feature dimension too small: {features}"));
    }
    if box_anchors != score_anchors {
        return Err(anyhow!(
            "anchor dimension mismatch between boxes ({box_anchors}) and scores ({score_anchors})"
        ));
    }
    if raw.boxes.len() < box_anchors * features || raw.scores.len() < score_anchors * score_features
    {
        return Err(anyhow!("palm detector output shorter than its shape"));
    }

    let input = PALM_INPUT_SIZE as f32;
    let scale = letterbox.orig_w.max(letterbox.orig_h) as f32;
    let bias = (
        letterbox.pad_x / letterbox.scale,
        letterbox.pad_y / letterbox.scale,
    );
    // Anchor-relative normalised coordinates to frame pixels.
    let to_frame = |anchor: [f32; 2], dx: f32, dy: f32| {
        (
            (dx / input + anchor[0]) * scale - bias.0,
            (dy / input + anchor[1]) * scale - bias.1,
        )
    };

    let mut candidates = Vec::new();
    for (idx, anchor) in anchors.iter().take(box_anchors).enumerate() {
        let score = sigmoid(raw.scores[idx * score_features]);
        if score < cfg.score_threshold {
            continue;
        }

        let f = &raw.boxes[idx * features..idx * features + BOX_FEATURES];
        let (cx, cy) = to_frame(*anchor, f[0], f[1]);
        let (hw, hh) = (f[2] / input * scale / 2.0, f[3] / input * scale / 2.0);
        if hw <= 0.0 || hh <= 0.0 {
            continue;
        }

        let max_x = letterbox.orig_w.saturating_sub(1) as f32;
        let max_y = letterbox.orig_h.saturating_sub(1) as f32;
        let bbox = [
            (cx - hw).clamp(0.0, max_x),
            (cy - hh).clamp(0.0, max_y),
            (cx + hw).clamp(0.0, max_x),
            (cy + hh).clamp(0.0, max_y),
        ];

        let landmarks = f[4..]
            .chunks_exact(2)
            .map(|p| to_frame(*anchor, p[0], p[1]))
            .collect();

        candidates.push(HandLandmarks {
            bbox,
            landmarks,
            score,
        });
    }

    Ok(nms(candidates, cfg.nms_threshold, cfg.top_k))
}

/// Centre, side and rotation of the square crop fed to the handpose model.
pub fn crop_from_palm(region: &HandLandmarks) -> ((f32, f32), f32, f32) {
    let center = if region.landmarks.is_empty() {
        (
            (region.bbox[0] + region.bbox[2]) * 0.5,
            (region.bbox[1] + region.bbox[3]) * 0.5,
        )
    } else {
        mean(&region.landmarks)
    };

    let base_w = (region.bbox[2] - region.bbox[0]).abs();
    let base_h = (region.bbox[3] - region.bbox[1]).abs();
    let landmark_span = if region.landmarks.is_empty() {
        0.0
    } else {
        let (min_x, max_x, min_y, max_y) = region
            .landmarks
            .iter()
            .fold((f32::MAX, f32::MIN, f32::MAX, f32::MIN), |acc, (x, y)| {
                (acc.0.min(*x), acc.1.max(*x), acc.2.min(*y), acc.3.max(*y))
            });
        (max_x - min_x).max(max_y - min_y)
    };
    // Fingers extend well past the palm box.
    let side = base_w.max(base_h).max(landmark_span).max(80.0) * 2.4;

    (center, side, palm_orientation(region))
}

/// Angle that turns the palm's principal axis upright.
pub fn palm_orientation(region: &HandLandmarks) -> f32 {
    if region.landmarks.len() < 2 {
        return 0.0;
    }

    let n = region.landmarks.len() as f32;
    let (mx, my) = mean(&region.landmarks);
    let (mut cov_xx, mut cov_xy, mut cov_yy) = (0.0, 0.0, 0.0);
    for (x, y) in &region.landmarks {
        let (dx, dy) = (x - mx, y - my);
        cov_xx += dx * dx;
        cov_xy += dx * dy;
        cov_yy += dy * dy;
    }
    cov_xx /= n;
    cov_xy /= n;
    cov_yy /= n;

    let half_trace = (cov_xx + cov_yy) * 0.5;
    let det = cov_xx * cov_yy - cov_xy * cov_xy;
    let lambda = (half_trace + (half_trace * half_trace - det).max(0.0).sqrt()).max(1e-6);
    let (vx, vy) = if cov_xy.abs() > 1e-6 {
        (lambda - cov_yy, cov_xy)
    } else if cov_xx >= cov_yy {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    };

    vy.atan2(vx) - PI * 0.5
}

fn mean(points: &[(f32, f32)]) -> (f32, f32) {
    let n = points.len().max(1) as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0_f32, 0.0_f32), |acc, p| (acc.0 + p.0, acc.1 + p.1));
    (sx / n, sy / n)
}

fn nms(mut candidates: Vec<HandLandmarks>, threshold: f32, top_k: usize) -> Vec<HandLandmarks> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut keep: Vec<HandLandmarks> = Vec::new();
    for candidate in candidates {
        if keep.len() >= top_k {
            break;
        }
        if keep.iter().all(|k| iou(&candidate.bbox, &k.bbox) < threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }

    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(bbox: [f32; 4], score: f32) -> HandLandmarks {
        HandLandmarks {
            bbox,
            landmarks: Vec::new(),
            score,
        }
    }

    #[test]
    fn nms_keeps_strongest_of_overlapping_boxes() {
        let kept = nms(
            vec![
                region([0.0, 0.0, 10.0, 10.0], 0.6),
                region([1.0, 1.0, 11.0, 11.0], 0.9),
                region([50.0, 50.0, 60.0, 60.0], 0.7),
            ],
            0.3,
            8,
        );
        let scores: Vec<f32> = kept.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn nms_respects_top_k() {
        let boxes = (0..5)
            .map(|i| region([i as f32 * 20.0, 0.0, i as f32 * 20.0 + 10.0, 10.0], 0.8))
            .collect();
        assert_eq!(nms(boxes, 0.3, 2).len(), 2);
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn decodes_single_confident_anchor() {
        let anchors = anchors::generate();
        let n = anchors.len();
        let mut boxes = vec![0.0f32; n * BOX_FEATURES];
        let mut scores = vec![-10.0f32; n];

        // Anchor 0 sits at (0.5/24, 0.5/24) of the 192 input, i.e. pixel (4, 4).
        scores[0] = 5.0;
        boxes[2] = 16.0;
        boxes[3] = 16.0;

        let box_shape = [1, n, BOX_FEATURES];
        let score_shape = [1, n, 1];
        let raw = RawPalmOutput {
            boxes: &boxes,
            box_shape: &box_shape,
            scores: &scores,
            score_shape: &score_shape,
        };
        let letterbox = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: 192,
            orig_h: 192,
        };

        let palms = decode_palms(&raw, &anchors, &letterbox, &PalmDetectorConfig::default())
            .unwrap();
        assert_eq!(palms.len(), 1);
        let palm = &palms[0];
        assert!(palm.score > 0.99);
        assert!((palm.bbox[0] - 0.0).abs() < 1e-3);
        assert!((palm.bbox[2] - 12.0).abs() < 1e-3);
        assert_eq!(palm.landmarks.len(), PALM_LANDMARKS);
        assert!((palm.landmarks[0].0 - 4.0).abs() < 1e-3);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let raw = RawPalmOutput {
            boxes: &[0.0; 36],
            box_shape: &[1, 2, BOX_FEATURES],
            scores: &[0.0; 3],
            score_shape: &[1, 3, 1],
        };
        let letterbox = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: 10,
            orig_h: 10,
        };
        assert!(decode_palms(&raw, &[[0.5, 0.5]; 3], &letterbox, &PalmDetectorConfig::default())
            .is_err());
    }

    #[test]
    fn crop_is_centered_on_palm_landmarks() {
        let palm = HandLandmarks {
            bbox: [0.0, 0.0, 40.0, 40.0],
            landmarks: vec![(10.0, 10.0), (30.0, 30.0)],
            score: 0.9,
        };
        let (center, side, _) = crop_from_palm(&palm);
        assert_eq!(center, (20.0, 20.0));
        assert_eq!(side, 80.0 * 2.4);
    }

    #[test]
    fn vertical_palm_needs_no_rotation() {
        let palm = HandLandmarks {
            bbox: [0.0; 4],
            landmarks: vec![(0.0, 0.0), (0.0, 10.0), (0.0, 20.0)],
            score: 1.0,
        };
        assert!(palm_orientation(&palm).abs() < 1e-5);
    }
}
