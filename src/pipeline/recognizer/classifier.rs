use std::{cmp::Ordering, collections::HashMap, path::Path};

use anyhow::{Context, Result, anyhow};
use ndarray::Array2;
use ort::session::Session;
use ort::value::Tensor;

use super::common::NUM_LANDMARKS;
use crate::{
    gesture::{CLASSIFIER_CLASSES, Gesture, gesture_for_class},
    types::GestureCandidate,
};

const FEATURES: usize = NUM_LANDMARKS * 2;

/// Small MLP over normalised hand landmarks, trained on HaGRID classes.
pub struct GestureClassifier {
    session: Session,
}

impl GestureClassifier {
    pub fn new(model_path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .commit_from_file(model_path)
            .with_context(|| {
                format!(
                    "failed to load gesture classifier from {}",
                    model_path.display()
                )
            })?;
        log::info!("loaded gesture classifier from {}", model_path.display());
        Ok(Self { session })
    }

    /// Ranked candidates for one hand, best first.
    pub fn classify(
        &mut self,
        landmarks: &[[f32; 3]],
        hand_index: usize,
    ) -> Result<Vec<GestureCandidate>> {
        let features = normalize_for_model(landmarks)
            .ok_or_else(|| anyhow!("degenerate hand landmarks"))?;
        let input = Array2::from_shape_vec((1, FEATURES), features)
            .map_err(|err| anyhow!("failed to build classifier input: {err}"))?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("gesture classifier inference failed")?;
        if outputs.len() < 1 {
            return Err(anyhow!("gesture classifier returned no outputs"));
        }
        let logits = outputs[0].try_extract_array::<f32>()?;
        let logits: Vec<f32> = logits.iter().copied().collect();
        if logits.len() < CLASSIFIER_CLASSES {
            log::debug!(
                "classifier returned {} logits, expected {CLASSIFIER_CLASSES}",
                logits.len()
            );
        }

        Ok(rank_gestures(&logits, hand_index))
    }
}

/// Wrist at the origin, scaled by palm width, flattened to `[x0, y0, ..]`.
fn normalize_for_model(landmarks: &[[f32; 3]]) -> Option<Vec<f32>> {
    if landmarks.len() != NUM_LANDMARKS {
        return None;
    }

    let wrist = landmarks[0];
    let pts: Vec<[f32; 2]> = landmarks
        .iter()
        .map(|p| [p[0] - wrist[0], p[1] - wrist[1]])
        .collect();

    let length = |p: [f32; 2]| (p[0] * p[0] + p[1] * p[1]).sqrt();
    let palm_width = length([pts[5][0] - pts[17][0], pts[5][1] - pts[17][1]]);
    let scale = if palm_width > 1e-6 {
        palm_width
    } else {
        length(pts[9])
    };
    if scale <= 1e-6 {
        return None;
    }

    Some(pts.iter().flat_map(|p| [p[0] / scale, p[1] / scale]).collect())
}

/// Softmax over the classifier classes, summed per vocabulary gesture.
fn rank_gestures(logits: &[f32], hand_index: usize) -> Vec<GestureCandidate> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return vec![GestureCandidate::new(Gesture::Unrecognized, 0.0, hand_index)];
    }

    let mut scores: HashMap<Gesture, f32> = HashMap::new();
    for (class, e) in exps.iter().enumerate() {
        *scores.entry(gesture_for_class(class)).or_default() += e / total;
    }

    let mut ranked: Vec<GestureCandidate> = scores
        .into_iter()
        .map(|(gesture, score)| GestureCandidate::new(gesture, score, hand_index))
        .collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hand() -> Vec<[f32; 3]> {
        let mut pts = vec![[0.0, 0.0, 0.0]; NUM_LANDMARKS];
        pts[0] = [100.0, 200.0, 0.0];
        pts[5] = [90.0, 150.0, 0.0];
        pts[9] = [100.0, 140.0, 0.0];
        pts[17] = [130.0, 150.0, 0.0];
        pts
    }

    #[test]
    fn normalises_relative_to_wrist_and_palm_width() {
        let features = normalize_for_model(&hand()).unwrap();
        assert_eq!(features.len(), FEATURES);
        assert_eq!(&features[..2], &[0.0, 0.0]);
        // Landmark 5 is (-10, -50) from the wrist; palm width is 40.
        assert!((features[10] + 0.25).abs() < 1e-6);
        assert!((features[11] + 1.25).abs() < 1e-6);
    }

    #[test]
    fn degenerate_hand_is_rejected() {
        assert!(normalize_for_model(&[[1.0, 1.0, 0.0]; NUM_LANDMARKS]).is_none());
        assert!(normalize_for_model(&hand()[..20]).is_none());
    }

    #[test]
    fn ranks_by_folded_probability() {
        let mut logits = vec![0.0f32; CLASSIFIER_CLASSES];
        logits[2] = 8.0; // fist
        logits[16] = 6.0; // palm
        logits[21] = 6.0; // stop, also an open palm
        let ranked = rank_gestures(&logits, 1);

        assert_eq!(ranked[0].gesture, Gesture::ClosedFist);
        assert_eq!(ranked[1].gesture, Gesture::OpenPalm);
        assert!(ranked.iter().all(|c| c.hand_index == 1));
        let total: f32 = ranked.iter().map(|c| c.score).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn empty_logits_yield_sentinel() {
        let ranked = rank_gestures(&[], 0);
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].gesture.is_sentinel());
    }
}
