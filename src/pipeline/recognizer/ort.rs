use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    GestureModel,
    classifier::GestureClassifier,
    common::{self, HANDPOSE_INPUT_SIZE},
    palm::{PalmDetector, PalmDetectorConfig, crop_from_palm},
};
use crate::{
    gesture::Gesture,
    model_download::{ModelKind, ensure_model_ready},
    types::{Frame, GestureCandidate, HandLandmarks},
};

/// Below this handpose confidence a hand is reported as the sentinel.
const MIN_HANDPOSE_CONFIDENCE: f32 = 0.2;

#[derive(Clone, Debug)]
pub struct ModelPaths {
    pub palm: PathBuf,
    pub handpose: PathBuf,
    pub classifier: PathBuf,
}

impl ModelPaths {
    /// Resolves every model file, downloading the published ones if missing.
    pub fn ensure_ready(&self) -> Result<()> {
        ensure_model_ready(ModelKind::PalmDetector, &self.palm)?;
        ensure_model_ready(ModelKind::HandposeEstimator, &self.handpose)?;
        ensure_model_ready(ModelKind::GestureClassifier, &self.classifier)?;
        Ok(())
    }
}

pub struct HandposeEstimate {
    pub landmarks: Vec<[f32; 3]>,
    pub projected: Vec<(f32, f32)>,
    pub confidence: f32,
}

/// 21-point hand pose regression on a rotated crop around a palm.
pub struct HandposeEstimator {
    session: Session,
}

impl HandposeEstimator {
    pub fn new(model_path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ORT session from {}", model_path.display()))?;
        Ok(Self { session })
    }

    pub fn estimate(&mut self, frame: &Frame, palm: &HandLandmarks) -> Result<HandposeEstimate> {
        let (center, side, angle) = crop_from_palm(palm);
        let (input, transform) =
            common::rotated_crop(frame, center, side, angle, HANDPOSE_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run handpose session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("handpose model returned no outputs"));
        }

        let coords: Vec<f32> = outputs[0].try_extract_array::<f32>()?.iter().copied().collect();
        let landmarks = common::decode_landmarks(&coords)?;

        let confidence = if outputs.len() > 1 {
            outputs[1]
                .try_extract_array::<f32>()
                .ok()
                .and_then(|arr| arr.iter().next().copied())
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let projected = transform.project_all(&landmarks);
        Ok(HandposeEstimate {
            landmarks,
            projected,
            confidence: (confidence * palm.score).clamp(0.0, 1.0),
        })
    }
}

/// Palm detection, pose estimation and classification for one worker.
pub struct OrtGestureModel {
    palm_detector: PalmDetector,
    handpose: HandposeEstimator,
    classifier: GestureClassifier,
    num_hands: usize,
}

impl OrtGestureModel {
    pub fn new(paths: &ModelPaths, palm: PalmDetectorConfig, num_hands: usize) -> Result<Self> {
        let palm_detector = PalmDetector::new(&paths.palm, palm)?;
        let handpose = HandposeEstimator::new(&paths.handpose)?;
        let classifier = GestureClassifier::new(&paths.classifier)?;
        log::info!(
            "gesture model ready using {}, {} and {}",
            paths.palm.display(),
            paths.handpose.display(),
            paths.classifier.display()
        );
        Ok(Self {
            palm_detector,
            handpose,
            classifier,
            num_hands,
        })
    }
}

impl GestureModel for OrtGestureModel {
    fn recognize(&mut self, frame: &Frame) -> Result<Vec<Vec<GestureCandidate>>> {
        let palms = self.palm_detector.detect(frame)?;

        let mut hands = Vec::with_capacity(palms.len().min(self.num_hands));
        for (hand_index, palm) in palms.iter().take(self.num_hands).enumerate() {
            let pose = match self.handpose.estimate(frame, palm) {
                Ok(pose) => pose,
                Err(err) => {
                    log::warn!("handpose estimation failed for hand {hand_index}: {err:?}");
                    continue;
                }
            };
            if pose.confidence < MIN_HANDPOSE_CONFIDENCE {
                hands.push(vec![GestureCandidate::new(
                    Gesture::Unrecognized,
                    pose.confidence,
                    hand_index,
                )]);
                continue;
            }
            log::trace!(
                "hand {hand_index}: {} landmarks, wrist at {:?}",
                pose.landmarks.len(),
                pose.projected.first()
            );
            hands.push(self.classifier.classify(&pose.landmarks, hand_index)?);
        }
        Ok(hands)
    }
}
