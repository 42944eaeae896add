use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

const MODEL_DIR: &str = "models";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    PalmDetector,
    HandposeEstimator,
    GestureClassifier,
}

impl ModelKind {
    fn file_name(&self) -> &'static str {
        match self {
            ModelKind::PalmDetector => "palm_detection_mediapipe_2023feb.onnx",
            ModelKind::HandposeEstimator => "handpose_estimation_mediapipe_2023feb.onnx",
            ModelKind::GestureClassifier => "gesture_classifier.onnx",
        }
    }

    /// The classifier is trained locally and has no published copy.
    fn download_url(&self) -> Option<&'static str> {
        match self {
            ModelKind::PalmDetector => Some(
                "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/palm_detection_mediapipe_2023feb.onnx",
            ),
            ModelKind::HandposeEstimator => Some(
                "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/handpose_estimation_mediapipe_2023feb.onnx",
            ),
            ModelKind::GestureClassifier => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ModelKind::PalmDetector => "palm detector",
            ModelKind::HandposeEstimator => "handpose estimator",
            ModelKind::GestureClassifier => "gesture classifier",
        }
    }

    pub fn default_path(&self) -> PathBuf {
        PathBuf::from(MODEL_DIR).join(self.file_name())
    }
}

pub fn default_palm_detector_model_path() -> PathBuf {
    ModelKind::PalmDetector.default_path()
}

pub fn default_handpose_estimator_model_path() -> PathBuf {
    ModelKind::HandposeEstimator.default_path()
}

pub fn default_gesture_classifier_model_path() -> PathBuf {
    ModelKind::GestureClassifier.default_path()
}

/// Makes sure `model_path` exists, downloading the published model when
/// there is one.
pub fn ensure_model_ready(model: ModelKind, model_path: &Path) -> anyhow::Result<()> {
    if model_path.exists() {
        log::debug!("{} model present at {}", model.label(), model_path.display());
        return Ok(());
    }

    let Some(url) = model.download_url() else {
        return Err(anyhow!(
            "{} model not found at {} and no download source is known",
            model.label(),
            model_path.display()
        ));
    };

    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create model directory {}", parent.display()))?;
    }

    download_to_path(model, url, model_path)
        .with_context(|| format!("failed to download {} model", model.label()))
}

fn download_to_path(model: ModelKind, url: &str, dest: &Path) -> anyhow::Result<()> {
    log::info!(
        "downloading {} model from {url} to {}",
        model.label(),
        dest.display()
    );

    let mut response = Client::new()
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let progress = create_progress_bar(response.content_length());

    let tmp_path = dest.with_extension("download");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 16 * 1024];
    loop {
        let bytes_read = response
            .read(&mut buffer)
            .context("failed while reading model bytes")?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])
            .context("failed while writing model to disk")?;
        downloaded += bytes_read as u64;
        progress.set_position(downloaded);
    }

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move temp model {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    progress.finish_with_message(format!("{} model ready", model.label()));
    Ok(())
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} downloading model") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}
