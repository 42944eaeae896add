use std::sync::Arc;

use anyhow::{Context, Result};
use gesture_remote::{
    bluos::BluOsClient,
    config::{AppConfig, CameraConfig, PreviewConfig},
    controller::gesture_handler,
    dispatch::GestureDispatcher,
    pipeline::{
        CaptureLoop, CompletionHandler, FrameSource, ImageSequenceSource, InferencePool,
        PreviewSurface,
        recognizer::{
            ort::{ModelPaths, OrtGestureModel},
            palm::{PalmDetector, PalmDetectorConfig},
        },
    },
    state::GestureState,
};

fn main() -> Result<()> {
    env_logger::init();

    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    let bindings = config.gesture_bindings()?;

    let paths = ModelPaths {
        palm: config.recognizer.palm_model.clone(),
        handpose: config.recognizer.handpose_model.clone(),
        classifier: config.recognizer.classifier_model.clone(),
    };
    paths.ensure_ready()?;

    let player = Arc::new(BluOsClient::new(
        &config.device.host,
        config.device.port,
        config.device.timeout(),
    )?);
    log::info!("controlling BluOS player at {}", player.base_url());

    let state = Arc::new(GestureState::new());
    let dispatcher = GestureDispatcher::new(
        Arc::clone(&state),
        gesture_handler(player, bindings, config.device.volume_step),
    );

    let palm_config = PalmDetectorConfig {
        score_threshold: config.recognizer.min_detection_confidence,
        ..PalmDetectorConfig::default()
    };
    let models = (0..config.recognizer.workers)
        .map(|_| OrtGestureModel::new(&paths, palm_config.clone(), config.recognizer.num_hands))
        .collect::<Result<Vec<_>>>()?;
    let on_complete: CompletionHandler = Arc::new(move |completion| {
        dispatcher.on_completion(&completion);
    });
    let pool = InferencePool::spawn(models, config.recognizer.queue_depth, on_complete);

    let detector = PalmDetector::new(&paths.palm, palm_config)?;
    let source = frame_source(&config.camera)?;

    let mut capture = CaptureLoop::new(source, detector, &pool, state);
    if let Some(preview) = preview_surface(&config.preview) {
        capture = capture.with_preview(preview);
    }

    let outcome = capture.run();
    pool.shutdown();

    let report = outcome?;
    log::info!(
        "done: {} frames, {} skipped, {} submitted, {} dropped",
        report.frames,
        report.skipped_frames,
        report.submissions,
        report.rejected_submissions
    );
    Ok(())
}

fn frame_source(camera: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    match &camera.replay_dir {
        Some(dir) => Ok(Box::new(ImageSequenceSource::new(dir))),
        None => camera_source(camera.index),
    }
}

#[cfg(feature = "camera-nokhwa")]
fn camera_source(index: u32) -> Result<Box<dyn FrameSource>> {
    gesture_remote::pipeline::camera::log_available_cameras();
    Ok(Box::new(gesture_remote::pipeline::NokhwaCamera::new(index)))
}

#[cfg(not(feature = "camera-nokhwa"))]
fn camera_source(_index: u32) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("built without camera support; set camera.replay_dir instead")
}

#[cfg(feature = "preview")]
fn preview_surface(preview: &PreviewConfig) -> Option<Box<dyn PreviewSurface>> {
    preview.enabled.then(|| {
        Box::new(gesture_remote::pipeline::preview::MinifbPreview::new()) as Box<dyn PreviewSurface>
    })
}

#[cfg(not(feature = "preview"))]
fn preview_surface(preview: &PreviewConfig) -> Option<Box<dyn PreviewSurface>> {
    if preview.enabled {
        log::warn!("preview requested but this build has no preview support");
    }
    None
}
