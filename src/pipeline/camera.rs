use anyhow::{Result, anyhow};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat, RequestedFormatType,
    },
};

use super::{rgba_converter, source::FrameSource};
use crate::{error::PipelineError, types::Frame};

/// Read failures tolerated in a row before the stream is declared dead.
const MAX_CONSECUTIVE_READ_FAILURES: u32 = 30;

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

fn requested_formats() -> [RequestedFormat<'static>; 3] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

/// Logs the devices nokhwa can see; handy when the configured index is wrong.
pub fn log_available_cameras() {
    match query(ApiBackend::Auto) {
        Ok(cameras) => {
            for info in cameras {
                log::info!("camera {}: {}", info.index(), describe(&info));
            }
        }
        Err(err) => log::warn!("failed to enumerate cameras: {err}"),
    }
}

fn describe(info: &CameraInfo) -> String {
    format!("{} ({})", info.human_name(), info.description())
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

/// Local webcam read on the calling thread.
pub struct NokhwaCamera {
    index: u32,
    camera: Option<Camera>,
    read_failures: u32,
}

impl NokhwaCamera {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            camera: None,
            read_failures: 0,
        }
    }
}

impl FrameSource for NokhwaCamera {
    fn open(&mut self) -> Result<(), PipelineError> {
        let camera = build_camera(CameraIndex::Index(self.index))
            .map_err(|err| PipelineError::SourceOpen(format!("camera {}: {err:#}", self.index)))?;
        log::info!(
            "camera {} streaming {} at {} fps",
            self.index,
            camera.resolution(),
            camera.frame_rate()
        );
        self.camera = Some(camera);
        self.read_failures = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| PipelineError::Stream("camera is not open".into()))?;

        loop {
            let buffer = match camera.frame() {
                Ok(buffer) => buffer,
                Err(err) => {
                    self.read_failures += 1;
                    if self.read_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                        return Err(PipelineError::Stream(format!(
                            "camera read failed {} times in a row: {err}",
                            self.read_failures
                        )));
                    }
                    log::warn!("camera frame read failed: {err}");
                    continue;
                }
            };
            self.read_failures = 0;

            match rgba_converter::decode_camera_buffer(&buffer) {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) => log::warn!("failed to decode camera frame: {err:?}"),
            }
        }
    }

    fn release(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if let Err(err) = camera.stop_stream() {
                log::warn!("failed to stop camera stream: {err}");
            }
        }
    }
}
