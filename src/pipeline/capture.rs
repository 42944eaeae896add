use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use super::{
    preview::{PreviewSignal, PreviewSurface},
    recognizer::{GestureInferenceEngine, HandLandmarkDetector},
    source::FrameSource,
};
use crate::{error::PipelineError, state::GestureState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
    Faulted,
}

/// Shared view of a loop's lifecycle, readable from any thread.
#[derive(Clone, Debug)]
pub struct LoopStatus(Arc<Mutex<LoopState>>);

impl LoopStatus {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(LoopState::Idle)))
    }

    pub fn get(&self) -> LoopState {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set(&self, state: LoopState) {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }
}

/// Cooperative stop request, checked once per loop iteration.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopReport {
    pub reason: StopReason,
    pub frames: u64,
    /// Frames dropped after a failed detection or a rejected submission.
    pub skipped_frames: u64,
    pub submissions: u64,
    pub rejected_submissions: u64,
}

impl LoopReport {
    fn new() -> Self {
        Self {
            reason: StopReason::EndOfStream,
            frames: 0,
            skipped_frames: 0,
            submissions: 0,
            rejected_submissions: 0,
        }
    }
}

/// Everything the loop acquires. Dropping it releases each piece once.
struct Acquired<S: FrameSource, D: HandLandmarkDetector> {
    source: S,
    detector: D,
    preview: Option<Box<dyn PreviewSurface>>,
}

impl<S: FrameSource, D: HandLandmarkDetector> Drop for Acquired<S, D> {
    fn drop(&mut self) {
        self.source.release();
        self.detector.release();
        if let Some(preview) = self.preview.as_mut() {
            preview.close();
        }
        log::debug!("capture resources released");
    }
}

/// Pulls frames, gates them through the hand detector, submits them for
/// inference and renders the current gesture set.
pub struct CaptureLoop<'e, S: FrameSource, D: HandLandmarkDetector, E: GestureInferenceEngine> {
    resources: Acquired<S, D>,
    engine: &'e E,
    state: Arc<GestureState>,
    cancel: CancelToken,
    status: LoopStatus,
    next_timestamp: u64,
}

impl<'e, S, D, E> CaptureLoop<'e, S, D, E>
where
    S: FrameSource,
    D: HandLandmarkDetector,
    E: GestureInferenceEngine,
{
    pub fn new(source: S, detector: D, engine: &'e E, state: Arc<GestureState>) -> Self {
        Self {
            resources: Acquired {
                source,
                detector,
                preview: None,
            },
            engine,
            state,
            cancel: CancelToken::new(),
            status: LoopStatus::new(),
            next_timestamp: 0,
        }
    }

    pub fn with_preview(mut self, preview: Box<dyn PreviewSurface>) -> Self {
        self.resources.preview = Some(preview);
        self
    }

    /// Replaces the loop's own token, e.g. to share one with a signal source.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// First timestamp handed to the engine.
    pub fn starting_at(mut self, timestamp: u64) -> Self {
        self.next_timestamp = timestamp;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> LoopStatus {
        self.status.clone()
    }

    /// Runs until end of stream, cancellation or a fatal source error.
    /// Resources are released before this returns on every path.
    pub fn run(self) -> Result<LoopReport, PipelineError> {
        let Self {
            mut resources,
            engine,
            state,
            cancel,
            status,
            mut next_timestamp,
        } = self;

        let outcome = match resources.source.open() {
            Ok(()) => {
                status.set(LoopState::Running);
                log::info!("capture loop running");
                run_frames(&mut resources, engine, &state, &cancel, &mut next_timestamp)
            }
            Err(err) => Err(err),
        };
        drop(resources);

        match &outcome {
            Ok(report) => {
                status.set(LoopState::Stopped);
                log::info!(
                    "capture loop stopped ({:?}) after {} frames, {} submissions",
                    report.reason,
                    report.frames,
                    report.submissions
                );
            }
            Err(err) => {
                status.set(LoopState::Faulted);
                log::error!("capture loop faulted: {err}");
            }
        }
        outcome
    }
}

fn run_frames<S, D, E>(
    resources: &mut Acquired<S, D>,
    engine: &E,
    state: &GestureState,
    cancel: &CancelToken,
    next_timestamp: &mut u64,
) -> Result<LoopReport, PipelineError>
where
    S: FrameSource,
    D: HandLandmarkDetector,
    E: GestureInferenceEngine,
{
    let mut report = LoopReport::new();

    loop {
        if cancel.is_cancelled() {
            report.reason = StopReason::Cancelled;
            return Ok(report);
        }

        let Some(frame) = resources.source.next_frame()? else {
            report.reason = StopReason::EndOfStream;
            return Ok(report);
        };
        report.frames += 1;

        let hands = match resources.detector.detect(&frame) {
            Ok(hands) => hands,
            Err(err) => {
                log::warn!("hand detection failed, skipping frame: {err:?}");
                report.skipped_frames += 1;
                continue;
            }
        };

        let frame = Arc::new(frame);
        let mut rejected = false;
        for _ in &hands {
            let timestamp = *next_timestamp;
            *next_timestamp = timestamp
                .checked_add(1)
                .ok_or(PipelineError::TimestampsExhausted)?;
            match engine.submit_async(Arc::clone(&frame), timestamp) {
                Ok(()) => report.submissions += 1,
                Err(err) => {
                    log::debug!("inference submission rejected, skipping frame: {err}");
                    report.rejected_submissions += 1;
                    rejected = true;
                    break;
                }
            }
        }
        if rejected {
            report.skipped_frames += 1;
            continue;
        }

        if let Some(preview) = resources.preview.as_mut() {
            let gestures = state.snapshot();
            match preview.present(&frame, &hands, &gestures) {
                Ok(PreviewSignal::Continue) => {}
                Ok(PreviewSignal::Cancel) => {
                    log::info!("preview requested stop");
                    cancel.cancel();
                }
                Err(err) => log::warn!("preview failed: {err:?}"),
            }
        }
    }
}
