#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod capture;
pub mod overlay;
pub mod preview;
pub mod recognizer;
#[cfg(feature = "camera-nokhwa")]
pub mod rgba_converter;
pub mod source;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::NokhwaCamera;
pub use capture::{CancelToken, CaptureLoop, LoopReport, LoopState, LoopStatus, StopReason};
pub use preview::{PreviewSignal, PreviewSurface};
pub use recognizer::{
    CompletionHandler, GestureInferenceEngine, GestureModel, HandLandmarkDetector, InferencePool,
};
pub use source::{FrameSource, ImageSequenceSource};
