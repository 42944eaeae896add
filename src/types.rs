use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::gesture::Gesture;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
            captured_at: Instant::now(),
        }
    }

    pub fn expected_len(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(4)
    }
}

/// One detected hand as seen by the palm detector.
#[derive(Clone, Debug)]
pub struct HandLandmarks {
    pub bbox: [f32; 4],
    pub landmarks: Vec<(f32, f32)>,
    pub score: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GestureCandidate {
    pub gesture: Gesture,
    pub score: f32,
    pub hand_index: usize,
}

impl GestureCandidate {
    pub fn new(gesture: Gesture, score: f32, hand_index: usize) -> Self {
        Self {
            gesture,
            score,
            hand_index,
        }
    }

    pub fn category_name(&self) -> &'static str {
        self.gesture.category_name()
    }
}

/// Result of one inference submission, delivered to the completion handler.
///
/// `hands` holds one ranked candidate list per detected hand, best first.
#[derive(Clone, Debug)]
pub struct Completion {
    pub timestamp: u64,
    pub hands: Vec<Vec<GestureCandidate>>,
    pub image: Arc<Frame>,
}

impl Completion {
    /// Time from frame capture until now.
    pub fn latency(&self) -> Duration {
        self.image.captured_at.elapsed()
    }
}
