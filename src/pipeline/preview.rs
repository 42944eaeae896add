use anyhow::Result;

use super::overlay::{Canvas, draw_annotations};
use crate::{gesture::Gesture, types::{Frame, HandLandmarks}};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewSignal {
    Continue,
    /// The user asked to stop (window closed or Escape).
    Cancel,
}

/// Somewhere to show the annotated frame each loop iteration.
pub trait PreviewSurface {
    fn present(
        &mut self,
        frame: &Frame,
        hands: &[HandLandmarks],
        gestures: &[Gesture],
    ) -> Result<PreviewSignal>;

    fn close(&mut self) {}
}

/// Copies the frame and draws the overlay on the copy.
pub fn annotate(frame: &Frame, hands: &[HandLandmarks], gestures: &[Gesture]) -> Vec<u8> {
    let mut rgba = frame.rgba.clone();
    let mut canvas = Canvas::new(&mut rgba, frame.width, frame.height);
    draw_annotations(&mut canvas, hands, gestures);
    rgba
}

/// RGBA bytes to the `0RGB` words minifb expects.
pub fn pack_rgb(rgba: &[u8]) -> Vec<u32> {
    rgba.chunks_exact(4)
        .map(|px| (u32::from(px[0]) << 16) | (u32::from(px[1]) << 8) | u32::from(px[2]))
        .collect()
}

#[cfg(feature = "preview")]
pub use window::MinifbPreview;

#[cfg(feature = "preview")]
mod window {
    use std::time::Duration;

    use anyhow::{Result, anyhow};
    use minifb::{Key, Window, WindowOptions};

    use super::{PreviewSignal, PreviewSurface, annotate, pack_rgb};
    use crate::{gesture::Gesture, types::{Frame, HandLandmarks}};

    const TITLE: &str = "Gesture Remote";

    /// Native window opened on the first presented frame.
    #[derive(Default)]
    pub struct MinifbPreview {
        window: Option<Window>,
        size: (usize, usize),
    }

    impl MinifbPreview {
        pub fn new() -> Self {
            Self::default()
        }

        fn window_for(&mut self, width: usize, height: usize) -> Result<&mut Window> {
            if self.window.is_none() || self.size != (width, height) {
                let mut window = Window::new(
                    TITLE,
                    width,
                    height,
                    WindowOptions {
                        resize: true,
                        ..WindowOptions::default()
                    },
                )
                .map_err(|err| anyhow!("failed to open preview window: {err}"))?;
                window.limit_update_rate(Some(Duration::from_millis(16)));
                self.size = (width, height);
                self.window = Some(window);
            }
            self.window
                .as_mut()
                .ok_or_else(|| anyhow!("preview window unavailable"))
        }
    }

    impl PreviewSurface for MinifbPreview {
        fn present(
            &mut self,
            frame: &Frame,
            hands: &[HandLandmarks],
            gestures: &[Gesture],
        ) -> Result<PreviewSignal> {
            let (width, height) = (frame.width as usize, frame.height as usize);
            let pixels = pack_rgb(&annotate(frame, hands, gestures));

            let window = self.window_for(width, height)?;
            if !window.is_open() || window.is_key_down(Key::Escape) {
                return Ok(PreviewSignal::Cancel);
            }
            window
                .update_with_buffer(&pixels, width, height)
                .map_err(|err| anyhow!("failed to update preview window: {err}"))?;
            Ok(PreviewSignal::Continue)
        }

        fn close(&mut self) {
            if self.window.take().is_some() {
                log::debug!("preview window closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_rgba_into_rgb_words() {
        assert_eq!(
            pack_rgb(&[0x12, 0x34, 0x56, 0xff, 1, 2, 3, 0]),
            vec![0x0012_3456, 0x0001_0203]
        );
    }

    #[test]
    fn annotate_leaves_the_source_frame_untouched() {
        let frame = Frame::new(vec![0; 200 * 100 * 4], 200, 100);
        let annotated = annotate(&frame, &[], &[Gesture::ClosedFist]);
        assert!(frame.rgba.iter().all(|&b| b == 0));
        assert!(annotated.iter().any(|&b| b != 0));
    }
}
