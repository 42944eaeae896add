use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{error::PipelineError, types::Frame};

/// A blocking sequence of frames.
pub trait FrameSource {
    fn open(&mut self) -> Result<(), PipelineError>;

    /// Blocks until the next frame. `Ok(None)` is end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError>;

    /// Releases the device. Must be safe to call on a source that never
    /// opened.
    fn release(&mut self);
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn open(&mut self) -> Result<(), PipelineError> {
        (**self).open()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Plays back the png/jpeg files of a directory in file-name order.
pub struct ImageSequenceSource {
    dir: PathBuf,
    pending: Vec<PathBuf>,
    opened: bool,
}

impl ImageSequenceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending: Vec::new(),
            opened: false,
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn open(&mut self) -> Result<(), PipelineError> {
        let entries = fs::read_dir(&self.dir).map_err(|err| {
            PipelineError::SourceOpen(format!("cannot read {}: {err}", self.dir.display()))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image(path))
            .collect();
        files.sort();
        // Popped from the back.
        files.reverse();

        log::info!(
            "replaying {} images from {}",
            files.len(),
            self.dir.display()
        );
        self.pending = files;
        self.opened = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if !self.opened {
            return Err(PipelineError::Stream("image source is not open".into()));
        }
        let Some(path) = self.pending.pop() else {
            return Ok(None);
        };
        let image = image::open(&path)
            .map_err(|err| PipelineError::Stream(format!("{}: {err}", path.display())))?
            .to_rgba8();
        let (width, height) = image.dimensions();
        Ok(Some(Frame::new(image.into_raw(), width, height)))
    }

    fn release(&mut self) {
        self.pending.clear();
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;

    #[test]
    fn replays_images_in_name_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(2, 1, Rgba([1, 2, 3, 255]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbaImage::from_pixel(3, 2, Rgba([9, 9, 9, 255]))
            .save(dir.path().join("a.png"))
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut source = ImageSequenceSource::new(dir.path());
        source.open().unwrap();

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!((first.width, first.height), (3, 2));
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!((second.width, second.height), (2, 1));
        assert_eq!(&second.rgba[..4], &[1, 2, 3, 255]);
        assert!(source.next_frame().unwrap().is_none());
        source.release();
    }

    #[test]
    fn missing_directory_fails_to_open() {
        let mut source = ImageSequenceSource::new("/definitely/not/here");
        assert!(matches!(source.open(), Err(PipelineError::SourceOpen(_))));
        source.release();
    }

    #[test]
    fn corrupt_image_is_a_stream_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.png"), b"not a png").unwrap();
        let mut source = ImageSequenceSource::new(dir.path());
        source.open().unwrap();
        assert!(matches!(source.next_frame(), Err(PipelineError::Stream(_))));
    }
}
