//! SSD anchor centres for the 192×192 MediaPipe palm detector.
//!
//! One 24×24 grid (stride 8) with two anchors per cell, then one 12×12 grid
//! (stride 16) with six anchors per cell, for 2016 anchors in total. The model
//! uses fixed-size anchors, so only the normalised centres matter.

use super::super::common::PALM_INPUT_SIZE;

const STRIDES: [(u32, usize); 2] = [(8, 2), (16, 6)];

pub const NUM_ANCHORS: usize = 2016;

pub fn generate() -> Vec<[f32; 2]> {
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);
    for (stride, per_cell) in STRIDES {
        let grid = PALM_INPUT_SIZE.div_ceil(stride);
        for y in 0..grid {
            for x in 0..grid {
                let cx = (x as f32 + 0.5) / grid as f32;
                let cy = (y as f32 + 0.5) / grid as f32;
                anchors.extend(std::iter::repeat_n([cx, cy], per_cell));
            }
        }
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_model_output() {
        let anchors = generate();
        assert_eq!(anchors.len(), NUM_ANCHORS);
        assert_eq!(anchors[0], [0.5 / 24.0, 0.5 / 24.0]);
        assert_eq!(anchors[1], anchors[0]);
        assert_eq!(anchors[2], [1.5 / 24.0, 0.5 / 24.0]);
        assert_eq!(anchors[1152], [0.5 / 12.0, 0.5 / 12.0]);
        assert_eq!(anchors[NUM_ANCHORS - 1], [11.5 / 12.0, 11.5 / 12.0]);
    }
}
