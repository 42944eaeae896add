use anyhow::{Result, anyhow};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

/// Decodes a camera buffer of any format nokhwa can hand us into an RGBA
/// [`Frame`].
pub fn decode_camera_buffer(buffer: &Buffer) -> Result<Frame> {
    let resolution = buffer.resolution();
    let (width, height) = (resolution.width_x, resolution.height_y);
    let data = buffer.buffer();
    let pixels = width as usize * height as usize;

    let rgba = match buffer.source_frame_format() {
        FrameFormat::NV12 => {
            require_len(data, pixels + pixels / 2, "NV12")?;
            let mut rgba = vec![0u8; pixels * 4];
            let image = YuvBiPlanarImage {
                y_plane: &data[..pixels],
                y_stride: width,
                uv_plane: &data[pixels..pixels + pixels / 2],
                uv_stride: width,
                width,
                height,
            };
            yuv_nv12_to_rgba(
                &image,
                &mut rgba,
                width * 4,
                YuvRange::Full,
                YuvStandardMatrix::Bt709,
                YuvConversionMode::Balanced,
            )
            .map_err(|err| anyhow!("NV12 conversion failed: {err:?}"))?;
            rgba
        }
        FrameFormat::YUYV => {
            require_len(data, pixels * 2, "YUYV")?;
            let mut rgba = vec![0u8; pixels * 4];
            let packed = YuvPackedImage {
                yuy: data,
                yuy_stride: width * 2,
                width,
                height,
            };
            yuyv422_to_rgba(
                &packed,
                &mut rgba,
                width * 4,
                YuvRange::Full,
                YuvStandardMatrix::Bt709,
            )
            .map_err(|err| anyhow!("YUYV conversion failed: {err:?}"))?;
            rgba
        }
        FrameFormat::MJPEG => {
            // The camera's nominal resolution can differ from what it encodes.
            let (rgba, width, height) = decode_mjpeg(data)?;
            return Ok(Frame::new(rgba, width, height));
        }
        FrameFormat::RAWRGB => expand::<3>(data, pixels, |px| [px[0], px[1], px[2]])?,
        FrameFormat::RAWBGR => expand::<3>(data, pixels, |px| [px[2], px[1], px[0]])?,
        FrameFormat::GRAY => expand::<1>(data, pixels, |px| [px[0]; 3])?,
    };

    Ok(Frame::new(rgba, width, height))
}

fn require_len(data: &[u8], needed: usize, format: &str) -> Result<()> {
    if data.len() < needed {
        return Err(anyhow!(
            "{format} buffer too small: got {}, expected {needed}",
            data.len()
        ));
    }
    Ok(())
}

fn decode_mjpeg(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;
    let width = u32::try_from(info.width).map_err(|_| anyhow!("MJPEG width out of range"))?;
    let height = u32::try_from(info.height).map_err(|_| anyhow!("MJPEG height out of range"))?;

    let expected = width as usize * height as usize * 4;
    if rgba.len() != expected {
        return Err(anyhow!(
            "MJPEG decode produced {} bytes for {width}x{height}, expected {expected}",
            rgba.len()
        ));
    }
    Ok((rgba, width, height))
}

/// Widens packed `N`-byte pixels to opaque RGBA.
fn expand<const N: usize>(
    data: &[u8],
    pixels: usize,
    to_rgb: impl Fn(&[u8]) -> [u8; 3] + Sync,
) -> Result<Vec<u8>> {
    require_len(data, pixels * N, "raw")?;
    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_chunks_exact(N))
        .for_each(|(dst, src)| {
            dst[..3].copy_from_slice(&to_rgb(src));
            dst[3] = 255;
        });
    Ok(rgba)
}
