use bytes::Bytes;
use image::DynamicImage;
use tracing::trace;
use zune_jpeg::JpegDecoder;

use super::frame::{PixelFormat, RasterFrame};
use crate::error::DecodeError;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Decode a compressed payload into a raster of the requested format.
///
/// Color payloads take the zune-jpeg fast path when they carry a JPEG start
/// marker, and the generic `image` decoders otherwise or when the fast path
/// fails. Depth
/// payloads must decode to a single 16-bit channel (PNG in practice).
pub fn decode_frame(data: &[u8], format: PixelFormat) -> Result<RasterFrame, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }
    match format {
        PixelFormat::Rgb24 if data.starts_with(&JPEG_SOI) => decode_color_jpeg(data, decode_jpeg),
        PixelFormat::Rgb24 => decode_generic(data),
        PixelFormat::Depth16 => decode_depth(data),
    }
}

/// Fast path first; anything it rejects (CMYK, odd subsampling) gets a
/// second try through the generic decoders.
fn decode_color_jpeg(
    data: &[u8],
    fast: impl FnOnce(&[u8]) -> Result<RasterFrame, DecodeError>,
) -> Result<RasterFrame, DecodeError> {
    fast(data).or_else(|e| {
        trace!("Fast JPEG path failed ({}), using fallback decoder", e);
        decode_generic(data)
    })
}

fn decode_generic(data: &[u8]) -> Result<RasterFrame, DecodeError> {
    let rgb = image::load_from_memory(data)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(RasterFrame::rgb(width, height, rgb.into_raw()))
}

fn decode_jpeg(data: &[u8]) -> Result<RasterFrame, DecodeError> {
    let mut decoder = JpegDecoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| DecodeError::Jpeg(format!("{e:?}")))?;
    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| DecodeError::Jpeg("missing frame header".into()))?;

    let (width, height) = (width as u32, height as u32);
    let expected = width as usize * height as usize * 3;
    if pixels.len() != expected {
        return Err(DecodeError::SizeMismatch {
            width,
            height,
            expected,
            actual: pixels.len(),
        });
    }
    Ok(RasterFrame::rgb(width, height, Bytes::from(pixels)))
}

fn decode_depth(data: &[u8]) -> Result<RasterFrame, DecodeError> {
    match image::load_from_memory(data)? {
        DynamicImage::ImageLuma16(depth) => {
            let (width, height) = depth.dimensions();
            Ok(RasterFrame::depth(width, height, depth.as_raw()))
        }
        other => Err(DecodeError::UnsupportedDepthFormat(other.color())),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, ImageBuffer, ImageEncoder, ImageFormat, Luma};
    use std::io::Cursor;

    pub(crate) fn jpeg_payload(width: u32, height: u32) -> Vec<u8> {
        let pixels: Vec<u8> = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode(&pixels, width, height, ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    pub(crate) fn depth_png_payload(width: u32, height: u32, samples: &[u16]) -> Vec<u8> {
        let depth = ImageBuffer::<Luma<u16>, _>::from_raw(width, height, samples.to_vec()).unwrap();
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageLuma16(depth)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn decodes_jpeg_color() {
        let frame = decode_frame(&jpeg_payload(16, 8), PixelFormat::Rgb24).unwrap();
        assert_eq!((frame.width(), frame.height()), (16, 8));
        assert_eq!(frame.format(), PixelFormat::Rgb24);
        assert_eq!(frame.data.len(), 16 * 8 * 3);
    }

    #[test]
    fn rejected_jpeg_falls_back_to_generic_decoder() {
        let payload = jpeg_payload(12, 6);
        let frame = decode_color_jpeg(&payload, |_| {
            Err(DecodeError::SizeMismatch {
                width: 12,
                height: 6,
                expected: 12 * 6 * 3,
                actual: 12 * 6 * 4,
            })
        })
        .unwrap();
        assert_eq!((frame.width(), frame.height()), (12, 6));
        assert_eq!(frame.data.len(), 12 * 6 * 3);

        let garbage = [0xFF, 0xD8, 0x00, 0x01];
        assert!(matches!(
            decode_color_jpeg(&garbage, |_| Err(DecodeError::Jpeg("bad".into()))),
            Err(DecodeError::Image(_))
        ));
    }

    #[test]
    fn decodes_png_color_through_fallback() {
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(&[10, 20, 30, 40, 50, 60], 2, 1, ExtendedColorType::Rgb8)
            .unwrap();
        let frame = decode_frame(&out, PixelFormat::Rgb24).unwrap();
        assert_eq!(&frame.data[..], &[10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn decodes_sixteen_bit_depth() {
        let samples = [0u16, 100, 1000, 4999, 5000, 65535];
        let payload = depth_png_payload(3, 2, &samples);
        let frame = decode_frame(&payload, PixelFormat::Depth16).unwrap();
        assert_eq!(frame.depth_at(2, 0), Some(1000));
        assert_eq!(frame.depth_at(2, 1), Some(65535));
    }

    #[test]
    fn rejects_eight_bit_depth() {
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(&[1, 2, 3, 4], 2, 2, ExtendedColorType::L8)
            .unwrap();
        assert!(matches!(
            decode_frame(&out, PixelFormat::Depth16),
            Err(DecodeError::UnsupportedDepthFormat(_))
        ));
    }

    #[test]
    fn corrupt_payloads_are_errors() {
        assert!(decode_frame(&[0xFF, 0xD8, 0x00, 0x01], PixelFormat::Rgb24).is_err());
        assert!(decode_frame(b"not an image", PixelFormat::Depth16).is_err());
        assert!(matches!(
            decode_frame(&[], PixelFormat::Rgb24),
            Err(DecodeError::Empty)
        ));
    }
}
