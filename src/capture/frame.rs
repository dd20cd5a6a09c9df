use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Decoded raster frame.
///
/// The sample buffer is immutable and reference counted, so a frame handed
/// out by the store is an independent value: annotation works on its own
/// copy and never touches the stored frame.
#[derive(Clone)]
pub struct RasterFrame {
    /// Row-major samples, `stride * height` bytes
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Decode timestamp for staleness checks
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Assigned by the frame store on write; 0 until stored
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: u32,
    pub format: PixelFormat,
}

/// Sample layouts produced by the decoders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Three 8-bit channels, R G B
    Rgb24,
    /// One 16-bit little-endian channel, millimeters
    Depth16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Depth16 => 2,
        }
    }
}

impl RasterFrame {
    /// Build an RGB frame from tightly packed samples.
    pub fn rgb(width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self::new(width, height, PixelFormat::Rgb24, data.into())
    }

    /// Build a depth frame from millimeter samples.
    pub fn depth(width: u32, height: u32, samples: &[u16]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self::new(width, height, PixelFormat::Depth16, Bytes::from(data))
    }

    fn new(width: u32, height: u32, format: PixelFormat, data: Bytes) -> Self {
        Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence: 0,
                width,
                height,
                stride: width * format.bytes_per_pixel(),
                format,
            }),
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// Depth sample in millimeters at `(x, y)`, if this is an in-bounds depth frame.
    pub fn depth_at(&self, x: u32, y: u32) -> Option<u16> {
        if self.meta.format != PixelFormat::Depth16 || x >= self.meta.width || y >= self.meta.height
        {
            return None;
        }
        let offset = (y * self.meta.stride + x * 2) as usize;
        let bytes = self.data.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Same pixels, new sequence number.
    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        Arc::make_mut(&mut self.meta).sequence = sequence;
        self
    }
}

impl std::fmt::Debug for RasterFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterFrame")
            .field("meta", &self.meta)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_samples_are_little_endian() {
        let frame = RasterFrame::depth(2, 2, &[0, 1000, 65535, 42]);
        assert_eq!(frame.meta.stride, 4);
        assert_eq!(frame.depth_at(1, 0), Some(1000));
        assert_eq!(frame.depth_at(0, 1), Some(65535));
        assert_eq!(frame.depth_at(1, 1), Some(42));
        assert_eq!(frame.depth_at(2, 0), None);
    }

    #[test]
    fn depth_at_rejects_color_frames() {
        let frame = RasterFrame::rgb(1, 1, vec![1u8, 2, 3]);
        assert_eq!(frame.depth_at(0, 0), None);
    }

    #[test]
    fn resequencing_leaves_clones_untouched() {
        let original = RasterFrame::rgb(1, 1, vec![0u8; 3]);
        let stored = original.clone().with_sequence(7);
        assert_eq!(original.sequence(), 0);
        assert_eq!(stored.sequence(), 7);
    }
}
