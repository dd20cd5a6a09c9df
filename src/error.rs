//! Error types shared across the ingest and publish paths

use thiserror::Error;

/// Failure to turn a compressed payload into a raster frame.
///
/// Always per-item: the offending payload is dropped and the caller keeps
/// reading.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("jpeg decode failed: {0}")]
    Jpeg(String),

    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("decoded {actual} bytes, expected {expected} for {width}x{height} rgb")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("depth payload must be single-channel 16-bit, got {0:?}")]
    UnsupportedDepthFormat(image::ColorType),

    #[error("empty payload")]
    Empty,
}

/// Connection-level failure on an ingress socket.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("declared payload of {size} bytes outside 1..={max}")]
    PayloadSize { size: u32, max: u32 },
}

/// Failure of the injected detector for a single pass.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("detector input preparation failed: {0}")]
    Input(String),

    #[error("detector backend failed: {0}")]
    Backend(String),
}

/// Why a single publish attempt produced no chunk.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("frame store is empty")]
    Empty,

    #[error("frame encode failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("cannot publish {0:?} frames")]
    UnsupportedFormat(crate::capture::PixelFormat),

    #[error("publish task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Point projection was handed something other than a depth raster.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("expected a depth frame, got {0:?}")]
    NotDepth(crate::capture::PixelFormat),

    #[error("invalid projection parameter: {0}")]
    InvalidParameter(&'static str),
}
