//! Pull-based multipart JPEG publisher

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use flume::{Receiver, Sender, TrySendError};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use metrics::counter;
use tracing::{debug, error, trace, warn};

use super::stats::StatsAggregator;
use super::store::FrameStore;
use crate::capture::{PixelFormat, RasterFrame};
use crate::detect::DetectionStage;
use crate::error::PublishError;

/// Multipart boundary between chunks
pub const BOUNDARY: &str = "frame";

/// `Content-Type` for a response carrying these chunks.
pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={BOUNDARY}")
}

/// Wrap an encoded JPEG as one self-contained multipart part.
pub fn frame_chunk(jpeg: &[u8]) -> Bytes {
    let head = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut chunk = BytesMut::with_capacity(head.len() + jpeg.len() + 2);
    chunk.put_slice(head.as_bytes());
    chunk.put_slice(jpeg);
    chunk.put_slice(b"\r\n");
    chunk.freeze()
}

/// Produces encoded chunks of the latest frame, one per pull.
///
/// Every consumer owns its own publisher (or clone); nothing is buffered
/// between pulls, so a slow consumer only ever sees the newest frame.
#[derive(Clone)]
pub struct StreamPublisher {
    store: FrameStore,
    stage: Arc<DetectionStage>,
    stats: Arc<StatsAggregator>,
    jpeg_quality: u8,
    empty_wait: Duration,
}

impl StreamPublisher {
    pub fn new(
        store: FrameStore,
        stage: Arc<DetectionStage>,
        stats: Arc<StatsAggregator>,
        jpeg_quality: u8,
        empty_wait: Duration,
    ) -> Self {
        Self {
            store,
            stage,
            stats,
            jpeg_quality: jpeg_quality.clamp(1, 100),
            empty_wait,
        }
    }

    /// One publish attempt: snapshot, detect, encode, record, wrap.
    ///
    /// Blocks for the duration of detection and encoding.
    pub fn publish_once(&self) -> Result<Bytes, PublishError> {
        let frame = self.store.read_snapshot().ok_or(PublishError::Empty)?;
        let annotated = self.stage.detect(frame);
        let jpeg = encode_jpeg(&annotated.frame, self.jpeg_quality)?;

        self.stats.record_arrival(Instant::now());
        self.stats.record_bytes(jpeg.len());
        counter!("periscope_chunks_published_total").increment(1);
        Ok(frame_chunk(&jpeg))
    }

    /// [`publish_once`](Self::publish_once) on the blocking pool, off the
    /// workers the ingress tasks run on.
    async fn publish_off_runtime(&self) -> Result<Bytes, PublishError> {
        let publisher = self.clone();
        tokio::task::spawn_blocking(move || publisher.publish_once()).await?
    }

    /// Wait for the next chunk. Empty stores and bad frames are retried, never returned.
    pub async fn next_chunk(&self) -> Bytes {
        loop {
            match self.publish_off_runtime().await {
                Ok(chunk) => return chunk,
                Err(e) => self.back_off(&e).await,
            }
        }
    }

    /// Spawn a production loop that serves pulls from the returned handle.
    ///
    /// The store is read once per [`Subscription::recv`], never ahead of
    /// it. The loop ends as soon as the subscription is dropped. Must be
    /// called within a Tokio runtime.
    pub fn subscribe(&self) -> Subscription {
        let (request_tx, request_rx) = flume::bounded::<()>(1);
        let (chunk_tx, chunk_rx) = flume::bounded(1);
        let publisher = self.clone();

        tokio::spawn(async move {
            'serve: while request_rx.recv_async().await.is_ok() {
                loop {
                    if chunk_tx.is_disconnected() {
                        break 'serve;
                    }
                    match publisher.publish_off_runtime().await {
                        Ok(chunk) => {
                            if chunk_tx.send_async(chunk).await.is_err() {
                                break 'serve;
                            }
                            break;
                        }
                        Err(PublishError::Task(e)) => {
                            error!("Publish task for {} stream died: {}", publisher.store.name(), e);
                            break 'serve;
                        }
                        Err(e) => publisher.back_off(&e).await,
                    }
                }
            }
            debug!("Consumer disconnected from {} stream", publisher.store.name());
        });

        Subscription {
            requests: request_tx,
            chunks: chunk_rx,
        }
    }

    async fn back_off(&self, err: &PublishError) {
        match err {
            PublishError::Empty => trace!("No {} frame yet", self.store.name()),
            _ => warn!("Skipping {} frame: {}", self.store.name(), err),
        }
        // The slot only changes on the next write, so retrying at once would spin
        tokio::time::sleep(self.empty_wait).await;
    }
}

/// One consumer's pull handle. Dropping it stops its production loop.
pub struct Subscription {
    requests: Sender<()>,
    chunks: Receiver<Bytes>,
}

impl Subscription {
    /// Ask for a chunk of the current frame and wait for it.
    ///
    /// Returns `None` once the production loop has stopped.
    pub async fn recv(&self) -> Option<Bytes> {
        // Answer to a pull that was abandoned mid-wait; already stale
        let _ = self.chunks.try_recv();
        match self.requests.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => return None,
        }
        self.chunks.recv_async().await.ok()
    }
}

/// Encode an RGB raster as baseline JPEG.
pub fn encode_jpeg(frame: &RasterFrame, quality: u8) -> Result<Vec<u8>, PublishError> {
    if frame.format() != PixelFormat::Rgb24 {
        return Err(PublishError::UnsupportedFormat(frame.format()));
    }
    let mut out = Vec::with_capacity(frame.data.len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality).encode(
        &frame.data,
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}
