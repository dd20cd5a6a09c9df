//! Length-prefixed color stream: `[u32 big-endian length][length bytes of JPEG]`

use std::io::ErrorKind;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use metrics::counter;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tracing::{debug, info, instrument, warn};

use super::decoder::decode_frame;
use super::frame::{PixelFormat, RasterFrame};
use crate::error::IngestError;
use crate::pipeline::FrameStore;
use crate::utils::ShutdownSignal;

const LENGTH_PREFIX: usize = 4;

/// Reassembles length-prefixed payloads from one byte-stream connection.
///
/// Not restartable: once the connection ends, build a new decoder for the
/// next one.
pub struct StreamFrameDecoder<R> {
    reader: R,
    max_payload: u32,
    payloads: u64,
}

/// Why a connection stopped producing frames.
#[derive(Debug)]
pub enum ConnectionEnd {
    /// Peer closed, possibly mid-frame
    Closed,
    /// Socket error or unrecoverable framing
    Failed(IngestError),
    Shutdown,
}

impl<R: AsyncRead + Unpin> StreamFrameDecoder<R> {
    pub fn new(reader: R, max_payload: u32) -> Self {
        Self {
            reader,
            max_payload,
            payloads: 0,
        }
    }

    /// Payloads fully received so far.
    pub fn payloads(&self) -> u64 {
        self.payloads
    }

    /// Read the next complete payload.
    ///
    /// Returns `Ok(None)` once the peer has closed, whether that happens on a
    /// frame boundary or part-way through a header or payload. Partial
    /// payloads are discarded.
    pub async fn next_payload(&mut self) -> Result<Option<Bytes>, IngestError> {
        let mut prefix = [0u8; LENGTH_PREFIX];
        if !read_full(&mut self.reader, &mut prefix).await? {
            return Ok(None);
        }

        let size = u32::from_be_bytes(prefix);
        if size > self.max_payload {
            return Err(IngestError::PayloadSize {
                size,
                max: self.max_payload,
            });
        }

        let mut payload = BytesMut::zeroed(size as usize);
        if !read_full(&mut self.reader, &mut payload).await? {
            debug!("Peer closed mid-payload ({} bytes declared)", size);
            return Ok(None);
        }

        self.payloads += 1;
        Ok(Some(payload.freeze()))
    }

    /// Read payloads until one decodes. Corrupt payloads are skipped.
    pub async fn next_frame(&mut self) -> Result<Option<RasterFrame>, IngestError> {
        while let Some(payload) = self.next_payload().await? {
            match decode_frame(&payload, PixelFormat::Rgb24) {
                Ok(frame) => {
                    counter!("periscope_frames_decoded_total", "stream" => "color").increment(1);
                    return Ok(Some(frame));
                }
                Err(e) => {
                    counter!("periscope_frames_dropped_total", "stream" => "color", "reason" => "decode")
                        .increment(1);
                    debug!("Skipping undecodable color payload ({} bytes): {}", payload.len(), e);
                }
            }
        }
        Ok(None)
    }
}

/// `read_exact` that reports a clean or partial close as `false`.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<bool, IngestError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Decode frames from one connection into `store` until it ends.
pub async fn pump_connection<R: AsyncRead + Unpin>(
    decoder: &mut StreamFrameDecoder<R>,
    store: &FrameStore,
    shutdown: &mut ShutdownSignal,
) -> ConnectionEnd {
    loop {
        let next = tokio::select! {
            next = decoder.next_frame() => next,
            _ = shutdown.wait() => return ConnectionEnd::Shutdown,
        };
        match next {
            Ok(Some(frame)) => {
                store.write(frame);
            }
            Ok(None) => return ConnectionEnd::Closed,
            Err(e) => return ConnectionEnd::Failed(e),
        }
    }
}

/// Accept color producers one at a time.
///
/// The next connection is accepted only after the current one has ended;
/// later connection attempts wait in the listen backlog meanwhile.
#[instrument(skip_all, name = "color_ingress")]
pub async fn run_color_ingress(
    listener: TcpListener,
    store: FrameStore,
    max_payload: u32,
    mut shutdown: ShutdownSignal,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.wait() => break,
        };
        let (socket, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        info!("Color producer connected: {}", peer);
        let mut decoder = StreamFrameDecoder::new(socket, max_payload);
        match pump_connection(&mut decoder, &store, &mut shutdown).await {
            ConnectionEnd::Closed => {
                info!("Color producer {} disconnected after {} frames", peer, decoder.payloads())
            }
            ConnectionEnd::Failed(e) => warn!("Color connection from {} failed: {}", peer, e),
            ConnectionEnd::Shutdown => break,
        }
    }
    info!("Color ingress stopped");
}
