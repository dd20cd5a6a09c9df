//! Tagged depth datagrams.
//!
//! Every datagram starts with a 12-byte little-endian header
//! `[frame_id][frame_type][payload_size]` followed by a chunk of a PNG
//! payload. Chunks of one logical frame are concatenated until
//! `payload_size` bytes are available.
//!
//! There is one rolling buffer per reassembler, not one per `frame_id`:
//! chunks are assumed to arrive in order and one logical frame at a time.
//! Reordered or interleaved chunks produce a payload that fails to decode
//! and is dropped; they are not reordered here.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use metrics::counter;
use tokio::net::UdpSocket;
use tracing::{debug, info, instrument, trace, warn};

use super::decoder::decode_frame;
use super::frame::PixelFormat;
use crate::error::IngestError;
use crate::pipeline::FrameStore;
use crate::utils::ShutdownSignal;

pub const HEADER_LEN: usize = 12;

/// Frame type carrying raw 16-bit depth PNGs
pub const DEPTH_FRAME_TYPE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    /// Informational only
    pub frame_id: u32,
    pub frame_type: u32,
    pub payload_size: u32,
}

impl DatagramHeader {
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        let field = |at: usize| -> Option<u32> {
            let bytes = datagram.get(at..at + 4)?;
            Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        };
        Some(Self {
            frame_id: field(0)?,
            frame_type: field(4)?,
            payload_size: field(8)?,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.frame_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.frame_type.to_le_bytes());
        out[8..12].copy_from_slice(&self.payload_size.to_le_bytes());
        out
    }
}

/// Outcome of feeding one datagram.
#[derive(Debug, PartialEq, Eq)]
pub enum Fragment {
    /// A whole payload is available
    Complete { frame_id: u32, payload: Bytes },
    /// Accepted, frame still incomplete
    Pending,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Shorter than the header
    Runt,
    /// Not a depth datagram
    FrameType(u32),
    /// Declared size of zero or above the configured maximum
    PayloadSize(u32),
}

impl DropReason {
    fn as_label(self) -> &'static str {
        match self {
            DropReason::Runt => "runt",
            DropReason::FrameType(_) => "frame_type",
            DropReason::PayloadSize(_) => "payload_size",
        }
    }
}

pub struct DatagramFrameReassembler {
    buffer: BytesMut,
    max_payload: u32,
}

impl DatagramFrameReassembler {
    pub fn new(max_payload: u32) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_payload,
        }
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn push(&mut self, datagram: &[u8]) -> Fragment {
        let Some(header) = DatagramHeader::parse(datagram) else {
            return Fragment::Dropped(DropReason::Runt);
        };
        if header.frame_type != DEPTH_FRAME_TYPE {
            return Fragment::Dropped(DropReason::FrameType(header.frame_type));
        }
        if header.payload_size == 0 || header.payload_size > self.max_payload {
            return Fragment::Dropped(DropReason::PayloadSize(header.payload_size));
        }

        self.buffer.extend_from_slice(&datagram[HEADER_LEN..]);

        let size = header.payload_size as usize;
        if self.buffer.len() < size {
            return Fragment::Pending;
        }
        // Surplus stays buffered as the start of the next frame
        let payload = self.buffer.split_to(size).freeze();
        Fragment::Complete {
            frame_id: header.frame_id,
            payload,
        }
    }
}

/// Receive depth datagrams into `store` until a socket error or shutdown.
///
/// Receive timeouts are not errors; the worker simply polls again. After an
/// error the owner may call this again on the same socket.
#[instrument(skip_all, name = "depth_ingress")]
pub async fn run_depth_ingress(
    socket: &UdpSocket,
    store: FrameStore,
    mut reassembler: DatagramFrameReassembler,
    poll_timeout: Duration,
    buffer_bytes: usize,
    mut shutdown: ShutdownSignal,
) -> Result<(), IngestError> {
    let mut buf = vec![0u8; buffer_bytes.max(HEADER_LEN)];

    loop {
        let received = tokio::select! {
            received = tokio::time::timeout(poll_timeout, socket.recv_from(&mut buf)) => received,
            _ = shutdown.wait() => break,
        };
        let len = match received {
            Err(_) => {
                trace!("No depth datagram within {:?}", poll_timeout);
                continue;
            }
            Ok(Ok((len, _peer))) => len,
            Ok(Err(e)) => {
                warn!("Depth socket failed: {}", e);
                return Err(e.into());
            }
        };

        match reassembler.push(&buf[..len]) {
            Fragment::Complete { frame_id, payload } => {
                counter!("periscope_datagrams_total", "outcome" => "complete").increment(1);
                match decode_frame(&payload, PixelFormat::Depth16) {
                    Ok(frame) => {
                        counter!("periscope_frames_decoded_total", "stream" => "depth").increment(1);
                        store.write(frame);
                    }
                    Err(e) => {
                        counter!("periscope_frames_dropped_total", "stream" => "depth", "reason" => "decode")
                            .increment(1);
                        debug!("Dropping depth frame {}: {}", frame_id, e);
                    }
                }
            }
            Fragment::Pending => {
                counter!("periscope_datagrams_total", "outcome" => "pending").increment(1);
            }
            Fragment::Dropped(reason) => {
                counter!("periscope_datagrams_total", "outcome" => reason.as_label()).increment(1);
                trace!("Dropped datagram: {:?}", reason);
            }
        }
    }

    info!("Depth ingress stopped");
    Ok(())
}
