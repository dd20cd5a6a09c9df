pub mod datagram;
pub mod decoder;
pub mod frame;
pub mod stream;

pub use datagram::{DatagramFrameReassembler, DatagramHeader};
pub use frame::{FrameMetadata, PixelFormat, RasterFrame};
pub use stream::StreamFrameDecoder;
