pub mod codec;
pub mod types;

pub use codec::FrameCodec;
pub use types::{frames_for_payload, sha1_hex, sha512_hex, Frame, DEFAULT_MAX_PACKET_SIZE};
