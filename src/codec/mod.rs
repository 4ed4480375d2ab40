//! Wire codec for the control and data channels
//!
//! All integers are 4-byte little-endian `i32`. A command is its ordinal;
//! the GET_FORMAT reply carries a length-prefixed format message and the
//! START_PLAY reply carries the stream id. UDP datagrams are raw PCM.
//!
//! [`ControlCodec`] is the client side (decodes server frames, encodes
//! commands) and [`ServerCodec`] the mirror used by the mock server.

pub mod decoder;
pub mod encoder;

pub use decoder::{decode_command, decode_i32, decode_server_frame};
pub use encoder::{encode_command, encode_server_frame, stream_id_datagram};

/// Size of every integer on the wire
pub const INT_SIZE: usize = 4;

/// Upper bound for the serialized format message
pub const MAX_FORMAT_PAYLOAD: usize = 64 * 1024;

/// Client side of the control channel framing
#[derive(Debug, Default, Clone, Copy)]
pub struct ControlCodec;

/// Server side of the control channel framing
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerCodec;
