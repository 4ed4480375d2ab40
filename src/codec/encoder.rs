//! Frame encoding
//!
//! Turns commands and server replies into their exact byte sequences.

use bytes::{BufMut, BytesMut};
use prost::Message;
use tokio_util::codec::Encoder;

use super::{ControlCodec, ServerCodec, INT_SIZE};
use crate::error::Error;
use crate::protocol::{Command, ServerFrame, StreamId};

/// Append a command ordinal
pub fn encode_command(command: Command, dst: &mut BytesMut) {
    dst.reserve(INT_SIZE);
    dst.put_i32_le(command.ordinal());
}

/// Append a complete server frame: command followed by its payload
pub fn encode_server_frame(frame: &ServerFrame, dst: &mut BytesMut) {
    encode_command(frame.command(), dst);
    match frame {
        ServerFrame::None | ServerFrame::Heartbeat => {}
        ServerFrame::Format(format) => {
            let payload = format.to_message().encode_to_vec();
            dst.reserve(INT_SIZE + payload.len());
            dst.put_i32_le(payload.len() as i32);
            dst.put_slice(&payload);
        }
        ServerFrame::StreamStarted(id) => {
            dst.reserve(INT_SIZE);
            dst.put_i32_le(*id);
        }
    }
}

/// The single datagram that opens the UDP stream server-side
pub fn stream_id_datagram(id: StreamId) -> [u8; INT_SIZE] {
    id.get().to_le_bytes()
}

impl Encoder<Command> for ControlCodec {
    type Error = Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_command(item, dst);
        Ok(())
    }
}

impl Encoder<ServerFrame> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, item: ServerFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_server_frame(&item, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AudioFormat, Encoding};

    #[test]
    fn test_command_bytes() {
        let mut buf = BytesMut::new();
        encode_command(Command::Heartbeat, &mut buf);
        encode_command(Command::GetFormat, &mut buf);
        assert_eq!(&buf[..], &[3, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_stream_started_frame() {
        let mut buf = BytesMut::new();
        encode_server_frame(&ServerFrame::StreamStarted(42), &mut buf);
        assert_eq!(&buf[..], &[2, 0, 0, 0, 42, 0, 0, 0]);
    }

    #[test]
    fn test_format_frame_is_length_prefixed() {
        let format = AudioFormat::new(48000, 2, Encoding::PcmFloat);
        let mut buf = BytesMut::new();
        encode_server_frame(&ServerFrame::Format(format), &mut buf);

        let payload_len = format.to_message().encoded_len();
        assert_eq!(&buf[..4], &[1, 0, 0, 0]);
        assert_eq!(&buf[4..8], &(payload_len as i32).to_le_bytes());
        assert_eq!(buf.len(), 8 + payload_len);
    }

    #[test]
    fn test_stream_id_datagram() {
        let id = StreamId::new(0x0102_0304).unwrap();
        assert_eq!(stream_id_datagram(id), [4, 3, 2, 1]);
    }
}
