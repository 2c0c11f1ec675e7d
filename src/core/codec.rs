//! # Frame Codec
//!
//! `tokio_util` codec over the pluggable [`FrameValidator`] contract.
//!
//! Sessions run their own receive loop, but anything else that talks to a
//! session-based server (test clients, tools, proxies) can wrap a stream in
//! `Framed<_, FrameCodec>` and exchange whole frames.

use crate::core::buffer::{ByteBuffer, WireBuffer};
use crate::core::packet::{packet_validator, FrameValidator};
use crate::error::{constants, ProtocolError, Result};
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

#[derive(Clone)]
pub struct FrameCodec {
    validator: FrameValidator,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(packet_validator())
    }
}

impl FrameCodec {
    pub fn new(validator: FrameValidator) -> Self {
        Self { validator }
    }
}

impl Decoder for FrameCodec {
    type Item = ByteBuffer;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match (self.validator)(&src[..]) {
            None => Ok(None),
            Some(0) => Err(ProtocolError::DeserializeError(
                constants::ERR_EMPTY_FRAME.to_string(),
            )),
            Some(len) if len > src.len() => Err(ProtocolError::DeserializeError(
                constants::ERR_OVERSIZED_FRAME.to_string(),
            )),
            Some(len) => {
                let frame = src.split_to(len);
                Ok(Some(ByteBuffer::from_slice(&frame)))
            }
        }
    }
}

impl<B: WireBuffer> Encoder<B> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: B, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.len());
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::packet::Packet;

    #[test]
    fn decodes_back_to_back_frames() {
        let mut codec = FrameCodec::default();
        let mut wire = BytesMut::new();
        for id in 0..3u16 {
            let mut packet = Packet::new(id);
            packet.put_u16(id * 10).unwrap();
            codec.encode(packet, &mut wire).unwrap();
        }
        // hold back the last byte
        let last = wire.split_off(wire.len() - 1);

        let mut ids = Vec::new();
        while let Some(frame) = codec.decode(&mut wire).unwrap() {
            ids.push(frame.get_u16_at(2).unwrap());
        }
        assert_eq!(ids, vec![0, 1]);

        wire.unsplit(last);
        let frame = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.get_u16_at(4).unwrap(), 20);
        assert!(wire.is_empty());
    }

    #[test]
    fn zero_length_frame_is_an_error() {
        let mut codec = FrameCodec::new(std::sync::Arc::new(|_: &[u8]| Some(0)));
        let mut wire = BytesMut::from(&[1u8, 2, 3][..]);
        assert!(codec.decode(&mut wire).is_err());
    }
}
