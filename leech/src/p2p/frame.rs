use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use super::{handshake::Handshake, message::Message, PeerError};

// Largest piece message we accept, a 1 MiB block plus its header.
pub const MAX_FRAME_LEN: usize = (1 << 20) + 13;

// Length of the next frame in the buffer, prefix included.
// The handshake declares its length in its first byte, later messages in a 4 byte prefix.
pub fn frame_len(buf: &[u8], handshake: bool) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    if handshake {
        Some(buf[0] as usize + 49)
    } else {
        Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize + 4)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Split {

    // Every complete frame, in stream order.
    pub frames: Vec<Bytes>,

    // Trailing partial frame, to be prepended to the next read.
    pub remainder: Bytes,

    // Whether the next frame is still expected to be the handshake.
    pub handshake: bool,

}

// Splits accumulated bytes into complete frames.
pub fn split_frames(buf: &[u8], mut handshake: bool) -> Split {
    let mut frames = Vec::new();
    let mut rest = buf;
    while let Some(len) = frame_len(rest, handshake) {
        if rest.len() < len {
            break;
        }
        let (frame, tail) = rest.split_at(len);
        frames.push(Bytes::copy_from_slice(frame));
        rest = tail;
        handshake = false;
    }
    Split {
        frames,
        remainder: Bytes::copy_from_slice(rest),
        handshake,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Handshake(Handshake),
    Message(Message),
}

// Codec for a whole peer connection, the handshake followed by length prefixed messages.
#[derive(Debug)]
pub struct FrameCodec {
    handshake: bool,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self { handshake: true }
    }

    pub fn expects_handshake(&self) -> bool {
        self.handshake
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {

    type Item = Frame;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(len) = frame_len(src, self.handshake) else {
            return Ok(None);
        };
        if len > MAX_FRAME_LEN {
            return Err(PeerError::FrameTooLarge(len));
        }
        if src.len() < len {
            // Haven't recieved all of frame.
            src.reserve(len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(len);
        if self.handshake {
            self.handshake = false;
            return Ok(Some(Frame::Handshake(Handshake::parse(&frame)?)));
        }
        Ok(Some(Frame::Message(Message::parse(&frame)?)))
    }
}

impl Encoder<Handshake> for FrameCodec {

    type Error = PeerError;

    fn encode(&mut self, handshake: Handshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        handshake.encode(dst);
        Ok(())
    }
}

impl Encoder<Message> for FrameCodec {

    type Error = PeerError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        msg.encode(dst);
        Ok(())
    }
}
