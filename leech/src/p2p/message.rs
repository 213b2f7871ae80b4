use bytes::{Buf, BufMut, BytesMut};
use crate::{block::{Block, BlockRequest}, Bitfield};
use super::{PeerError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {

    // The keep alive message advises peers not to close the connection,
    // even if they haven’t received a message in some time.
    KeepAlive,

    // A choke message tells a peer that no further requests will be satisfied.
    Choke,

    // Conversely unchoke signifies that requests from the peer will be served.
    Unchoke,

    // Notifies a peer that the client is interested in making requests for blocks.
    Interested,

    // Notifies a peer the client is no longer interested in requesting blocks.
    NotInterested,

    // Tells a peer that the client has a piece, referenced by the piece index.
    Have { idx: u32 },

    // Short form of communicating which pieces a peer has, sent after the handshake.
    Bitfield(Bitfield),

    // Piece index, offset within the piece and length of the wanted block.
    Request(BlockRequest),

    // Block data, referencing piece index and block offset.
    Block(Block),

    // Cancels a previous request.
    Cancel(BlockRequest),

    // Listen port of the peer's DHT node.
    Port { port: u16 },

    // Any id outside of the above, payload kept as is.
    Unknown { id: u8, payload: Vec<u8> },
}

impl Message {

    pub fn id(&self) -> Option<u8> {
        let id = match self {
            Message::KeepAlive => return None,
            Message::Choke => 0,
            Message::Unchoke => 1,
            Message::Interested => 2,
            Message::NotInterested => 3,
            Message::Have { .. } => 4,
            Message::Bitfield(_) => 5,
            Message::Request(_) => 6,
            Message::Block(_) => 7,
            Message::Cancel(_) => 8,
            Message::Port { .. } => 9,
            Message::Unknown { id, .. } => *id,
        };
        Some(id)
    }

    // Parses a complete frame, including its 4 byte length prefix.
    pub fn parse(frame: &[u8]) -> Result<Message> {
        if frame.len() < 4 {
            return Err(PeerError::InvalidMessage(0));
        }
        let mut src = frame;
        let msg_len = src.get_u32() as usize;
        if msg_len != src.remaining() {
            return Err(PeerError::InvalidMessage(src.first().copied().unwrap_or(0)));
        }
        if msg_len == 0 {
            return Ok(Message::KeepAlive);
        }

        let id = src.get_u8();
        // Fixed size payloads must match exactly, variable ones need their header.
        let payload_ok = match id {
            0..=3 => src.is_empty(),
            4 => src.len() == 4,
            6 | 8 => src.len() == 12,
            7 => src.len() >= 8,
            9 => src.len() == 2,
            _ => true,
        };
        if !payload_ok {
            return Err(PeerError::InvalidMessage(id));
        }

        let msg = match id {
            0 => Message::Choke,
            1 => Message::Unchoke,
            2 => Message::Interested,
            3 => Message::NotInterested,
            4 => Message::Have { idx: src.get_u32() },
            5 => Message::Bitfield(Bitfield::from_slice(src)),
            6 => Message::Request(parse_request(&mut src)),
            7 => {
                let piece_idx = src.get_u32();
                let offset = src.get_u32();
                Message::Block(Block { piece_idx, offset, data: src.to_vec() })
            },
            8 => Message::Cancel(parse_request(&mut src)),
            9 => Message::Port { port: src.get_u16() },
            id => Message::Unknown { id, payload: src.to_vec() },
        };

        Ok(msg)
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {

            // [0, 0, 0, 0]
            Message::KeepAlive => dst.put_u32(0),

            // choke, unchoke, interested, not interested: <len=0001><id>
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => {
                dst.put_u32(1);
                dst.put_u8(self.id().unwrap_or_default());
            },

            // have: <len=0005><id=4><piece index>
            Message::Have { idx } => {
                dst.put_u32(5);
                dst.put_u8(4);
                dst.put_u32(*idx);
            },

            // bitfield: <len=0001+X><id=5><bitfield>
            Message::Bitfield(bitfield) => {
                let raw = bitfield.as_raw_slice();
                dst.put_u32(1 + raw.len() as u32);
                dst.put_u8(5);
                dst.extend_from_slice(raw);
            },

            // request: <len=0013><id=6><index><begin><length>
            Message::Request(req) => put_request(dst, 6, req),

            // piece: <len=0009+X><id=7><index><begin><block>
            Message::Block(block) => {
                dst.put_u32(9 + block.data.len() as u32);
                dst.put_u8(7);
                dst.put_u32(block.piece_idx);
                dst.put_u32(block.offset);
                dst.extend_from_slice(&block.data);
            },

            // cancel: <len=0013><id=8><index><begin><length>
            Message::Cancel(req) => put_request(dst, 8, req),

            // port: <len=0003><id=9><listen-port>
            Message::Port { port } => {
                dst.put_u32(3);
                dst.put_u8(9);
                dst.put_u16(*port);
            },

            Message::Unknown { id, payload } => {
                dst.put_u32(1 + payload.len() as u32);
                dst.put_u8(*id);
                dst.extend_from_slice(payload);
            },
        }
    }
}

fn parse_request(src: &mut &[u8]) -> BlockRequest {
    BlockRequest {
        piece_idx: src.get_u32(),
        offset: src.get_u32(),
        len: src.get_u32(),
    }
}

fn put_request(dst: &mut BytesMut, id: u8, req: &BlockRequest) {
    dst.put_u32(13);
    dst.put_u8(id);
    dst.put_u32(req.piece_idx);
    dst.put_u32(req.offset);
    dst.put_u32(req.len);
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::KeepAlive => write!(f, "keep alive"),
            Message::Choke => write!(f, "choke"),
            Message::Unchoke => write!(f, "unchoke"),
            Message::Interested => write!(f, "interested"),
            Message::NotInterested => write!(f, "not interested"),
            Message::Have { idx } => write!(f, "have piece idx: {}", idx),
            Message::Bitfield(bf) => write!(f, "bitfield with {} pieces", bf.count_ones()),
            Message::Request(req) => write!(f, "request for block {{ piece idx: {}, offset {}, length: {} }}",
                req.piece_idx,
                req.offset,
                req.len,
            ),
            Message::Block(block) => write!(f, "block data {{ piece idx: {}, offset: {}, length: {} }}",
                block.piece_idx,
                block.offset,
                block.data.len(),
            ),
            Message::Cancel(req) => write!(f, "cancel for block {{ piece idx: {}, offset: {}, length: {} }}",
                req.piece_idx,
                req.offset,
                req.len
            ),
            Message::Port { port } => write!(f, "port {}", port),
            Message::Unknown { id, payload } => write!(f, "unknown id {} with {} byte payload", id, payload.len()),
        }
    }
}
