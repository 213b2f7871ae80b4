use bytes::{BufMut, BytesMut};
use crate::ID;
use super::{PeerError, Result};

pub const PROTOCOL: [u8; 19] = *b"BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 49 + PROTOCOL.len();

#[derive(Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol:   [u8; 19],
    pub reserved:   [u8; 8],
    pub info_hash:  ID,
    pub peer_id:    ID,
}

impl Handshake {
    pub fn new(info_hash: ID, peer_id: ID) -> Self {
        Self {
            protocol:   PROTOCOL,
            reserved:   [0; 8],
            info_hash,
            peer_id,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HANDSHAKE_LEN);
        dst.put_u8(PROTOCOL.len() as u8);
        dst.extend_from_slice(&self.protocol);
        dst.extend_from_slice(&self.reserved);
        dst.extend_from_slice(&self.info_hash);
        dst.extend_from_slice(&self.peer_id);
    }

    // Parses a complete handshake frame.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if !is_handshake(frame) {
            return Err(PeerError::IncorrectProtocol);
        }
        let mut handshake = Handshake::new([0; 20], [0; 20]);
        handshake.reserved.copy_from_slice(&frame[20..28]);
        handshake.info_hash.copy_from_slice(&frame[28..48]);
        handshake.peer_id.copy_from_slice(&frame[48..68]);
        Ok(handshake)
    }
}

// Frame length agrees with its pstrlen byte and carries the BitTorrent protocol string.
pub fn is_handshake(msg: &[u8]) -> bool {
    !msg.is_empty()
        && msg.len() == msg[0] as usize + 49
        && msg.get(1..1 + PROTOCOL.len()) == Some(&PROTOCOL[..])
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("protocol", &String::from_utf8_lossy(&self.protocol))
            .field("reserved", &self.reserved)
            .field("info_hash", &hex::encode(self.info_hash))
            .field("peer_id", &String::from_utf8_lossy(&self.peer_id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_handshake() -> BytesMut {
        let mut src = BytesMut::new();
        src.put_u8(19);
        src.extend_from_slice(b"BitTorrent protocol");
        src.extend_from_slice(&[0; 8]);
        src.extend_from_slice(&[1; 20]);
        src.extend_from_slice(&[2; 20]);
        src
    }

    #[test]
    fn test_handshake_encoding() {
        let mut dst = BytesMut::new();
        Handshake::new([1; 20], [2; 20]).encode(&mut dst);
        assert_eq!(dst.len(), HANDSHAKE_LEN);
        assert_eq!(dst, raw_handshake());
        assert!(is_handshake(&dst));
    }

    #[test]
    fn test_handshake_parsing() {
        let handshake = Handshake::parse(&raw_handshake()).unwrap();
        assert_eq!(handshake.protocol, *b"BitTorrent protocol");
        assert_eq!(handshake.reserved, [0; 8]);
        assert_eq!(handshake.info_hash, [1; 20]);
        assert_eq!(handshake.peer_id, [2; 20]);
    }

    #[test]
    fn test_handshake_keeps_reserved_bits() {
        let mut raw = raw_handshake();
        raw[25] = 0x10;
        let handshake = Handshake::parse(&raw).unwrap();
        assert_eq!(handshake.reserved[5], 0x10);
    }

    #[test]
    fn test_not_handshake() {
        // Truncated.
        assert!(!is_handshake(&raw_handshake()[..67]));
        // Wrong protocol string.
        let mut raw = raw_handshake();
        raw[1] = b'b';
        assert!(!is_handshake(&raw));
        assert!(matches!(Handshake::parse(&raw), Err(PeerError::IncorrectProtocol)));
        // Length byte disagrees with frame length.
        let mut raw = raw_handshake();
        raw[0] = 20;
        assert!(!is_handshake(&raw));
        assert!(!is_handshake(&[]));
        // A regular message is not a handshake.
        assert!(!is_handshake(&[0, 0, 0, 1, 1]));
    }
}
