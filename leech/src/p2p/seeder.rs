use std::sync::Arc;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use crate::{block::Block, Bitfield, ID};
use super::{Frame, FrameCodec, Handshake, Message};

// Serves every piece of `data` to a single leecher until it hangs up.
pub async fn serve<S>(stream: S, info_hash: ID, data: Arc<Vec<u8>>, piece_len: u32)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut socket = Framed::new(stream, FrameCodec::new());
    let num_pieces = data.len().div_ceil(piece_len as usize);

    while let Some(Ok(frame)) = socket.next().await {
        let reply = match frame {
            Frame::Handshake(hs) => {
                assert_eq!(hs.info_hash, info_hash);
                if socket.send(Handshake::new(info_hash, *b"-SE0001-000000000000")).await.is_err() {
                    return;
                }
                Message::Bitfield(Bitfield::repeat(true, num_pieces))
            },
            Frame::Message(Message::Interested) => Message::Unchoke,
            Frame::Message(Message::Request(req)) => {
                let start = req.piece_idx as usize * piece_len as usize + req.offset as usize;
                let data = data[start..start + req.len as usize].to_vec();
                Message::Block(Block { piece_idx: req.piece_idx, offset: req.offset, data })
            },
            Frame::Message(_) => continue,
        };
        if socket.send(reply).await.is_err() {
            return;
        }
    }
}
