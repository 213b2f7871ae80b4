use std::collections::VecDeque;
use crate::{block::BlockRequest, info::TorrentInfo, Bitfield};

// Per connection queue of blocks to request, in the order pieces were announced by the peer.
#[derive(Debug)]
pub struct BlockQueue {

    info: TorrentInfo,

    requests: VecDeque<BlockRequest>,

    // Pieces whose blocks have already been queued, repeated announcements are skipped.
    queued: Bitfield,

    // Whether the peer is choking us, no requests are sent while set.
    pub choked: bool,

}

impl BlockQueue {

    pub fn new(info: TorrentInfo) -> Self {
        Self {
            requests: VecDeque::new(),
            queued: Bitfield::repeat(false, info.num_pieces as usize),
            choked: true,
            info,
        }
    }

    // Appends every block of the piece, in increasing offset. Each piece is queued at most once.
    pub fn queue(&mut self, piece_idx: u32) {
        if piece_idx >= self.info.num_pieces {
            tracing::warn!("ignoring out of range piece {}", piece_idx);
            return;
        }
        if self.queued[piece_idx as usize] {
            tracing::trace!("piece {} already queued", piece_idx);
            return;
        }
        self.queued.set(piece_idx as usize, true);
        let blocks = (0..self.info.blocks_per_piece(piece_idx)).map(|block_idx| BlockRequest {
            piece_idx,
            offset: block_idx * crate::BLOCK_SIZE as u32,
            len: self.info.block_len(piece_idx, block_idx),
        });
        self.requests.extend(blocks);
    }

    pub fn deque(&mut self) -> Option<BlockRequest> {
        self.requests.pop_front()
    }

    pub fn peek(&self) -> Option<&BlockRequest> {
        self.requests.front()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
