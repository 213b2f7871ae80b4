use crate::{info::TorrentInfo, BLOCK_SIZE};

// A block received from a peer in a piece message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    // Index of piece that the block is contained in.
    pub piece_idx: u32,

    // Offset in bytes of block within piece.
    pub offset: u32,

    // Data of block.
    pub data: Vec<u8>,
}

// A request for a block, as sent in request and cancel messages.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct BlockRequest {

    pub piece_idx: u32,

    pub offset: u32,

    pub len: u32,

}

impl BlockRequest {

    pub fn from_block(block: &Block) -> Self {
        Self {
            piece_idx: block.piece_idx,
            offset: block.offset,
            len: block.data.len() as u32,
        }
    }

    #[inline]
    pub fn idx_in_piece(&self) -> usize {
        self.offset as usize / BLOCK_SIZE
    }

    // Request lies on a block boundary and matches the block geometry of the torrent.
    pub fn is_valid(&self, info: &TorrentInfo) -> bool {
        if self.piece_idx >= info.num_pieces || self.offset as usize % BLOCK_SIZE != 0 {
            return false;
        }
        let block_idx = self.idx_in_piece();
        block_idx < info.blocks_per_piece(self.piece_idx) as usize
            && self.len == info.block_len(self.piece_idx, block_idx as u32)
    }
}

// Length of a block given the length of the piece containing it.
// The last block takes the remainder, or a full block when the piece is an exact multiple.
pub fn block_len(piece_len: usize, block_idx: usize) -> usize {
    BLOCK_SIZE.min(piece_len.saturating_sub(block_idx * BLOCK_SIZE))
}

pub fn num_blocks(piece_len: usize) -> u32 {
    ((piece_len + (BLOCK_SIZE - 1)) / BLOCK_SIZE) as u32
}
