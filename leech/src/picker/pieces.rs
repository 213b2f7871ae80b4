use std::sync::Arc;
use tokio::sync::Mutex;
use crate::{block::{Block, BlockRequest}, info::TorrentInfo};

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum BlockState {

    // Block has not been requested.
    #[default]
    Needed,

    // Block has been requested by a peer.
    Requested,

    // Block has been received.
    Received,

}

#[derive(Debug)]
struct Blocks {

    // State of every block, idxed by piece then block within the piece.
    states: Vec<Vec<BlockState>>,

    received: u64,

    total: u64,

}

impl Blocks {
    fn get_mut(&mut self, piece_idx: u32, offset: u32) -> Option<&mut BlockState> {
        if offset as usize % crate::BLOCK_SIZE != 0 {
            return None;
        }
        self.states
            .get_mut(piece_idx as usize)?
            .get_mut(offset as usize / crate::BLOCK_SIZE)
    }
}

// Download state of every block, shared between all peer sessions.
// States only move forward: needed, requested, received.
#[derive(Debug, Clone)]
pub struct PieceSet {
    blocks: Arc<Mutex<Blocks>>,
}

impl PieceSet {

    pub fn new(info: &TorrentInfo) -> Self {
        let states: Vec<_> = (0..info.num_pieces)
            .map(|idx| vec![BlockState::Needed; info.blocks_per_piece(idx) as usize])
            .collect();
        let total = states.iter().map(|p| p.len() as u64).sum();
        Self {
            blocks: Arc::new(Mutex::new(Blocks { states, received: 0, total })),
        }
    }

    // Block has been neither requested nor received. Out of range blocks are never needed.
    pub async fn needed(&self, req: &BlockRequest) -> bool {
        let mut blocks = self.blocks.lock().await;
        matches!(blocks.get_mut(req.piece_idx, req.offset), Some(BlockState::Needed))
    }

    pub async fn add_requested(&self, req: &BlockRequest) {
        let mut blocks = self.blocks.lock().await;
        if let Some(state) = blocks.get_mut(req.piece_idx, req.offset) {
            if *state == BlockState::Needed {
                *state = BlockState::Requested;
            }
        }
    }

    // Marks the block requested if still needed, in one step.
    // Only one caller gets true for any given block.
    pub async fn try_request(&self, req: &BlockRequest) -> bool {
        let mut blocks = self.blocks.lock().await;
        match blocks.get_mut(req.piece_idx, req.offset) {
            Some(state) if *state == BlockState::Needed => {
                *state = BlockState::Requested;
                true
            },
            _ => false,
        }
    }

    // Returns false if the block was already received, or isn't part of the torrent.
    pub async fn add_received(&self, block: &Block) -> bool {
        let mut blocks = self.blocks.lock().await;
        let Some(state) = blocks.get_mut(block.piece_idx, block.offset) else {
            return false;
        };
        if *state == BlockState::Received {
            return false;
        }
        *state = BlockState::Received;
        blocks.received += 1;
        true
    }

    pub async fn is_done(&self) -> bool {
        let blocks = self.blocks.lock().await;
        blocks.received == blocks.total
    }

    // Received and total block counts.
    pub async fn progress(&self) -> (u64, u64) {
        let blocks = self.blocks.lock().await;
        (blocks.received, blocks.total)
    }
}
