mod pieces;
mod queue;

pub use pieces::{BlockState, PieceSet};
pub use queue::BlockQueue;
