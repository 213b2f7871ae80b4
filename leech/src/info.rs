use crate::block;

// Piece and block geometry of a torrent.
// Very widely used, often cloned but is cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TorrentInfo {

    pub total_len: u64,

    // Declared length of every piece but the last.
    pub piece_len: u32,

    pub last_piece_len: u32,

    pub num_pieces: u32,

}

impl TorrentInfo {

    pub fn new(total_len: u64, piece_len: u32) -> Self {
        debug_assert!(piece_len > 0, "piece length must be non-zero");
        let num_pieces = total_len.div_ceil(piece_len as u64) as u32;
        // An exact multiple leaves a full final piece, not an empty one.
        let last_piece_len = match (total_len % piece_len as u64) as u32 {
            0 => piece_len,
            rem => rem,
        };

        Self {
            total_len,
            piece_len,
            last_piece_len,
            num_pieces,
        }
    }

    // Returns length of piece given its index.
    pub fn piece_len(&self, idx: u32) -> u32 {
        if idx + 1 == self.num_pieces {
            self.last_piece_len
        } else {
            self.piece_len
        }
    }

    pub fn blocks_per_piece(&self, idx: u32) -> u32 {
        block::num_blocks(self.piece_len(idx) as usize)
    }

    pub fn block_len(&self, idx: u32, block_idx: u32) -> u32 {
        block::block_len(self.piece_len(idx) as usize, block_idx as usize) as u32
    }

    // Absolute offset of the first byte of a piece in the output file.
    pub fn piece_offset(&self, idx: u32) -> u64 {
        idx as u64 * self.piece_len as u64
    }

    pub fn total_blocks(&self) -> u64 {
        match self.num_pieces {
            0 => 0,
            n => (n as u64 - 1) * self.blocks_per_piece(0) as u64 + self.blocks_per_piece(n - 1) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piece_len() {
        let info = TorrentInfo::new(33_677_666, 32_768);
        assert_eq!(info.num_pieces, 1028);
        assert_eq!(info.piece_len(0), 32_768);
        assert_eq!(info.piece_len(1026), 32_768);
        assert_eq!(info.piece_len(1027), 33_677_666 % 32_768);
    }

    #[test]
    fn test_exact_multiple_last_piece() {
        let info = TorrentInfo::new(4 * 32_768, 32_768);
        assert_eq!(info.num_pieces, 4);
        assert_eq!(info.piece_len(3), 32_768);
        assert_eq!(info.blocks_per_piece(3), 2);
        assert_eq!(info.block_len(3, 1), 16_384);
    }

    #[test]
    fn test_one_and_a_half_pieces() {
        let info = TorrentInfo::new(49_152, 32_768);
        assert_eq!(info.num_pieces, 2);
        assert_eq!(info.blocks_per_piece(0), 2);
        assert_eq!(info.block_len(0, 0), 16_384);
        assert_eq!(info.block_len(0, 1), 16_384);
        assert_eq!(info.blocks_per_piece(1), 1);
        assert_eq!(info.block_len(1, 0), 16_384);
        assert_eq!(info.total_blocks(), 3);
        assert_eq!(info.piece_offset(1), 32_768);
    }

    #[test]
    fn test_block_lens_sum_to_piece_len() {
        let shapes = [
            (49_152, 32_768),
            (33_677_666, 32_768),
            (1, 16_384),
            (16_385, 16_384),
            (1_000_000, 65_536),
            (262_144, 262_144),
            (100_000, 20_000),
        ];
        for (total, piece_len) in shapes {
            let info = TorrentInfo::new(total, piece_len);
            let mut sum_pieces = 0u64;
            for idx in 0..info.num_pieces {
                let sum: u32 = (0..info.blocks_per_piece(idx))
                    .map(|b| info.block_len(idx, b))
                    .sum();
                assert_eq!(sum, info.piece_len(idx), "piece {} of {:?}", idx, info);
                assert!((0..info.blocks_per_piece(idx)).all(|b| info.block_len(idx, b) > 0));
                sum_pieces += sum as u64;
            }
            assert_eq!(sum_pieces, total);
        }
    }

    #[test]
    fn test_unaligned_piece_len() {
        // Piece length that is not a multiple of the block size.
        let info = TorrentInfo::new(100_000, 20_000);
        assert_eq!(info.blocks_per_piece(0), 2);
        assert_eq!(info.block_len(0, 1), 20_000 - 16_384);
    }
}
