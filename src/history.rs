use crate::board::Board;

/// Zobrist keys of the positions that preceded the current one, oldest
/// first. Used for repetition detection both in the game and inside search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionHistory {
    keys: Vec<u64>,
}

impl PositionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hash: u64) {
        self.keys.push(hash);
    }

    pub fn pop(&mut self) -> Option<u64> {
        self.keys.pop()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// How many earlier positions since the last irreversible move share the
    /// board's key.
    pub fn occurrences(&self, board: &Board) -> usize {
        let hash = board.hash();
        self.keys
            .iter()
            .rev()
            .take(board.halfmove_clock() as usize)
            .filter(|&&key| key == hash)
            .count()
    }

    /// The current position has appeared twice before.
    pub fn is_threefold(&self, board: &Board) -> bool {
        self.occurrences(board) >= 2
    }

    /// The current position has appeared before. Search scores this as a
    /// draw since the side that can repeat can force the third occurrence.
    pub fn is_repetition(&self, board: &Board) -> bool {
        self.occurrences(board) >= 1
    }
}
