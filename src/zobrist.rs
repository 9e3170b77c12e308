//! Zobrist keys for incremental position hashing.
//!
//! The board keeps its key up to date in `make_move`/`unmake_move`, which is
//! what the transposition table and repetition detection key on.

use crate::board::{Color, Piece};

pub struct ZobristKeys {
    /// Indexed by [color][piece][square]
    pieces: [[[u64; 64]; 6]; 2],
    /// XORed in when black is to move
    side_to_move: u64,
    /// One key per castling bit (KQkq order)
    castling: [u64; 4],
    /// One key per en-passant file
    en_passant: [u64; 8],
}

const fn xorshift64(mut state: u64) -> u64 {
    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;
    state
}

impl ZobristKeys {
    const fn generate() -> Self {
        let mut state = 0x5A1_F00D_C0FF_EE42u64;

        let mut pieces = [[[0u64; 64]; 6]; 2];
        let mut color = 0;
        while color < 2 {
            let mut piece = 0;
            while piece < 6 {
                let mut square = 0;
                while square < 64 {
                    state = xorshift64(state);
                    pieces[color][piece][square] = state;
                    square += 1;
                }
                piece += 1;
            }
            color += 1;
        }

        state = xorshift64(state);
        let side_to_move = state;

        let mut castling = [0u64; 4];
        let mut i = 0;
        while i < 4 {
            state = xorshift64(state);
            castling[i] = state;
            i += 1;
        }

        let mut en_passant = [0u64; 8];
        let mut i = 0;
        while i < 8 {
            state = xorshift64(state);
            en_passant[i] = state;
            i += 1;
        }

        Self {
            pieces,
            side_to_move,
            castling,
            en_passant,
        }
    }

    #[inline]
    pub fn piece(&self, piece: Piece, color: Color, square: u8) -> u64 {
        self.pieces[color.index()][piece.index()][square as usize]
    }

    #[inline]
    pub fn side_to_move(&self) -> u64 {
        self.side_to_move
    }

    /// XOR of the keys for every bit set in `rights`.
    #[inline]
    pub fn castling(&self, rights: u8) -> u64 {
        let mut key = 0;
        for (bit, value) in self.castling.iter().enumerate() {
            if rights & (1 << bit) != 0 {
                key ^= value;
            }
        }
        key
    }

    #[inline]
    pub fn en_passant(&self, square: u8) -> u64 {
        self.en_passant[(square % 8) as usize]
    }
}

pub static ZOBRIST: ZobristKeys = ZobristKeys::generate();
