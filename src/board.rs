use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::movegen::Move;
use crate::zobrist::ZOBRIST;

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

// Castling rights, 4 bits: KQkq
pub const WHITE_KINGSIDE: u8 = 0b0001;
pub const WHITE_QUEENSIDE: u8 = 0b0010;
pub const BLACK_KINGSIDE: u8 = 0b0100;
pub const BLACK_QUEENSIDE: u8 = 0b1000;

pub const FILE_A: u64 = 0x0101_0101_0101_0101;
pub const FILE_H: u64 = 0x8080_8080_8080_8080;

/// Rights that survive a move touching the square (as origin or destination).
const CASTLING_MASK: [u8; 64] = {
    let mut mask = [0b1111u8; 64];
    mask[0] = !WHITE_QUEENSIDE & 0b1111;
    mask[4] = !(WHITE_KINGSIDE | WHITE_QUEENSIDE) & 0b1111;
    mask[7] = !WHITE_KINGSIDE & 0b1111;
    mask[56] = !BLACK_QUEENSIDE & 0b1111;
    mask[60] = !(BLACK_KINGSIDE | BLACK_QUEENSIDE) & 0b1111;
    mask[63] = !BLACK_KINGSIDE & 0b1111;
    mask
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Piece {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl Piece {
    pub const ALL: [Piece; 6] = [
        Piece::Pawn,
        Piece::Knight,
        Piece::Bishop,
        Piece::Rook,
        Piece::Queen,
        Piece::King,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Nominal material value in centipawns.
    pub const fn value(self) -> i32 {
        match self {
            Piece::Pawn => 100,
            Piece::Knight => 320,
            Piece::Bishop => 330,
            Piece::Rook => 500,
            Piece::Queen => 900,
            Piece::King => 20000,
        }
    }

    /// Lowercase letter used in FEN and UCI promotion suffixes.
    pub const fn symbol(self) -> char {
        match self {
            Piece::Pawn => 'p',
            Piece::Knight => 'n',
            Piece::Bishop => 'b',
            Piece::Rook => 'r',
            Piece::Queen => 'q',
            Piece::King => 'k',
        }
    }

    pub fn from_symbol(c: char) -> Option<Piece> {
        match c.to_ascii_lowercase() {
            'p' => Some(Piece::Pawn),
            'n' => Some(Piece::Knight),
            'b' => Some(Piece::Bishop),
            'r' => Some(Piece::Rook),
            'q' => Some(Piece::Queen),
            'k' => Some(Piece::King),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    White,
    Black,
}

impl Color {
    #[inline]
    pub const fn opposite(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// "e4" style name of a 0..64 square index (a1 = 0, h8 = 63).
pub fn square_name(square: u8) -> String {
    let file = (b'a' + square % 8) as char;
    let rank = (b'1' + square / 8) as char;
    format!("{file}{rank}")
}

pub fn parse_square(s: &str) -> Option<u8> {
    let bytes = s.as_bytes();
    if bytes.len() != 2 {
        return None;
    }
    let file = bytes[0].checked_sub(b'a').filter(|f| *f < 8)?;
    let rank = bytes[1].checked_sub(b'1').filter(|r| *r < 8)?;
    Some(rank * 8 + file)
}

/// Iterates the squares of the set bits of a bitboard, lowest first.
#[derive(Debug, Clone, Copy)]
pub struct BitSquares(pub u64);

impl Iterator for BitSquares {
    type Item = u8;

    #[inline]
    fn next(&mut self) -> Option<u8> {
        if self.0 == 0 {
            return None;
        }
        let square = self.0.trailing_zeros() as u8;
        self.0 &= self.0 - 1;
        Some(square)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FenError {
    #[error("expected at least 4 fields, found {0}")]
    FieldCount(usize),
    #[error("invalid piece placement: {0}")]
    Placement(String),
    #[error("invalid side to move: {0}")]
    SideToMove(String),
    #[error("invalid castling rights: {0}")]
    Castling(String),
    #[error("invalid en passant square: {0}")]
    EnPassant(String),
    #[error("invalid move counter: {0}")]
    Counter(String),
    #[error("each side needs exactly one king")]
    KingCount,
}

/// Irreversible state captured by `make_move`, consumed by `unmake_move`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Undo {
    pub mv: Move,
    pub moved: Piece,
    pub captured: Option<Piece>,
    castling_rights: u8,
    en_passant_square: Option<u8>,
    halfmove_clock: u16,
    hash: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pieces: [[u64; 6]; 2],
    occupancy: [u64; 2],
    mailbox: [Option<(Piece, Color)>; 64],
    side_to_move: Color,
    castling_rights: u8,
    en_passant_square: Option<u8>,
    halfmove_clock: u16,
    fullmove_number: u16,
    hash: u64,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    /// The standard starting position.
    pub fn new() -> Self {
        let mut board = Self::empty();
        let back_rank = [
            Piece::Rook,
            Piece::Knight,
            Piece::Bishop,
            Piece::Queen,
            Piece::King,
            Piece::Bishop,
            Piece::Knight,
            Piece::Rook,
        ];
        for (file, piece) in back_rank.into_iter().enumerate() {
            let file = file as u8;
            board.put_piece(piece, Color::White, file);
            board.put_piece(Piece::Pawn, Color::White, 8 + file);
            board.put_piece(Piece::Pawn, Color::Black, 48 + file);
            board.put_piece(piece, Color::Black, 56 + file);
        }
        board.castling_rights = 0b1111;
        board.hash ^= ZOBRIST.castling(board.castling_rights);
        board
    }

    fn empty() -> Self {
        Self {
            pieces: [[0; 6]; 2],
            occupancy: [0; 2],
            mailbox: [None; 64],
            side_to_move: Color::White,
            castling_rights: 0,
            en_passant_square: None,
            halfmove_clock: 0,
            fullmove_number: 1,
            hash: 0,
        }
    }

    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() < 4 || fields.len() > 6 {
            return Err(FenError::FieldCount(fields.len()));
        }

        let mut board = Self::empty();

        let ranks: Vec<&str> = fields[0].split('/').collect();
        if ranks.len() != 8 {
            return Err(FenError::Placement(fields[0].to_string()));
        }
        for (i, rank_text) in ranks.iter().enumerate() {
            let rank = 7 - i as u8;
            let mut file = 0u8;
            for c in rank_text.chars() {
                if let Some(skip) = c.to_digit(10) {
                    if !(1..=8).contains(&skip) {
                        return Err(FenError::Placement(rank_text.to_string()));
                    }
                    file += skip as u8;
                } else {
                    let piece = Piece::from_symbol(c)
                        .ok_or_else(|| FenError::Placement(rank_text.to_string()))?;
                    if file >= 8 {
                        return Err(FenError::Placement(rank_text.to_string()));
                    }
                    if piece == Piece::Pawn && (rank == 0 || rank == 7) {
                        return Err(FenError::Placement(rank_text.to_string()));
                    }
                    let color = if c.is_ascii_uppercase() {
                        Color::White
                    } else {
                        Color::Black
                    };
                    board.put_piece(piece, color, rank * 8 + file);
                    file += 1;
                }
                if file > 8 {
                    return Err(FenError::Placement(rank_text.to_string()));
                }
            }
            if file != 8 {
                return Err(FenError::Placement(rank_text.to_string()));
            }
        }
        for color in [Color::White, Color::Black] {
            if board.pieces(Piece::King, color).count_ones() != 1 {
                return Err(FenError::KingCount);
            }
        }

        board.side_to_move = match fields[1] {
            "w" => Color::White,
            "b" => Color::Black,
            other => return Err(FenError::SideToMove(other.to_string())),
        };

        if fields[2] != "-" {
            for c in fields[2].chars() {
                let bit = match c {
                    'K' => WHITE_KINGSIDE,
                    'Q' => WHITE_QUEENSIDE,
                    'k' => BLACK_KINGSIDE,
                    'q' => BLACK_QUEENSIDE,
                    _ => return Err(FenError::Castling(fields[2].to_string())),
                };
                if board.castling_rights & bit != 0 {
                    return Err(FenError::Castling(fields[2].to_string()));
                }
                board.castling_rights |= bit;
            }
        }

        if fields[3] != "-" {
            let square = parse_square(fields[3])
                .filter(|sq| {
                    let rank = sq / 8;
                    (board.side_to_move == Color::White && rank == 5)
                        || (board.side_to_move == Color::Black && rank == 2)
                })
                .ok_or_else(|| FenError::EnPassant(fields[3].to_string()))?;
            board.en_passant_square = Some(square);
        }

        if let Some(halfmove) = fields.get(4) {
            board.halfmove_clock = halfmove
                .parse()
                .map_err(|_| FenError::Counter(halfmove.to_string()))?;
        }
        if let Some(fullmove) = fields.get(5) {
            board.fullmove_number = fullmove
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| FenError::Counter(fullmove.to_string()))?;
        }

        board.hash ^= ZOBRIST.castling(board.castling_rights);
        board.hash ^= board.en_passant_key();
        if board.side_to_move == Color::Black {
            board.hash ^= ZOBRIST.side_to_move();
        }

        Ok(board)
    }

    pub fn to_fen(&self) -> String {
        let mut fen = String::new();
        for rank in (0..8u8).rev() {
            let mut empty = 0;
            for file in 0..8u8 {
                match self.mailbox[(rank * 8 + file) as usize] {
                    Some((piece, color)) => {
                        if empty > 0 {
                            fen.push_str(&empty.to_string());
                            empty = 0;
                        }
                        let symbol = piece.symbol();
                        fen.push(if color == Color::White {
                            symbol.to_ascii_uppercase()
                        } else {
                            symbol
                        });
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                fen.push_str(&empty.to_string());
            }
            if rank > 0 {
                fen.push('/');
            }
        }

        fen.push(' ');
        fen.push(if self.side_to_move == Color::White { 'w' } else { 'b' });
        fen.push(' ');

        if self.castling_rights == 0 {
            fen.push('-');
        } else {
            for (bit, c) in [
                (WHITE_KINGSIDE, 'K'),
                (WHITE_QUEENSIDE, 'Q'),
                (BLACK_KINGSIDE, 'k'),
                (BLACK_QUEENSIDE, 'q'),
            ] {
                if self.castling_rights & bit != 0 {
                    fen.push(c);
                }
            }
        }

        fen.push(' ');
        match self.en_passant_square {
            Some(square) => fen.push_str(&square_name(square)),
            None => fen.push('-'),
        }

        format!("{fen} {} {}", self.halfmove_clock, self.fullmove_number)
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    #[inline]
    pub fn castling_rights(&self) -> u8 {
        self.castling_rights
    }

    #[inline]
    pub fn en_passant_square(&self) -> Option<u8> {
        self.en_passant_square
    }

    /// Hash contribution of the en-passant square. It only counts when the
    /// side to move has a pawn that can take, so a FEN and the game that
    /// reached it hash the same.
    fn en_passant_key(&self) -> u64 {
        match self.en_passant_square {
            Some(square) => {
                let pushed = if self.side_to_move == Color::White { square - 8 } else { square + 8 };
                if pawn_neighbours(pushed) & self.pieces(Piece::Pawn, self.side_to_move) != 0 {
                    ZOBRIST.en_passant(square)
                } else {
                    0
                }
            }
            None => 0,
        }
    }

    #[inline]
    pub fn halfmove_clock(&self) -> u16 {
        self.halfmove_clock
    }

    #[inline]
    pub fn fullmove_number(&self) -> u16 {
        self.fullmove_number
    }

    /// Zobrist key of the position.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub fn pieces(&self, piece: Piece, color: Color) -> u64 {
        self.pieces[color.index()][piece.index()]
    }

    #[inline]
    pub fn color_occupancy(&self, color: Color) -> u64 {
        self.occupancy[color.index()]
    }

    #[inline]
    pub fn occupied(&self) -> u64 {
        self.occupancy[0] | self.occupancy[1]
    }

    #[inline]
    pub fn piece_at(&self, square: u8) -> Option<(Piece, Color)> {
        self.mailbox[square as usize]
    }

    pub fn king_square(&self, color: Color) -> Option<u8> {
        let kings = self.pieces(Piece::King, color);
        (kings != 0).then(|| kings.trailing_zeros() as u8)
    }

    fn put_piece(&mut self, piece: Piece, color: Color, square: u8) {
        let mask = 1u64 << square;
        self.pieces[color.index()][piece.index()] |= mask;
        self.occupancy[color.index()] |= mask;
        self.mailbox[square as usize] = Some((piece, color));
        self.hash ^= ZOBRIST.piece(piece, color, square);
    }

    fn remove_piece(&mut self, square: u8) -> Option<(Piece, Color)> {
        let (piece, color) = self.mailbox[square as usize]?;
        let mask = 1u64 << square;
        self.pieces[color.index()][piece.index()] &= !mask;
        self.occupancy[color.index()] &= !mask;
        self.mailbox[square as usize] = None;
        self.hash ^= ZOBRIST.piece(piece, color, square);
        Some((piece, color))
    }

    /// Applies a pseudo-legal move and returns the token that reverts it.
    pub fn make_move(&mut self, mv: Move) -> Undo {
        let us = self.side_to_move;
        let them = us.opposite();
        let Some((moved, _)) = self.mailbox[mv.from as usize] else {
            unreachable!("make_move from empty square {}", square_name(mv.from));
        };

        let mut undo = Undo {
            mv,
            moved,
            captured: None,
            castling_rights: self.castling_rights,
            en_passant_square: self.en_passant_square,
            halfmove_clock: self.halfmove_clock,
            hash: self.hash,
        };

        self.hash ^= ZOBRIST.castling(self.castling_rights);
        self.hash ^= self.en_passant_key();
        self.en_passant_square = None;
        self.halfmove_clock = self.halfmove_clock.saturating_add(1);

        if moved == Piece::Pawn && Some(mv.to) == undo.en_passant_square {
            let captured_square = if us == Color::White { mv.to - 8 } else { mv.to + 8 };
            undo.captured = self.remove_piece(captured_square).map(|(piece, _)| piece);
        } else if let Some((piece, _)) = self.remove_piece(mv.to) {
            undo.captured = Some(piece);
        }
        if moved == Piece::Pawn || undo.captured.is_some() {
            self.halfmove_clock = 0;
        }

        self.remove_piece(mv.from);
        self.put_piece(mv.promotion.unwrap_or(moved), us, mv.to);

        if moved == Piece::King && mv.from.abs_diff(mv.to) == 2 {
            let (rook_from, rook_to) = castling_rook_squares(mv.to);
            self.remove_piece(rook_from);
            self.put_piece(Piece::Rook, us, rook_to);
        }

        // Only record the en-passant square when an enemy pawn could use it,
        // so transpositions hash identically.
        if moved == Piece::Pawn && mv.from.abs_diff(mv.to) == 16 {
            if pawn_neighbours(mv.to) & self.pieces(Piece::Pawn, them) != 0 {
                let square = (mv.from + mv.to) / 2;
                self.en_passant_square = Some(square);
                self.hash ^= ZOBRIST.en_passant(square);
            }
        }

        self.castling_rights &=
            CASTLING_MASK[mv.from as usize] & CASTLING_MASK[mv.to as usize];
        self.hash ^= ZOBRIST.castling(self.castling_rights);

        if us == Color::Black {
            self.fullmove_number = self.fullmove_number.saturating_add(1);
        }
        self.side_to_move = them;
        self.hash ^= ZOBRIST.side_to_move();

        undo
    }

    /// Reverts the move recorded in `undo`. Must be called in LIFO order.
    pub fn unmake_move(&mut self, undo: Undo) {
        let us = self.side_to_move.opposite();
        let them = self.side_to_move;
        let mv = undo.mv;

        self.side_to_move = us;
        if us == Color::Black {
            self.fullmove_number -= 1;
        }

        if undo.moved == Piece::King && mv.from.abs_diff(mv.to) == 2 {
            let (rook_from, rook_to) = castling_rook_squares(mv.to);
            self.remove_piece(rook_to);
            self.put_piece(Piece::Rook, us, rook_from);
        }

        self.remove_piece(mv.to);
        self.put_piece(undo.moved, us, mv.from);

        if let Some(captured) = undo.captured {
            let square = if undo.moved == Piece::Pawn && Some(mv.to) == undo.en_passant_square {
                if us == Color::White { mv.to - 8 } else { mv.to + 8 }
            } else {
                mv.to
            };
            self.put_piece(captured, them, square);
        }

        self.castling_rights = undo.castling_rights;
        self.en_passant_square = undo.en_passant_square;
        self.halfmove_clock = undo.halfmove_clock;
        self.hash = undo.hash;
    }

    /// True when neither side can possibly deliver mate: bare kings, a single
    /// minor piece, or bishops all on one colour of square.
    pub fn has_insufficient_material(&self) -> bool {
        let heavy_or_pawns = [Piece::Pawn, Piece::Rook, Piece::Queen]
            .iter()
            .any(|&p| self.pieces(p, Color::White) | self.pieces(p, Color::Black) != 0);
        if heavy_or_pawns {
            return false;
        }

        let knights = self.pieces(Piece::Knight, Color::White) | self.pieces(Piece::Knight, Color::Black);
        let bishops = self.pieces(Piece::Bishop, Color::White) | self.pieces(Piece::Bishop, Color::Black);
        let minors = knights.count_ones() + bishops.count_ones();
        if minors <= 1 {
            return true;
        }
        if knights != 0 {
            return false;
        }

        const LIGHT_SQUARES: u64 = 0x55AA_55AA_55AA_55AA;
        bishops & LIGHT_SQUARES == 0 || bishops & !LIGHT_SQUARES == 0
    }
}

impl FromStr for Board {
    type Err = FenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Board::from_fen(s)
    }
}

/// Squares beside `square` on the same rank.
fn pawn_neighbours(square: u8) -> u64 {
    let mask = 1u64 << square;
    ((mask << 1) & !FILE_A) | ((mask >> 1) & !FILE_H)
}

/// Rook origin and destination for a castling king landing on `king_to`.
fn castling_rook_squares(king_to: u8) -> (u8, u8) {
    match king_to {
        6 => (7, 5),
        2 => (0, 3),
        62 => (63, 61),
        58 => (56, 59),
        _ => unreachable!("not a castling destination: {}", square_name(king_to)),
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for rank in (0..8u8).rev() {
            write!(f, "{} ", rank + 1)?;
            for file in 0..8u8 {
                let c = match self.mailbox[(rank * 8 + file) as usize] {
                    Some((piece, Color::White)) => piece.symbol().to_ascii_uppercase(),
                    Some((piece, Color::Black)) => piece.symbol(),
                    None => '.',
                };
                write!(f, "{c}")?;
                if file < 7 {
                    write!(f, " ")?;
                }
            }
            writeln!(f)?;
        }
        write!(f, "  a b c d e f g h")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_position_matches_start_fen() {
        let board = Board::new();
        assert_eq!(board.to_fen(), START_FEN);
        assert_eq!(Board::from_fen(START_FEN).unwrap(), board);
    }

    #[test]
    fn fen_round_trip() {
        let fens = [
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
            "rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3",
            "4k3/8/8/8/8/8/8/4K2R b K - 17 42",
        ];
        for fen in fens {
            let board = Board::from_fen(fen).unwrap();
            assert_eq!(board.to_fen(), fen);
        }
    }

    #[test]
    fn short_fen_defaults_counters() {
        let board = Board::from_fen("4k3/8/8/8/8/8/8/4K3 w - -").unwrap();
        assert_eq!(board.halfmove_clock(), 0);
        assert_eq!(board.fullmove_number(), 1);
    }

    #[test]
    fn malformed_fen_is_rejected() {
        assert!(matches!(Board::from_fen(""), Err(FenError::FieldCount(0))));
        assert!(matches!(
            Board::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP w KQkq - 0 1"),
            Err(FenError::Placement(_))
        ));
        assert!(matches!(
            Board::from_fen("rnbqkbnr/pppppppp/9/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"),
            Err(FenError::Placement(_))
        ));
        assert!(matches!(
            Board::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR x KQkq - 0 1"),
            Err(FenError::SideToMove(_))
        ));
        assert!(matches!(
            Board::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KX - 0 1"),
            Err(FenError::Castling(_))
        ));
        assert!(matches!(
            Board::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq e4 0 1"),
            Err(FenError::EnPassant(_))
        ));
        assert!(matches!(
            Board::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - x 1"),
            Err(FenError::Counter(_))
        ));
        assert!(matches!(
            Board::from_fen("8/8/8/8/8/8/8/4K3 w - - 0 1"),
            Err(FenError::KingCount)
        ));
    }

    #[test]
    fn make_and_unmake_restore_everything() {
        let mut board =
            Board::from_fen("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1")
                .unwrap();
        let original = board.clone();
        // castle, capture, plain move
        for mv in [Move::new(4, 6), Move::new(21, 23), Move::new(9, 17)] {
            let undo = board.make_move(mv);
            assert_ne!(board, original);
            board.unmake_move(undo);
            assert_eq!(board, original);
        }
    }

    #[test]
    fn castling_moves_the_rook_and_clears_rights() {
        let mut board = Board::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        board.make_move(Move::new(4, 2));
        assert_eq!(board.piece_at(3), Some((Piece::Rook, Color::White)));
        assert_eq!(board.piece_at(0), None);
        assert_eq!(board.castling_rights(), BLACK_KINGSIDE | BLACK_QUEENSIDE);
    }

    #[test]
    fn en_passant_capture_removes_the_pawn() {
        let mut board =
            Board::from_fen("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3").unwrap();
        let undo = board.make_move(Move::new(36, 45));
        assert_eq!(undo.captured, Some(Piece::Pawn));
        assert_eq!(board.piece_at(37), None);
        assert_eq!(board.piece_at(45), Some((Piece::Pawn, Color::White)));
        assert_eq!(board.halfmove_clock(), 0);
    }

    #[test]
    fn double_push_sets_en_passant_only_when_capturable() {
        let mut board = Board::new();
        board.make_move(Move::new(12, 28));
        assert_eq!(board.en_passant_square(), None);

        let mut board = Board::from_fen("4k3/8/8/8/3p4/8/4P3/4K3 w - - 0 1").unwrap();
        board.make_move(Move::new(12, 28));
        assert_eq!(board.en_passant_square(), Some(20));
    }

    #[test]
    fn incremental_hash_matches_fresh_hash() {
        let mut board = Board::new();
        for mv in [
            Move::new(12, 28),
            Move::new(51, 35),
            Move::new(28, 36),
            Move::new(53, 37),
            Move::new(36, 45),
        ] {
            board.make_move(mv);
            let fresh = Board::from_fen(&board.to_fen()).unwrap();
            assert_eq!(board.hash(), fresh.hash(), "after {}", board.to_fen());
        }
    }

    #[test]
    fn unusable_en_passant_square_does_not_change_the_hash() {
        let with_square =
            Board::from_fen("rnbqkbnr/pppp1ppp/8/4p3/8/8/PPPPPPPP/RNBQKBNR w KQkq e6 0 2").unwrap();
        let without =
            Board::from_fen("rnbqkbnr/pppp1ppp/8/4p3/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 2").unwrap();
        assert_eq!(with_square.hash(), without.hash());
        assert_eq!(
            with_square.to_fen(),
            "rnbqkbnr/pppp1ppp/8/4p3/8/8/PPPPPPPP/RNBQKBNR w KQkq e6 0 2"
        );

        let mut played =
            Board::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR b KQkq - 0 1").unwrap();
        played.make_move(Move::new(52, 36));
        assert_eq!(played.en_passant_square(), None);
        assert_eq!(played.hash(), with_square.hash());

        let usable =
            Board::from_fen("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3").unwrap();
        let unusable =
            Board::from_fen("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq - 0 3").unwrap();
        assert_ne!(usable.hash(), unusable.hash());
    }

    #[test]
    fn counters_saturate_instead_of_overflowing() {
        let mut board = Board::from_fen("4k3/8/8/8/8/8/8/4K2R b K - 65535 65535").unwrap();
        let undo = board.make_move(Move::new(60, 59));
        assert_eq!(board.halfmove_clock(), u16::MAX);
        assert_eq!(board.fullmove_number(), u16::MAX);
        board.unmake_move(undo);
        assert_eq!(board.halfmove_clock(), u16::MAX);
    }

    #[test]
    fn insufficient_material() {
        let cases = [
            ("4k3/8/8/8/8/8/8/4K3 w - - 0 1", true),
            ("4k3/8/8/8/8/8/8/2B1K3 w - - 0 1", true),
            ("4k3/8/8/8/8/8/8/1N2K3 w - - 0 1", true),
            ("2b1k3/8/8/8/8/8/8/2B1K3 w - - 0 1", false),
            ("4kb2/8/8/8/8/8/8/2B1K3 w - - 0 1", true),
            ("4k3/8/8/8/8/8/8/1NN1K3 w - - 0 1", false),
            ("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1", false),
        ];
        for (fen, expected) in cases {
            let board = Board::from_fen(fen).unwrap();
            assert_eq!(board.has_insufficient_material(), expected, "{fen}");
        }
    }

    #[test]
    fn squares_parse_and_print() {
        assert_eq!(parse_square("a1"), Some(0));
        assert_eq!(parse_square("h8"), Some(63));
        assert_eq!(parse_square("i1"), None);
        assert_eq!(parse_square("a9"), None);
        assert_eq!(square_name(28), "e4");
    }
}
