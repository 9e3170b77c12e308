use std::fmt;

use crate::board::{
    parse_square, BitSquares, Board, Color, Piece, BLACK_KINGSIDE, BLACK_QUEENSIDE,
    WHITE_KINGSIDE, WHITE_QUEENSIDE,
};
use crate::error::EngineError;
use crate::history::PositionHistory;

/// A move in coordinate form. Captures, en passant and castling are not
/// stored; they follow from the board the move is played on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub from: u8,
    pub to: u8,
    pub promotion: Option<Piece>,
}

impl Move {
    pub const fn new(from: u8, to: u8) -> Self {
        Self {
            from,
            to,
            promotion: None,
        }
    }

    pub const fn new_promotion(from: u8, to: u8, promotion: Piece) -> Self {
        Self {
            from,
            to,
            promotion: Some(promotion),
        }
    }

    /// Packs into 16 bits: from (6) | to (6) | promotion (4). Zero is never a
    /// real move since origin and destination always differ.
    pub fn pack(self) -> u16 {
        let promotion = match self.promotion {
            Some(Piece::Knight) => 1,
            Some(Piece::Bishop) => 2,
            Some(Piece::Rook) => 3,
            Some(Piece::Queen) => 4,
            _ => 0,
        };
        self.from as u16 | (self.to as u16) << 6 | promotion << 12
    }

    pub fn unpack(bits: u16) -> Option<Move> {
        if bits == 0 {
            return None;
        }
        let from = (bits & 0x3F) as u8;
        let to = ((bits >> 6) & 0x3F) as u8;
        let promotion = match bits >> 12 {
            1 => Some(Piece::Knight),
            2 => Some(Piece::Bishop),
            3 => Some(Piece::Rook),
            4 => Some(Piece::Queen),
            _ => None,
        };
        Some(Move {
            from,
            to,
            promotion,
        })
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = |sq: u8| ((b'a' + sq % 8) as char, (b'1' + sq / 8) as char);
        let (from_file, from_rank) = name(self.from);
        let (to_file, to_rank) = name(self.to);
        write!(f, "{from_file}{from_rank}{to_file}{to_rank}")?;
        if let Some(piece) = self.promotion {
            write!(f, "{}", piece.symbol())?;
        }
        Ok(())
    }
}

const KNIGHT_DELTAS: [(i8, i8); 8] = [
    (-2, -1), (-2, 1), (-1, -2), (-1, 2),
    (1, -2), (1, 2), (2, -1), (2, 1),
];
const KING_DELTAS: [(i8, i8); 8] = [
    (-1, -1), (-1, 0), (-1, 1),
    (0, -1), (0, 1),
    (1, -1), (1, 0), (1, 1),
];
const BISHOP_DIRECTIONS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];
const ROOK_DIRECTIONS: [(i8, i8); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

const fn leaper_table(deltas: &[(i8, i8)]) -> [u64; 64] {
    let mut table = [0u64; 64];
    let mut square = 0;
    while square < 64 {
        let rank = (square / 8) as i8;
        let file = (square % 8) as i8;
        let mut i = 0;
        while i < deltas.len() {
            let r = rank + deltas[i].0;
            let f = file + deltas[i].1;
            if r >= 0 && r < 8 && f >= 0 && f < 8 {
                table[square] |= 1u64 << (r * 8 + f) as u32;
            }
            i += 1;
        }
        square += 1;
    }
    table
}

static KNIGHT_ATTACKS: [u64; 64] = leaper_table(&KNIGHT_DELTAS);
static KING_ATTACKS: [u64; 64] = leaper_table(&KING_DELTAS);
/// Squares attacked by a pawn of the indexed colour standing on the square.
static PAWN_ATTACKS: [[u64; 64]; 2] = [
    leaper_table(&[(1, -1), (1, 1)]),
    leaper_table(&[(-1, -1), (-1, 1)]),
];

fn slider_attacks(square: u8, occupied: u64, directions: &[(i8, i8); 4]) -> u64 {
    let mut attacks = 0u64;
    let rank = (square / 8) as i8;
    let file = (square % 8) as i8;

    for &(dr, df) in directions {
        let mut r = rank + dr;
        let mut f = file + df;
        while (0..8).contains(&r) && (0..8).contains(&f) {
            let target = 1u64 << (r * 8 + f);
            attacks |= target;
            if occupied & target != 0 {
                break;
            }
            r += dr;
            f += df;
        }
    }
    attacks
}

#[inline]
pub fn knight_attacks(square: u8) -> u64 {
    KNIGHT_ATTACKS[square as usize]
}

#[inline]
pub fn king_attacks(square: u8) -> u64 {
    KING_ATTACKS[square as usize]
}

#[inline]
pub fn pawn_attacks(square: u8, color: Color) -> u64 {
    PAWN_ATTACKS[color.index()][square as usize]
}

#[inline]
pub fn bishop_attacks(square: u8, occupied: u64) -> u64 {
    slider_attacks(square, occupied, &BISHOP_DIRECTIONS)
}

#[inline]
pub fn rook_attacks(square: u8, occupied: u64) -> u64 {
    slider_attacks(square, occupied, &ROOK_DIRECTIONS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    Ongoing,
    /// The winner
    Checkmate(Color),
    Stalemate,
    FiftyMoveRule,
    ThreefoldRepetition,
    InsufficientMaterial,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MoveGenerator;

impl MoveGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn is_square_attacked(&self, board: &Board, square: u8, by: Color) -> bool {
        let occupied = board.occupied();
        let queens = board.pieces(Piece::Queen, by);

        pawn_attacks(square, by.opposite()) & board.pieces(Piece::Pawn, by) != 0
            || knight_attacks(square) & board.pieces(Piece::Knight, by) != 0
            || king_attacks(square) & board.pieces(Piece::King, by) != 0
            || bishop_attacks(square, occupied) & (board.pieces(Piece::Bishop, by) | queens) != 0
            || rook_attacks(square, occupied) & (board.pieces(Piece::Rook, by) | queens) != 0
    }

    pub fn is_in_check(&self, board: &Board, color: Color) -> bool {
        match board.king_square(color) {
            Some(king) => self.is_square_attacked(board, king, color.opposite()),
            None => false,
        }
    }

    /// Captured piece, if any, including en passant.
    pub fn captured_piece(&self, board: &Board, mv: Move) -> Option<Piece> {
        match board.piece_at(mv.to) {
            Some((piece, _)) => Some(piece),
            None => {
                let is_pawn = matches!(board.piece_at(mv.from), Some((Piece::Pawn, _)));
                (is_pawn && board.en_passant_square() == Some(mv.to)).then_some(Piece::Pawn)
            }
        }
    }

    pub fn is_capture(&self, board: &Board, mv: Move) -> bool {
        self.captured_piece(board, mv).is_some()
    }

    /// Pseudo-legal moves: everything except the own-king-in-check filter.
    /// With `tactical_only` set, only captures and promotions are produced.
    pub fn generate_pseudo_moves(&self, board: &Board, moves: &mut Vec<Move>, tactical_only: bool) {
        let us = board.side_to_move();
        let them = us.opposite();
        let own = board.color_occupancy(us);
        let enemy = board.color_occupancy(them);
        let occupied = own | enemy;
        let targets = if tactical_only { enemy } else { !own };

        self.generate_pawn_moves(board, moves, tactical_only);

        for from in BitSquares(board.pieces(Piece::Knight, us)) {
            push_targets(moves, from, knight_attacks(from) & targets);
        }
        for from in BitSquares(board.pieces(Piece::Bishop, us)) {
            push_targets(moves, from, bishop_attacks(from, occupied) & targets);
        }
        for from in BitSquares(board.pieces(Piece::Rook, us)) {
            push_targets(moves, from, rook_attacks(from, occupied) & targets);
        }
        for from in BitSquares(board.pieces(Piece::Queen, us)) {
            let attacks = bishop_attacks(from, occupied) | rook_attacks(from, occupied);
            push_targets(moves, from, attacks & targets);
        }
        for from in BitSquares(board.pieces(Piece::King, us)) {
            push_targets(moves, from, king_attacks(from) & targets);
        }

        if !tactical_only {
            self.generate_castling(board, moves);
        }
    }

    fn generate_pawn_moves(&self, board: &Board, moves: &mut Vec<Move>, tactical_only: bool) {
        let us = board.side_to_move();
        let enemy = board.color_occupancy(us.opposite());
        let occupied = board.occupied();
        let (forward, start_rank, last_rank): (i8, u8, u8) = match us {
            Color::White => (8, 1, 7),
            Color::Black => (-8, 6, 0),
        };

        let push = |moves: &mut Vec<Move>, from: u8, to: u8| {
            if to / 8 == last_rank {
                for piece in [Piece::Queen, Piece::Rook, Piece::Bishop, Piece::Knight] {
                    moves.push(Move::new_promotion(from, to, piece));
                }
            } else {
                moves.push(Move::new(from, to));
            }
        };

        for from in BitSquares(board.pieces(Piece::Pawn, us)) {
            let one = (from as i8 + forward) as u8;
            if occupied & (1u64 << one) == 0 {
                if !tactical_only || one / 8 == last_rank {
                    push(moves, from, one);
                }
                let two = (one as i8 + forward) as u8;
                if !tactical_only && from / 8 == start_rank && occupied & (1u64 << two) == 0 {
                    moves.push(Move::new(from, two));
                }
            }

            let attacks = pawn_attacks(from, us);
            for to in BitSquares(attacks & enemy) {
                push(moves, from, to);
            }
            if let Some(ep) = board.en_passant_square() {
                if attacks & (1u64 << ep) != 0 {
                    moves.push(Move::new(from, ep));
                }
            }
        }
    }

    fn generate_castling(&self, board: &Board, moves: &mut Vec<Move>) {
        let us = board.side_to_move();
        let them = us.opposite();
        let rights = board.castling_rights();
        let occupied = board.occupied();
        let rooks = board.pieces(Piece::Rook, us);

        // (right, king from, king to, rook square, must be empty, must be safe)
        let options: [(u8, u8, u8, u8, u64, [u8; 3]); 2] = match us {
            Color::White => [
                (WHITE_KINGSIDE, 4, 6, 7, 0x60, [4, 5, 6]),
                (WHITE_QUEENSIDE, 4, 2, 0, 0x0E, [4, 3, 2]),
            ],
            Color::Black => [
                (BLACK_KINGSIDE, 60, 62, 63, 0x60 << 56, [60, 61, 62]),
                (BLACK_QUEENSIDE, 60, 58, 56, 0x0E << 56, [60, 59, 58]),
            ],
        };

        for (right, from, to, rook, empty, safe) in options {
            if rights & right == 0
                || board.piece_at(from) != Some((Piece::King, us))
                || rooks & (1u64 << rook) == 0
                || occupied & empty != 0
            {
                continue;
            }
            if safe.iter().any(|&sq| self.is_square_attacked(board, sq, them)) {
                continue;
            }
            moves.push(Move::new(from, to));
        }
    }

    /// Legal moves for the side to move. The board is restored before return.
    pub fn legal_moves(&self, board: &mut Board) -> Vec<Move> {
        let mut moves = Vec::with_capacity(64);
        self.generate_pseudo_moves(board, &mut moves, false);
        self.retain_legal(board, &mut moves);
        moves
    }

    /// Legal captures and promotions, for quiescence search.
    pub fn legal_tactical_moves(&self, board: &mut Board) -> Vec<Move> {
        let mut moves = Vec::with_capacity(16);
        self.generate_pseudo_moves(board, &mut moves, true);
        self.retain_legal(board, &mut moves);
        moves
    }

    fn retain_legal(&self, board: &mut Board, moves: &mut Vec<Move>) {
        let us = board.side_to_move();
        moves.retain(|&mv| {
            let undo = board.make_move(mv);
            let legal = !self.is_in_check(board, us);
            board.unmake_move(undo);
            legal
        });
    }

    /// Legal moves without needing a mutable board.
    pub fn generate_moves(&self, board: &Board) -> Vec<Move> {
        let mut scratch = board.clone();
        self.legal_moves(&mut scratch)
    }

    pub fn has_legal_move(&self, board: &Board) -> bool {
        !self.generate_moves(board).is_empty()
    }

    pub fn is_move_legal(&self, board: &Board, mv: Move) -> bool {
        self.generate_moves(board).contains(&mv)
    }

    /// Resolves a UCI coordinate move ("e2e4", "e7e8q") against the legal
    /// moves of `board`.
    pub fn parse_move(&self, board: &Board, text: &str) -> Result<Move, EngineError> {
        let illegal = || EngineError::IllegalMove(text.to_string());
        if !(4..=5).contains(&text.len()) || !text.is_ascii() {
            return Err(illegal());
        }
        let from = parse_square(&text[0..2]).ok_or_else(illegal)?;
        let to = parse_square(&text[2..4]).ok_or_else(illegal)?;
        let promotion = match text[4..].chars().next() {
            None => None,
            Some(c) => match Piece::from_symbol(c) {
                Some(piece @ (Piece::Knight | Piece::Bishop | Piece::Rook | Piece::Queen)) => Some(piece),
                _ => return Err(illegal()),
            },
        };

        let mv = Move { from, to, promotion };
        if self.is_move_legal(board, mv) {
            Ok(mv)
        } else {
            Err(illegal())
        }
    }

    pub fn is_checkmate(&self, board: &Board) -> bool {
        self.is_in_check(board, board.side_to_move()) && !self.has_legal_move(board)
    }

    pub fn is_stalemate(&self, board: &Board) -> bool {
        !self.is_in_check(board, board.side_to_move()) && !self.has_legal_move(board)
    }

    pub fn is_draw(&self, board: &Board, history: &PositionHistory) -> bool {
        matches!(
            self.get_game_state(board, history),
            GameState::Stalemate
                | GameState::FiftyMoveRule
                | GameState::ThreefoldRepetition
                | GameState::InsufficientMaterial
        )
    }

    pub fn get_game_state(&self, board: &Board, history: &PositionHistory) -> GameState {
        // Mate on the move that reaches the hundredth half move still counts.
        if !self.has_legal_move(board) {
            let us = board.side_to_move();
            return if self.is_in_check(board, us) {
                GameState::Checkmate(us.opposite())
            } else {
                GameState::Stalemate
            };
        }
        if board.has_insufficient_material() {
            return GameState::InsufficientMaterial;
        }
        if board.halfmove_clock() >= 100 {
            return GameState::FiftyMoveRule;
        }
        if history.is_threefold(board) {
            return GameState::ThreefoldRepetition;
        }
        GameState::Ongoing
    }

    /// Counts leaf nodes of the legal move tree.
    pub fn perft(&self, board: &mut Board, depth: u32) -> u64 {
        if depth == 0 {
            return 1;
        }
        let moves = self.legal_moves(board);
        if depth == 1 {
            return moves.len() as u64;
        }

        let mut nodes = 0;
        for mv in moves {
            let undo = board.make_move(mv);
            nodes += self.perft(board, depth - 1);
            board.unmake_move(undo);
        }
        nodes
    }

    /// Per-root-move perft counts, for debugging move generation.
    pub fn divide(&self, board: &mut Board, depth: u32) -> Vec<(Move, u64)> {
        let moves = self.legal_moves(board);
        moves
            .into_iter()
            .map(|mv| {
                let undo = board.make_move(mv);
                let nodes = self.perft(board, depth.saturating_sub(1));
                board.unmake_move(undo);
                (mv, nodes)
            })
            .collect()
    }
}

fn push_targets(moves: &mut Vec<Move>, from: u8, targets: u64) {
    for to in BitSquares(targets) {
        moves.push(Move::new(from, to));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(fen: &str) -> Board {
        Board::from_fen(fen).unwrap()
    }

    #[test]
    fn initial_position_has_twenty_moves() {
        let generator = MoveGenerator::new();
        assert_eq!(generator.generate_moves(&Board::new()).len(), 20);
    }

    #[test]
    fn promotions_generate_four_pieces() {
        let generator = MoveGenerator::new();
        let moves = generator.generate_moves(&board("4k3/P7/8/8/8/8/8/4K3 w - - 0 1"));
        let promotions = moves.iter().filter(|mv| mv.promotion.is_some()).count();
        assert_eq!(promotions, 4);
    }

    #[test]
    fn castling_both_sides() {
        let generator = MoveGenerator::new();
        let moves = generator.generate_moves(&board("4k3/8/8/8/8/8/8/R3K2R w KQ - 0 1"));
        assert!(moves.contains(&Move::new(4, 6)));
        assert!(moves.contains(&Move::new(4, 2)));
    }

    #[test]
    fn no_castling_through_attack() {
        let generator = MoveGenerator::new();
        // black rook on f8 covers f1
        let moves = generator.generate_moves(&board("5r1k/8/8/8/8/8/8/R3K2R w KQ - 0 1"));
        assert!(!moves.contains(&Move::new(4, 6)));
        assert!(moves.contains(&Move::new(4, 2)));
    }

    #[test]
    fn en_passant_is_generated() {
        let generator = MoveGenerator::new();
        let moves = generator.generate_moves(&board(
            "rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3",
        ));
        assert!(moves.contains(&Move::new(36, 45)));
    }

    #[test]
    fn pinned_piece_cannot_move() {
        let generator = MoveGenerator::new();
        // knight on e2 pinned by the rook on e8
        let moves = generator.generate_moves(&board("4r1k1/8/8/8/8/8/4N3/4K3 w - - 0 1"));
        assert!(moves.iter().all(|mv| mv.from != 12));
    }

    #[test]
    fn legal_moves_never_leave_king_in_check() {
        let generator = MoveGenerator::new();
        let mut b = board("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1");
        let us = b.side_to_move();
        for mv in generator.legal_moves(&mut b.clone()) {
            let undo = b.make_move(mv);
            assert!(!generator.is_in_check(&b, us), "{mv} leaves king in check");
            b.unmake_move(undo);
        }
    }

    #[test]
    fn checkmate_and_stalemate() {
        let generator = MoveGenerator::new();
        let history = PositionHistory::new();

        let mated = board("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3");
        assert!(generator.is_checkmate(&mated));
        assert_eq!(
            generator.get_game_state(&mated, &history),
            GameState::Checkmate(Color::Black)
        );

        let stalemate = board("k7/8/1Q6/8/8/8/8/7K b - - 0 1");
        assert!(generator.is_stalemate(&stalemate));
        assert!(generator.is_draw(&stalemate, &history));
    }

    #[test]
    fn fifty_move_rule() {
        let generator = MoveGenerator::new();
        let history = PositionHistory::new();
        let b = board("4k3/8/8/8/8/8/8/R3K3 w - - 100 80");
        assert_eq!(generator.get_game_state(&b, &history), GameState::FiftyMoveRule);
        let b = board("4k3/8/8/8/8/8/8/R3K3 w - - 99 80");
        assert_eq!(generator.get_game_state(&b, &history), GameState::Ongoing);
    }

    #[test]
    fn parse_move_accepts_legal_and_rejects_illegal() {
        let generator = MoveGenerator::new();
        let b = Board::new();
        assert_eq!(generator.parse_move(&b, "e2e4").unwrap(), Move::new(12, 28));
        for bad in ["e2e5", "e7e5", "e2", "z9z9", "e2e4qq", "a7a8q"] {
            assert!(matches!(generator.parse_move(&b, bad), Err(EngineError::IllegalMove(_))));
        }

        let promo = board("4k3/P7/8/8/8/8/8/4K3 w - - 0 1");
        assert_eq!(
            generator.parse_move(&promo, "a7a8n").unwrap(),
            Move::new_promotion(48, 56, Piece::Knight)
        );
        assert!(generator.parse_move(&promo, "a7a8").is_err());
        assert!(generator.parse_move(&promo, "a7a8k").is_err());
    }

    #[test]
    fn move_packing() {
        for mv in [
            Move::new(12, 28),
            Move::new_promotion(48, 56, Piece::Queen),
            Move::new_promotion(8, 0, Piece::Knight),
        ] {
            assert_eq!(Move::unpack(mv.pack()), Some(mv));
        }
        assert_eq!(Move::unpack(0), None);
    }

    #[test]
    fn move_display() {
        assert_eq!(Move::new(12, 28).to_string(), "e2e4");
        assert_eq!(Move::new_promotion(52, 60, Piece::Queen).to_string(), "e7e8q");
    }

    #[test]
    fn perft_shallow() {
        let generator = MoveGenerator::new();
        let mut b = Board::new();
        assert_eq!(generator.perft(&mut b, 1), 20);
        assert_eq!(generator.perft(&mut b, 2), 400);
        assert_eq!(generator.perft(&mut b, 3), 8902);
        assert_eq!(b, Board::new());
    }
}
