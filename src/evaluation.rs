use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::board::{BitSquares, Board, Color, Piece, FILE_A};
use crate::movegen::{bishop_attacks, knight_attacks, rook_attacks};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{evaluator} evaluator failed: {reason}")]
pub struct EvaluationError {
    pub evaluator: &'static str,
    pub reason: String,
}

/// Static evaluation consumed by search.
///
/// Scores are centipawns from the point of view of the side to move. The
/// call sits on every leaf of the search tree, so implementations should be
/// cheap and must not depend on anything but the position.
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, board: &Board) -> Result<i32, EvaluationError>;
}

/// Selectable evaluator, exposed as the `Evaluator` UCI option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvaluatorKind {
    #[default]
    Classical,
    Material,
}

impl EvaluatorKind {
    pub const ALL: [EvaluatorKind; 2] = [EvaluatorKind::Classical, EvaluatorKind::Material];

    pub fn name(self) -> &'static str {
        match self {
            EvaluatorKind::Classical => "Classical",
            EvaluatorKind::Material => "Material",
        }
    }

    pub fn build(self) -> Arc<dyn Evaluator> {
        match self {
            EvaluatorKind::Classical => Arc::new(ClassicalEvaluator::new()),
            EvaluatorKind::Material => Arc::new(MaterialEvaluator),
        }
    }
}

impl fmt::Display for EvaluatorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EvaluatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown evaluator `{s}`"))
    }
}

#[inline]
fn relative(score: i32, board: &Board) -> i32 {
    match board.side_to_move() {
        Color::White => score,
        Color::Black => -score,
    }
}

/// Plain material count.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaterialEvaluator;

impl Evaluator for MaterialEvaluator {
    fn name(&self) -> &'static str {
        "Material"
    }

    fn evaluate(&self, board: &Board) -> Result<i32, EvaluationError> {
        let mut score = 0;
        for piece in Piece::ALL {
            let white = board.pieces(piece, Color::White).count_ones() as i32;
            let black = board.pieces(piece, Color::Black).count_ones() as i32;
            score += (white - black) * piece.value();
        }
        Ok(relative(score, board))
    }
}

/// Material, piece-square tables, mobility, pawn structure and king safety.
///
/// Tables are written the way a board is read, white at the bottom: row 0 is
/// the eighth rank. Black uses them mirrored.
pub struct ClassicalEvaluator {
    pub pawn_position_bonus: [[i32; 8]; 8],
    pub knight_position_bonus: [[i32; 8]; 8],
    pub bishop_position_bonus: [[i32; 8]; 8],
    pub rook_position_bonus: [[i32; 8]; 8],
    pub queen_position_bonus: [[i32; 8]; 8],
    pub king_position_bonus: [[i32; 8]; 8],
    pub king_endgame_position_bonus: [[i32; 8]; 8],

    // Mobility weights, per attacked square
    pub knight_mobility_weight: i32,
    pub bishop_mobility_weight: i32,
    pub rook_mobility_weight: i32,
    pub queen_mobility_weight: i32,

    // Pawn structure
    pub doubled_pawn_penalty: i32,
    pub isolated_pawn_penalty: i32,
    pub passed_pawn_bonus: i32,
    pub connected_pawn_bonus: i32,

    // King safety
    pub pawn_shield_bonus: i32,
    pub open_file_penalty: i32,
    pub semi_open_file_penalty: i32,
}

impl Default for ClassicalEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassicalEvaluator {
    pub fn new() -> Self {
        Self {
            pawn_position_bonus: [
                [0, 0, 0, 0, 0, 0, 0, 0],
                [50, 50, 50, 50, 50, 50, 50, 50],
                [10, 10, 20, 30, 30, 20, 10, 10],
                [5, 5, 10, 25, 25, 10, 5, 5],
                [0, 0, 0, 20, 20, 0, 0, 0],
                [5, -5, -10, 0, 0, -10, -5, 5],
                [5, 10, 10, -20, -20, 10, 10, 5],
                [0, 0, 0, 0, 0, 0, 0, 0],
            ],
            knight_position_bonus: [
                [-50, -40, -30, -30, -30, -30, -40, -50],
                [-40, -20, 0, 0, 0, 0, -20, -40],
                [-30, 0, 10, 15, 15, 10, 0, -30],
                [-30, 5, 15, 20, 20, 15, 5, -30],
                [-30, 0, 15, 20, 20, 15, 0, -30],
                [-30, 5, 10, 15, 15, 10, 5, -30],
                [-40, -20, 0, 5, 5, 0, -20, -40],
                [-50, -40, -30, -30, -30, -30, -40, -50],
            ],
            bishop_position_bonus: [
                [-20, -10, -10, -10, -10, -10, -10, -20],
                [-10, 0, 0, 0, 0, 0, 0, -10],
                [-10, 0, 5, 10, 10, 5, 0, -10],
                [-10, 5, 5, 10, 10, 5, 5, -10],
                [-10, 0, 10, 10, 10, 10, 0, -10],
                [-10, 10, 10, 10, 10, 10, 10, -10],
                [-10, 5, 0, 0, 0, 0, 5, -10],
                [-20, -10, -10, -10, -10, -10, -10, -20],
            ],
            rook_position_bonus: [
                [0, 0, 0, 0, 0, 0, 0, 0],
                [5, 10, 10, 10, 10, 10, 10, 5],
                [-5, 0, 0, 0, 0, 0, 0, -5],
                [-5, 0, 0, 0, 0, 0, 0, -5],
                [-5, 0, 0, 0, 0, 0, 0, -5],
                [-5, 0, 0, 0, 0, 0, 0, -5],
                [-5, 0, 0, 0, 0, 0, 0, -5],
                [0, 0, 0, 5, 5, 0, 0, 0],
            ],
            queen_position_bonus: [
                [-20, -10, -10, -5, -5, -10, -10, -20],
                [-10, 0, 0, 0, 0, 0, 0, -10],
                [-10, 0, 5, 5, 5, 5, 0, -10],
                [-5, 0, 5, 5, 5, 5, 0, -5],
                [0, 0, 5, 5, 5, 5, 0, -5],
                [-10, 5, 5, 5, 5, 5, 0, -10],
                [-10, 0, 5, 0, 0, 0, 0, -10],
                [-20, -10, -10, -5, -5, -10, -10, -20],
            ],
            king_position_bonus: [
                [-30, -40, -40, -50, -50, -40, -40, -30],
                [-30, -40, -40, -50, -50, -40, -40, -30],
                [-30, -40, -40, -50, -50, -40, -40, -30],
                [-30, -40, -40, -50, -50, -40, -40, -30],
                [-20, -30, -30, -40, -40, -30, -30, -20],
                [-10, -20, -20, -20, -20, -20, -20, -10],
                [20, 20, 0, 0, 0, 0, 20, 20],
                [20, 30, 10, 0, 0, 10, 30, 20],
            ],
            king_endgame_position_bonus: [
                [-50, -40, -30, -20, -20, -30, -40, -50],
                [-30, -20, -10, 0, 0, -10, -20, -30],
                [-30, -10, 20, 30, 30, 20, -10, -30],
                [-30, -10, 30, 40, 40, 30, -10, -30],
                [-30, -10, 30, 40, 40, 30, -10, -30],
                [-30, -10, 20, 30, 30, 20, -10, -30],
                [-30, -30, 0, 0, 0, 0, -30, -30],
                [-50, -30, -30, -30, -30, -30, -30, -50],
            ],

            knight_mobility_weight: 2,
            bishop_mobility_weight: 3,
            rook_mobility_weight: 2,
            queen_mobility_weight: 1,

            doubled_pawn_penalty: -10,
            isolated_pawn_penalty: -20,
            passed_pawn_bonus: 20,
            connected_pawn_bonus: 10,

            pawn_shield_bonus: 5,
            open_file_penalty: -15,
            semi_open_file_penalty: -10,
        }
    }

    /// Score from white's point of view.
    pub fn evaluate_white(&self, board: &Board) -> i32 {
        let is_endgame = self.is_endgame(board);
        let mut score = 0;

        for color in [Color::White, Color::Black] {
            let sign = if color == Color::White { 1 } else { -1 };
            let mut side = 0;
            for piece in Piece::ALL {
                for square in BitSquares(board.pieces(piece, color)) {
                    side += piece.value() + self.position_bonus(piece, color, square, is_endgame);
                }
            }
            side += self.evaluate_mobility(board, color);
            side += self.evaluate_pawn_structure(board, color);
            side += self.evaluate_king_safety(board, color);
            score += sign * side;
        }

        score
    }

    fn position_bonus(&self, piece: Piece, color: Color, square: u8, is_endgame: bool) -> i32 {
        let rank = (square / 8) as usize;
        let file = (square % 8) as usize;
        let row = match color {
            Color::White => 7 - rank,
            Color::Black => rank,
        };

        let table = match piece {
            Piece::Pawn => &self.pawn_position_bonus,
            Piece::Knight => &self.knight_position_bonus,
            Piece::Bishop => &self.bishop_position_bonus,
            Piece::Rook => &self.rook_position_bonus,
            Piece::Queen => &self.queen_position_bonus,
            Piece::King if is_endgame => &self.king_endgame_position_bonus,
            Piece::King => &self.king_position_bonus,
        };
        table[row][file]
    }

    fn is_endgame(&self, board: &Board) -> bool {
        let majors = [Piece::Queen, Piece::Rook]
            .iter()
            .map(|&p| (board.pieces(p, Color::White) | board.pieces(p, Color::Black)).count_ones())
            .sum::<u32>();
        majors <= 2
    }

    fn evaluate_mobility(&self, board: &Board, color: Color) -> i32 {
        let occupied = board.occupied();
        let own = board.color_occupancy(color);
        let mut score = 0;

        for square in BitSquares(board.pieces(Piece::Knight, color)) {
            score += (knight_attacks(square) & !own).count_ones() as i32 * self.knight_mobility_weight;
        }
        for square in BitSquares(board.pieces(Piece::Bishop, color)) {
            score += (bishop_attacks(square, occupied) & !own).count_ones() as i32
                * self.bishop_mobility_weight;
        }
        for square in BitSquares(board.pieces(Piece::Rook, color)) {
            score += (rook_attacks(square, occupied) & !own).count_ones() as i32
                * self.rook_mobility_weight;
        }
        for square in BitSquares(board.pieces(Piece::Queen, color)) {
            let attacks = bishop_attacks(square, occupied) | rook_attacks(square, occupied);
            score += (attacks & !own).count_ones() as i32 * self.queen_mobility_weight;
        }

        score
    }

    fn evaluate_pawn_structure(&self, board: &Board, color: Color) -> i32 {
        let own = board.pieces(Piece::Pawn, color);
        let enemy = board.pieces(Piece::Pawn, color.opposite());
        let mut score = 0;

        let mut per_file = [0i32; 8];
        for square in BitSquares(own) {
            per_file[(square % 8) as usize] += 1;
        }

        for file in 0..8 {
            let count = per_file[file];
            if count == 0 {
                continue;
            }
            if count > 1 {
                score += self.doubled_pawn_penalty * (count - 1);
            }
            let has_neighbour =
                (file > 0 && per_file[file - 1] > 0) || (file < 7 && per_file[file + 1] > 0);
            if !has_neighbour {
                score += self.isolated_pawn_penalty;
            }
            if file < 7 && per_file[file + 1] > 0 {
                score += self.connected_pawn_bonus;
            }
        }

        for square in BitSquares(own) {
            if enemy & front_span(square, color) == 0 {
                score += self.passed_pawn_bonus;
            }
        }

        score
    }

    fn evaluate_king_safety(&self, board: &Board, color: Color) -> i32 {
        let Some(king) = board.king_square(color) else {
            return 0;
        };
        let rank = (king / 8) as i8;
        let file = (king % 8) as i8;
        let own_pawns = board.pieces(Piece::Pawn, color);
        let enemy_pawns = board.pieces(Piece::Pawn, color.opposite());
        let mut score = 0;

        let shield_rank = if color == Color::White { rank + 1 } else { rank - 1 };
        if (0..8).contains(&shield_rank) {
            for shield_file in (file - 1)..=(file + 1) {
                if (0..8).contains(&shield_file) {
                    let square = (shield_rank * 8 + shield_file) as u8;
                    if own_pawns & (1u64 << square) != 0 {
                        score += self.pawn_shield_bonus;
                    }
                }
            }
        }

        let king_file = FILE_A << file;
        if own_pawns & king_file == 0 {
            score += if enemy_pawns & king_file == 0 {
                self.open_file_penalty
            } else {
                self.semi_open_file_penalty
            };
        }

        score
    }
}

/// Squares in front of a pawn on its own and the adjacent files.
fn front_span(square: u8, color: Color) -> u64 {
    let file = square % 8;
    let rank = square / 8;
    let mut files = FILE_A << file;
    if file > 0 {
        files |= FILE_A << (file - 1);
    }
    if file < 7 {
        files |= FILE_A << (file + 1);
    }
    let ahead = match color {
        Color::White if rank < 7 => !0u64 << ((rank + 1) * 8),
        Color::Black if rank > 0 => !0u64 >> ((8 - rank) * 8),
        _ => 0,
    };
    files & ahead
}

impl Evaluator for ClassicalEvaluator {
    fn name(&self) -> &'static str {
        "Classical"
    }

    fn evaluate(&self, board: &Board) -> Result<i32, EvaluationError> {
        Ok(relative(self.evaluate_white(board), board))
    }
}
