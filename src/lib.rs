pub mod board;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod history;
pub mod limits;
pub mod movegen;
pub mod search;
pub mod transposition;
pub mod uci;
mod zobrist;

pub use board::{Board, Color, Piece, START_FEN};
pub use engine::{EngineOptions, UciHandler};
pub use error::EngineError;
pub use evaluation::{Evaluator, EvaluatorKind};
pub use history::PositionHistory;
pub use limits::SearchLimits;
pub use movegen::{GameState, Move, MoveGenerator};
pub use search::{SearchResult, Searcher};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use transposition::TranspositionTable;

    fn play(board: &mut Board, history: &mut PositionHistory, moves: &[&str]) {
        let generator = MoveGenerator::new();
        for text in moves {
            let mv = generator.parse_move(board, text).unwrap();
            history.push(board.hash());
            board.make_move(mv);
        }
    }

    #[test]
    fn fools_mate_is_checkmate() {
        let mut board = Board::new();
        let mut history = PositionHistory::new();
        play(&mut board, &mut history, &["f2f3", "e7e5", "g2g4", "d8h4"]);

        let generator = MoveGenerator::new();
        assert_eq!(
            generator.get_game_state(&board, &history),
            GameState::Checkmate(Color::Black)
        );
        assert!(generator.is_checkmate(&board));
    }

    #[test]
    fn threefold_repetition_through_knight_moves() {
        let mut board = Board::new();
        let mut history = PositionHistory::new();
        let generator = MoveGenerator::new();
        let cycle = ["g1f3", "g8f6", "f3g1", "f6g8"];

        play(&mut board, &mut history, &cycle);
        assert_eq!(generator.get_game_state(&board, &history), GameState::Ongoing);

        play(&mut board, &mut history, &cycle);
        assert_eq!(
            generator.get_game_state(&board, &history),
            GameState::ThreefoldRepetition
        );
        assert!(generator.is_draw(&board, &history));
    }

    #[test]
    fn king_and_bishop_cannot_mate() {
        let board = Board::from_fen("8/8/4k3/8/8/2B5/8/4K3 w - - 0 1").unwrap();
        let generator = MoveGenerator::new();
        assert_eq!(
            generator.get_game_state(&board, &PositionHistory::new()),
            GameState::InsufficientMaterial
        );
    }

    #[test]
    fn both_evaluators_drive_the_search() {
        for kind in EvaluatorKind::ALL {
            let searcher = Searcher::new(kind.build(), Arc::new(TranspositionTable::new(1)));
            let board = Board::new();
            let mv = searcher.find_best_move(&board, 2).unwrap();
            assert!(MoveGenerator::new().is_move_legal(&board, mv), "{kind} played {mv}");
        }
    }
}
