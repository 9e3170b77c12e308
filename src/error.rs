use thiserror::Error;

use crate::board::FenError;
use crate::evaluation::EvaluationError;

/// Failures surfaced by the engine. Everything except `SearchThread` is
/// recovered from locally and reported to the host as `info string`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unparseable protocol line or FEN. The command is ignored.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A move string that matches no legal move. The enclosing command is
    /// aborted without touching the session.
    #[error("illegal move: {0}")]
    IllegalMove(String),

    /// A command that is not valid in the current state, e.g. `go` while
    /// already searching.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("evaluation failure: {0}")]
    EvaluationFailure(#[from] EvaluationError),

    /// The transposition table could not be allocated at the requested size.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// The search thread died without delivering a result.
    #[error("search thread failed: {0}")]
    SearchThread(String),

    /// Writing to the GUI failed.
    #[error("output failed: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Fatal errors end the session; the rest are reported and ignored.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::SearchThread(_) | EngineError::Io(_))
    }
}

impl From<FenError> for EngineError {
    fn from(err: FenError) -> Self {
        EngineError::MalformedInput(format!("fen: {err}"))
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
