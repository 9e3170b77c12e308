use std::any::Any;
use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver};

use crate::board::Board;
use crate::error::{EngineError, Result};
use crate::evaluation::{Evaluator, EvaluatorKind};
use crate::history::PositionHistory;
use crate::limits::{SearchControl, SearchLimits};
use crate::movegen::{Move, MoveGenerator};
use crate::search::{SearchInfo, SearchResult, Searcher};
use crate::transposition::{TranspositionTable, MAX_HASH_MB};
use crate::uci::{
    format_bestmove, format_info, parse_command, UciCommand, ENGINE_AUTHOR, ENGINE_NAME,
};

pub const MAX_THREADS: usize = 256;
pub const MAX_MOVE_OVERHEAD_MS: u64 = 5000;

const INFO_QUEUE: usize = 64;
const SEARCH_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Values of the UCI options. The CLI flags set the initial values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub hash_mb: usize,
    pub threads: usize,
    pub ponder: bool,
    pub move_overhead_ms: u64,
    pub evaluator: EvaluatorKind,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            hash_mb: 16,
            threads: 1,
            ponder: false,
            move_overhead_ms: 10,
            evaluator: EvaluatorKind::Classical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Waiting for `uci`.
    Uninitialized,
    /// `uciok` sent, waiting for `isready`.
    Ready,
    Idle,
    Searching,
    Terminated,
}

/// The game as the GUI last described it.
#[derive(Debug, Clone, Default)]
struct Session {
    board: Board,
    history: PositionHistory,
}

impl Session {
    /// Builds the position on the side and only commits it once every move
    /// has been validated.
    fn set_position(&mut self, fen: Option<&str>, moves: &[String]) -> Result<()> {
        let generator = MoveGenerator::new();
        let mut board = match fen {
            Some(fen) => Board::from_fen(fen)?,
            None => Board::new(),
        };
        let mut history = PositionHistory::new();
        for text in moves {
            let mv = generator.parse_move(&board, text)?;
            history.push(board.hash());
            board.make_move(mv);
        }

        self.board = board;
        self.history = history;
        Ok(())
    }
}

struct ActiveSearch {
    control: Arc<SearchControl>,
    limits: SearchLimits,
    info: Receiver<SearchInfo>,
    result: Receiver<SearchResult>,
    handle: JoinHandle<()>,
    /// Played if the search thread dies.
    fallback: Option<Move>,
}

enum Event {
    Line(Option<String>),
    Info(Option<SearchInfo>),
    Finished(Option<SearchResult>),
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Owns the session and the protocol state, reads commands and writes every
/// response line to `out`.
///
/// Searches run on their own thread. While one is running the handler keeps
/// reading input, so `isready` and `stop` are answered promptly.
pub struct UciHandler<W: Write> {
    out: W,
    state: ProtocolState,
    session: Session,
    options: EngineOptions,
    tt: Arc<TranspositionTable>,
    evaluator: Arc<dyn Evaluator>,
    search: Option<ActiveSearch>,
    debug: bool,
}

impl<W: Write> UciHandler<W> {
    pub fn new(out: W, options: EngineOptions) -> Self {
        let evaluator = options.evaluator.build();
        Self::with_evaluator(out, options, evaluator)
    }

    /// Starts the session with a caller-supplied evaluator instead of the one
    /// named in `options`. Setting the `Evaluator` option later replaces it
    /// with a built-in one.
    pub fn with_evaluator(out: W, options: EngineOptions, evaluator: Arc<dyn Evaluator>) -> Self {
        let tt = TranspositionTable::new(options.hash_mb);
        if tt.size_mb() < options.hash_mb {
            tracing::warn!(
                requested = options.hash_mb,
                allocated = tt.size_mb(),
                "transposition table is smaller than requested"
            );
        }

        Self {
            out,
            state: ProtocolState::Uninitialized,
            session: Session::default(),
            evaluator,
            options: EngineOptions {
                hash_mb: tt.size_mb(),
                ..options
            },
            tt: Arc::new(tt),
            search: None,
            debug: false,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Processes lines until `quit` or until `input` is closed.
    ///
    /// Returns an error only for faults that end the session: the search
    /// thread dying or the output becoming unwritable.
    pub fn run(mut self, input: Receiver<String>) -> Result<()> {
        loop {
            let event = match &self.search {
                Some(active) => select! {
                    recv(input) -> line => Event::Line(line.ok()),
                    recv(active.info) -> info => Event::Info(info.ok()),
                    recv(active.result) -> result => Event::Finished(result.ok()),
                },
                None => Event::Line(input.recv().ok()),
            };

            match event {
                Event::Line(Some(line)) => {
                    if self.handle_line(&line)? == Flow::Quit {
                        break;
                    }
                }
                Event::Line(None) => {
                    self.end_of_input()?;
                    break;
                }
                Event::Info(Some(info)) => self.send(&format_info(&info))?,
                // The search thread dropped its sender, so its result (if
                // any) is already queued.
                Event::Info(None) => self.wait_for_search()?,
                Event::Finished(result) => self.finish_search(result)?,
            }
        }

        self.state = ProtocolState::Terminated;
        tracing::info!("session ended");
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Result<Flow> {
        tracing::debug!(line, state = ?self.state, "received");
        let command = match parse_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(Flow::Continue),
            Err(err) => {
                self.report(&err)?;
                return Ok(Flow::Continue);
            }
        };

        match self.dispatch(command) {
            Err(err) if !err.is_fatal() => {
                self.report(&err)?;
                Ok(Flow::Continue)
            }
            other => other,
        }
    }

    fn dispatch(&mut self, command: UciCommand) -> Result<Flow> {
        match command {
            UciCommand::Uci => self.cmd_uci()?,
            UciCommand::Debug(on) => self.debug = on,
            UciCommand::IsReady => {
                if self.state == ProtocolState::Ready {
                    self.state = ProtocolState::Idle;
                }
                self.send("readyok")?;
            }
            UciCommand::SetOption { name, value } => {
                self.ensure_idle("setoption")?;
                self.cmd_setoption(&name, value.as_deref())?;
            }
            UciCommand::Register => tracing::debug!("registration is not required"),
            UciCommand::UciNewGame => {
                self.ensure_idle("ucinewgame")?;
                self.session = Session::default();
                self.tt.clear();
            }
            // The running search works on its own copy of the position.
            UciCommand::Position { fen, moves } => {
                self.session.set_position(fen.as_deref(), &moves)?
            }
            UciCommand::Go(limits) => {
                self.ensure_idle("go")?;
                self.start_search(limits)?;
            }
            UciCommand::Stop => match &self.search {
                Some(active) => {
                    active.control.stop();
                    self.wait_for_search()?;
                }
                None => tracing::debug!("stop without a running search"),
            },
            UciCommand::PonderHit => match &self.search {
                Some(active) if active.control.is_pondering() => active.control.ponderhit(),
                _ => tracing::debug!("ponderhit without a ponder search"),
            },
            UciCommand::Quit => {
                if let Some(active) = &self.search {
                    active.control.stop();
                }
                self.wait_for_search()?;
                return Ok(Flow::Quit);
            }
            UciCommand::Display => self.cmd_display()?,
            UciCommand::Perft(depth) => {
                self.ensure_idle("perft")?;
                self.cmd_perft(depth)?;
            }
        }
        Ok(Flow::Continue)
    }

    fn ensure_idle(&self, command: &str) -> Result<()> {
        if self.search.is_some() {
            return Err(EngineError::ProtocolViolation(format!(
                "{command} while a search is running"
            )));
        }
        Ok(())
    }

    fn cmd_uci(&mut self) -> Result<()> {
        let options = self.options.clone();
        self.send(&format!("id name {ENGINE_NAME} {}", env!("CARGO_PKG_VERSION")))?;
        self.send(&format!("id author {ENGINE_AUTHOR}"))?;
        self.send(&format!(
            "option name Hash type spin default {} min 1 max {MAX_HASH_MB}",
            options.hash_mb.max(1)
        ))?;
        self.send(&format!(
            "option name Threads type spin default {} min 1 max {MAX_THREADS}",
            options.threads
        ))?;
        self.send(&format!("option name Ponder type check default {}", options.ponder))?;
        self.send(&format!(
            "option name MoveOverhead type spin default {} min 0 max {MAX_MOVE_OVERHEAD_MS}",
            options.move_overhead_ms
        ))?;
        let vars: String = EvaluatorKind::ALL
            .iter()
            .map(|kind| format!(" var {kind}"))
            .collect();
        self.send(&format!(
            "option name Evaluator type combo default {}{vars}",
            options.evaluator
        ))?;
        self.send("option name Clear Hash type button")?;
        self.send(&format!("info string evaluator {}", self.evaluator.name()))?;
        self.send("uciok")?;

        if self.state == ProtocolState::Uninitialized {
            self.state = ProtocolState::Ready;
        }
        Ok(())
    }

    fn cmd_setoption(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        match name.to_ascii_lowercase().as_str() {
            "hash" => {
                let mb: usize = parse_option(name, value)?;
                self.resize_hash(mb.clamp(1, MAX_HASH_MB))?;
            }
            "threads" => {
                let threads: usize = parse_option(name, value)?;
                self.options.threads = threads.clamp(1, MAX_THREADS);
            }
            "ponder" => self.options.ponder = parse_option(name, value)?,
            "moveoverhead" => {
                let overhead: u64 = parse_option(name, value)?;
                self.options.move_overhead_ms = overhead.min(MAX_MOVE_OVERHEAD_MS);
            }
            "evaluator" => {
                let kind: EvaluatorKind = option_value(name, value)?
                    .parse()
                    .map_err(EngineError::MalformedInput)?;
                self.options.evaluator = kind;
                self.evaluator = kind.build();
                self.send(&format!("info string evaluator {kind}"))?;
            }
            "clear hash" => self.tt.clear(),
            _ => {
                tracing::warn!(option = name, "ignoring unknown option");
                if self.debug {
                    self.send(&format!("info string unknown option {name}"))?;
                }
            }
        }
        tracing::debug!(options = ?self.options, "options updated");
        Ok(())
    }

    fn resize_hash(&mut self, mb: usize) -> Result<()> {
        // release the old table before allocating the new one
        self.tt = Arc::new(TranspositionTable::disabled());
        let table = TranspositionTable::new(mb);
        let allocated = table.size_mb();
        self.tt = Arc::new(table);
        self.options.hash_mb = allocated;

        if allocated < mb {
            return Err(EngineError::ResourceExhaustion(format!(
                "hash table reduced to {allocated} MB, {mb} MB requested"
            )));
        }
        Ok(())
    }

    fn cmd_display(&mut self) -> Result<()> {
        let board = self.session.board.clone();
        for line in board.to_string().lines() {
            self.send(line)?;
        }
        self.send(&format!("Fen: {}", board.to_fen()))?;
        self.send(&format!("Key: {:016X}", board.hash()))?;
        let state = MoveGenerator::new().get_game_state(&board, &self.session.history);
        self.send(&format!("State: {state:?}"))
    }

    fn cmd_perft(&mut self, depth: u32) -> Result<()> {
        let started = Instant::now();
        let mut board = self.session.board.clone();
        let divide = MoveGenerator::new().divide(&mut board, depth.max(1));

        let mut total = 0;
        for (mv, nodes) in divide {
            total += nodes;
            self.send(&format!("{mv}: {nodes}"))?;
        }
        self.send("")?;
        self.send(&format!("Nodes searched: {total}"))?;
        tracing::info!(depth, total, elapsed = ?started.elapsed(), "perft finished");
        Ok(())
    }

    fn start_search(&mut self, limits: SearchLimits) -> Result<()> {
        if self.state != ProtocolState::Idle {
            tracing::warn!(state = ?self.state, "go before the uci handshake completed");
        }

        let board = self.session.board.clone();
        let history = self.session.history.clone();
        let fallback = MoveGenerator::new().generate_moves(&board).first().copied();

        let control = Arc::new(SearchControl::new(limits.ponder));
        let (info_tx, info_rx) = bounded(INFO_QUEUE);
        let (result_tx, result_rx) = bounded(1);
        let searcher = Searcher::new(Arc::clone(&self.evaluator), Arc::clone(&self.tt))
            .with_threads(self.options.threads)
            .with_move_overhead(Duration::from_millis(self.options.move_overhead_ms));

        let thread_control = Arc::clone(&control);
        let thread_limits = limits.clone();
        let spawned = thread::Builder::new()
            .name("search".to_string())
            .stack_size(SEARCH_STACK_SIZE)
            .spawn(move || {
                let result = searcher.search(&board, &history, &thread_limits, &thread_control, |info| {
                    if info_tx.try_send(info).is_err() {
                        tracing::debug!("info queue full, dropping report");
                    }
                });
                if result_tx.send(result).is_err() {
                    tracing::warn!("search result has no receiver");
                }
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.send(&format_bestmove(fallback, None))?;
                return Err(EngineError::ResourceExhaustion(format!(
                    "could not start search thread: {err}"
                )));
            }
        };

        tracing::debug!(?limits, "search started");
        self.search = Some(ActiveSearch {
            control,
            limits,
            info: info_rx,
            result: result_rx,
            handle,
            fallback,
        });
        self.state = ProtocolState::Searching;
        Ok(())
    }

    /// Blocks until the running search (if any) delivers its result.
    fn wait_for_search(&mut self) -> Result<()> {
        let result = match &self.search {
            Some(active) => active.result.recv().ok(),
            None => return Ok(()),
        };
        self.finish_search(result)
    }

    /// Flushes pending info lines, then the bestmove. A missing result means
    /// the search thread died.
    fn finish_search(&mut self, result: Option<SearchResult>) -> Result<()> {
        let Some(active) = self.search.take() else {
            return Ok(());
        };
        for info in active.info.try_iter() {
            self.send(&format_info(&info))?;
        }
        let joined = active.handle.join();
        self.state = ProtocolState::Idle;

        match result {
            Some(result) => {
                if let Some(failure) = result.failure {
                    self.report(&EngineError::EvaluationFailure(failure))?;
                }
                self.send(&format_bestmove(result.best_move, result.ponder_move))
            }
            None => {
                let reason = match joined {
                    Err(panic) => panic_message(panic.as_ref()),
                    Ok(()) => "search ended without a result".to_string(),
                };
                tracing::error!(%reason, "search thread failed");
                self.send(&format_bestmove(active.fallback, None))?;
                Err(EngineError::SearchThread(reason))
            }
        }
    }

    fn end_of_input(&mut self) -> Result<()> {
        tracing::info!("input closed");
        if let Some(active) = &self.search {
            if active.limits.is_unbounded() {
                active.control.stop();
            }
        }
        self.wait_for_search()
    }

    fn report(&mut self, err: &EngineError) -> Result<()> {
        tracing::warn!(%err, "command failed");
        self.send(&format!("info string {err}"))
    }

    fn send(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        tracing::trace!(line, "sent");
        Ok(())
    }
}

fn option_value<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str> {
    value.ok_or_else(|| EngineError::MalformedInput(format!("option {name} needs a value")))
}

fn parse_option<T: std::str::FromStr>(name: &str, value: Option<&str>) -> Result<T> {
    let value = option_value(name, value)?;
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::MalformedInput(format!("invalid value `{value}` for option {name}")))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "search thread panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn run_lines(options: EngineOptions, lines: &[&str]) -> Vec<String> {
        let (tx, rx) = unbounded();
        for line in lines {
            tx.send(line.to_string()).unwrap();
        }
        drop(tx);

        let mut out = Vec::new();
        UciHandler::new(&mut out, options).run(rx).unwrap();
        String::from_utf8(out).unwrap().lines().map(str::to_string).collect()
    }

    #[test]
    fn handshake_lists_options() {
        let output = run_lines(EngineOptions::default(), &["uci", "isready"]);
        assert!(output[0].starts_with("id name Three Salmons"));
        assert!(output.contains(&"option name Hash type spin default 16 min 1 max 65536".to_string()));
        assert!(output.contains(
            &"option name Evaluator type combo default Classical var Classical var Material".to_string()
        ));
        assert_eq!(output[output.len() - 2], "uciok");
        assert_eq!(output.last().unwrap(), "readyok");
    }

    #[test]
    fn state_follows_the_handshake() {
        let mut handler = UciHandler::new(Vec::new(), EngineOptions::default());
        assert_eq!(handler.state(), ProtocolState::Uninitialized);
        handler.handle_line("uci").unwrap();
        assert_eq!(handler.state(), ProtocolState::Ready);
        handler.handle_line("isready").unwrap();
        assert_eq!(handler.state(), ProtocolState::Idle);

        handler.handle_line("go depth 1").unwrap();
        assert_eq!(handler.state(), ProtocolState::Searching);
        assert_eq!(handler.handle_line("quit").unwrap(), Flow::Quit);
        assert_eq!(handler.state(), ProtocolState::Idle);

        let output = String::from_utf8(handler.out).unwrap();
        assert_eq!(output.lines().filter(|line| line.starts_with("bestmove")).count(), 1);
    }

    #[test]
    fn illegal_move_keeps_previous_position() {
        let mut out = Vec::new();
        let mut handler = UciHandler::new(&mut out, EngineOptions::default());
        handler.handle_line("position startpos moves e2e4").unwrap();
        let before = handler.session.board.clone();

        handler.handle_line("position startpos moves e2e4 e7e6 e1e3").unwrap();
        assert_eq!(handler.session.board, before);
        assert_eq!(handler.session.history.len(), 1);
        drop(handler);

        let output = String::from_utf8(out).unwrap();
        assert_eq!(output.trim(), "info string illegal move: e1e3");
    }

    #[test]
    fn options_are_applied_and_validated() {
        let mut out = Vec::new();
        let mut handler = UciHandler::new(&mut out, EngineOptions::default());
        handler.handle_line("setoption name Threads value 4").unwrap();
        handler.handle_line("setoption name MoveOverhead value 99999").unwrap();
        handler.handle_line("setoption name Ponder value true").unwrap();
        handler.handle_line("setoption name Evaluator value material").unwrap();
        handler.handle_line("setoption name Hash value 2").unwrap();
        handler.handle_line("setoption name Threads value many").unwrap();
        handler.handle_line("setoption name Nonsense value 1").unwrap();

        assert_eq!(
            handler.options,
            EngineOptions {
                hash_mb: 2,
                threads: 4,
                ponder: true,
                move_overhead_ms: MAX_MOVE_OVERHEAD_MS,
                evaluator: EvaluatorKind::Material,
            }
        );
        assert_eq!(handler.evaluator.name(), "Material");
        assert_eq!(handler.tt.size_mb(), 2);
        drop(handler);

        let output = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines,
            vec![
                "info string evaluator Material",
                "info string malformed input: invalid value `many` for option Threads",
            ]
        );
    }

    #[test]
    fn perft_divide_output() {
        let output = run_lines(EngineOptions::default(), &["position startpos", "perft 2"]);
        assert_eq!(output.len(), 22);
        assert!(output.contains(&"e2e4: 20".to_string()));
        assert_eq!(output.last().unwrap(), "Nodes searched: 400");
    }

    #[test]
    fn display_shows_fen() {
        let output = run_lines(EngineOptions::default(), &["position startpos moves e2e4", "d"]);
        assert!(output
            .contains(&"Fen: rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1".to_string()));
        assert_eq!(output.last().unwrap(), "State: Ongoing");
    }

    #[test]
    fn ponder_search_is_released_by_ponderhit() {
        let options = EngineOptions {
            ponder: true,
            ..EngineOptions::default()
        };
        let output = run_lines(
            options,
            &["position startpos moves e2e4", "go ponder depth 2", "ponderhit"],
        );
        let bestmoves: Vec<&String> = output.iter().filter(|line| line.starts_with("bestmove")).collect();
        assert_eq!(bestmoves.len(), 1);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "search thread panicked");
    }
}
