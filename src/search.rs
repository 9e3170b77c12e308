use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::board::{Board, Color, Piece};
use crate::evaluation::{EvaluationError, Evaluator};
use crate::history::PositionHistory;
use crate::limits::{SearchControl, SearchLimits, TimeBudget};
use crate::movegen::{Move, MoveGenerator};
use crate::transposition::{NodeType, TranspositionEntry, TranspositionTable};

pub const MATE: i32 = 30_000;
pub const INFINITY: i32 = 32_000;
pub const MAX_PLY: usize = 128;

const MATE_BOUND: i32 = MATE - MAX_PLY as i32;
const CHECK_INTERVAL: u64 = 2048;
const HISTORY_MAX: i32 = 50_000;
const WORKER_STACK_SIZE: usize = 8 * 1024 * 1024;

pub fn is_mate_score(score: i32) -> bool {
    score.abs() >= MATE_BOUND
}

/// Full moves until mate; negative when the side to move is being mated.
pub fn mate_in(score: i32) -> Option<i32> {
    if !is_mate_score(score) {
        return None;
    }
    let moves = (MATE - score.abs() + 1) / 2;
    Some(if score > 0 { moves } else { -moves })
}

// Mate scores are stored relative to the node, not the root.
fn score_to_tt(score: i32, ply: usize) -> i32 {
    if score >= MATE_BOUND {
        score + ply as i32
    } else if score <= -MATE_BOUND {
        score - ply as i32
    } else {
        score
    }
}

fn score_from_tt(score: i32, ply: usize) -> i32 {
    if score >= MATE_BOUND {
        score - ply as i32
    } else if score <= -MATE_BOUND {
        score + ply as i32
    } else {
        score
    }
}

/// Progress report for one completed iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchInfo {
    pub depth: u32,
    pub seldepth: u32,
    pub score: i32,
    pub nodes: u64,
    pub nps: u64,
    pub time_ms: u64,
    pub hashfull: u32,
    pub pv: Vec<Move>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// `None` only when the root has no legal move.
    pub best_move: Option<Move>,
    pub ponder_move: Option<Move>,
    pub score: i32,
    /// Last fully completed depth, 0 if none completed.
    pub depth: u32,
    pub nodes: u64,
    pub pv: Vec<Move>,
    /// Set when the evaluator failed; the move is then the best found before
    /// the failure.
    pub failure: Option<EvaluationError>,
}

enum Interrupt {
    Stopped,
    Evaluation(EvaluationError),
}

/// Runs searches with a shared evaluator and transposition table.
pub struct Searcher {
    evaluator: Arc<dyn Evaluator>,
    tt: Arc<TranspositionTable>,
    threads: usize,
    move_overhead: Duration,
}

impl Searcher {
    pub fn new(evaluator: Arc<dyn Evaluator>, tt: Arc<TranspositionTable>) -> Self {
        Self {
            evaluator,
            tt,
            threads: 1,
            move_overhead: Duration::ZERO,
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_move_overhead(mut self, move_overhead: Duration) -> Self {
        self.move_overhead = move_overhead;
        self
    }

    /// Fixed-depth search without reporting.
    pub fn find_best_move(&self, board: &Board, depth: u32) -> Option<Move> {
        let control = SearchControl::new(false);
        self.search(
            board,
            &PositionHistory::new(),
            &SearchLimits::depth(depth),
            &control,
            |_| {},
        )
        .best_move
    }

    /// Iterative deepening from `board`. `history` holds the keys of the
    /// game positions before it. `on_info` is called by the main worker after
    /// every completed depth.
    ///
    /// Infinite and ponder searches do not return before `control` is
    /// stopped or, for ponder, released by `ponderhit`.
    pub fn search<F>(
        &self,
        board: &Board,
        history: &PositionHistory,
        limits: &SearchLimits,
        control: &SearchControl,
        mut on_info: F,
    ) -> SearchResult
    where
        F: FnMut(SearchInfo),
    {
        let generator = MoveGenerator::new();
        let mut root_moves = generator.generate_moves(board);
        if !limits.searchmoves.is_empty() {
            let allowed: Vec<Move> = limits
                .searchmoves
                .iter()
                .filter_map(|text| generator.parse_move(board, text).ok())
                .collect();
            if allowed.is_empty() {
                tracing::warn!(searchmoves = ?limits.searchmoves, "no legal searchmoves, searching all moves");
            } else {
                root_moves.retain(|mv| allowed.contains(mv));
            }
        }

        if root_moves.is_empty() {
            control.wait_for_release(limits.infinite);
            let in_check = generator.is_in_check(board, board.side_to_move());
            return SearchResult {
                best_move: None,
                ponder_move: None,
                score: if in_check { -MATE } else { 0 },
                depth: 0,
                nodes: 0,
                pv: Vec::new(),
                failure: None,
            };
        }

        let helpers_done = AtomicBool::new(false);
        let context = SharedContext {
            evaluator: self.evaluator.as_ref(),
            tt: self.tt.as_ref(),
            control,
            helpers_done: &helpers_done,
            limits,
            budget: TimeBudget::from_limits(limits, board.side_to_move(), self.move_overhead),
        };
        tracing::debug!(budget = ?context.budget, threads = self.threads, "search started");

        let outcome = thread::scope(|scope| {
            for id in 1..self.threads {
                let (board, history, moves) = (board.clone(), history.clone(), root_moves.clone());
                let spawned = thread::Builder::new()
                    .name(format!("search-helper-{id}"))
                    .stack_size(WORKER_STACK_SIZE)
                    .spawn_scoped(scope, move || {
                        Worker::new(context, false, 1 + id as u32 % 2).iterate(board, history, moves, None)
                    });
                if let Err(err) = spawned {
                    tracing::warn!(%err, "could not start helper thread");
                    break;
                }
            }

            let mut main = Worker::new(context, true, 1);
            let outcome = main.iterate(
                board.clone(),
                history.clone(),
                root_moves.clone(),
                Some(&mut on_info),
            );
            helpers_done.store(true, Ordering::Release);
            outcome
        });

        control.wait_for_release(limits.infinite);

        let best_move = match outcome.pv.first() {
            Some(&mv) => Some(mv),
            // nothing trustworthy was searched
            None if outcome.failure.is_some() => None,
            None => {
                // no iteration finished; any legal move beats forfeiting
                let mut rng = rand::thread_rng();
                let fallback = *root_moves.choose(&mut rng).unwrap_or(&root_moves[0]);
                tracing::warn!(%fallback, "no depth completed, playing a random legal move");
                Some(fallback)
            }
        };

        SearchResult {
            best_move,
            ponder_move: outcome.pv.get(1).copied(),
            score: outcome.score,
            depth: outcome.depth,
            nodes: control.nodes(),
            pv: outcome.pv,
            failure: outcome.failure,
        }
    }

}

#[derive(Clone, Copy)]
struct SharedContext<'a> {
    evaluator: &'a dyn Evaluator,
    tt: &'a TranspositionTable,
    control: &'a SearchControl,
    helpers_done: &'a AtomicBool,
    limits: &'a SearchLimits,
    budget: Option<TimeBudget>,
}

#[derive(Default)]
struct Outcome {
    score: i32,
    depth: u32,
    pv: Vec<Move>,
    failure: Option<EvaluationError>,
}

/// One search thread. Helpers share only the transposition table with the
/// main worker.
struct Worker<'a> {
    ctx: SharedContext<'a>,
    generator: MoveGenerator,
    is_main: bool,
    start_depth: u32,
    completed_depth: u32,
    nodes: u64,
    unflushed: u64,
    seldepth: usize,
    pv: Vec<Vec<Move>>,
    killers: [[Option<Move>; 2]; MAX_PLY],
    quiet_history: Box<[[[i32; 64]; 64]; 2]>,
}

impl<'a> Worker<'a> {
    fn new(ctx: SharedContext<'a>, is_main: bool, start_depth: u32) -> Self {
        Self {
            ctx,
            generator: MoveGenerator::new(),
            is_main,
            start_depth: start_depth.min(ctx.limits.max_depth()),
            completed_depth: 0,
            nodes: 0,
            unflushed: 0,
            seldepth: 0,
            pv: vec![Vec::new(); MAX_PLY + 1],
            killers: [[None; 2]; MAX_PLY],
            quiet_history: Box::new([[[0; 64]; 64]; 2]),
        }
    }

    fn iterate(
        &mut self,
        mut board: Board,
        mut positions: PositionHistory,
        mut root_moves: Vec<Move>,
        mut on_info: Option<&mut dyn FnMut(SearchInfo)>,
    ) -> Outcome {
        let mut outcome = Outcome::default();

        for depth in self.start_depth..=self.ctx.limits.max_depth() {
            if depth > self.start_depth && self.soft_limit_reached() {
                break;
            }
            self.seldepth = 0;

            match self.search_root(&mut board, &mut positions, &root_moves, depth) {
                Ok(score) => {
                    self.completed_depth = depth;
                    outcome.depth = depth;
                    outcome.score = score;
                    outcome.pv = self.pv[0].clone();

                    if let Some(&best) = outcome.pv.first() {
                        if let Some(index) = root_moves.iter().position(|&mv| mv == best) {
                            root_moves[..=index].rotate_right(1);
                        }
                    }

                    self.flush_nodes();
                    if let Some(report) = on_info.as_deref_mut() {
                        report(self.info(depth, score));
                    }

                    if let (Some(wanted), Some(found)) = (self.ctx.limits.mate, mate_in(score)) {
                        if found > 0 && found as u32 <= wanted {
                            break;
                        }
                    }
                }
                Err(Interrupt::Stopped) => break,
                Err(Interrupt::Evaluation(err)) => {
                    tracing::error!(%err, depth, "evaluation failed, aborting search");
                    outcome.failure = Some(err);
                    break;
                }
            }
        }

        self.flush_nodes();
        if self.is_main {
            tracing::debug!(depth = outcome.depth, nodes = self.nodes, "search finished");
        }
        outcome
    }

    fn search_root(
        &mut self,
        board: &mut Board,
        positions: &mut PositionHistory,
        root_moves: &[Move],
        depth: u32,
    ) -> Result<i32, Interrupt> {
        let mut alpha = -INFINITY;
        let beta = INFINITY;
        let mut best_move = None;
        self.pv[0].clear();

        for &mv in root_moves {
            self.check_limits()?;

            positions.push(board.hash());
            let undo = board.make_move(mv);
            let score = self
                .negamax(board, positions, depth - 1, -beta, -alpha, 1)
                .map(|score| -score);
            board.unmake_move(undo);
            positions.pop();
            let score = score?;

            if score > alpha {
                alpha = score;
                best_move = Some(mv);
                self.update_pv(0, mv);
            }
        }

        self.ctx.tt.store(TranspositionEntry {
            hash: board.hash(),
            depth: depth.min(u8::MAX as u32) as u8,
            score: alpha,
            node_type: NodeType::Exact,
            best_move,
        });
        Ok(alpha)
    }

    fn negamax(
        &mut self,
        board: &mut Board,
        positions: &mut PositionHistory,
        mut depth: u32,
        mut alpha: i32,
        mut beta: i32,
        ply: usize,
    ) -> Result<i32, Interrupt> {
        self.pv[ply].clear();

        if board.has_insufficient_material() || positions.is_repetition(board) {
            return Ok(0);
        }

        let us = board.side_to_move();
        let in_check = self.generator.is_in_check(board, us);
        if in_check {
            depth += 1;
        }
        if depth == 0 {
            return self.quiescence(board, alpha, beta, ply);
        }

        self.count_node()?;
        self.seldepth = self.seldepth.max(ply);
        if ply >= MAX_PLY - 1 {
            return self.evaluate(board);
        }

        // no line from here can beat a mate already found closer to the root
        alpha = alpha.max(-MATE + ply as i32);
        beta = beta.min(MATE - ply as i32 - 1);
        if alpha >= beta {
            return Ok(alpha);
        }

        let hash = board.hash();
        let tt_entry = self.ctx.tt.probe(hash);
        if let Some(entry) = tt_entry {
            if entry.depth as u32 >= depth {
                let score = score_from_tt(entry.score, ply);
                match entry.node_type {
                    NodeType::Exact => return Ok(score),
                    NodeType::LowerBound if score >= beta => return Ok(score),
                    NodeType::UpperBound if score <= alpha => return Ok(score),
                    _ => {}
                }
            }
        }

        let mut moves = self.generator.legal_moves(board);
        if moves.is_empty() {
            return Ok(if in_check { -MATE + ply as i32 } else { 0 });
        }
        if board.halfmove_clock() >= 100 {
            return Ok(0);
        }

        let tt_move = tt_entry.and_then(|entry| entry.best_move);
        self.order_moves(board, &mut moves, tt_move, ply);

        let original_alpha = alpha;
        let mut best_score = -INFINITY;
        let mut best_move = None;

        for mv in moves {
            let quiet = mv.promotion.is_none() && !self.generator.is_capture(board, mv);

            positions.push(hash);
            let undo = board.make_move(mv);
            let score = self
                .negamax(board, positions, depth - 1, -beta, -alpha, ply + 1)
                .map(|score| -score);
            board.unmake_move(undo);
            positions.pop();
            let score = score?;

            if score > best_score {
                best_score = score;
                best_move = Some(mv);
                if score > alpha {
                    alpha = score;
                    self.update_pv(ply, mv);
                }
            }

            if alpha >= beta {
                if quiet {
                    self.record_cutoff(us, mv, depth, ply);
                }
                break;
            }
        }

        let node_type = if best_score <= original_alpha {
            NodeType::UpperBound
        } else if best_score >= beta {
            NodeType::LowerBound
        } else {
            NodeType::Exact
        };
        self.ctx.tt.store(TranspositionEntry {
            hash,
            depth: depth.min(u8::MAX as u32) as u8,
            score: score_to_tt(best_score, ply),
            node_type,
            best_move,
        });

        Ok(best_score)
    }

    fn quiescence(
        &mut self,
        board: &mut Board,
        mut alpha: i32,
        beta: i32,
        ply: usize,
    ) -> Result<i32, Interrupt> {
        self.pv[ply].clear();
        self.count_node()?;
        self.seldepth = self.seldepth.max(ply);

        let stand_pat = self.evaluate(board)?;
        if ply >= MAX_PLY - 1 {
            return Ok(stand_pat);
        }
        if stand_pat >= beta {
            return Ok(beta);
        }
        alpha = alpha.max(stand_pat);

        let mut moves = self.generator.legal_tactical_moves(board);
        self.order_moves(board, &mut moves, None, ply);

        for mv in moves {
            let undo = board.make_move(mv);
            let score = self
                .quiescence(board, -beta, -alpha, ply + 1)
                .map(|score| -score);
            board.unmake_move(undo);
            let score = score?;

            if score >= beta {
                return Ok(beta);
            }
            if score > alpha {
                alpha = score;
            }
        }

        Ok(alpha)
    }

    fn evaluate(&self, board: &Board) -> Result<i32, Interrupt> {
        self.ctx
            .evaluator
            .evaluate(board)
            .map(|score| score.clamp(-MATE_BOUND + 1, MATE_BOUND - 1))
            .map_err(Interrupt::Evaluation)
    }

    /// Hash move, then captures and promotions by MVV-LVA, then killers, then
    /// the history heuristic.
    fn order_moves(&self, board: &Board, moves: &mut [Move], tt_move: Option<Move>, ply: usize) {
        let us = board.side_to_move();
        moves.sort_by_cached_key(|&mv| Reverse(self.move_score(board, mv, tt_move, ply, us)));
    }

    fn move_score(&self, board: &Board, mv: Move, tt_move: Option<Move>, ply: usize, us: Color) -> i32 {
        if tt_move == Some(mv) {
            return 1_000_000;
        }

        let mut score = 0;
        if let Some(victim) = self.generator.captured_piece(board, mv) {
            let attacker = board.piece_at(mv.from).map_or(Piece::Pawn, |(piece, _)| piece);
            score += 100_000 + victim.value() * 10 - attacker.value() / 100;
        }
        if let Some(promotion) = mv.promotion {
            score += 90_000 + promotion.value();
        }
        if score > 0 {
            return score;
        }

        if ply < MAX_PLY {
            if self.killers[ply][0] == Some(mv) {
                return 80_000;
            }
            if self.killers[ply][1] == Some(mv) {
                return 79_000;
            }
        }
        self.quiet_history[us.index()][mv.from as usize][mv.to as usize]
    }

    fn record_cutoff(&mut self, us: Color, mv: Move, depth: u32, ply: usize) {
        let killers = &mut self.killers[ply];
        if killers[0] != Some(mv) {
            killers[1] = killers[0];
            killers[0] = Some(mv);
        }

        let side = &mut self.quiet_history[us.index()];
        let entry = &mut side[mv.from as usize][mv.to as usize];
        *entry += (depth * depth) as i32;
        if *entry > HISTORY_MAX {
            for row in side.iter_mut() {
                for value in row.iter_mut() {
                    *value /= 2;
                }
            }
        }
    }

    fn update_pv(&mut self, ply: usize, mv: Move) {
        let (head, tail) = self.pv.split_at_mut(ply + 1);
        let line = &mut head[ply];
        line.clear();
        line.push(mv);
        line.extend_from_slice(&tail[0]);
    }

    fn count_node(&mut self) -> Result<(), Interrupt> {
        self.nodes += 1;
        self.unflushed += 1;

        if let (true, Some(limit)) = (self.is_main, self.ctx.limits.nodes) {
            if self.completed_depth > 0 && self.nodes >= limit {
                return Err(Interrupt::Stopped);
            }
        }
        if self.unflushed >= CHECK_INTERVAL {
            self.flush_nodes();
            self.check_limits()?;
        }
        Ok(())
    }

    fn flush_nodes(&mut self) {
        self.ctx.control.add_nodes(self.unflushed);
        self.unflushed = 0;
    }

    fn check_limits(&self) -> Result<(), Interrupt> {
        let ctx = &self.ctx;
        if ctx.control.is_stopped() || ctx.helpers_done.load(Ordering::Acquire) {
            return Err(Interrupt::Stopped);
        }
        if let Some(budget) = ctx.budget {
            if !ctx.control.is_pondering() && ctx.control.clock_elapsed() >= budget.hard {
                return Err(Interrupt::Stopped);
            }
        }
        Ok(())
    }

    fn soft_limit_reached(&self) -> bool {
        let ctx = &self.ctx;
        if ctx.control.is_stopped() || ctx.helpers_done.load(Ordering::Acquire) {
            return true;
        }
        match ctx.budget {
            Some(budget) => !ctx.control.is_pondering() && ctx.control.clock_elapsed() >= budget.soft,
            None => false,
        }
    }

    fn info(&self, depth: u32, score: i32) -> SearchInfo {
        let elapsed = self.ctx.control.elapsed();
        let time_ms = elapsed.as_millis() as u64;
        let nodes = self.ctx.control.nodes();
        SearchInfo {
            depth,
            seldepth: (self.seldepth as u32).max(depth),
            score,
            nodes,
            nps: nodes * 1000 / time_ms.max(1),
            time_ms,
            hashfull: self.ctx.tt.hashfull(),
            pv: self.pv[0].clone(),
        }
    }
}
