use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::board::Color;

pub const MAX_DEPTH: u32 = 64;
const DEFAULT_MOVES_TO_GO: u64 = 30;
const MIN_BUDGET: Duration = Duration::from_millis(1);

/// Parameters of a `go` command. Times are in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchLimits {
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
    pub movetime: Option<u64>,
    pub wtime: Option<u64>,
    pub btime: Option<u64>,
    pub winc: Option<u64>,
    pub binc: Option<u64>,
    pub movestogo: Option<u32>,
    pub mate: Option<u32>,
    pub infinite: bool,
    pub ponder: bool,
    pub searchmoves: Vec<String>,
}

impl SearchLimits {
    pub fn depth(depth: u32) -> Self {
        Self {
            depth: Some(depth),
            ..Self::default()
        }
    }

    pub fn infinite() -> Self {
        Self {
            infinite: true,
            ..Self::default()
        }
    }

    /// Deepest iteration to run. `go mate N` searches at most 2N plies.
    pub fn max_depth(&self) -> u32 {
        self.depth
            .or(self.mate.map(|moves| moves.saturating_mul(2)))
            .unwrap_or(MAX_DEPTH)
            .clamp(1, MAX_DEPTH)
    }

    /// The best move may only be reported after `stop` (or `ponderhit`).
    pub fn is_unbounded(&self) -> bool {
        self.infinite || self.ponder
    }
}

/// Wall-clock budget for one search. Iterations stop starting past `soft`;
/// the search is aborted at `hard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBudget {
    pub soft: Duration,
    pub hard: Duration,
}

impl TimeBudget {
    /// Computes the budget for `side`. `None` means the search is bounded only
    /// by depth, nodes or an explicit stop.
    pub fn from_limits(limits: &SearchLimits, side: Color, overhead: Duration) -> Option<Self> {
        if limits.infinite {
            return None;
        }

        if let Some(movetime) = limits.movetime {
            let budget = Duration::from_millis(movetime)
                .saturating_sub(overhead)
                .max(MIN_BUDGET);
            return Some(Self {
                soft: budget,
                hard: budget,
            });
        }

        let (time, increment) = match side {
            Color::White => (limits.wtime?, limits.winc.unwrap_or(0)),
            Color::Black => (limits.btime?, limits.binc.unwrap_or(0)),
        };

        let moves_to_go = limits
            .movestogo
            .map_or(DEFAULT_MOVES_TO_GO, |moves| moves.max(1) as u64);
        let soft = (time / moves_to_go).saturating_add(increment / 4 * 3);
        let hard = (time / 3).min(soft.saturating_mul(3));
        let soft = soft.min(hard);

        let clamp = |ms: u64| {
            Duration::from_millis(ms)
                .saturating_sub(overhead)
                .max(MIN_BUDGET)
        };
        Some(Self {
            soft: clamp(soft),
            hard: clamp(hard),
        })
    }
}

/// State shared between the dispatcher and every worker of one search.
#[derive(Debug)]
pub struct SearchControl {
    stop: AtomicBool,
    pondering: AtomicBool,
    started: Instant,
    /// Milliseconds after `started` at which the clock began running.
    clock_offset_ms: AtomicU64,
    nodes: AtomicU64,
    release_lock: Mutex<()>,
    released: Condvar,
}

impl SearchControl {
    pub fn new(pondering: bool) -> Self {
        Self {
            stop: AtomicBool::new(false),
            pondering: AtomicBool::new(pondering),
            started: Instant::now(),
            clock_offset_ms: AtomicU64::new(0),
            nodes: AtomicU64::new(0),
            release_lock: Mutex::new(()),
            released: Condvar::new(),
        }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.notify_release();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// The opponent played the expected move: the time budget starts now.
    pub fn ponderhit(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.clock_offset_ms.store(elapsed, Ordering::Release);
        self.pondering.store(false, Ordering::Release);
        self.notify_release();
    }

    /// Blocks while the search may not report yet: until `stop`, or until
    /// `ponderhit` for a non-infinite ponder search.
    pub fn wait_for_release(&self, infinite: bool) {
        let mut guard = self.release_lock.lock().unwrap_or_else(PoisonError::into_inner);
        while (infinite || self.is_pondering()) && !self.is_stopped() {
            guard = self
                .released
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn notify_release(&self) {
        // taken so a waiter cannot miss the flag change between check and wait
        let _guard = self.release_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.released.notify_all();
    }

    pub fn is_pondering(&self) -> bool {
        self.pondering.load(Ordering::Acquire)
    }

    /// Time since the search started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time counted against the budget, which excludes pondering.
    pub fn clock_elapsed(&self) -> Duration {
        let offset = Duration::from_millis(self.clock_offset_ms.load(Ordering::Acquire));
        self.started.elapsed().saturating_sub(offset)
    }

    pub fn add_nodes(&self, nodes: u64) {
        self.nodes.fetch_add(nodes, Ordering::Relaxed);
    }

    pub fn nodes(&self) -> u64 {
        self.nodes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_OVERHEAD: Duration = Duration::ZERO;

    #[test]
    fn max_depth_sources() {
        assert_eq!(SearchLimits::default().max_depth(), MAX_DEPTH);
        assert_eq!(SearchLimits::depth(5).max_depth(), 5);
        assert_eq!(SearchLimits::depth(0).max_depth(), 1);
        assert_eq!(SearchLimits::depth(500).max_depth(), MAX_DEPTH);

        let mate = SearchLimits {
            mate: Some(3),
            ..SearchLimits::default()
        };
        assert_eq!(mate.max_depth(), 6);
    }

    #[test]
    fn movetime_is_both_soft_and_hard() {
        let limits = SearchLimits {
            movetime: Some(1000),
            ..SearchLimits::default()
        };
        let budget = TimeBudget::from_limits(&limits, Color::White, Duration::from_millis(50));
        assert_eq!(
            budget,
            Some(TimeBudget {
                soft: Duration::from_millis(950),
                hard: Duration::from_millis(950),
            })
        );
    }

    #[test]
    fn clock_budget_uses_side_to_move() {
        let limits = SearchLimits {
            wtime: Some(60_000),
            btime: Some(3_000),
            winc: Some(1_000),
            ..SearchLimits::default()
        };

        let white = TimeBudget::from_limits(&limits, Color::White, NO_OVERHEAD).unwrap();
        assert_eq!(white.soft, Duration::from_millis(60_000 / 30 + 750));
        assert_eq!(white.hard, Duration::from_millis(8_250));

        let black = TimeBudget::from_limits(&limits, Color::Black, NO_OVERHEAD).unwrap();
        assert_eq!(black.soft, Duration::from_millis(100));
        assert_eq!(black.hard, Duration::from_millis(300));
    }

    #[test]
    fn movestogo_and_low_clock() {
        let limits = SearchLimits {
            btime: Some(10_000),
            movestogo: Some(1),
            ..SearchLimits::default()
        };
        let budget = TimeBudget::from_limits(&limits, Color::Black, NO_OVERHEAD).unwrap();
        // never plan to spend more than a third of the clock
        assert_eq!(budget.hard, Duration::from_millis(3_333));
        assert_eq!(budget.soft, budget.hard);

        let nearly_flagged = SearchLimits {
            wtime: Some(5),
            ..SearchLimits::default()
        };
        let budget =
            TimeBudget::from_limits(&nearly_flagged, Color::White, Duration::from_millis(100))
                .unwrap();
        assert_eq!(budget.soft, MIN_BUDGET);
        assert_eq!(budget.hard, MIN_BUDGET);
    }

    #[test]
    fn extreme_clock_values_do_not_overflow() {
        let limits = SearchLimits {
            wtime: Some(1000),
            winc: Some(i64::MAX as u64),
            btime: Some(u64::MAX),
            binc: Some(u64::MAX),
            ..SearchLimits::default()
        };
        let white = TimeBudget::from_limits(&limits, Color::White, NO_OVERHEAD).unwrap();
        assert_eq!(white.hard, Duration::from_millis(333));
        assert_eq!(white.soft, white.hard);

        let black = TimeBudget::from_limits(&limits, Color::Black, NO_OVERHEAD).unwrap();
        assert_eq!(black.hard, Duration::from_millis(u64::MAX / 3));
        assert!(black.soft <= black.hard);
    }

    #[test]
    fn unbounded_searches_have_no_budget() {
        let limits = SearchLimits {
            infinite: true,
            wtime: Some(1000),
            ..SearchLimits::default()
        };
        assert_eq!(TimeBudget::from_limits(&limits, Color::White, NO_OVERHEAD), None);
        assert_eq!(
            TimeBudget::from_limits(&SearchLimits::depth(3), Color::White, NO_OVERHEAD),
            None
        );
    }

    #[test]
    fn waiters_are_released_by_stop_and_ponderhit() {
        use std::sync::Arc;

        let control = Arc::new(SearchControl::new(false));
        let waiter = {
            let control = Arc::clone(&control);
            std::thread::spawn(move || control.wait_for_release(true))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        control.stop();
        waiter.join().unwrap();

        let control = Arc::new(SearchControl::new(true));
        let waiter = {
            let control = Arc::clone(&control);
            std::thread::spawn(move || control.wait_for_release(false))
        };
        control.ponderhit();
        waiter.join().unwrap();
        assert!(!control.is_stopped());

        // nothing to wait for
        SearchControl::new(false).wait_for_release(false);
    }

    #[test]
    fn ponderhit_restarts_the_clock() {
        let control = SearchControl::new(true);
        assert!(control.is_pondering());
        std::thread::sleep(Duration::from_millis(20));
        control.ponderhit();
        assert!(!control.is_pondering());
        assert!(control.clock_elapsed() < control.elapsed());

        control.add_nodes(10);
        control.add_nodes(5);
        assert_eq!(control.nodes(), 15);
        assert!(!control.is_stopped());
        control.stop();
        assert!(control.is_stopped());
    }
}
