//! Iterative deepening driver
//!
//! Deepens from 1 to the requested depth, centering an aspiration window of
//! +/-80 centipawns on the previous depth's score from depth 2 onward. A
//! window fail triggers one full-window re-search while time remains. When
//! the budget runs out mid-depth, the best move of the last completed depth
//! stands. After each completed depth the caller receives depth, score,
//! node count, nodes-per-second, elapsed time and the principal variation.

use std::time::{Duration, Instant};

use super::Searcher;
use crate::board::Position;
use crate::constants::*;
use crate::hash::{score_to_tt, TranspositionTable, BOUND_EXACT};
use crate::move_gen::generate_legal_moves;
use crate::types::Move;

/// Clock and depth limits taken from a `go` command
#[derive(Debug, Clone, Default)]
pub struct TimeControl {
    pub movetime: Option<u64>,
    pub wtime: Option<u64>,
    pub btime: Option<u64>,
    pub winc: Option<u64>,
    pub binc: Option<u64>,
    pub depth: Option<i32>,
}

impl TimeControl {
    /// Millisecond budget for this move. An explicit `movetime` wins;
    /// otherwise `remaining/28 + increment/2` clamped to [30, 1200]; with no
    /// clock at all, 200ms. A bare `go depth N` searches without a clock.
    pub fn budget_ms(&self, side: i8) -> u64 {
        if let Some(ms) = self.movetime {
            return ms;
        }
        let (remaining, increment) = if side == COLOR_WHITE {
            (self.wtime, self.winc)
        } else {
            (self.btime, self.binc)
        };
        match remaining {
            Some(ms) => (ms / 28 + increment.unwrap_or(0) / 2).clamp(30, 1200),
            None if self.depth.is_some() => 3_600_000,
            None => 200,
        }
    }
}

/// Telemetry for one completed deepening iteration
#[derive(Debug, Clone)]
pub struct SearchInfo {
    pub depth: i32,
    pub score: i32,
    pub nodes: u64,
    pub nps: u64,
    pub time_ms: u64,
    pub pv: Vec<Move>,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub best: Option<Move>,
    pub score: i32,
    pub depth: i32,
    pub nodes: u64,
}

/// Run iterative deepening under `tc`, reporting each completed depth
pub fn search(
    pos: &mut Position,
    tt: &mut TranspositionTable,
    tc: &TimeControl,
    mut on_depth: impl FnMut(&SearchInfo),
) -> SearchResult {
    let start = Instant::now();
    let budget = tc.budget_ms(pos.side);
    let deadline = start + Duration::from_millis(budget);
    let max_depth = tc.depth.unwrap_or(MAX_DEPTH).clamp(1, MAX_DEPTH);

    if generate_legal_moves(pos).is_empty() {
        return SearchResult {
            best: None,
            score: if pos.in_check(pos.side) { -MATE } else { 0 },
            depth: 0,
            nodes: 0,
        };
    }

    let mut searcher = Searcher::new(tt, deadline);
    let mut best: Option<Move> = None;
    let mut best_score = 0;
    let mut completed_depth = 0;

    for depth in 1..=max_depth {
        let (mut alpha, mut beta) = if depth >= 2 {
            (
                best_score - ASPIRATION_WINDOW,
                best_score + ASPIRATION_WINDOW,
            )
        } else {
            (-INFINITY, INFINITY)
        };

        let mut outcome = search_root(&mut searcher, pos, depth, alpha, beta);
        if let Some((score, _)) = outcome {
            if (score <= alpha || score >= beta) && !searcher.stopped {
                alpha = -INFINITY;
                beta = INFINITY;
                outcome = search_root(&mut searcher, pos, depth, alpha, beta);
            }
        }

        let Some((score, mv)) = outcome else { break };
        if searcher.stopped {
            break;
        }

        best = Some(mv);
        best_score = score;
        completed_depth = depth;

        let elapsed = start.elapsed().as_millis().max(1) as u64;
        on_depth(&SearchInfo {
            depth,
            score,
            nodes: searcher.nodes,
            nps: searcher.nodes * 1000 / elapsed,
            time_ms: elapsed,
            pv: principal_variation(pos, searcher.tt, depth),
        });

        if score.abs() > MATE_BOUND {
            break;
        }
    }

    SearchResult {
        best,
        score: best_score,
        depth: completed_depth,
        nodes: searcher.nodes,
    }
}

/// One root iteration. Returns `None` when no move finished before the
/// deadline, otherwise the best (score, move) of the completed scan.
fn search_root(
    searcher: &mut Searcher,
    pos: &mut Position,
    depth: i32,
    mut alpha: i32,
    beta: i32,
) -> Option<(i32, Move)> {
    let mut moves = generate_legal_moves(pos);
    let tt_move = searcher
        .tt
        .probe(pos.key)
        .map(|entry| entry.best)
        .unwrap_or(0);
    searcher.order_moves(pos, &mut moves, tt_move, 0);

    let mut best: Option<(i32, Move)> = None;
    for mv in moves {
        let undo = pos.make_move(mv);
        let score = -searcher.alphabeta(pos, depth - 1, -beta, -alpha, 1);
        pos.unmake_move(mv, undo);

        if searcher.stopped {
            break;
        }
        if best.map_or(true, |(s, _)| score > s) {
            best = Some((score, mv));
        }
        if score > alpha {
            alpha = score;
        }
        if alpha >= beta {
            break;
        }
    }

    if let Some((score, mv)) = best {
        if !searcher.stopped {
            searcher
                .tt
                .store(pos.key, depth as i16, BOUND_EXACT, score_to_tt(score, 0), mv.encode());
        }
    }
    best
}

/// Walk transposition-table best moves to recover the line being played
fn principal_variation(
    pos: &mut Position,
    tt: &TranspositionTable,
    max_len: i32,
) -> Vec<Move> {
    let mut pv = Vec::new();
    let mut undos = Vec::new();

    for _ in 0..max_len.clamp(1, MAX_DEPTH) {
        let Some(entry) = tt.probe(pos.key) else { break };
        if entry.best == 0 {
            break;
        }
        let (src, dst, promotion) = Move::decode(entry.best);
        let Some(mv) = generate_legal_moves(pos)
            .into_iter()
            .find(|m| m.src == src && m.dst == dst && m.promotion == promotion)
        else {
            break;
        };
        undos.push((mv, pos.make_move(mv)));
        pv.push(mv);
    }

    while let Some((mv, undo)) = undos.pop() {
        pos.unmake_move(mv, undo);
    }
    pv
}
