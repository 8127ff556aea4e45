//! Quiescence search
//!
//! Extends the horizon through forcing moves only: stand pat on the static
//! evaluation, then try captures (including capture-promotions) in MVV-LVA
//! order under the same alpha/beta pruning. Depth is bounded by the time
//! budget alone.

use super::ordering::mvv_lva;
use super::Searcher;
use crate::board::Position;
use crate::evaluation::evaluate;
use crate::move_gen::generate_legal_moves;

impl Searcher<'_> {
    pub(crate) fn quiescence(
        &mut self,
        pos: &mut Position,
        mut alpha: i32,
        beta: i32,
    ) -> i32 {
        if self.out_of_time() {
            return evaluate(pos);
        }
        self.nodes += 1;

        let stand_pat = evaluate(pos);
        if stand_pat >= beta {
            return beta;
        }
        if stand_pat > alpha {
            alpha = stand_pat;
        }

        let mut captures: Vec<_> = generate_legal_moves(pos)
            .into_iter()
            .filter(|m| m.is_capture())
            .collect();
        captures.sort_by_key(|&m| std::cmp::Reverse(mvv_lva(pos, m)));

        for mv in captures {
            let undo = pos.make_move(mv);
            let score = -self.quiescence(pos, -beta, -alpha);
            pos.unmake_move(mv, undo);

            if score >= beta {
                return beta;
            }
            if score > alpha {
                alpha = score;
            }
        }

        alpha
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;
    use crate::hash::TranspositionTable;
    use std::time::{Duration, Instant};

    fn run_quiescence(fen: &str) -> i32 {
        let mut pos = Position::from_fen(fen).expect("valid fen");
        let mut tt = TranspositionTable::new(1);
        let mut searcher = Searcher::new(&mut tt, Instant::now() + Duration::from_secs(5));
        searcher.quiescence(&mut pos, -INFINITY, INFINITY)
    }

    #[test]
    fn test_quiet_position_returns_static_eval() {
        let fen = "4k3/8/8/8/8/8/8/R3K3 w - - 0 1";
        let pos = Position::from_fen(fen).expect("fen");
        assert_eq!(run_quiescence(fen), evaluate(&pos));
    }

    #[test]
    fn test_hanging_queen_is_taken() {
        // White rook can win the undefended queen on a8
        let score = run_quiescence("q3k3/8/8/8/8/8/8/R3K3 w - - 0 1");
        assert!(
            score > FIGURE_VALUE[QUEEN_ID as usize] - FIGURE_VALUE[ROOK_ID as usize],
            "quiescence must resolve the capture, got {}",
            score
        );
    }

    #[test]
    fn test_defended_piece_not_overvalued() {
        // The d5 pawn is defended by e6; RxP loses the exchange
        let fen = "4k3/8/4p3/3p4/8/8/8/3R1K2 w - - 0 1";
        let pos = Position::from_fen(fen).expect("fen");
        let score = run_quiescence(fen);
        assert!(
            score >= evaluate(&pos),
            "stand pat floors the score: {} vs {}",
            score,
            evaluate(&pos)
        );
        assert!(
            score < FIGURE_VALUE[ROOK_ID as usize],
            "taking the defended pawn must not look winning"
        );
    }
}
