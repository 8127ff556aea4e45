//! Perft node counting
//!
//! Exact legal-move enumeration to a fixed depth, used to validate the move
//! generator and make/unmake against known reference counts. `divide`
//! breaks the total down per root move, which localizes a generator bug to
//! one branch.

use std::io::{self, Write};

use crate::board::Position;
use crate::move_gen::generate_legal_moves;

pub fn perft(pos: &mut Position, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }
    let moves = generate_legal_moves(pos);
    if depth == 1 {
        return moves.len() as u64;
    }
    let mut nodes = 0;
    for mv in moves {
        let undo = pos.make_move(mv);
        nodes += perft(pos, depth - 1);
        pos.unmake_move(mv, undo);
    }
    nodes
}

/// Per-root-move subtotals followed by the total
pub fn divide(pos: &mut Position, depth: u32, out: &mut dyn Write) -> io::Result<u64> {
    let mut total = 0;
    let mut moves = generate_legal_moves(pos);
    moves.sort_by_key(|m| m.to_uci());
    for mv in moves {
        let undo = pos.make_move(mv);
        let nodes = if depth > 1 { perft(pos, depth - 1) } else { 1 };
        pos.unmake_move(mv, undo);
        writeln!(out, "{}: {}", mv.to_uci(), nodes)?;
        total += nodes;
    }
    writeln!(out, "total: {}", total)?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIWIPETE: &str =
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";
    const CPW_POSITION_3: &str = "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1";

    fn perft_from(fen: &str, depth: u32) -> u64 {
        let mut pos = Position::from_fen(fen).expect("valid fen");
        perft(&mut pos, depth)
    }

    #[test]
    fn test_perft_startpos_shallow() {
        let mut pos = Position::startpos();
        assert_eq!(perft(&mut pos, 1), 20);
        assert_eq!(perft(&mut pos, 2), 400);
        assert_eq!(perft(&mut pos, 3), 8_902);
    }

    #[test]
    fn test_perft_startpos_depth_four() {
        let mut pos = Position::startpos();
        assert_eq!(perft(&mut pos, 4), 197_281);
    }

    #[test]
    #[ignore = "about a minute in debug builds"]
    fn test_perft_startpos_depth_five() {
        let mut pos = Position::startpos();
        assert_eq!(perft(&mut pos, 5), 4_865_609);
    }

    #[test]
    fn test_perft_kiwipete() {
        // Heavy on castling, pins and en passant
        assert_eq!(perft_from(KIWIPETE, 1), 48);
        assert_eq!(perft_from(KIWIPETE, 2), 2_039);
        assert_eq!(perft_from(KIWIPETE, 3), 97_862);
    }

    #[test]
    fn test_perft_en_passant_pins() {
        assert_eq!(perft_from(CPW_POSITION_3, 1), 14);
        assert_eq!(perft_from(CPW_POSITION_3, 2), 191);
        assert_eq!(perft_from(CPW_POSITION_3, 3), 2_812);
        assert_eq!(perft_from(CPW_POSITION_3, 4), 43_238);
    }

    #[test]
    fn test_divide_matches_perft() {
        let mut pos = Position::startpos();
        let mut sink = Vec::new();
        let total = divide(&mut pos, 3, &mut sink).expect("write to vec");
        assert_eq!(total, 8_902);
        let text = String::from_utf8(sink).expect("utf8");
        assert!(text.contains("e2e4: 600"));
        assert!(text.trim_end().ends_with("total: 8902"));
    }

    #[test]
    fn test_perft_leaves_position_untouched() {
        let mut pos = Position::from_fen(KIWIPETE).expect("fen");
        let before = pos.clone();
        perft(&mut pos, 3);
        assert_eq!(pos.board, before.board);
        assert_eq!(pos.key, before.key);
        assert_eq!(pos.history, before.history);
    }
}
