//! Move generation and the square-attack oracle
//!
//! Generation is pseudo-legal per piece type, then filtered to legal by a
//! trial make/unmake that rejects any move leaving the mover's own king
//! attacked. Castling carries its own prerequisites (rights, empty transit,
//! rook on its corner, no attacked square on the king's path) before the
//! generic filter runs.

use crate::board::Position;
use crate::constants::*;
use crate::types::*;

/// Generate all pseudo-legal moves for the side to move
pub fn generate_pseudo_legal_moves(pos: &Position) -> Vec<Move> {
    let mut moves = Vec::with_capacity(64);
    let side = pos.side;

    for sq in 0..64i8 {
        let piece = pos.board[sq as usize];
        if piece == 0 || piece.signum() != side {
            continue;
        }
        match piece.abs() {
            PAWN_ID => generate_pawn_moves(pos, sq, side, &mut moves),
            KNIGHT_ID => generate_stepper_moves(pos, sq, side, &KNIGHT_STEPS, &mut moves),
            BISHOP_ID => generate_slider_moves(pos, sq, side, &BISHOP_DIRS, &mut moves),
            ROOK_ID => generate_slider_moves(pos, sq, side, &ROOK_DIRS, &mut moves),
            QUEEN_ID => {
                generate_slider_moves(pos, sq, side, &BISHOP_DIRS, &mut moves);
                generate_slider_moves(pos, sq, side, &ROOK_DIRS, &mut moves);
            }
            _ => generate_stepper_moves(pos, sq, side, &KING_STEPS, &mut moves),
        }
    }

    generate_castling_moves(pos, side, &mut moves);
    moves
}

/// Pseudo-legal moves filtered by trial make/unmake
pub fn generate_legal_moves(pos: &mut Position) -> Vec<Move> {
    let side = pos.side;
    let pseudo = generate_pseudo_legal_moves(pos);
    let mut legal = Vec::with_capacity(pseudo.len());
    for mv in pseudo {
        let undo = pos.make_move(mv);
        if !pos.in_check(side) {
            legal.push(mv);
        }
        pos.unmake_move(mv, undo);
    }
    legal
}

fn generate_pawn_moves(pos: &Position, sq: i8, side: Color, moves: &mut Vec<Move>) {
    let file = file_of(sq);
    let rank = rank_of(sq);
    let promo_rank = if side == COLOR_WHITE { 7 } else { 0 };
    let home_rank = if side == COLOR_WHITE { 1 } else { 6 };
    let forward = sq + 8 * side;

    if (0..64).contains(&forward) && pos.board[forward as usize] == 0 {
        push_pawn_move(Move::new(sq, forward, 0), promo_rank, moves);
        if rank == home_rank {
            let double = sq + 16 * side;
            if pos.board[double as usize] == 0 {
                moves.push(Move::new(sq, double, FLAG_DOUBLE_PUSH));
            }
        }
    }

    for df in [-1i8, 1] {
        let to_file = file + df;
        let to_rank = rank + side;
        if !on_board(to_file, to_rank) {
            continue;
        }
        let to = square_at(to_file, to_rank);
        let target = pos.board[to as usize];
        if target != 0 && target.signum() == -side {
            push_pawn_move(Move::new(sq, to, FLAG_CAPTURE), promo_rank, moves);
        } else if pos.ep_square == Some(to) {
            moves.push(Move::new(sq, to, FLAG_EN_PASSANT));
        }
    }
}

/// Expand a pawn arrival on the last rank into the four promotions
fn push_pawn_move(mv: Move, promo_rank: i8, moves: &mut Vec<Move>) {
    if rank_of(mv.dst) == promo_rank {
        for piece in [QUEEN_ID, ROOK_ID, BISHOP_ID, KNIGHT_ID] {
            moves.push(Move::promotion(mv.src, mv.dst, piece, mv.flags));
        }
    } else {
        moves.push(mv);
    }
}

fn generate_stepper_moves(
    pos: &Position,
    sq: i8,
    side: Color,
    steps: &[(i8, i8)],
    moves: &mut Vec<Move>,
) {
    let file = file_of(sq);
    let rank = rank_of(sq);
    for &(df, dr) in steps {
        if !on_board(file + df, rank + dr) {
            continue;
        }
        let to = square_at(file + df, rank + dr);
        let target = pos.board[to as usize];
        if target == 0 {
            moves.push(Move::new(sq, to, 0));
        } else if target.signum() == -side {
            moves.push(Move::new(sq, to, FLAG_CAPTURE));
        }
    }
}

fn generate_slider_moves(
    pos: &Position,
    sq: i8,
    side: Color,
    dirs: &[(i8, i8)],
    moves: &mut Vec<Move>,
) {
    for &(df, dr) in dirs {
        let mut file = file_of(sq) + df;
        let mut rank = rank_of(sq) + dr;
        while on_board(file, rank) {
            let to = square_at(file, rank);
            let target = pos.board[to as usize];
            if target == 0 {
                moves.push(Move::new(sq, to, 0));
            } else {
                if target.signum() == -side {
                    moves.push(Move::new(sq, to, FLAG_CAPTURE));
                }
                break;
            }
            file += df;
            rank += dr;
        }
    }
}

fn generate_castling_moves(pos: &Position, side: Color, moves: &mut Vec<Move>) {
    let (king_sq, ks_right, qs_right, rook_k, rook_q) = if side == COLOR_WHITE {
        (E1, CASTLE_WK, CASTLE_WQ, H1, A1)
    } else {
        (E8, CASTLE_BK, CASTLE_BQ, H8, A8)
    };

    if pos.board[king_sq as usize] != KING_ID * side {
        return;
    }
    // Castling out of check is never legal
    if pos.castling & (ks_right | qs_right) != 0 && is_square_attacked(pos, king_sq, -side) {
        return;
    }

    if pos.castling & ks_right != 0
        && pos.board[rook_k as usize] == ROOK_ID * side
        && pos.board[(king_sq + 1) as usize] == 0
        && pos.board[(king_sq + 2) as usize] == 0
        && !is_square_attacked(pos, king_sq + 1, -side)
        && !is_square_attacked(pos, king_sq + 2, -side)
    {
        moves.push(Move::new(king_sq, king_sq + 2, FLAG_CASTLE));
    }

    if pos.castling & qs_right != 0
        && pos.board[rook_q as usize] == ROOK_ID * side
        && pos.board[(king_sq - 1) as usize] == 0
        && pos.board[(king_sq - 2) as usize] == 0
        && pos.board[(king_sq - 3) as usize] == 0
        && !is_square_attacked(pos, king_sq - 1, -side)
        && !is_square_attacked(pos, king_sq - 2, -side)
    {
        moves.push(Move::new(king_sq, king_sq - 2, FLAG_CASTLE));
    }
}

/// True if any piece of `by` attacks `sq`. Probes pawns, knights and kings
/// in reverse, then walks the slider rays; returns on the first attacker.
pub fn is_square_attacked(pos: &Position, sq: i8, by: Color) -> bool {
    let file = file_of(sq);
    let rank = rank_of(sq);

    // A pawn of `by` attacks from one rank behind (relative to its push)
    let pawn_rank = rank - by;
    for df in [-1i8, 1] {
        if on_board(file + df, pawn_rank)
            && pos.board[square_at(file + df, pawn_rank) as usize] == PAWN_ID * by
        {
            return true;
        }
    }

    for &(df, dr) in &KNIGHT_STEPS {
        if on_board(file + df, rank + dr)
            && pos.board[square_at(file + df, rank + dr) as usize] == KNIGHT_ID * by
        {
            return true;
        }
    }

    for &(df, dr) in &KING_STEPS {
        if on_board(file + df, rank + dr)
            && pos.board[square_at(file + df, rank + dr) as usize] == KING_ID * by
        {
            return true;
        }
    }

    slider_attacks(pos, file, rank, by, &BISHOP_DIRS, BISHOP_ID)
        || slider_attacks(pos, file, rank, by, &ROOK_DIRS, ROOK_ID)
}

fn slider_attacks(
    pos: &Position,
    file: i8,
    rank: i8,
    by: Color,
    dirs: &[(i8, i8)],
    slider_id: i8,
) -> bool {
    for &(df, dr) in dirs {
        let mut f = file + df;
        let mut r = rank + dr;
        while on_board(f, r) {
            let piece = pos.board[square_at(f, r) as usize];
            if piece != 0 {
                if piece == slider_id * by || piece == QUEEN_ID * by {
                    return true;
                }
                break;
            }
            f += df;
            r += dr;
        }
    }
    false
}
