//! Position state: board array, game-rule fields, Zobrist key, history
//!
//! `Position` owns everything `make_move`/`unmake_move` touch. The Zobrist
//! key is maintained incrementally through the exact XOR sequence documented
//! on [`Position::make_move`]; `unmake_move` restores the prior position
//! byte for byte from the [`Undo`] record. The key history carries one entry
//! per played ply (including the current position) and backs threefold
//! repetition detection.

use crate::constants::*;
use crate::error::{FenError, MoveError};
use crate::hash::{compute_key, piece_index, zobrist};
use crate::move_gen::{generate_legal_moves, is_square_attacked};
use crate::types::*;

#[derive(Clone, Debug, PartialEq)]
pub struct Position {
    pub board: Board,
    pub side: Color,
    pub castling: u8,
    pub ep_square: Option<i8>,
    pub halfmove: u16,
    pub fullmove: u32,
    pub key: u64,
    pub history: Vec<u64>,
}

impl Position {
    pub fn startpos() -> Self {
        let key = compute_key(&SETUP, COLOR_WHITE, CASTLE_ALL, None);
        Position {
            board: SETUP,
            side: COLOR_WHITE,
            castling: CASTLE_ALL,
            ep_square: None,
            halfmove: 0,
            fullmove: 1,
            key,
            history: vec![key],
        }
    }

    /// Parse a six-field FEN string
    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(FenError::FieldCount(fields.len()));
        }

        let ranks: Vec<&str> = fields[0].split('/').collect();
        if ranks.len() != 8 {
            return Err(FenError::RankCount(ranks.len()));
        }
        let mut board = [0i8; 64];
        for (i, rank_str) in ranks.iter().enumerate() {
            // FEN lists rank 8 first
            let rank = 7 - i as i8;
            let mut file = 0i8;
            for c in rank_str.chars() {
                if let Some(skip) = c.to_digit(10) {
                    file += skip as i8;
                } else {
                    if file >= 8 {
                        return Err(FenError::RankOverflow { rank: 8 - i });
                    }
                    board[square_at(file, rank) as usize] = char_to_piece(c)?;
                    file += 1;
                }
                if file > 8 {
                    return Err(FenError::RankOverflow { rank: 8 - i });
                }
            }
            if file != 8 {
                return Err(FenError::RankUnderflow {
                    rank: 8 - i,
                    files: file as usize,
                });
            }
        }

        let side = match fields[1] {
            "w" => COLOR_WHITE,
            "b" => COLOR_BLACK,
            other => return Err(FenError::BadSide(other.to_string())),
        };

        let mut castling = 0u8;
        if fields[2] != "-" {
            for c in fields[2].chars() {
                castling |= match c {
                    'K' => CASTLE_WK,
                    'Q' => CASTLE_WQ,
                    'k' => CASTLE_BK,
                    'q' => CASTLE_BQ,
                    _ => return Err(FenError::BadCastling(fields[2].to_string())),
                };
            }
        }

        let ep_square = if fields[3] == "-" {
            None
        } else {
            Some(
                parse_square(fields[3])
                    .ok_or_else(|| FenError::BadEnPassant(fields[3].to_string()))?,
            )
        };

        let halfmove: u16 = fields[4]
            .parse()
            .map_err(|_| FenError::BadClock(fields[4].to_string()))?;
        let fullmove: u32 = fields[5]
            .parse()
            .map_err(|_| FenError::BadClock(fields[5].to_string()))?;

        let key = compute_key(&board, side, castling, ep_square);
        Ok(Position {
            board,
            side,
            castling,
            ep_square,
            halfmove,
            fullmove,
            key,
            history: vec![key],
        })
    }

    /// Emit the six-field FEN for the current position
    pub fn to_fen(&self) -> String {
        let mut placement = String::new();
        for rank in (0..8).rev() {
            let mut empties = 0;
            for file in 0..8 {
                let piece = self.board[square_at(file, rank) as usize];
                if piece == 0 {
                    empties += 1;
                } else {
                    if empties > 0 {
                        placement.push(char::from_digit(empties, 10).unwrap_or('0'));
                        empties = 0;
                    }
                    placement.push(piece_to_char(piece));
                }
            }
            if empties > 0 {
                placement.push(char::from_digit(empties, 10).unwrap_or('0'));
            }
            if rank > 0 {
                placement.push('/');
            }
        }

        let mut castling = String::new();
        if self.castling & CASTLE_WK != 0 {
            castling.push('K');
        }
        if self.castling & CASTLE_WQ != 0 {
            castling.push('Q');
        }
        if self.castling & CASTLE_BK != 0 {
            castling.push('k');
        }
        if self.castling & CASTLE_BQ != 0 {
            castling.push('q');
        }
        if castling.is_empty() {
            castling.push('-');
        }

        let ep = match self.ep_square {
            Some(sq) => square_name(sq),
            None => "-".to_string(),
        };

        format!(
            "{} {} {} {} {} {}",
            placement,
            if self.side == COLOR_WHITE { "w" } else { "b" },
            castling,
            ep,
            self.halfmove,
            self.fullmove
        )
    }

    #[inline]
    pub fn piece_at(&self, sq: i8) -> i8 {
        self.board[sq as usize]
    }

    pub fn find_king(&self, color: Color) -> Option<i8> {
        let king = KING_ID * color;
        self.board
            .iter()
            .position(|&p| p == king)
            .map(|sq| sq as i8)
    }

    pub fn in_check(&self, color: Color) -> bool {
        match self.find_king(color) {
            Some(sq) => is_square_attacked(self, sq, -color),
            None => false,
        }
    }

    /// Apply a move and return the undo record.
    ///
    /// Update order: snapshot, XOR out castling/ep hash contributions, clock
    /// updates, clear ep, lift the mover, remove the captured piece (the
    /// behind-square pawn for en passant), drop the mover or the promotion
    /// piece, relocate the castling rook, apply the castling-rights masks,
    /// set the new ep square on a double push, XOR in the new castling/ep
    /// contributions, toggle the side, push the key history.
    pub fn make_move(&mut self, mv: Move) -> Undo {
        let z = zobrist();
        let src = mv.src as usize;
        let dst = mv.dst as usize;
        let mover_side = self.side;

        let snapshot = Undo {
            captured: 0,
            castling: self.castling,
            ep_square: self.ep_square,
            halfmove: self.halfmove,
            fullmove: self.fullmove,
            key: self.key,
        };

        self.key ^= z.castling[self.castling as usize];
        if let Some(ep) = self.ep_square {
            self.key ^= z.ep_file[(ep & 7) as usize];
        }

        let piece = self.board[src];
        if piece.abs() == PAWN_ID || mv.is_capture() {
            self.halfmove = 0;
        } else {
            self.halfmove += 1;
        }
        if mover_side == COLOR_BLACK {
            self.fullmove += 1;
        }
        self.ep_square = None;

        self.key ^= z.pieces[piece_index(piece)][src];
        self.board[src] = 0;

        let mut captured = 0i8;
        if mv.flags & FLAG_EN_PASSANT != 0 {
            let victim_sq = (mv.dst - 8 * mover_side) as usize;
            captured = self.board[victim_sq];
            self.key ^= z.pieces[piece_index(captured)][victim_sq];
            self.board[victim_sq] = 0;
        } else if self.board[dst] != 0 {
            captured = self.board[dst];
            self.key ^= z.pieces[piece_index(captured)][dst];
        }

        let placed = if mv.is_promotion() {
            mv.promotion * mover_side
        } else {
            piece
        };
        self.board[dst] = placed;
        self.key ^= z.pieces[piece_index(placed)][dst];

        if mv.flags & FLAG_CASTLE != 0 {
            let (rook_from, rook_to) = castle_rook_squares(mv.dst);
            let rook = self.board[rook_from as usize];
            self.board[rook_from as usize] = 0;
            self.board[rook_to as usize] = rook;
            self.key ^= z.pieces[piece_index(rook)][rook_from as usize];
            self.key ^= z.pieces[piece_index(rook)][rook_to as usize];
        }

        self.castling &= CASTLING_MASK[src] & CASTLING_MASK[dst];

        if mv.flags & FLAG_DOUBLE_PUSH != 0 {
            self.ep_square = Some(mv.src + 8 * mover_side);
        }

        self.key ^= z.castling[self.castling as usize];
        if let Some(ep) = self.ep_square {
            self.key ^= z.ep_file[(ep & 7) as usize];
        }

        self.side = -self.side;
        self.key ^= z.side;
        self.history.push(self.key);

        Undo {
            captured,
            ..snapshot
        }
    }

    /// Exact inverse of [`Position::make_move`]
    pub fn unmake_move(&mut self, mv: Move, undo: Undo) {
        self.history.pop();
        self.side = -self.side;
        let mover_side = self.side;
        let src = mv.src as usize;
        let dst = mv.dst as usize;

        let placed = self.board[dst];
        self.board[src] = if mv.is_promotion() {
            PAWN_ID * mover_side
        } else {
            placed
        };
        self.board[dst] = 0;

        if mv.flags & FLAG_EN_PASSANT != 0 {
            let victim_sq = (mv.dst - 8 * mover_side) as usize;
            self.board[victim_sq] = undo.captured;
        } else if undo.captured != 0 {
            self.board[dst] = undo.captured;
        }

        if mv.flags & FLAG_CASTLE != 0 {
            let (rook_from, rook_to) = castle_rook_squares(mv.dst);
            let rook = self.board[rook_to as usize];
            self.board[rook_to as usize] = 0;
            self.board[rook_from as usize] = rook;
        }

        self.castling = undo.castling;
        self.ep_square = undo.ep_square;
        self.halfmove = undo.halfmove;
        self.fullmove = undo.fullmove;
        self.key = undo.key;
    }

    /// Threefold repetition: the current key occurs at least twice earlier
    /// among positions with the same side to move, within the span of the
    /// halfmove clock.
    pub fn is_repetition(&self) -> bool {
        let n = self.history.len();
        let limit = self.halfmove as usize;
        let mut seen = 0;
        let mut back = 2;
        while back <= limit && back < n {
            if self.history[n - 1 - back] == self.key {
                seen += 1;
                if seen >= 2 {
                    return true;
                }
            }
            back += 2;
        }
        false
    }

    /// Parse a long-algebraic move, match it against the legal moves of the
    /// current position, and apply it. A missing promotion letter defaults
    /// to queen.
    pub fn apply_uci_move(&mut self, uci: &str) -> Result<Move, MoveError> {
        if uci.len() < 4 || uci.len() > 5 {
            return Err(MoveError::Malformed(uci.to_string()));
        }
        let src =
            parse_square(&uci[0..2]).ok_or_else(|| MoveError::Malformed(uci.to_string()))?;
        let dst =
            parse_square(&uci[2..4]).ok_or_else(|| MoveError::Malformed(uci.to_string()))?;
        let promo = match uci.len() {
            5 => {
                let c = uci
                    .chars()
                    .nth(4)
                    .ok_or_else(|| MoveError::Malformed(uci.to_string()))?;
                Some(promotion_piece(c).ok_or_else(|| MoveError::Malformed(uci.to_string()))?)
            }
            _ => None,
        };

        let legal = generate_legal_moves(self);
        let found = legal.into_iter().find(|m| {
            m.src == src
                && m.dst == dst
                && match promo {
                    Some(p) => m.promotion == p,
                    None => m.promotion == 0 || m.promotion == QUEEN_ID,
                }
        });
        match found {
            Some(mv) => {
                self.make_move(mv);
                Ok(mv)
            }
            None => Err(MoveError::Illegal(uci.to_string())),
        }
    }
}

/// Rook relocation for a castling king landing on `king_dst`
fn castle_rook_squares(king_dst: i8) -> (i8, i8) {
    match king_dst {
        G1 => (H1, F1),
        C1 => (A1, D1),
        G8 => (H8, F8),
        _ => (A8, D8),
    }
}

fn char_to_piece(c: char) -> Result<i8, FenError> {
    let id = match c.to_ascii_lowercase() {
        'p' => PAWN_ID,
        'n' => KNIGHT_ID,
        'b' => BISHOP_ID,
        'r' => ROOK_ID,
        'q' => QUEEN_ID,
        'k' => KING_ID,
        _ => return Err(FenError::BadPiece(c)),
    };
    Ok(if c.is_ascii_uppercase() { id } else { -id })
}

fn piece_to_char(piece: i8) -> char {
    let c = match piece.abs() {
        PAWN_ID => 'p',
        KNIGHT_ID => 'n',
        BISHOP_ID => 'b',
        ROOK_ID => 'r',
        QUEEN_ID => 'q',
        _ => 'k',
    };
    if piece > 0 {
        c.to_ascii_uppercase()
    } else {
        c
    }
}
