//! Error types for the engine library

use thiserror::Error;

/// Errors raised while parsing positions or moves from text
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FenError {
    #[error("FEN must have 6 fields, got {0}")]
    FieldCount(usize),

    #[error("piece placement must have 8 ranks, got {0}")]
    RankCount(usize),

    #[error("rank {rank} overflows 8 files")]
    RankOverflow { rank: usize },

    #[error("rank {rank} covers only {files} files")]
    RankUnderflow { rank: usize, files: usize },

    #[error("unknown piece character '{0}'")]
    BadPiece(char),

    #[error("bad side-to-move field '{0}'")]
    BadSide(String),

    #[error("bad castling field '{0}'")]
    BadCastling(String),

    #[error("bad en-passant field '{0}'")]
    BadEnPassant(String),

    #[error("bad clock field '{0}'")]
    BadClock(String),
}

/// Errors raised while applying textual moves to a position
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MoveError {
    #[error("malformed UCI move '{0}'")]
    Malformed(String),

    #[error("illegal move '{0}' in this position")]
    Illegal(String),
}
