//! UCI front-end
//!
//! Reads one command per line from standard input and answers on standard
//! output; stdout carries nothing but protocol lines. The front-end owns the
//! position, the played-move history (which keys the opening book) and the
//! transposition table. Option changes are staged and applied before
//! `readyok`, the way GUIs expect.

use std::io::{self, BufRead, Write};

use crate::board::Position;
use crate::book::{engine_book_move, BookStrategy};
use crate::constants::*;
use crate::hash::TranspositionTable;
use crate::perft::{divide, perft};
use crate::search::{search, SearchInfo, TimeControl};

const ENGINE_NAME: &str = "chessmind";
const ENGINE_AUTHOR: &str = "chessmind developers";
const DEFAULT_HASH_MB: usize = 64;

pub struct UciEngine {
    pos: Position,
    tt: TranspositionTable,
    move_history: Vec<String>,
    /// The book keys off startpos lineage; a raw FEN base disables it
    from_startpos: bool,
    hash_mb: usize,
    pending_hash_mb: Option<usize>,
    /// Accepted for GUI compatibility; the search itself is single-threaded
    #[allow(dead_code)]
    threads: usize,
    book: BookStrategy,
}

impl UciEngine {
    pub fn new() -> Self {
        UciEngine {
            pos: Position::startpos(),
            tt: TranspositionTable::new(DEFAULT_HASH_MB),
            move_history: Vec::new(),
            from_startpos: true,
            hash_mb: DEFAULT_HASH_MB,
            pending_hash_mb: None,
            threads: 1,
            book: BookStrategy::Weighted,
        }
    }

    /// Process one command line. Returns `false` on `quit`.
    pub fn handle_command(&mut self, line: &str, out: &mut dyn Write) -> io::Result<bool> {
        let mut tokens = line.split_whitespace();
        let Some(command) = tokens.next() else {
            return Ok(true);
        };

        match command {
            "uci" => {
                writeln!(out, "id name {}", ENGINE_NAME)?;
                writeln!(out, "id author {}", ENGINE_AUTHOR)?;
                writeln!(
                    out,
                    "option name Hash type spin default {} min 1 max 2048",
                    DEFAULT_HASH_MB
                )?;
                writeln!(out, "option name Threads type spin default 1 min 1 max 32")?;
                writeln!(out, "uciok")?;
            }
            "isready" => {
                self.apply_pending_options();
                writeln!(out, "readyok")?;
            }
            "ucinewgame" => {
                self.pos = Position::startpos();
                self.move_history.clear();
                self.from_startpos = true;
                self.tt.clear();
            }
            "position" => self.handle_position(tokens.collect()),
            "setoption" => self.handle_setoption(tokens.collect()),
            "go" => {
                self.apply_pending_options();
                self.handle_go(tokens.collect(), out)?;
            }
            "perft" | "divide" => {
                if let Some(depth) = tokens.next().and_then(|t| t.parse().ok()) {
                    self.run_perft(command == "divide", depth, None, out)?;
                }
            }
            "perftfen" | "dividefen" => {
                let rest: Vec<&str> = tokens.collect();
                if rest.len() >= 7 {
                    let fen = rest[..rest.len() - 1].join(" ");
                    if let Some(depth) = rest.last().and_then(|t| t.parse().ok()) {
                        self.run_perft(command == "dividefen", depth, Some(&fen), out)?;
                    }
                }
            }
            "quit" => return Ok(false),
            // Unknown commands are ignored, as the protocol prescribes
            _ => {}
        }
        Ok(true)
    }

    fn apply_pending_options(&mut self) {
        if let Some(mb) = self.pending_hash_mb.take() {
            if mb != self.hash_mb {
                self.hash_mb = mb;
                self.tt.resize(mb);
            }
        }
    }

    fn handle_position(&mut self, args: Vec<&str>) {
        let mut iter = args.iter();
        match iter.next() {
            Some(&"startpos") => {
                self.pos = Position::startpos();
                self.from_startpos = true;
            }
            Some(&"fen") => {
                let fields: Vec<&str> = iter.by_ref().take(6).copied().collect();
                match Position::from_fen(&fields.join(" ")) {
                    Ok(pos) => {
                        self.pos = pos;
                        self.from_startpos = false;
                    }
                    Err(err) => {
                        eprintln!("rejected fen: {}", err);
                        return;
                    }
                }
            }
            _ => return,
        }
        self.move_history.clear();

        let rest: Vec<&str> = iter.copied().collect();
        if let Some(moves_at) = rest.iter().position(|&t| t == "moves") {
            for uci in &rest[moves_at + 1..] {
                match self.pos.apply_uci_move(uci) {
                    Ok(mv) => self.move_history.push(mv.to_uci()),
                    Err(err) => {
                        eprintln!("stopped replaying moves: {}", err);
                        break;
                    }
                }
            }
        }
    }

    fn handle_setoption(&mut self, args: Vec<&str>) {
        // setoption name <Name> value <n>
        let name_at = args.iter().position(|&t| t == "name");
        let value_at = args.iter().position(|&t| t == "value");
        let (Some(name_at), Some(value_at)) = (name_at, value_at) else {
            return;
        };
        if name_at + 1 > value_at {
            return;
        }
        let name = args[name_at + 1..value_at].join(" ");
        let Some(value) = args.get(value_at + 1).and_then(|t| t.parse::<usize>().ok()) else {
            return;
        };
        match name.as_str() {
            "Hash" => self.pending_hash_mb = Some(value.clamp(1, 2048)),
            "Threads" => self.threads = value.clamp(1, 32),
            _ => {}
        }
    }

    fn handle_go(&mut self, args: Vec<&str>, out: &mut dyn Write) -> io::Result<()> {
        let mut tc = TimeControl::default();
        let mut iter = args.iter();
        while let Some(&token) = iter.next() {
            let value = iter.next().and_then(|t| t.parse::<u64>().ok());
            match token {
                "depth" => tc.depth = value.map(|v| v as i32),
                "movetime" => tc.movetime = value,
                "wtime" => tc.wtime = value,
                "btime" => tc.btime = value,
                "winc" => tc.winc = value,
                "binc" => tc.binc = value,
                _ => {}
            }
        }

        if self.from_startpos {
            if let Some(mv) = engine_book_move(&mut self.pos, &self.move_history, self.book) {
                writeln!(out, "info string bookhit move={}", mv.to_uci())?;
                writeln!(out, "bestmove {}", mv.to_uci())?;
                return Ok(());
            }
        }

        let result = {
            let mut sink = InfoSink { out: &mut *out };
            search(&mut self.pos, &mut self.tt, &tc, |info| sink.emit(info))
        };

        match result.best {
            Some(mv) => writeln!(out, "bestmove {}", mv.to_uci())?,
            None => {
                // Distinguish checkmate from stalemate for observers before
                // the terminal marker
                if self.pos.in_check(self.pos.side) {
                    writeln!(out, "info depth 0 score mate 0 nodes 0 nps 0 time 0")?;
                }
                writeln!(out, "bestmove 0000")?;
            }
        }
        Ok(())
    }

    fn run_perft(
        &mut self,
        divide_mode: bool,
        depth: u32,
        fen: Option<&str>,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let mut pos = match fen {
            Some(fen) => match Position::from_fen(fen) {
                Ok(pos) => pos,
                Err(err) => {
                    eprintln!("rejected fen: {}", err);
                    return Ok(());
                }
            },
            None => self.pos.clone(),
        };
        if divide_mode {
            divide(&mut pos, depth, out)?;
        } else {
            let nodes = perft(&mut pos, depth);
            writeln!(out, "perft {} = {}", depth, nodes)?;
        }
        Ok(())
    }
}

impl Default for UciEngine {
    fn default() -> Self {
        Self::new()
    }
}

struct InfoSink<'a> {
    out: &'a mut dyn Write,
}

impl InfoSink<'_> {
    fn emit(&mut self, info: &SearchInfo) {
        let pv: Vec<String> = info.pv.iter().map(|m| m.to_uci()).collect();
        let score = if info.score.abs() > MATE_BOUND {
            let plies = MATE - info.score.abs();
            let moves = (plies + 1) / 2;
            format!("mate {}", if info.score > 0 { moves } else { -moves })
        } else {
            format!("cp {}", info.score)
        };
        // A write error here means the GUI hung up; the search result still
        // flows back through the caller
        let _ = writeln!(
            self.out,
            "info depth {} score {} nodes {} nps {} time {} pv {}",
            info.depth,
            score,
            info.nodes,
            info.nps,
            info.time_ms,
            pv.join(" ")
        );
    }
}

/// Blocking line loop over stdin; returns on `quit` or EOF
pub fn run() -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut engine = UciEngine::new();
    for line in stdin.lock().lines() {
        let line = line?;
        if !engine.handle_command(line.trim(), &mut stdout)? {
            break;
        }
        stdout.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_commands(engine: &mut UciEngine, commands: &[&str]) -> String {
        let mut out = Vec::new();
        for cmd in commands {
            engine
                .handle_command(cmd, &mut out)
                .expect("command handled");
        }
        String::from_utf8(out).expect("utf8 output")
    }

    #[test]
    fn test_uci_handshake() {
        let mut engine = UciEngine::new();
        let out = run_commands(&mut engine, &["uci"]);
        assert!(out.contains("id name chessmind"));
        assert!(out.contains("option name Hash type spin default 64 min 1 max 2048"));
        assert!(out.contains("option name Threads type spin default 1 min 1 max 32"));
        assert!(out.trim_end().ends_with("uciok"));
    }

    #[test]
    fn test_isready_applies_pending_hash() {
        let mut engine = UciEngine::new();
        let before = engine.tt.len();
        let out = run_commands(
            &mut engine,
            &["setoption name Hash value 8", "isready"],
        );
        assert!(out.contains("readyok"));
        assert_eq!(engine.hash_mb, 8);
        assert!(engine.tt.len() < before);
    }

    #[test]
    fn test_position_startpos_with_moves() {
        let mut engine = UciEngine::new();
        run_commands(&mut engine, &["position startpos moves e2e4 e7e5"]);
        assert_eq!(engine.move_history, vec!["e2e4", "e7e5"]);
        assert!(engine.from_startpos);
        assert_eq!(engine.pos.fullmove, 2);
    }

    #[test]
    fn test_position_fen_disables_book_lineage() {
        let mut engine = UciEngine::new();
        run_commands(
            &mut engine,
            &["position fen 4k3/8/8/8/8/8/8/4K2R w K - 0 1"],
        );
        assert!(!engine.from_startpos);
        assert_eq!(engine.pos.castling, CASTLE_WK);
    }

    #[test]
    fn test_go_emits_bestmove() {
        let mut engine = UciEngine::new();
        let out = run_commands(
            &mut engine,
            &[
                "position fen 6k1/5ppp/8/8/8/8/5PPP/4R1K1 w - - 0 1",
                "go movetime 150",
            ],
        );
        assert!(out.contains("info depth 1"), "per-depth telemetry: {}", out);
        assert!(out.contains("bestmove "), "bestmove line: {}", out);
        assert!(!out.contains("bestmove 0000"));
    }

    #[test]
    fn test_go_on_terminal_position_reports_null_move() {
        let mut engine = UciEngine::new();
        let out = run_commands(
            &mut engine,
            &[
                "position fen R6k/6pp/8/8/8/8/8/7K b - - 0 1",
                "go movetime 50",
            ],
        );
        assert!(out.contains("bestmove 0000"), "terminal marker: {}", out);
        assert!(
            out.contains("score mate 0"),
            "checkmate is flagged before the terminal marker: {}",
            out
        );
    }

    #[test]
    fn test_go_on_stalemate_has_no_mate_info() {
        let mut engine = UciEngine::new();
        let out = run_commands(
            &mut engine,
            &[
                "position fen 7k/8/6Q1/8/8/8/8/6K1 b - - 0 1",
                "go movetime 50",
            ],
        );
        assert!(out.contains("bestmove 0000"));
        assert!(!out.contains("score mate"), "stalemate is not mate: {}", out);
    }

    #[test]
    fn test_book_hit_from_startpos() {
        let mut engine = UciEngine::new();
        let out = run_commands(&mut engine, &["position startpos", "go movetime 100"]);
        assert!(
            out.contains("info string bookhit move="),
            "book should open from startpos: {}",
            out
        );
        assert!(out.contains("bestmove "));
    }

    #[test]
    fn test_unknown_commands_ignored() {
        let mut engine = UciEngine::new();
        let out = run_commands(
            &mut engine,
            &["xyzzy", "debug on", "", "setoption value 8 name Hash"],
        );
        assert!(out.is_empty());
        assert_eq!(engine.pending_hash_mb, None, "garbled setoption dropped");
    }

    #[test]
    fn test_quit_stops_the_loop() {
        let mut engine = UciEngine::new();
        let mut out = Vec::new();
        assert!(!engine.handle_command("quit", &mut out).expect("handled"));
    }

    #[test]
    fn test_perft_command_output() {
        let mut engine = UciEngine::new();
        let out = run_commands(&mut engine, &["perft 3"]);
        assert!(out.contains("perft 3 = 8902"), "got: {}", out);
    }

    #[test]
    fn test_dividefen_command_output() {
        let mut engine = UciEngine::new();
        let out = run_commands(
            &mut engine,
            &["dividefen rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1 2"],
        );
        assert!(out.contains("e2e4: 20"));
        assert!(out.contains("total: 400"));
    }

    #[test]
    fn test_mate_score_rendering() {
        let mut engine = UciEngine::new();
        let out = run_commands(
            &mut engine,
            &[
                "position fen 6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1",
                "go depth 3",
            ],
        );
        assert!(out.contains("score mate 1"), "mate display: {}", out);
        assert!(out.contains("bestmove a1a8"));
    }
}
