//! Engine binary
//!
//! With no arguments the process speaks UCI on stdin/stdout. The perft
//! family runs as one-shot diagnostics:
//!
//! ```text
//! engine perft N
//! engine perftfen <fen...> N
//! engine divide N
//! engine dividefen <fen...> N
//! ```

use std::io::{self, Write};
use std::process::ExitCode;

use chess_engine::board::Position;
use chess_engine::perft::{divide, perft};
use chess_engine::uci;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        return match uci::run() {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("io error: {}", err);
                ExitCode::FAILURE
            }
        };
    }

    match run_diagnostic(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}

fn run_diagnostic(args: &[String]) -> Result<(), String> {
    let command = args[0].as_str();
    let (mut pos, depth) = match command {
        "perft" | "divide" => {
            let depth = parse_depth(args.get(1))?;
            (Position::startpos(), depth)
        }
        "perftfen" | "dividefen" => {
            if args.len() < 3 {
                return Err(format!("usage: engine {} <fen...> N", command));
            }
            let fen = args[1..args.len() - 1].join(" ");
            let pos = Position::from_fen(&fen).map_err(|e| format!("bad fen: {}", e))?;
            let depth = parse_depth(args.last())?;
            (pos, depth)
        }
        other => return Err(format!("unknown command '{}'", other)),
    };

    let mut stdout = io::stdout();
    match command {
        "divide" | "dividefen" => {
            divide(&mut pos, depth, &mut stdout).map_err(|e| e.to_string())?;
        }
        _ => {
            let nodes = perft(&mut pos, depth);
            writeln!(stdout, "perft {} = {}", depth, nodes).map_err(|e| e.to_string())?;
        }
    }
    Ok(())
}

fn parse_depth(arg: Option<&String>) -> Result<u32, String> {
    arg.and_then(|s| s.parse().ok())
        .ok_or_else(|| "depth must be a positive integer".to_string())
}
