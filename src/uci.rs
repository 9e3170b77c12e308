use std::fmt::Write as _;
use std::str::FromStr;

use crate::error::{EngineError, Result};
use crate::limits::SearchLimits;
use crate::movegen::Move;
use crate::search::{mate_in, SearchInfo};

pub const ENGINE_NAME: &str = "Three Salmons";
pub const ENGINE_AUTHOR: &str = "Magnus Torvund";

const GO_KEYWORDS: [&str; 12] = [
    "searchmoves", "ponder", "wtime", "btime", "winc", "binc", "movestogo", "depth", "nodes",
    "mate", "movetime", "infinite",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciCommand {
    Uci,
    Debug(bool),
    IsReady,
    SetOption { name: String, value: Option<String> },
    Register,
    UciNewGame,
    /// `fen` is `None` for `startpos`.
    Position { fen: Option<String>, moves: Vec<String> },
    Go(SearchLimits),
    Stop,
    PonderHit,
    Quit,
    /// Non-standard: print the board.
    Display,
    /// Non-standard: `perft <depth>` divide output for the current position.
    Perft(u32),
}

/// Parses one line from the GUI. Blank lines yield `None`.
///
/// Unknown leading tokens are skipped, so `joho debug on` reads as
/// `debug on`. A line with no known command is `MalformedInput`.
pub fn parse_command(line: &str) -> Result<Option<UciCommand>> {
    let mut tokens = line.split_whitespace();
    if line.trim().is_empty() {
        return Ok(None);
    }

    while let Some(token) = tokens.next() {
        let command = match token {
            "uci" => UciCommand::Uci,
            "debug" => match tokens.next() {
                Some("on") => UciCommand::Debug(true),
                Some("off") => UciCommand::Debug(false),
                other => {
                    return Err(EngineError::MalformedInput(format!(
                        "debug expects on or off, got {}",
                        other.unwrap_or("nothing")
                    )))
                }
            },
            "isready" => UciCommand::IsReady,
            "setoption" => parse_setoption(&mut tokens)?,
            "register" => UciCommand::Register,
            "ucinewgame" => UciCommand::UciNewGame,
            "position" => parse_position(&mut tokens)?,
            "go" => UciCommand::Go(parse_go(&mut tokens)?),
            "stop" => UciCommand::Stop,
            "ponderhit" => UciCommand::PonderHit,
            "quit" => UciCommand::Quit,
            "d" => UciCommand::Display,
            "perft" => {
                let depth = tokens
                    .next()
                    .ok_or_else(|| EngineError::MalformedInput("perft needs a depth".to_string()))?;
                UciCommand::Perft(parse_number(depth, "perft")?)
            }
            _ => continue,
        };
        return Ok(Some(command));
    }

    Err(EngineError::MalformedInput(format!("unknown command: {}", line.trim())))
}

fn parse_setoption<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<UciCommand> {
    let mut name: Vec<&str> = Vec::new();
    let mut value: Option<Vec<&str>> = None;
    let mut in_name = false;

    for token in tokens {
        match token {
            "name" if value.is_none() && name.is_empty() => in_name = true,
            "value" if in_name => {
                in_name = false;
                value = Some(Vec::new());
            }
            _ => match value.as_mut() {
                Some(value) => value.push(token),
                None if in_name => name.push(token),
                None => {}
            },
        }
    }

    if name.is_empty() {
        return Err(EngineError::MalformedInput("setoption without a name".to_string()));
    }
    Ok(UciCommand::SetOption {
        name: name.join(" "),
        value: value.map(|value| value.join(" ")),
    })
}

fn parse_position<'a>(mut tokens: impl Iterator<Item = &'a str>) -> Result<UciCommand> {
    let fen = match tokens.next() {
        Some("startpos") => None,
        Some("fen") => {
            let mut fields = Vec::new();
            for token in tokens.by_ref() {
                if token == "moves" {
                    break;
                }
                fields.push(token);
            }
            if fields.is_empty() {
                return Err(EngineError::MalformedInput("position fen without a fen".to_string()));
            }
            let moves = tokens.map(str::to_string).collect();
            return Ok(UciCommand::Position {
                fen: Some(fields.join(" ")),
                moves,
            });
        }
        other => {
            return Err(EngineError::MalformedInput(format!(
                "position expects startpos or fen, got {}",
                other.unwrap_or("nothing")
            )))
        }
    };

    let moves = match tokens.next() {
        None => Vec::new(),
        Some("moves") => tokens.map(str::to_string).collect(),
        Some(other) => {
            return Err(EngineError::MalformedInput(format!(
                "expected moves after startpos, got {other}"
            )))
        }
    };
    Ok(UciCommand::Position { fen, moves })
}

fn parse_go<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<SearchLimits> {
    let mut limits = SearchLimits::default();
    let mut tokens = tokens.peekable();

    while let Some(token) = tokens.next() {
        match token {
            "infinite" => limits.infinite = true,
            "ponder" => limits.ponder = true,
            "depth" => limits.depth = Some(parse_number(next_value(&mut tokens, token)?, token)?),
            "nodes" => limits.nodes = Some(parse_number(next_value(&mut tokens, token)?, token)?),
            "mate" => limits.mate = Some(parse_number(next_value(&mut tokens, token)?, token)?),
            "movestogo" => {
                limits.movestogo = Some(parse_number(next_value(&mut tokens, token)?, token)?)
            }
            "movetime" => limits.movetime = Some(parse_millis(next_value(&mut tokens, token)?, token)?),
            "wtime" => limits.wtime = Some(parse_millis(next_value(&mut tokens, token)?, token)?),
            "btime" => limits.btime = Some(parse_millis(next_value(&mut tokens, token)?, token)?),
            "winc" => limits.winc = Some(parse_millis(next_value(&mut tokens, token)?, token)?),
            "binc" => limits.binc = Some(parse_millis(next_value(&mut tokens, token)?, token)?),
            "searchmoves" => {
                while let Some(mv) = tokens.next_if(|next| !GO_KEYWORDS.contains(next)) {
                    limits.searchmoves.push(mv.to_string());
                }
            }
            other => tracing::debug!(token = other, "ignoring unknown go token"),
        }
    }

    Ok(limits)
}

fn next_value<'a>(tokens: &mut impl Iterator<Item = &'a str>, field: &str) -> Result<&'a str> {
    tokens
        .next()
        .ok_or_else(|| EngineError::MalformedInput(format!("go {field} needs a value")))
}

fn parse_number<T: FromStr>(text: &str, field: &str) -> Result<T> {
    text.parse()
        .map_err(|_| EngineError::MalformedInput(format!("{field}: `{text}` is not a valid number")))
}

// Some GUIs send negative clock values when a player is in time trouble.
fn parse_millis(text: &str, field: &str) -> Result<u64> {
    let millis: i64 = parse_number(text, field)?;
    Ok(millis.max(0) as u64)
}

/// `cp <n>` or `mate <moves>`.
pub fn format_score(score: i32) -> String {
    match mate_in(score) {
        Some(moves) => format!("mate {moves}"),
        None => format!("cp {score}"),
    }
}

pub fn format_info(info: &SearchInfo) -> String {
    let mut line = format!(
        "info depth {} seldepth {} score {} nodes {} nps {} time {} hashfull {}",
        info.depth,
        info.seldepth,
        format_score(info.score),
        info.nodes,
        info.nps,
        info.time_ms,
        info.hashfull
    );
    if !info.pv.is_empty() {
        line.push_str(" pv");
        for mv in &info.pv {
            let _ = write!(line, " {mv}");
        }
    }
    line
}

pub fn format_bestmove(best: Option<Move>, ponder: Option<Move>) -> String {
    match (best, ponder) {
        (Some(best), Some(ponder)) => format!("bestmove {best} ponder {ponder}"),
        (Some(best), None) => format!("bestmove {best}"),
        (None, _) => "bestmove (none)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Piece;
    use crate::search::MATE;

    fn parse(line: &str) -> UciCommand {
        parse_command(line).unwrap().unwrap()
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse("uci"), UciCommand::Uci);
        assert_eq!(parse("  isready  "), UciCommand::IsReady);
        assert_eq!(parse("ucinewgame"), UciCommand::UciNewGame);
        assert_eq!(parse("stop"), UciCommand::Stop);
        assert_eq!(parse("ponderhit"), UciCommand::PonderHit);
        assert_eq!(parse("quit"), UciCommand::Quit);
        assert_eq!(parse("debug on"), UciCommand::Debug(true));
        assert_eq!(parse("register later"), UciCommand::Register);
        assert_eq!(parse("perft 3"), UciCommand::Perft(3));
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn unknown_leading_tokens_are_skipped() {
        assert_eq!(parse("joho debug off"), UciCommand::Debug(false));
        assert!(matches!(
            parse_command("xyzzy plugh"),
            Err(EngineError::MalformedInput(_))
        ));
    }

    #[test]
    fn position_startpos_and_fen() {
        assert_eq!(
            parse("position startpos moves e2e4 e7e5"),
            UciCommand::Position {
                fen: None,
                moves: vec!["e2e4".to_string(), "e7e5".to_string()],
            }
        );
        assert_eq!(
            parse("position fen 8/8/8/8/8/8/k7/7K w - - 0 1 moves h1g1"),
            UciCommand::Position {
                fen: Some("8/8/8/8/8/8/k7/7K w - - 0 1".to_string()),
                moves: vec!["h1g1".to_string()],
            }
        );
        assert_eq!(
            parse("position fen 8/8/8/8/8/8/k7/7K w - -"),
            UciCommand::Position {
                fen: Some("8/8/8/8/8/8/k7/7K w - -".to_string()),
                moves: Vec::new(),
            }
        );
        assert!(parse_command("position").is_err());
        assert!(parse_command("position fen").is_err());
        assert!(parse_command("position startpos e2e4").is_err());
    }

    #[test]
    fn setoption_with_spaces() {
        assert_eq!(
            parse("setoption name Clear Hash"),
            UciCommand::SetOption {
                name: "Clear Hash".to_string(),
                value: None,
            }
        );
        assert_eq!(
            parse("setoption name Hash value 128"),
            UciCommand::SetOption {
                name: "Hash".to_string(),
                value: Some("128".to_string()),
            }
        );
        assert!(parse_command("setoption value 3").is_err());
    }

    #[test]
    fn go_limits() {
        let UciCommand::Go(limits) =
            parse("go wtime 300000 btime -50 winc 2000 binc 2000 movestogo 40")
        else {
            panic!("expected go");
        };
        assert_eq!(limits.wtime, Some(300_000));
        assert_eq!(limits.btime, Some(0));
        assert_eq!(limits.winc, Some(2_000));
        assert_eq!(limits.movestogo, Some(40));
        assert!(!limits.infinite);

        let UciCommand::Go(limits) = parse("go searchmoves e2e4 d2d4 depth 6 ponder") else {
            panic!("expected go");
        };
        assert_eq!(limits.searchmoves, vec!["e2e4", "d2d4"]);
        assert_eq!(limits.depth, Some(6));
        assert!(limits.ponder);

        assert_eq!(parse("go infinite"), UciCommand::Go(SearchLimits::infinite()));
        assert!(matches!(
            parse_command("go depth deep"),
            Err(EngineError::MalformedInput(_))
        ));
        assert!(parse_command("go movetime").is_err());
    }

    #[test]
    fn output_formatting() {
        assert_eq!(format_score(35), "cp 35");
        assert_eq!(format_score(MATE - 3), "mate 2");
        assert_eq!(format_score(-MATE + 4), "mate -2");

        let e2e4 = Move::new(12, 28);
        let e7e8q = Move::new_promotion(52, 60, Piece::Queen);
        assert_eq!(format_bestmove(Some(e2e4), Some(e7e8q)), "bestmove e2e4 ponder e7e8q");
        assert_eq!(format_bestmove(Some(e2e4), None), "bestmove e2e4");
        assert_eq!(format_bestmove(None, None), "bestmove (none)");

        let info = SearchInfo {
            depth: 2,
            seldepth: 5,
            score: -12,
            nodes: 300,
            nps: 30_000,
            time_ms: 10,
            hashfull: 1,
            pv: vec![e2e4],
        };
        assert_eq!(
            format_info(&info),
            "info depth 2 seldepth 5 score cp -12 nodes 300 nps 30000 time 10 hashfull 1 pv e2e4"
        );
    }
}
