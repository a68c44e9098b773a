//! UCI command parsing, including the castling-notation bridge between the
//! wire format (`e1g1`) and the king-takes-rook encoding the board uses.

use sable_core::{File, Move, Piece, Position, Square};
use sable_engine::Limits;

use crate::error::UciError;

/// A parsed UCI command.
#[derive(Debug, Clone)]
pub enum Command {
    /// `uci` — identify and list options.
    Uci,
    /// `isready` handshake.
    IsReady,
    /// `setoption name <name> [value <value>]`.
    SetOption {
        /// Option name, as sent.
        name: String,
        /// Option value, if present.
        value: Option<String>,
    },
    /// `ucinewgame` — clear learned state.
    UciNewGame,
    /// `position ...` — the position history ending at the position to search.
    Position(Vec<Position>),
    /// `go ...` — start searching.
    Go(GoParams),
    /// `stop` — halt the current search.
    Stop,
    /// `quit` — exit.
    Quit,
    /// Anything unrecognized; ignored.
    Unknown(String),
}

/// Parameters of a `go` command.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoParams {
    /// Search limits assembled from the `go` arguments.
    pub limits: Limits,
}

/// Render a move in UCI notation, translating castling from the internal
/// king-takes-rook form to the standard king-two-squares form.
pub fn move_to_uci(position: &Position, mv: Move) -> String {
    let board = position.board();
    let is_castling = board.piece_on(mv.from) == Some(Piece::King)
        && board.color_on(mv.to) == Some(position.side_to_move());
    if is_castling {
        let file = if mv.to.file() > mv.from.file() {
            File::G
        } else {
            File::C
        };
        let to = Square::new(file, mv.from.rank());
        return format!("{}{}", mv.from, to);
    }
    mv.to_string()
}

/// Resolve a UCI move string against the legal moves of `position`,
/// accepting both castling notations.
pub fn uci_to_move(position: &Position, text: &str) -> Option<Move> {
    let mut moves = Vec::new();
    position.generate_moves(&mut moves);
    for om in &moves {
        if om.mv.to_string() == text || move_to_uci(position, om.mv) == text {
            return Some(om.mv);
        }
    }
    None
}

/// Parse one line of UCI input.
pub fn parse_command(line: &str) -> Result<Command, UciError> {
    let mut tokens = line.split_whitespace();
    let Some(head) = tokens.next() else {
        return Ok(Command::Unknown(String::new()));
    };

    match head {
        "uci" => Ok(Command::Uci),
        "isready" => Ok(Command::IsReady),
        "ucinewgame" => Ok(Command::UciNewGame),
        "stop" => Ok(Command::Stop),
        "quit" => Ok(Command::Quit),
        "setoption" => parse_setoption(&mut tokens),
        "position" => parse_position(&mut tokens),
        "go" => parse_go(&mut tokens),
        _ => Ok(Command::Unknown(line.to_string())),
    }
}

fn parse_setoption<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<Command, UciError> {
    // setoption name <words...> [value <words...>]
    let mut name_parts = Vec::new();
    let mut value_parts = Vec::new();
    let mut in_value = false;
    for token in tokens.by_ref() {
        match token {
            "name" if name_parts.is_empty() && !in_value => {}
            "value" if !in_value => in_value = true,
            _ if in_value => value_parts.push(token),
            _ => name_parts.push(token),
        }
    }
    if name_parts.is_empty() {
        return Err(UciError::MissingValue {
            param: "name".to_string(),
        });
    }
    Ok(Command::SetOption {
        name: name_parts.join(" "),
        value: if value_parts.is_empty() {
            None
        } else {
            Some(value_parts.join(" "))
        },
    })
}

fn parse_position<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<Command, UciError> {
    let mut tokens = tokens.peekable();
    let start = match tokens.next() {
        Some("startpos") => Position::startpos(),
        Some("fen") => {
            let mut fen_parts = Vec::new();
            while let Some(&token) = tokens.peek() {
                if token == "moves" {
                    break;
                }
                fen_parts.push(token);
                tokens.next();
            }
            let fen = fen_parts.join(" ");
            fen.parse().map_err(|_| UciError::InvalidFen { fen })?
        }
        _ => return Err(UciError::MalformedPosition),
    };

    let mut history = vec![start];
    if tokens.next_if(|&token| token == "moves").is_some() {
        for text in tokens {
            let current = history.last().expect("history is never empty");
            let mv = uci_to_move(current, text).ok_or_else(|| UciError::InvalidMove {
                uci_move: text.to_string(),
            })?;
            let next = current.make_move(mv).ok_or_else(|| UciError::InvalidMove {
                uci_move: text.to_string(),
            })?;
            history.push(next);
        }
    }
    Ok(Command::Position(history))
}

fn parse_go<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<Command, UciError> {
    let mut limits = Limits::default();
    let mut tokens = tokens.peekable();

    while let Some(token) = tokens.next() {
        match token {
            "infinite" => limits.infinite = true,
            "wtime" => limits.white_time = parse_value(token, tokens.next())?,
            "btime" => limits.black_time = parse_value(token, tokens.next())?,
            "winc" => limits.white_increment = parse_value(token, tokens.next())?,
            "binc" => limits.black_increment = parse_value(token, tokens.next())?,
            "movestogo" => limits.moves_to_go = parse_value(token, tokens.next())?,
            "movetime" => limits.move_time = parse_value(token, tokens.next())?,
            "depth" => limits.depth = Some(parse_value(token, tokens.next())? as i32),
            "nodes" => limits.nodes = Some(parse_value(token, tokens.next())? as u64),
            _ => {}
        }
    }

    Ok(Command::Go(GoParams { limits }))
}

fn parse_value(param: &str, value: Option<&str>) -> Result<i64, UciError> {
    let value = value.ok_or_else(|| UciError::MissingValue {
        param: param.to_string(),
    })?;
    value.parse().map_err(|_| UciError::InvalidValue {
        param: param.to_string(),
        value: value.to_string(),
    })
}
