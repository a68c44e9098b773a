//! Event-driven, multi-threaded UCI engine loop.
//!
//! The main thread owns the protocol state machine; a reader thread feeds
//! stdin lines into the event channel and searches run on worker threads
//! that hand the engine back when they finish. Log output goes to stderr so
//! stdout stays a clean protocol stream.

use std::io::{self, BufRead};
use std::sync::mpsc;

use tracing::{debug, info, warn};

use sable_core::Position;
use sable_engine::{CancelToken, Engine, Options, SearchInfo, SearchParams};

use crate::command::{move_to_uci, parse_command, Command, GoParams};
use crate::error::UciError;

enum EngineState {
    Idle,
    Searching,
}

enum EngineEvent {
    UciCommand(Result<Command, UciError>),
    SearchDone(Box<SearchDone>),
    InputClosed,
}

/// Payload returned by the search thread when it finishes.
struct SearchDone {
    info: SearchInfo,
    engine: Engine,
}

/// The UCI front end: position history, engine, and protocol state.
pub struct UciEngine {
    history: Vec<Position>,
    engine: Option<Engine>,
    state: EngineState,
    cancel: CancelToken,
    pending_clear: bool,
}

impl UciEngine {
    /// Front end with a fresh engine at the starting position.
    pub fn new() -> Self {
        Self {
            history: vec![Position::startpos()],
            engine: Some(Engine::new()),
            state: EngineState::Idle,
            cancel: CancelToken::new(),
            pending_clear: false,
        }
    }

    /// Run the event loop until `quit` or stdin closes.
    pub fn run(mut self) -> Result<(), UciError> {
        let (tx, rx) = mpsc::channel::<EngineEvent>();

        let stdin_tx = tx.clone();
        std::thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        debug!(cmd = %trimmed, "received UCI command");
                        if stdin_tx
                            .send(EngineEvent::UciCommand(parse_command(trimmed)))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            let _ = stdin_tx.send(EngineEvent::InputClosed);
        });

        for event in &rx {
            match event {
                EngineEvent::UciCommand(Ok(cmd)) => match cmd {
                    Command::Uci => self.handle_uci(),
                    Command::IsReady => println!("readyok"),
                    Command::SetOption { name, value } => self.handle_setoption(&name, value),
                    Command::UciNewGame => self.handle_ucinewgame(),
                    Command::Position(history) => self.history = history,
                    Command::Go(params) => self.handle_go(params, &tx),
                    Command::Stop => self.cancel.cancel(),
                    Command::Quit => {
                        if matches!(self.state, EngineState::Searching) {
                            self.cancel.cancel();
                            for pending in &rx {
                                if let EngineEvent::SearchDone(done) = pending {
                                    self.finish_search(*done);
                                    break;
                                }
                            }
                        }
                        break;
                    }
                    Command::Unknown(_) => {}
                },
                EngineEvent::UciCommand(Err(e)) => {
                    warn!(error = %e, "UCI parse error");
                }
                EngineEvent::SearchDone(done) => self.finish_search(*done),
                EngineEvent::InputClosed => break,
            }
        }

        info!("sable shutting down");
        Ok(())
    }

    fn handle_uci(&self) {
        println!("id name sable");
        println!("id author sable developers");
        println!(
            "option name Hash type spin default 4 min {} max {}",
            Options::HASH_MIN,
            Options::HASH_MAX
        );
        println!(
            "option name Threads type spin default 1 min 1 max {}",
            Options::max_threads()
        );
        println!("option name ExperimentSettings type check default false");
        println!("uciok");
    }

    fn handle_setoption(&mut self, name: &str, value: Option<String>) {
        let Some(engine) = self.engine.as_mut() else {
            warn!("setoption while searching, ignoring");
            return;
        };
        let parsed = value.as_deref().and_then(|v| v.parse::<i64>().ok());
        match name {
            "Hash" => {
                if let Some(mb) = parsed {
                    engine.options.hash_mb = mb.max(0) as usize;
                }
            }
            "Threads" => {
                if let Some(threads) = parsed {
                    engine.options.threads = threads.max(0) as usize;
                }
            }
            "ExperimentSettings" => {
                engine.options.experiment = value.as_deref() == Some("true");
            }
            _ => warn!(option = name, "unknown option"),
        }
    }

    fn handle_ucinewgame(&mut self) {
        self.history = vec![Position::startpos()];
        match self.engine.as_mut() {
            Some(engine) => engine.clear(),
            // Search owns the engine; clear once it comes back
            None => self.pending_clear = true,
        }
    }

    fn handle_go(&mut self, params: GoParams, tx: &mpsc::Sender<EngineEvent>) {
        if matches!(self.state, EngineState::Searching) {
            warn!("go received while searching, ignoring");
            return;
        }
        let Some(mut engine) = self.engine.take() else {
            return;
        };

        self.cancel = CancelToken::new();
        let cancel = self.cancel.clone();
        let search_params = SearchParams {
            positions: self.history.clone(),
            limits: params.limits,
        };
        let tx = tx.clone();

        std::thread::spawn(move || {
            let root = search_params
                .positions
                .last()
                .cloned()
                .unwrap_or_else(Position::startpos);
            let info = engine.search(&search_params, cancel, |progress| {
                print_info(&root, progress);
            });
            let _ = tx.send(EngineEvent::SearchDone(Box::new(SearchDone { info, engine })));
        });

        self.state = EngineState::Searching;
    }

    fn finish_search(&mut self, done: SearchDone) {
        let mut engine = done.engine;
        if self.pending_clear {
            engine.clear();
            self.pending_clear = false;
        }
        self.engine = Some(engine);
        self.state = EngineState::Idle;

        let root = self
            .history
            .last()
            .cloned()
            .unwrap_or_else(Position::startpos);
        match done.info.main_line.first() {
            Some(&best) => println!("bestmove {}", move_to_uci(&root, best)),
            None => println!("bestmove 0000"),
        }
    }
}

impl Default for UciEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Emit a UCI `info` line for a completed iteration.
fn print_info(root: &Position, info: &SearchInfo) {
    let elapsed_ms = info.time_ms.max(1);
    let nps = info.nodes.saturating_mul(1000) / elapsed_ms;

    let mut pv = String::new();
    let mut position = root.clone();
    for &mv in &info.main_line {
        if !pv.is_empty() {
            pv.push(' ');
        }
        pv.push_str(&move_to_uci(&position, mv));
        match position.make_move(mv) {
            Some(next) => position = next,
            None => break,
        }
    }

    println!(
        "info depth {} score {} nodes {} nps {} time {} pv {}",
        info.depth, info.score, info.nodes, nps, elapsed_ms, pv
    );
}
