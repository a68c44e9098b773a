//! Search driver: engine configuration, iterative deepening, and the
//! parallel root split.
//!
//! Thread 0 establishes alpha on the first root move, then every thread
//! (thread 0 included) pulls the remaining root moves from a shared index,
//! scouting each with a null window before a full re-search. Best move, PV,
//! and alpha updates are serialized by one mutex; everything else the
//! workers share is the lock-free transposition table.

pub mod control;
pub mod negamax;
pub mod ordering;
pub mod score;
pub mod see;
pub mod tt;

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Mutex;

use tracing::debug;

use sable_core::{Move, Position, PAWN_VALUE};

use crate::search::control::{CancelToken, SearchCancelled};
use crate::search::negamax::{SearchContext, SearchThread};
use crate::search::ordering::sort_moves;
use crate::search::score::{loss_in, win_in, UciScore, MAX_HEIGHT, VALUE_INFINITY};
use crate::search::tt::TransTable;
use crate::time::{Limits, TimeManager};

/// Engine configuration. Out-of-range values are clamped at `prepare`.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Transposition table size in megabytes, 4..=512.
    pub hash_mb: usize,
    /// Number of search threads, 1..=logical CPUs.
    pub threads: usize,
    /// Toggle for experimental settings under test.
    pub experiment: bool,
}

impl Options {
    /// Lower bound for `hash_mb`.
    pub const HASH_MIN: usize = 4;
    /// Upper bound for `hash_mb`.
    pub const HASH_MAX: usize = 512;

    /// Number of logical CPUs, the upper bound for `threads`.
    pub fn max_threads() -> usize {
        std::thread::available_parallelism().map_or(1, |n| n.get())
    }

    fn clamped(self) -> Self {
        Self {
            hash_mb: self.hash_mb.clamp(Self::HASH_MIN, Self::HASH_MAX),
            threads: self.threads.clamp(1, Self::max_threads()),
            experiment: self.experiment,
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            hash_mb: 4,
            threads: 1,
            experiment: false,
        }
    }
}

/// A search request: the game history ending at the position to search,
/// plus the limits to respect.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Positions from the last irreversible point (or game start) to the
    /// position to search, in order. Used for repetition detection.
    pub positions: Vec<Position>,
    /// Time, depth, and node limits.
    pub limits: Limits,
}

/// Result of a search, also emitted as progress after each completed depth.
#[derive(Debug, Clone)]
pub struct SearchInfo {
    /// Deepest fully completed iteration.
    pub depth: i32,
    /// Principal variation, best move first.
    pub main_line: Vec<Move>,
    /// Score of the main line.
    pub score: UciScore,
    /// Nodes searched across all threads.
    pub nodes: u64,
    /// Elapsed wall-clock milliseconds.
    pub time_ms: u64,
}

/// Best line found so far, written only under the root mutex or between
/// iterations.
#[derive(Debug, Clone, Default)]
struct MainLine {
    depth: i32,
    score: i32,
    moves: Vec<Move>,
}

impl MainLine {
    fn update(&mut self, depth: i32, score: i32, moves: Vec<Move>) {
        self.depth = depth;
        self.score = score;
        self.moves = moves;
    }
}

/// State the root workers contend on, all behind one mutex.
struct RootState {
    alpha: i32,
    index: usize,
    best_index: usize,
    line: MainLine,
}

/// The engine: options, shared transposition table, and per-thread search
/// state. Reused across searches so heuristic memory carries over.
pub struct Engine {
    /// Current configuration; applied by [`Engine::prepare`].
    pub options: Options,
    tt: TransTable,
    threads: Vec<SearchThread>,
}

impl Engine {
    /// Engine with default options (4 MB hash, one thread).
    pub fn new() -> Self {
        let options = Options::default();
        Self {
            options,
            tt: TransTable::new(options.hash_mb),
            threads: vec![SearchThread::new()],
        }
    }

    /// Apply option changes: resize the table and thread pool if needed.
    pub fn prepare(&mut self) {
        self.options = self.options.clamped();
        if self.tt.megabytes() != self.options.hash_mb {
            self.tt = TransTable::new(self.options.hash_mb);
        }
        if self.threads.len() != self.options.threads {
            self.threads = (0..self.options.threads)
                .map(|_| SearchThread::new())
                .collect();
        }
    }

    /// Forget everything learned: transposition table and sort tables.
    pub fn clear(&mut self) {
        self.tt.clear();
        for thread in &mut self.threads {
            thread.sort_table.clear();
        }
    }

    /// Run a search. `cancel` is the caller's handle for stopping early;
    /// the hard deadline fires it too. `progress` is called after every
    /// completed iteration.
    pub fn search<F>(&mut self, params: &SearchParams, cancel: CancelToken, mut progress: F) -> SearchInfo
    where
        F: FnMut(&SearchInfo),
    {
        self.prepare();

        let root = params
            .positions
            .last()
            .cloned()
            .unwrap_or_else(Position::startpos);
        let time_manager = TimeManager::start(&params.limits, root.white_to_move(), cancel.clone());

        self.tt.prepare_new_search();
        let history_keys = repetition_keys(&params.positions);
        for thread in &mut self.threads {
            thread.prepare(&root);
        }

        let total_nodes = AtomicU64::new(0);
        let ctx = SearchContext {
            tt: &self.tt,
            cancel: &cancel,
            history_keys: &history_keys,
            node_limit: params.limits.nodes,
            total_nodes: &total_nodes,
        };

        let main_line = Mutex::new(MainLine::default());
        let max_depth = params
            .limits
            .depth
            .map_or(MAX_HEIGHT as i32, |d| d.clamp(1, MAX_HEIGHT as i32));

        iterative_deepening(
            &ctx,
            &mut self.threads,
            &main_line,
            &time_manager,
            max_depth,
            &mut |line, threads| {
                progress(&compose_info(line, threads, &time_manager));
            },
        );

        let line = main_line.into_inner().expect("root mutex poisoned");
        let info = compose_info(&line, &self.threads, &time_manager);
        debug!(
            depth = info.depth,
            nodes = info.nodes,
            time_ms = info.time_ms,
            "search finished"
        );
        info
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .field("tt", &self.tt)
            .field("threads", &self.threads.len())
            .finish()
    }
}

/// Repetition counts for all positions up to the last irreversible move.
fn repetition_keys(positions: &[Position]) -> HashMap<u64, u32> {
    let mut keys = HashMap::new();
    for position in positions.iter().rev() {
        *keys.entry(position.key()).or_insert(0) += 1;
        if position.rule50() == 0 {
            break;
        }
    }
    keys
}

fn compose_info(line: &MainLine, threads: &[SearchThread], tm: &TimeManager) -> SearchInfo {
    SearchInfo {
        depth: line.depth,
        main_line: line.moves.clone(),
        score: UciScore::from_internal(line.score),
        nodes: threads.iter().map(|t| t.nodes).sum(),
        time_ms: tm.elapsed_ms(),
    }
}

fn iterative_deepening(
    ctx: &SearchContext<'_>,
    threads: &mut [SearchThread],
    main_line: &Mutex<MainLine>,
    time_manager: &TimeManager,
    max_depth: i32,
    progress: &mut dyn FnMut(&MainLine, &[SearchThread]),
) {
    let mut moves = gen_root_moves(ctx, &mut threads[0]);
    if let Some(&first) = moves.first() {
        main_line
            .lock()
            .expect("root mutex poisoned")
            .update(0, 0, vec![first]);
    }
    if moves.len() <= 1 {
        return;
    }

    let mut prev_score = 0;
    for depth in 1..=max_depth {
        let Ok(score) = search_root_parallel(ctx, threads, main_line, &mut moves, depth) else {
            break;
        };
        if ctx.cancel.is_cancelled() {
            break;
        }
        if score >= win_in(depth - 3) || score <= loss_in(depth - 3) {
            break;
        }
        if (prev_score - score).abs() <= PAWN_VALUE / 2 && time_manager.is_soft_timeout() {
            break;
        }
        prev_score = score;
        {
            let line = main_line.lock().expect("root mutex poisoned");
            progress(&line, threads);
        }
    }
}

/// Legal root moves, hash move and heuristics first.
fn gen_root_moves(ctx: &SearchContext<'_>, thread: &mut SearchThread) -> Vec<Move> {
    let position = thread.stack[0].position.clone();
    let trans = ctx.tt.read(&position).and_then(|entry| entry.best_move);

    let mut ml = Vec::new();
    position.generate_moves(&mut ml);
    thread.sort_table.note(&position, &mut ml, trans, 0);
    sort_moves(&mut ml);

    ml.iter()
        .filter(|om| position.make_move(om.mv).is_some())
        .map(|om| om.mv)
        .collect()
}

fn search_root_parallel(
    ctx: &SearchContext<'_>,
    threads: &mut [SearchThread],
    main_line: &Mutex<MainLine>,
    moves: &mut Vec<Move>,
    depth: i32,
) -> Result<i32, SearchCancelled> {
    const HEIGHT: usize = 0;
    let beta = VALUE_INFINITY;

    // Thread 0 searches the first move with a full window to seed alpha
    // and the main line before the split.
    let alpha = {
        let thread = &mut threads[0];
        let position = thread.stack[HEIGHT].position.clone();
        let first = moves[0];
        let child = position
            .make_move(first)
            .expect("root moves are pre-filtered legal");
        thread.stack[HEIGHT + 1].position = child;
        let new_depth = thread.new_depth(&position, depth, HEIGHT);
        let alpha = -VALUE_INFINITY;
        let score = -thread.alpha_beta(ctx, -beta, -alpha, new_depth, HEIGHT + 1)?;

        let mut pv = vec![first];
        pv.extend_from_slice(thread.stack[HEIGHT + 1].pv.moves());
        main_line
            .lock()
            .expect("root mutex poisoned")
            .update(depth, score, pv);
        score
    };

    let shared = Mutex::new(RootState {
        alpha,
        index: 1,
        best_index: 0,
        line: MainLine::default(),
    });
    let shared_ref = &shared;
    let moves_ref: &[Move] = moves;

    std::thread::scope(|scope| {
        let mut workers = threads.iter_mut();
        let first = workers.next().expect("at least one thread");
        for thread in workers {
            scope.spawn(move || {
                // Cancellation is caught here, at the worker boundary.
                let _ = root_worker(thread, ctx, shared_ref, moves_ref, depth);
            });
        }
        let _ = root_worker(first, ctx, shared_ref, moves_ref, depth);
    });

    let state = shared.into_inner().expect("root mutex poisoned");
    if state.line.depth > 0 {
        main_line
            .lock()
            .expect("root mutex poisoned")
            .update(state.line.depth, state.line.score, state.line.moves.clone());
    }

    // Rotate the best move to the front for the next iteration.
    let best = moves.remove(state.best_index);
    moves.insert(0, best);

    Ok(state.alpha)
}

fn root_worker(
    thread: &mut SearchThread,
    ctx: &SearchContext<'_>,
    shared: &Mutex<RootState>,
    moves: &[Move],
    depth: i32,
) -> Result<(), SearchCancelled> {
    const HEIGHT: usize = 0;
    let beta = VALUE_INFINITY;
    let position = thread.stack[HEIGHT].position.clone();

    loop {
        let (local_alpha, local_index) = {
            let mut state = shared.lock().expect("root mutex poisoned");
            let snapshot = (state.alpha, state.index);
            state.index += 1;
            snapshot
        };
        if local_index >= moves.len() {
            return Ok(());
        }
        let mv = moves[local_index];

        let child = position
            .make_move(mv)
            .expect("root moves are pre-filtered legal");
        thread.stack[HEIGHT + 1].position = child;
        let new_depth = thread.new_depth(&position, depth, HEIGHT);

        // Null-window scout against the snapshot; discard on fail-low.
        let scout =
            -thread.alpha_beta(ctx, -(local_alpha + 1), -local_alpha, new_depth, HEIGHT + 1)?;
        if scout <= local_alpha {
            continue;
        }

        let score = -thread.alpha_beta(ctx, -beta, -local_alpha, new_depth, HEIGHT + 1)?;

        let mut state = shared.lock().expect("root mutex poisoned");
        if score > state.alpha {
            state.alpha = score;
            state.best_index = local_index;
            let mut pv = vec![mv];
            pv.extend_from_slice(thread.stack[HEIGHT + 1].pv.moves());
            state.line.update(depth, score, pv);
        }
    }
}
