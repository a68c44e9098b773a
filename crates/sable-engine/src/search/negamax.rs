//! Per-thread negamax alpha-beta search with quiescence.
//!
//! Each thread owns its stack of plies (position, move buffer, quiets
//! buffer, PV) and its sort table; the transposition table and the cancel
//! token are shared through [`SearchContext`]. Cancellation unwinds the
//! recursion as `Err(SearchCancelled)` and is caught only by the root
//! driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use sable_core::{
    is_capture_or_promotion, is_danger_capture, is_late_endgame, is_pawn_advance,
    is_pawn_push_7th, move_value, Move, OrderedMove, Piece, Position, MAX_MOVES, PAWN_VALUE,
};

use crate::eval::Eval;
use crate::search::control::{CancelToken, SearchCancelled};
use crate::search::ordering::{
    late_move_reduction, move_to_top, sort_moves, SortTable, SORT_KEY_IMPORTANT,
};
use crate::search::score::{
    loss_in, value_from_tt, value_to_tt, win_in, MAX_HEIGHT, VALUE_DRAW, VALUE_INFINITY,
    VALUE_LOSS, VALUE_WIN,
};
use crate::search::see::see_ge_zero;
use crate::search::tt::{TransTable, BOUND_LOWER, BOUND_UPPER};

/// Moves sorted lazily: the first few by selection, the rest in one batch.
const SORT_MOVES_INDEX: usize = 4;

/// Shared, read-mostly state for one search.
pub(crate) struct SearchContext<'a> {
    /// Shared transposition table.
    pub tt: &'a TransTable,
    /// Cooperative cancellation flag.
    pub cancel: &'a CancelToken,
    /// Repetition counts of positions before the search root.
    pub history_keys: &'a HashMap<u64, u32>,
    /// Optional node ceiling across all threads.
    pub node_limit: Option<u64>,
    /// Nodes visited by all threads, updated in poll-sized batches.
    pub total_nodes: &'a AtomicU64,
}

impl SearchContext<'_> {
    /// Account a batch of nodes and poll for cancellation.
    fn poll(&self, batch: u64) -> Result<(), SearchCancelled> {
        self.cancel.check()?;
        let total = self.total_nodes.fetch_add(batch, Ordering::Relaxed) + batch;
        if let Some(limit) = self.node_limit {
            if total >= limit {
                self.cancel.cancel();
                return Err(SearchCancelled);
            }
        }
        Ok(())
    }
}

/// Principal variation collected at one ply.
#[derive(Debug, Clone, Default)]
pub(crate) struct Pv {
    moves: Vec<Move>,
}

impl Pv {
    fn clear(&mut self) {
        self.moves.clear();
    }

    fn assign(&mut self, mv: Move, child: &Pv) {
        self.moves.clear();
        self.moves.push(mv);
        self.moves.extend_from_slice(&child.moves);
    }

    /// The line below this ply, best move first.
    pub fn moves(&self) -> &[Move] {
        &self.moves
    }
}

/// One ply of the search stack.
pub(crate) struct StackSlot {
    /// Position searched at this ply.
    pub position: Position,
    move_list: Vec<OrderedMove>,
    quiets: Vec<Move>,
    /// Best line found below this ply.
    pub pv: Pv,
}

impl StackSlot {
    fn new() -> Self {
        Self {
            position: Position::startpos(),
            move_list: Vec::with_capacity(MAX_MOVES),
            quiets: Vec::with_capacity(MAX_MOVES),
            pv: Pv::default(),
        }
    }
}

/// A search thread: stack, ordering memory, evaluator, and node counter.
pub(crate) struct SearchThread {
    /// Ply-indexed stack; slot `h + 1` holds the child of slot `h`.
    pub stack: Vec<StackSlot>,
    /// Per-thread move-ordering memory.
    pub sort_table: SortTable,
    /// Per-thread evaluator instance.
    pub evaluator: Eval,
    /// Nodes visited by this thread in the current search.
    pub nodes: u64,
}

impl SearchThread {
    pub fn new() -> Self {
        Self {
            stack: (0..=MAX_HEIGHT).map(|_| StackSlot::new()).collect(),
            sort_table: SortTable::new(),
            evaluator: Eval::new(),
            nodes: 0,
        }
    }

    /// Seed the stack with the root position and reset the node counter.
    pub fn prepare(&mut self, root: &Position) {
        self.stack[0].position = root.clone();
        self.nodes = 0;
    }

    fn inc_nodes(&mut self, ctx: &SearchContext<'_>) -> Result<(), SearchCancelled> {
        self.nodes += 1;
        if self.nodes & 255 == 0 {
            ctx.poll(256)?;
        }
        Ok(())
    }

    fn assign_pv(&mut self, height: usize, mv: Move) {
        let (head, tail) = self.stack.split_at_mut(height + 1);
        head[height].pv.assign(mv, &tail[0].pv);
    }

    /// Negamax alpha-beta search of `stack[height].position`.
    pub fn alpha_beta(
        &mut self,
        ctx: &SearchContext<'_>,
        mut alpha: i32,
        beta: i32,
        depth: i32,
        height: usize,
    ) -> Result<i32, SearchCancelled> {
        debug_assert!(alpha < beta);
        self.stack[height].pv.clear();

        if height >= MAX_HEIGHT || self.is_draw(ctx, height) {
            return Ok(VALUE_DRAW);
        }

        if depth <= 0 {
            return self.quiescence(ctx, alpha, beta, 1, height);
        }

        self.inc_nodes(ctx)?;

        let position = self.stack[height].position.clone();
        let in_check = position.is_check();

        // Mate-distance pruning: even a forced mate from here cannot beat
        // a mate already found closer to the root.
        if win_in(height as i32 + 1) <= alpha {
            return Ok(alpha);
        }
        if loss_in(height as i32 + 2) >= beta && !in_check {
            return Ok(beta);
        }

        let mut hash_move: Option<Move> = None;
        if let Some(entry) = ctx.tt.read(&position) {
            hash_move = entry.best_move;
            if entry.depth >= depth {
                let tt_score = value_from_tt(entry.score, height);
                if tt_score >= beta && entry.bound & BOUND_LOWER != 0 {
                    return Ok(beta);
                }
                if tt_score <= alpha && entry.bound & BOUND_UPPER != 0 {
                    return Ok(alpha);
                }
            }
        }

        // Null-move pruning. Skipped in check, after a previous null move,
        // near the mate band, and in pawn endings where zugzwang rules.
        if depth >= 2
            && !in_check
            && position.last_move().is_some()
            && beta < VALUE_WIN
            && !is_late_endgame(&position, position.side_to_move())
        {
            if let Some(nulled) = position.make_null_move() {
                let new_depth = depth - 4;
                self.stack[height + 1].position = nulled;
                let score = if new_depth <= 0 {
                    -self.quiescence(ctx, -beta, -(beta - 1), 1, height + 1)?
                } else {
                    -self.alpha_beta(ctx, -beta, -(beta - 1), new_depth, height + 1)?
                };
                if score >= beta && score < VALUE_WIN {
                    return Ok(beta);
                }
            }
        }

        // Internal iterative deepening: a shallow search to seed the hash
        // move when the TT has nothing for an open-window node.
        if depth >= 4 && hash_move.is_none() && beta > alpha + PAWN_VALUE / 2 {
            self.alpha_beta(ctx, alpha, beta, depth - 2, height)?;
            hash_move = ctx.tt.read(&position).and_then(|entry| entry.best_move);
        }

        let mut ml = std::mem::take(&mut self.stack[height].move_list);
        position.generate_moves(&mut ml);
        self.sort_table.note(&position, &mut ml, hash_move, height);

        let mut quiets = std::mem::take(&mut self.stack[height].quiets);
        quiets.clear();

        let mut move_count = 0;
        let mut static_eval = VALUE_INFINITY;
        let mut best_move: Option<Move> = None;

        for i in 0..ml.len() {
            if i < SORT_MOVES_INDEX {
                move_to_top(&mut ml[i..]);
            } else if i == SORT_MOVES_INDEX {
                sort_moves(&mut ml[i..]);
            }
            let mv = ml[i].mv;

            let Some(child) = position.make_move(mv) else {
                continue;
            };
            move_count += 1;
            let child_in_check = child.is_check();
            self.stack[height + 1].position = child;

            let new_depth = self.new_depth(&position, depth, height);
            let mut reduction = 0;

            if !is_capture_or_promotion(&position, mv)
                && move_count > 1
                && !in_check
                && !child_in_check
                && ml[i].key < SORT_KEY_IMPORTANT
                && !is_pawn_advance(&position, mv)
                && alpha > VALUE_LOSS
            {
                if depth <= 1 {
                    if static_eval == VALUE_INFINITY {
                        static_eval = self.evaluator.evaluate(&position);
                    }
                    if static_eval + PAWN_VALUE * depth <= alpha {
                        continue;
                    }
                }

                if depth <= 2 && move_count >= 9 + 3 * depth {
                    continue;
                }

                if depth >= 3 {
                    reduction = late_move_reduction(depth, move_count);
                }
            }

            if !is_capture_or_promotion(&position, mv) {
                quiets.push(mv);
            }

            if reduction > 0 {
                let score =
                    -self.alpha_beta(ctx, -(alpha + 1), -alpha, depth - 1 - reduction, height + 1)?;
                if score <= alpha {
                    continue;
                }
            }

            let score = -self.alpha_beta(ctx, -beta, -alpha, new_depth, height + 1)?;

            if score > alpha {
                alpha = score;
                best_move = Some(mv);
                if alpha >= beta {
                    break;
                }
                self.assign_pv(height, mv);
            }
        }

        self.stack[height].move_list = ml;

        if move_count == 0 {
            self.stack[height].quiets = quiets;
            return Ok(if in_check {
                loss_in(height as i32)
            } else {
                VALUE_DRAW
            });
        }

        if let Some(best) = best_move {
            if !is_capture_or_promotion(&position, best) {
                self.sort_table
                    .update(&position, best, &quiets, depth, height);
            }
        }
        self.stack[height].quiets = quiets;

        let mut bound = 0;
        if best_move.is_some() {
            bound |= BOUND_LOWER;
        }
        if alpha < beta {
            bound |= BOUND_UPPER;
        }
        ctx.tt
            .update(&position, depth, value_to_tt(alpha, height), bound, best_move);

        Ok(alpha)
    }

    /// Capture (and early check) search that resolves tactics before the
    /// evaluation is trusted.
    pub fn quiescence(
        &mut self,
        ctx: &SearchContext<'_>,
        mut alpha: i32,
        beta: i32,
        depth: i32,
        height: usize,
    ) -> Result<i32, SearchCancelled> {
        self.stack[height].pv.clear();
        self.inc_nodes(ctx)?;

        if height >= MAX_HEIGHT {
            return Ok(VALUE_DRAW);
        }

        let position = self.stack[height].position.clone();
        let in_check = position.is_check();

        let mut eval = 0;
        if !in_check {
            eval = self.evaluator.evaluate(&position);
            if eval > alpha {
                alpha = eval;
            }
            if eval >= beta {
                return Ok(alpha);
            }
        }

        let mut ml = std::mem::take(&mut self.stack[height].move_list);
        if in_check {
            position.generate_moves(&mut ml);
        } else {
            position.generate_captures(&mut ml, depth > 0);
        }
        self.sort_table.note_qs(&position, &mut ml);
        sort_moves(&mut ml);

        let mut move_count = 0;
        for i in 0..ml.len() {
            let mv = ml[i].mv;
            let danger = is_danger_capture(&position, mv);
            if !in_check && !danger && !see_ge_zero(&position, mv) {
                continue;
            }
            let Some(child) = position.make_move(mv) else {
                continue;
            };
            move_count += 1;
            let child_in_check = child.is_check();

            // Delta pruning: the optimistic gain cannot lift this move
            // anywhere near alpha.
            if !in_check
                && !danger
                && !child_in_check
                && eval + move_value(&position, mv) + 2 * PAWN_VALUE <= alpha
            {
                continue;
            }

            self.stack[height + 1].position = child;
            let score = -self.quiescence(ctx, -beta, -alpha, depth - 1, height + 1)?;
            if score > alpha {
                alpha = score;
                if score >= beta {
                    break;
                }
                self.assign_pv(height, mv);
            }
        }

        self.stack[height].move_list = ml;

        if in_check && move_count == 0 {
            return Ok(loss_in(height as i32));
        }
        Ok(alpha)
    }

    /// Depth for the child at `height + 1`: extend recaptures, sound
    /// checks, and pawn pushes to the 7th, never beyond the parent depth.
    pub fn new_depth(&self, parent: &Position, depth: i32, height: usize) -> i32 {
        let child = &self.stack[height + 1].position;
        let Some(played) = child.last_move() else {
            return depth - 1;
        };
        let gives_check = child.is_check();

        if let Some(prev) = parent.last_move() {
            if prev.mv.to == played.mv.to
                && captured_above_pawn(played.captured)
                && captured_above_pawn(prev.captured)
                && see_ge_zero(parent, played.mv)
            {
                return depth;
            }
        }

        if gives_check && (depth <= 1 || see_ge_zero(parent, played.mv)) {
            return depth;
        }

        if is_pawn_push_7th(parent, played.mv) && see_ge_zero(parent, played.mv) {
            return depth;
        }

        depth - 1
    }

    /// Draw detection at `stack[height]`: insufficient material, the
    /// fifty-move rule, a repetition within the search stack, or two prior
    /// occurrences in the pre-search history.
    pub fn is_draw(&self, ctx: &SearchContext<'_>, height: usize) -> bool {
        let position = &self.stack[height].position;

        if (position.pawns() | position.rooks() | position.queens()).is_empty()
            && (position.knights() | position.bishops()).len() <= 1
        {
            return true;
        }

        if position.rule50() > 100 {
            return true;
        }

        let key = position.key();
        for i in (0..height).rev() {
            let earlier = &self.stack[i].position;
            if earlier.key() == key {
                return true;
            }
            // A capture, pawn move, or null move makes repetition with
            // anything before it impossible.
            if earlier.rule50() == 0 || earlier.last_move().is_none() {
                return false;
            }
        }

        ctx.history_keys.get(&key).copied().unwrap_or(0) >= 2
    }
}

fn captured_above_pawn(captured: Option<Piece>) -> bool {
    matches!(
        captured,
        Some(Piece::Knight) | Some(Piece::Bishop) | Some(Piece::Rook) | Some(Piece::Queen)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(
        tt: &'a TransTable,
        cancel: &'a CancelToken,
        history: &'a HashMap<u64, u32>,
        total: &'a AtomicU64,
    ) -> SearchContext<'a> {
        SearchContext {
            tt,
            cancel,
            history_keys: history,
            node_limit: None,
            total_nodes: total,
        }
    }

    fn search(fen: &str, depth: i32) -> (i32, Vec<Move>) {
        let tt = TransTable::new(1);
        let cancel = CancelToken::new();
        let history = HashMap::new();
        let total = AtomicU64::new(0);
        let ctx = context(&tt, &cancel, &history, &total);

        let mut thread = SearchThread::new();
        thread.prepare(&fen.parse().expect("valid FEN"));
        let score = thread
            .alpha_beta(&ctx, -VALUE_INFINITY, VALUE_INFINITY, depth, 0)
            .expect("no cancellation");
        (score, thread.stack[0].pv.moves().to_vec())
    }

    #[test]
    fn stalemate_scores_draw() {
        let (score, pv) = search("8/8/8/8/8/4k3/4p3/4K3 w - - 0 1", 4);
        assert_eq!(score, VALUE_DRAW);
        assert!(pv.is_empty());
    }

    #[test]
    fn back_rank_mate_in_one() {
        let (score, pv) = search("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1", 3);
        assert_eq!(score, win_in(1));
        assert_eq!(pv[0].to_string(), "a1a8");
    }

    #[test]
    fn mated_side_scores_loss_at_height_zero() {
        // Black is checkmated in the corner
        let (score, _) = search("7k/6Q1/5K2/8/8/8/8/8 b - - 0 1", 3);
        assert_eq!(score, loss_in(0));
    }

    #[test]
    fn insufficient_material_is_draw() {
        let (score, _) = search("k7/8/8/8/8/8/N7/K7 w - - 0 1", 6);
        assert_eq!(score, VALUE_DRAW);
    }

    #[test]
    fn rule50_exhaustion_is_draw() {
        // Every quiet continuation pushes the clock past 100 half-moves
        let (score, _) = search("k7/8/8/8/8/8/1R6/K7 w - - 100 80", 4);
        assert_eq!(score, VALUE_DRAW);
    }

    #[test]
    fn depth_zero_delegates_to_quiescence() {
        // A quiet position at depth 0 returns the stand-pat evaluation
        let tt = TransTable::new(1);
        let cancel = CancelToken::new();
        let history = HashMap::new();
        let total = AtomicU64::new(0);
        let ctx = context(&tt, &cancel, &history, &total);

        let mut thread = SearchThread::new();
        let position: Position = "4k3/4p3/8/8/8/8/4P3/4K3 w - - 0 1".parse().unwrap();
        thread.prepare(&position);
        let score = thread
            .alpha_beta(&ctx, -VALUE_INFINITY, VALUE_INFINITY, 0, 0)
            .unwrap();
        assert_eq!(score, thread.evaluator.evaluate(&position));
    }

    #[test]
    fn forced_reply_negates_score() {
        // White king h1 in check from the h3 queen: Kg1 is the only move
        let fen = "k7/8/8/8/8/7q/8/7K w - - 0 1";
        let (score_parent, pv) = search(fen, 3);
        assert_eq!(pv[0].to_string(), "h1g1");

        let parent: Position = fen.parse().unwrap();
        let child = parent.make_move("h1g1".parse().unwrap()).unwrap();

        let tt = TransTable::new(1);
        let cancel = CancelToken::new();
        let history = HashMap::new();
        let total = AtomicU64::new(0);
        let ctx = context(&tt, &cancel, &history, &total);
        let mut thread = SearchThread::new();
        thread.prepare(&child);
        let score_child = thread
            .alpha_beta(&ctx, -VALUE_INFINITY, VALUE_INFINITY, 2, 0)
            .unwrap();

        assert!(
            (score_parent + score_child).abs() <= 2,
            "forced reply should negate the score: {score_parent} vs {score_child}"
        );
    }

    #[test]
    fn repetition_inside_the_stack_is_draw() {
        let tt = TransTable::new(1);
        let cancel = CancelToken::new();
        let history = HashMap::new();
        let total = AtomicU64::new(0);
        let ctx = context(&tt, &cancel, &history, &total);

        let mut thread = SearchThread::new();
        let root: Position = "4k3/8/8/8/8/8/3R4/4K3 w - - 5 40".parse().unwrap();
        let p1 = root.make_move("d2c2".parse().unwrap()).unwrap();
        let p2 = p1.make_move("e8d8".parse().unwrap()).unwrap();
        let p3 = p2.make_move("c2d2".parse().unwrap()).unwrap();
        let p4 = p3.make_move("d8e8".parse().unwrap()).unwrap();
        thread.stack[0].position = root.clone();
        thread.stack[1].position = p1;
        thread.stack[2].position = p2;
        thread.stack[3].position = p3;
        thread.stack[4].position = p4;

        assert!(
            thread.is_draw(&ctx, 4),
            "position repeated at height 0 and 4 should be a draw"
        );
        assert!(!thread.is_draw(&ctx, 3));
    }

    #[test]
    fn history_keys_trigger_draw_detection() {
        let tt = TransTable::new(1);
        let cancel = CancelToken::new();
        let mut history = HashMap::new();
        let root: Position = "4k3/8/8/8/8/8/3R4/4K3 w - - 5 40".parse().unwrap();
        history.insert(root.key(), 2);
        let total = AtomicU64::new(0);
        let ctx = context(&tt, &cancel, &history, &total);

        let mut thread = SearchThread::new();
        thread.prepare(&root);
        assert!(thread.is_draw(&ctx, 0));
    }

    #[test]
    fn cancellation_unwinds_the_search() {
        let tt = TransTable::new(1);
        let cancel = CancelToken::new();
        cancel.cancel();
        let history = HashMap::new();
        let total = AtomicU64::new(0);
        let ctx = context(&tt, &cancel, &history, &total);

        let mut thread = SearchThread::new();
        thread.prepare(&Position::startpos());
        // Deep enough that the 256-node poll must fire
        let result = thread.alpha_beta(&ctx, -VALUE_INFINITY, VALUE_INFINITY, 6, 0);
        assert_eq!(result, Err(SearchCancelled));
    }

    #[test]
    fn node_limit_cancels_the_search() {
        let tt = TransTable::new(1);
        let cancel = CancelToken::new();
        let history = HashMap::new();
        let total = AtomicU64::new(0);
        let mut ctx = context(&tt, &cancel, &history, &total);
        ctx.node_limit = Some(512);

        let mut thread = SearchThread::new();
        thread.prepare(&Position::startpos());
        let result = thread.alpha_beta(&ctx, -VALUE_INFINITY, VALUE_INFINITY, 8, 0);
        assert_eq!(result, Err(SearchCancelled));
        assert!(cancel.is_cancelled());
    }
}
