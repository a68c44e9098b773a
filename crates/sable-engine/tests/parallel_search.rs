//! Integration tests for the parallel root driver.
//!
//! Covers correctness across thread counts, PV legality, cancellation, and
//! the node ceiling.

use sable_core::Position;
use sable_engine::{CancelToken, Engine, Limits, SearchInfo, SearchParams, UciScore};

const STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

const BACK_RANK_MATE_FEN: &str = "6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1";

const SICILIAN_FEN: &str = "rnbqkbnr/pp1ppppp/8/2p5/4P3/8/PPPP1PPP/RNBQKBNR w KQkq c6 0 2";

fn search_with_threads(fen: &str, depth: i32, threads: usize) -> SearchInfo {
    let mut engine = Engine::new();
    engine.options.threads = threads;
    let params = SearchParams {
        positions: vec![fen.parse().expect("valid FEN")],
        limits: Limits {
            depth: Some(depth),
            ..Limits::default()
        },
    };
    engine.search(&params, CancelToken::new(), |_| {})
}

/// Every PV move must be legal in the position reached by the prefix.
fn assert_pv_legal(fen: &str, info: &SearchInfo) {
    let mut position: Position = fen.parse().expect("valid FEN");
    for (i, mv) in info.main_line.iter().enumerate() {
        match position.make_move(*mv) {
            Some(next) => position = next,
            None => panic!("PV move {mv} at index {i} is illegal"),
        }
    }
}

// ── Correctness across thread counts ─────────────────────────────────────────

#[test]
fn startpos_depth_6_single_thread() {
    let info = search_with_threads(STARTPOS_FEN, 6, 1);
    assert_eq!(info.depth, 6);
    assert!(!info.main_line.is_empty());
    assert_pv_legal(STARTPOS_FEN, &info);
}

#[test]
fn startpos_depth_6_four_threads() {
    let info = search_with_threads(STARTPOS_FEN, 6, 4);
    assert_eq!(info.depth, 6);
    assert!(!info.main_line.is_empty());
    assert_pv_legal(STARTPOS_FEN, &info);
}

#[test]
fn mate_in_one_found_by_all_thread_counts() {
    for threads in [1, 2, 4] {
        let info = search_with_threads(BACK_RANK_MATE_FEN, 4, threads);
        assert_eq!(
            info.main_line[0].to_string(),
            "a1a8",
            "{threads}-thread search should find the back-rank mate"
        );
        assert_eq!(info.score, UciScore::Mate(1));
    }
}

#[test]
fn middlegame_pv_is_legal_with_four_threads() {
    let info = search_with_threads(SICILIAN_FEN, 5, 4);
    assert!(!info.main_line.is_empty());
    assert_pv_legal(SICILIAN_FEN, &info);
}

#[test]
fn node_counts_are_aggregated() {
    let single = search_with_threads(STARTPOS_FEN, 5, 1);
    let quad = search_with_threads(STARTPOS_FEN, 5, 4);
    assert!(single.nodes > 0);
    assert!(quad.nodes > 0);
}

// ── Terminal positions ───────────────────────────────────────────────────────

#[test]
fn stalemate_has_no_main_line() {
    let info = search_with_threads("8/8/8/8/8/4k3/4p3/4K3 w - - 0 1", 4, 2);
    assert!(info.main_line.is_empty());
    assert_eq!(info.score, UciScore::Centipawns(0));
}

#[test]
fn forced_move_skips_the_search() {
    let info = search_with_threads("k7/8/8/8/8/7q/8/7K w - - 0 1", 20, 2);
    assert_eq!(info.depth, 0);
    assert_eq!(info.nodes, 0);
    assert_eq!(info.main_line.len(), 1);
}

// ── Mirrored evaluation symmetry ─────────────────────────────────────────────

#[test]
fn color_mirrored_positions_score_opposite() {
    // The same pawn structure with colors and side to move flipped: the
    // scores must agree (each side sees the identical game).
    let white_view = "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1";
    let black_view = "4k3/4p3/8/8/8/8/8/4K3 b - - 0 1";
    let a = search_with_threads(white_view, 4, 1);
    let b = search_with_threads(black_view, 4, 1);
    let (UciScore::Centipawns(sa), UciScore::Centipawns(sb)) = (a.score, b.score) else {
        panic!("unexpected mate score in pawn ending");
    };
    assert!(
        (sa - sb).abs() <= 2,
        "mirrored positions should score alike: {sa} vs {sb}"
    );
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[test]
fn early_cancellation_still_returns_a_line() {
    let mut engine = Engine::new();
    engine.options.threads = 2;
    let params = SearchParams {
        positions: vec![STARTPOS_FEN.parse().expect("valid FEN")],
        limits: Limits {
            depth: Some(20),
            ..Limits::default()
        },
    };

    let cancel = CancelToken::new();
    let canceller = cancel.clone();
    let timer = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(10));
        canceller.cancel();
    });

    let info = engine.search(&params, cancel, |_| {});
    timer.join().unwrap();

    assert!(
        info.depth >= 1,
        "10 ms into a depth-20 search at least depth 1 must be complete"
    );
    assert!(!info.main_line.is_empty());
    assert_pv_legal(STARTPOS_FEN, &info);
}

#[test]
fn hard_move_time_stops_the_search() {
    let mut engine = Engine::new();
    let params = SearchParams {
        positions: vec![STARTPOS_FEN.parse().expect("valid FEN")],
        limits: Limits {
            move_time: 60,
            ..Limits::default()
        },
    };
    let start = std::time::Instant::now();
    let info = engine.search(&params, CancelToken::new(), |_| {});
    assert!(
        start.elapsed() < std::time::Duration::from_secs(5),
        "hard deadline should have stopped the search"
    );
    assert!(info.depth >= 1);
}

#[test]
fn node_ceiling_bounds_the_search() {
    let mut engine = Engine::new();
    let params = SearchParams {
        positions: vec![STARTPOS_FEN.parse().expect("valid FEN")],
        limits: Limits {
            depth: Some(30),
            nodes: Some(20_000),
            ..Limits::default()
        },
    };
    let info = engine.search(&params, CancelToken::new(), |_| {});
    assert!(
        info.nodes < 200_000,
        "node ceiling should bound the search, saw {}",
        info.nodes
    );
    assert!(info.depth >= 1);
}

// ── Warm-table reuse ─────────────────────────────────────────────────────────

#[test]
fn repeated_search_with_warm_tables_stays_legal() {
    let mut engine = Engine::new();
    engine.options.threads = 2;
    let params = SearchParams {
        positions: vec![SICILIAN_FEN.parse().expect("valid FEN")],
        limits: Limits {
            depth: Some(5),
            ..Limits::default()
        },
    };
    let first = engine.search(&params, CancelToken::new(), |_| {});
    let second = engine.search(&params, CancelToken::new(), |_| {});
    assert_pv_legal(SICILIAN_FEN, &first);
    assert_pv_legal(SICILIAN_FEN, &second);
    assert_eq!(second.depth, 5);
}
