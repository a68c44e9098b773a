//! Position evaluation driven by a flat, tunable weight vector.
//!
//! The terms are deliberately small: material, a centralization bonus per
//! piece kind, pawn advancement, and tempo. What matters to the search and
//! the tuner is the contract: a pure centipawn score from the side to
//! move's perspective, and a weight vector that can be read and installed
//! wholesale.

use cozy_chess::{Color, Piece, Rank, Square};
use sable_core::{Position, BISHOP_VALUE, KNIGHT_VALUE, PAWN_VALUE, QUEEN_VALUE, ROOK_VALUE};

/// Number of tunable weights.
pub const WEIGHT_COUNT: usize = 13;

const MATERIAL: std::ops::Range<usize> = 0..5;
const CENTRALITY: std::ops::Range<usize> = 5..11;
const PAWN_ADVANCE: usize = 11;
const TEMPO: usize = 12;

/// Default weights: classical material plus small positional nudges.
pub const DEFAULT_WEIGHTS: [i32; WEIGHT_COUNT] = [
    // material: P N B R Q
    PAWN_VALUE,
    KNIGHT_VALUE,
    BISHOP_VALUE,
    ROOK_VALUE,
    QUEEN_VALUE,
    // centrality: P N B R Q K
    2,
    8,
    6,
    2,
    4,
    -6,
    // pawn advancement per rank beyond the second
    5,
    // tempo
    10,
];

const PIECES: [Piece; 6] = [
    Piece::Pawn,
    Piece::Knight,
    Piece::Bishop,
    Piece::Rook,
    Piece::Queen,
    Piece::King,
];

/// 3 minus Chebyshev distance to the board center, per square (0..=3).
fn centrality(sq: Square) -> i32 {
    let file = sq.file() as i32;
    let rank = sq.rank() as i32;
    let df = (2 * file - 7).abs() / 2;
    let dr = (2 * rank - 7).abs() / 2;
    3 - df.max(dr)
}

/// Tunable evaluator. Each search thread and tuner worker owns one.
#[derive(Debug, Clone)]
pub struct Eval {
    weights: [i32; WEIGHT_COUNT],
}

impl Eval {
    /// Evaluator with the default weight vector.
    pub fn new() -> Self {
        Self {
            weights: DEFAULT_WEIGHTS,
        }
    }

    /// Current weight vector.
    pub fn weights(&self) -> Vec<i32> {
        self.weights.to_vec()
    }

    /// Install a weight vector. Installing the same vector twice is a
    /// no-op; slices of the wrong length are ignored.
    pub fn set_weights(&mut self, weights: &[i32]) {
        if weights.len() == WEIGHT_COUNT {
            self.weights.copy_from_slice(weights);
        }
    }

    /// Centipawn score of `p` from the side to move's perspective.
    pub fn evaluate(&self, p: &Position) -> i32 {
        let board = p.board();
        let mut white = 0i32;
        let mut black = 0i32;

        for (index, &piece) in PIECES.iter().enumerate() {
            let material = if piece == Piece::King {
                0
            } else {
                self.weights[MATERIAL][index]
            };
            let center_weight = self.weights[CENTRALITY][index];

            for sq in board.pieces(piece) & board.colors(Color::White) {
                white += material + center_weight * centrality(sq);
                if piece == Piece::Pawn {
                    white += self.weights[PAWN_ADVANCE] * pawn_progress(sq, Color::White);
                }
            }
            for sq in board.pieces(piece) & board.colors(Color::Black) {
                black += material + center_weight * centrality(sq);
                if piece == Piece::Pawn {
                    black += self.weights[PAWN_ADVANCE] * pawn_progress(sq, Color::Black);
                }
            }
        }

        let score = white - black;
        let stm = if p.white_to_move() { score } else { -score };
        stm + self.weights[TEMPO]
    }
}

impl Default for Eval {
    fn default() -> Self {
        Self::new()
    }
}

/// Ranks a pawn has advanced beyond its starting rank.
fn pawn_progress(sq: Square, color: Color) -> i32 {
    let rank = sq.rank().relative_to(color) as i32;
    (rank - Rank::Second as i32).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(fen: &str) -> Position {
        fen.parse().expect("valid FEN")
    }

    #[test]
    fn startpos_is_tempo_for_either_side() {
        let eval = Eval::new();
        let start = Position::startpos();
        assert_eq!(eval.evaluate(&start), DEFAULT_WEIGHTS[TEMPO]);

        let black_to_move = pos("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR b KQkq - 0 1");
        assert_eq!(eval.evaluate(&black_to_move), DEFAULT_WEIGHTS[TEMPO]);
    }

    #[test]
    fn material_advantage_flips_with_side_to_move() {
        let eval = Eval::new();
        let white_up = pos("4k3/8/8/8/8/8/8/3QK3 w - - 0 1");
        let white_up_black_to_move = pos("4k3/8/8/8/8/8/8/3QK3 b - - 0 1");
        let from_white = eval.evaluate(&white_up);
        let from_black = eval.evaluate(&white_up_black_to_move);
        assert!(from_white > 0);
        assert!(from_black < 0);
        // Perspectives differ only by the two tempo terms
        assert_eq!(from_white + from_black, 2 * DEFAULT_WEIGHTS[TEMPO]);
    }

    #[test]
    fn centrality_peaks_in_the_middle() {
        assert_eq!(centrality(Square::E4), 3);
        assert_eq!(centrality(Square::D5), 3);
        assert_eq!(centrality(Square::A1), 0);
        assert_eq!(centrality(Square::H8), 0);
        assert_eq!(centrality(Square::B2), 1);
    }

    #[test]
    fn weights_roundtrip_through_the_tuning_hook() {
        let mut eval = Eval::new();
        let mut weights = eval.weights();
        weights[0] = 123;
        eval.set_weights(&weights);
        assert_eq!(eval.weights(), weights);
        // Installing again is idempotent
        eval.set_weights(&weights);
        assert_eq!(eval.weights(), weights);
    }

    #[test]
    fn wrong_length_weight_vector_is_ignored() {
        let mut eval = Eval::new();
        let before = eval.weights();
        eval.set_weights(&[1, 2, 3]);
        assert_eq!(eval.weights(), before);
    }

    #[test]
    fn evaluation_responds_to_weight_changes() {
        let p = pos("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1");
        let mut eval = Eval::new();
        let base = eval.evaluate(&p);
        let mut weights = eval.weights();
        weights[0] += 50;
        eval.set_weights(&weights);
        assert_eq!(eval.evaluate(&p), base + 50);
    }
}
