//! Position wrapper over `cozy_chess` plus the classification predicates
//! used by search pruning and extensions.
//!
//! `cozy_chess` generates fully legal moves, so `make_move` only fails for
//! moves that did not come from the generator (e.g. a stale hash move).
//! Castling is encoded king-takes-own-rook; the capture predicates below
//! account for that.

use std::str::FromStr;

use cozy_chess::{Board, Color, Move, Piece, Rank};

use crate::moves::OrderedMove;

/// Centipawn value of a pawn; the unit of every pruning margin.
pub const PAWN_VALUE: i32 = 100;
/// Centipawn value of a knight.
pub const KNIGHT_VALUE: i32 = 400;
/// Centipawn value of a bishop.
pub const BISHOP_VALUE: i32 = 400;
/// Centipawn value of a rook.
pub const ROOK_VALUE: i32 = 600;
/// Centipawn value of a queen.
pub const QUEEN_VALUE: i32 = 1200;

/// Centipawn value of a piece kind (king excluded from exchanges).
pub fn piece_value(piece: Piece) -> i32 {
    match piece {
        Piece::Pawn => PAWN_VALUE,
        Piece::Knight => KNIGHT_VALUE,
        Piece::Bishop => BISHOP_VALUE,
        Piece::Rook => ROOK_VALUE,
        Piece::Queen => QUEEN_VALUE,
        Piece::King => 0,
    }
}

/// A FEN string that failed to parse.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid FEN \"{fen}\": {reason}")]
pub struct FenError {
    /// The offending FEN string.
    pub fen: String,
    /// Parser diagnostic.
    pub reason: String,
}

/// The move that produced a position, with its victim (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayedMove {
    /// The move as played.
    pub mv: Move,
    /// Piece captured by the move, `None` for quiet moves.
    pub captured: Option<Piece>,
}

/// A chess position: board state plus the move that led here.
///
/// The last move is `None` at the search root and after a null move, which
/// is exactly the condition the repetition scan and the null-move guard
/// test for.
#[derive(Debug, Clone)]
pub struct Position {
    board: Board,
    last_move: Option<PlayedMove>,
}

impl Position {
    /// The standard starting position.
    pub fn startpos() -> Self {
        Self {
            board: Board::default(),
            last_move: None,
        }
    }

    /// Borrow the underlying board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Zobrist key of the position.
    pub fn key(&self) -> u64 {
        self.board.hash()
    }

    /// Halfmove clock for the fifty-move rule.
    pub fn rule50(&self) -> u32 {
        u32::from(self.board.halfmove_clock())
    }

    /// Side to move.
    pub fn side_to_move(&self) -> Color {
        self.board.side_to_move()
    }

    /// Whether white is to move.
    pub fn white_to_move(&self) -> bool {
        self.board.side_to_move() == Color::White
    }

    /// The move that produced this position, `None` at the root or after a
    /// null move.
    pub fn last_move(&self) -> Option<PlayedMove> {
        self.last_move
    }

    /// Whether the side to move is in check.
    pub fn is_check(&self) -> bool {
        !self.board.checkers().is_empty()
    }

    /// All pawns of both sides.
    pub fn pawns(&self) -> cozy_chess::BitBoard {
        self.board.pieces(Piece::Pawn)
    }

    /// All knights of both sides.
    pub fn knights(&self) -> cozy_chess::BitBoard {
        self.board.pieces(Piece::Knight)
    }

    /// All bishops of both sides.
    pub fn bishops(&self) -> cozy_chess::BitBoard {
        self.board.pieces(Piece::Bishop)
    }

    /// All rooks of both sides.
    pub fn rooks(&self) -> cozy_chess::BitBoard {
        self.board.pieces(Piece::Rook)
    }

    /// All queens of both sides.
    pub fn queens(&self) -> cozy_chess::BitBoard {
        self.board.pieces(Piece::Queen)
    }

    /// Play `mv`, returning the child position or `None` if the move is not
    /// legal here (possible only for moves that bypassed the generator).
    pub fn make_move(&self, mv: Move) -> Option<Position> {
        let captured = captured_piece(self, mv);
        let mut board = self.board.clone();
        board.try_play(mv).ok()?;
        Some(Position {
            board,
            last_move: Some(PlayedMove { mv, captured }),
        })
    }

    /// Pass the turn. Returns `None` when the side to move is in check.
    pub fn make_null_move(&self) -> Option<Position> {
        let board = self.board.null_move()?;
        Some(Position {
            board,
            last_move: None,
        })
    }

    /// Generate all legal moves into `buf` (cleared first).
    pub fn generate_moves(&self, buf: &mut Vec<OrderedMove>) {
        buf.clear();
        self.board.generate_moves(|piece_moves| {
            for mv in piece_moves {
                buf.push(OrderedMove::new(mv));
            }
            false
        });
    }

    /// Generate captures and promotions into `buf` (cleared first); when
    /// `include_checks` is set, quiet checking moves are included as well.
    pub fn generate_captures(&self, buf: &mut Vec<OrderedMove>, include_checks: bool) {
        buf.clear();
        self.board.generate_moves(|piece_moves| {
            for mv in piece_moves {
                if is_capture_or_promotion(self, mv) {
                    buf.push(OrderedMove::new(mv));
                } else if include_checks && self.gives_check(mv) {
                    buf.push(OrderedMove::new(mv));
                }
            }
            false
        });
    }

    /// Whether playing `mv` leaves the opponent in check.
    pub fn gives_check(&self, mv: Move) -> bool {
        let mut board = self.board.clone();
        board.play_unchecked(mv);
        !board.checkers().is_empty()
    }
}

impl FromStr for Position {
    type Err = FenError;

    fn from_str(fen: &str) -> Result<Self, Self::Err> {
        let board = Board::from_fen(fen, false).map_err(|e| FenError {
            fen: fen.to_string(),
            reason: format!("{e:?}"),
        })?;
        Ok(Position {
            board,
            last_move: None,
        })
    }
}

/// Whether `mv` captures an enemy piece (including en passant).
///
/// Castling moves land on a friendly rook square and are not captures.
pub fn is_capture(p: &Position, mv: Move) -> bool {
    let enemy = p.board().colors(!p.side_to_move());
    enemy.has(mv.to) || is_en_passant(p, mv)
}

/// Whether `mv` is an en passant capture: a pawn changing file onto an
/// empty square.
pub fn is_en_passant(p: &Position, mv: Move) -> bool {
    p.board().piece_on(mv.from) == Some(Piece::Pawn)
        && mv.from.file() != mv.to.file()
        && p.board().piece_on(mv.to).is_none()
}

/// Whether `mv` is a capture or a promotion.
pub fn is_capture_or_promotion(p: &Position, mv: Move) -> bool {
    mv.promotion.is_some() || is_capture(p, mv)
}

/// The piece `mv` captures, `None` for quiet moves.
pub fn captured_piece(p: &Position, mv: Move) -> Option<Piece> {
    if is_en_passant(p, mv) {
        return Some(Piece::Pawn);
    }
    let enemy = p.board().colors(!p.side_to_move());
    if enemy.has(mv.to) {
        p.board().piece_on(mv.to)
    } else {
        None
    }
}

/// Whether `mv` is a pawn advancing to the 6th or 7th rank of the moving
/// side. Such moves are exempt from late-move pruning and reduction.
pub fn is_pawn_advance(p: &Position, mv: Move) -> bool {
    if p.board().piece_on(mv.from) != Some(Piece::Pawn) {
        return false;
    }
    let rank = mv.to.rank().relative_to(p.side_to_move());
    rank >= Rank::Sixth
}

/// Whether `mv` pushes a pawn to the 7th rank of the moving side.
pub fn is_pawn_push_7th(p: &Position, mv: Move) -> bool {
    p.board().piece_on(mv.from) == Some(Piece::Pawn)
        && mv.to.rank().relative_to(p.side_to_move()) == Rank::Seventh
}

/// Whether `mv` is a capture too dangerous to prune: its victim is a pawn
/// within two steps of promotion.
pub fn is_danger_capture(p: &Position, mv: Move) -> bool {
    if captured_piece(p, mv) != Some(Piece::Pawn) {
        return false;
    }
    let victim_rank = mv.to.rank().relative_to(!p.side_to_move());
    victim_rank >= Rank::Sixth
}

/// Whether `side` has no pieces left besides king and pawns. Null-move
/// pruning is unsound in such endgames because zugzwang is common.
pub fn is_late_endgame(p: &Position, side: Color) -> bool {
    let own = p.board().colors(side);
    let pieces = p.knights() | p.bishops() | p.rooks() | p.queens();
    (own & pieces).is_empty()
}

/// Optimistic material gain of `mv`: victim value plus promotion upgrade.
pub fn move_value(p: &Position, mv: Move) -> i32 {
    let mut value = captured_piece(p, mv).map_or(0, piece_value);
    if let Some(promo) = mv.promotion {
        value += piece_value(promo) - PAWN_VALUE;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(fen: &str) -> Position {
        fen.parse().expect("valid FEN")
    }

    fn mv(s: &str) -> Move {
        s.parse().expect("valid move")
    }

    #[test]
    fn startpos_has_twenty_moves() {
        let p = Position::startpos();
        let mut buf = Vec::new();
        p.generate_moves(&mut buf);
        assert_eq!(buf.len(), 20);
    }

    #[test]
    fn make_move_rejects_illegal() {
        let p = Position::startpos();
        assert!(p.make_move(mv("e2e5")).is_none());
        assert!(p.make_move(mv("e2e4")).is_some());
    }

    #[test]
    fn make_move_records_victim() {
        let p = pos("4k3/8/8/3n4/4P3/8/8/4K3 w - - 0 1");
        let child = p.make_move(mv("e4d5")).unwrap();
        let played = child.last_move().unwrap();
        assert_eq!(played.captured, Some(Piece::Knight));
    }

    #[test]
    fn null_move_clears_last_move() {
        let p = Position::startpos();
        let after = p.make_move(mv("e2e4")).unwrap();
        assert!(after.last_move().is_some());
        let nulled = after.make_null_move().unwrap();
        assert!(nulled.last_move().is_none());
    }

    #[test]
    fn null_move_refused_in_check() {
        let p = pos("4k3/8/8/8/8/8/4r3/4K3 w - - 0 1");
        assert!(p.is_check());
        assert!(p.make_null_move().is_none());
    }

    #[test]
    fn en_passant_is_capture() {
        let p = pos("rnbqkbnr/ppp1pppp/8/3pP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 3");
        let ep = mv("e5d6");
        assert!(is_en_passant(&p, ep));
        assert!(is_capture(&p, ep));
        assert_eq!(captured_piece(&p, ep), Some(Piece::Pawn));
    }

    #[test]
    fn castling_is_not_a_capture() {
        let p = pos("r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w KQkq - 0 1");
        // cozy_chess encodes castling as king takes own rook
        let castle = mv("e1h1");
        assert!(!is_capture(&p, castle));
        assert!(!is_capture_or_promotion(&p, castle));
    }

    #[test]
    fn pawn_advance_classification() {
        let p = pos("4k3/8/8/4P3/8/8/6P1/4K3 w - - 0 1");
        assert!(is_pawn_advance(&p, mv("e5e6")));
        assert!(!is_pawn_advance(&p, mv("g2g3")));
        assert!(!is_pawn_push_7th(&p, mv("e5e6")));

        let p7 = pos("4k3/8/4P3/8/8/8/8/4K3 w - - 0 1");
        assert!(is_pawn_push_7th(&p7, mv("e6e7")));
    }

    #[test]
    fn danger_capture_near_promotion() {
        // Black pawn on e3 is two steps from promoting (relative rank 6)
        let p = pos("4k3/8/8/8/3B4/4p3/8/4K3 w - - 0 1");
        assert!(is_danger_capture(&p, mv("d4e3")));

        // Victim pawn far from promotion is not dangerous
        let far = pos("4k3/8/4p3/3B4/8/8/8/4K3 w - - 0 1");
        assert!(!is_danger_capture(&far, mv("d5e6")));
    }

    #[test]
    fn late_endgame_is_king_and_pawns() {
        let p = pos("4k3/4p3/8/8/8/8/4P3/4K3 w - - 0 1");
        assert!(is_late_endgame(&p, Color::White));
        let q = pos("4k3/4p3/8/8/8/8/4P3/3QK3 w - - 0 1");
        assert!(!is_late_endgame(&q, Color::White));
        assert!(is_late_endgame(&q, Color::Black));
    }

    #[test]
    fn move_value_counts_promotion_upgrade() {
        let p = pos("3r4/4P3/8/8/8/8/8/k3K3 w - - 0 1");
        // exd8=Q: rook victim plus queen-for-pawn upgrade
        let capture_promo = mv("e7d8q");
        assert_eq!(
            move_value(&p, capture_promo),
            ROOK_VALUE + QUEEN_VALUE - PAWN_VALUE
        );
    }

    #[test]
    fn quiet_check_generation() {
        // White rook a1, black king e8: Ra8+ is a quiet check along the back rank.
        let p = pos("4k3/8/8/8/8/8/8/R3K3 w Q - 0 1");
        let mut buf = Vec::new();
        p.generate_captures(&mut buf, true);
        assert!(
            buf.iter().any(|om| om.mv == mv("a1a8")),
            "quiet checking rook move should be generated"
        );
        let mut no_checks = Vec::new();
        p.generate_captures(&mut no_checks, false);
        assert!(no_checks.iter().all(|om| om.mv != mv("a1a8")));
    }
}
