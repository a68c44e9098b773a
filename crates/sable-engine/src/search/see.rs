//! Static Exchange Evaluation (SEE).
//!
//! Estimates the material outcome of the capture sequence on a move's
//! destination square, each side always recapturing with its least valuable
//! attacker and free to stop when continuing loses material.

use cozy_chess::{
    get_bishop_moves, get_king_moves, get_knight_moves, get_pawn_attacks, get_rook_moves, BitBoard,
    Color, Move, Piece, Square,
};
use sable_core::{is_en_passant, piece_value, Position};

const KING_VALUE: i32 = 20_000;

fn see_value(piece: Piece) -> i32 {
    if piece == Piece::King {
        KING_VALUE
    } else {
        piece_value(piece)
    }
}

/// All pieces of both sides attacking `sq` under occupancy `occ`. Sliding
/// attacks use `occ` so removed pieces reveal X-ray attackers.
fn attackers_of(p: &Position, sq: Square, occ: BitBoard) -> BitBoard {
    let board = p.board();
    let knights = get_knight_moves(sq) & board.pieces(Piece::Knight);
    let kings = get_king_moves(sq) & board.pieces(Piece::King);
    let rook_like =
        get_rook_moves(sq, occ) & (board.pieces(Piece::Rook) | board.pieces(Piece::Queen));
    let bishop_like =
        get_bishop_moves(sq, occ) & (board.pieces(Piece::Bishop) | board.pieces(Piece::Queen));
    let white_pawns = get_pawn_attacks(sq, Color::Black)
        & board.pieces(Piece::Pawn)
        & board.colors(Color::White);
    let black_pawns = get_pawn_attacks(sq, Color::White)
        & board.pieces(Piece::Pawn)
        & board.colors(Color::Black);

    knights | kings | rook_like | bishop_like | white_pawns | black_pawns
}

/// Least valuable attacker of `side` within `attackers`.
fn least_valuable_attacker(
    p: &Position,
    attackers: BitBoard,
    side: Color,
) -> Option<(Square, Piece)> {
    let board = p.board();
    let side_bb = board.colors(side);
    for &kind in &[
        Piece::Pawn,
        Piece::Knight,
        Piece::Bishop,
        Piece::Rook,
        Piece::Queen,
        Piece::King,
    ] {
        let candidates = attackers & side_bb & board.pieces(kind);
        if let Some(sq) = candidates.into_iter().next() {
            return Some((sq, kind));
        }
    }
    None
}

/// Material gain of `mv` from the moving side's perspective after all
/// profitable recaptures on the destination square.
pub fn see(p: &Position, mv: Move) -> i32 {
    let board = p.board();
    let src = mv.from;
    let dst = mv.to;
    let mut occ = board.occupied();

    let attacker_kind = board.piece_on(src).unwrap_or(Piece::Pawn);
    let en_passant = is_en_passant(p, mv);

    let victim_value = if en_passant {
        see_value(Piece::Pawn)
    } else if let Some(victim) = board.piece_on(dst) {
        see_value(victim)
    } else {
        0
    };

    // A promoting pawn turns into the promoted piece before any recapture.
    let attacker_value = match mv.promotion {
        Some(promo) => see_value(promo),
        None => see_value(attacker_kind),
    };

    occ ^= src.bitboard();
    if en_passant {
        // The captured pawn stands beside the destination, not on it.
        let captured_idx = if p.side_to_move() == Color::White {
            (dst as usize).wrapping_sub(8)
        } else {
            dst as usize + 8
        };
        if let Some(ep_sq) = Square::try_index(captured_idx) {
            occ &= !ep_sq.bitboard();
        }
    }

    let mut gain = [0i32; 32];
    let mut depth = 0usize;
    gain[0] = victim_value;

    let mut next_victim_value = attacker_value;
    let mut side = !p.side_to_move();

    let mut attackers = attackers_of(p, dst, occ) & occ;

    loop {
        let Some((sq, kind)) = least_valuable_attacker(p, attackers, side) else {
            break;
        };

        depth += 1;
        if depth >= 32 {
            break;
        }

        gain[depth] = next_victim_value - gain[depth - 1];
        next_victim_value = see_value(kind);
        occ ^= sq.bitboard();

        // Removing a piece can unblock a slider behind it.
        if matches!(kind, Piece::Pawn | Piece::Bishop | Piece::Queen) {
            attackers |= get_bishop_moves(dst, occ)
                & (p.board().pieces(Piece::Bishop) | p.board().pieces(Piece::Queen));
        }
        if matches!(kind, Piece::Rook | Piece::Queen) {
            attackers |= get_rook_moves(dst, occ)
                & (p.board().pieces(Piece::Rook) | p.board().pieces(Piece::Queen));
        }
        attackers &= occ;

        side = !side;
    }

    // Each side may decline to recapture when continuing is unfavourable.
    while depth > 0 {
        depth -= 1;
        gain[depth] = -((-gain[depth]).max(gain[depth + 1]));
    }

    gain[0]
}

/// Whether the exchange on `mv`'s destination does not lose material.
pub fn see_ge_zero(p: &Position, mv: Move) -> bool {
    see(p, mv) >= 0
}
