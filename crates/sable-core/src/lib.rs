//! Board primitives for the sable engine: position wrapper, ordered moves,
//! and the move-classification predicates the search relies on.

mod moves;
mod position;

pub use cozy_chess::{BitBoard, Board, Color, File, Move, Piece, Rank, Square};
pub use moves::{pack_move, unpack_move, OrderedMove, MAX_MOVES};
pub use position::{
    captured_piece, is_capture, is_capture_or_promotion, is_danger_capture, is_en_passant,
    is_late_endgame, is_pawn_advance, is_pawn_push_7th, move_value, piece_value, FenError,
    PlayedMove, Position, BISHOP_VALUE, KNIGHT_VALUE, PAWN_VALUE, QUEEN_VALUE, ROOK_VALUE,
};
