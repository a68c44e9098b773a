//! Parallel alpha-beta search engine: iterative deepening over a
//! principal-variation root split, a shared transposition table, and a
//! tunable evaluator.

pub mod eval;
pub mod search;
pub mod time;

pub use eval::{Eval, DEFAULT_WEIGHTS, WEIGHT_COUNT};
pub use search::control::CancelToken;
pub use search::score::{UciScore, MAX_HEIGHT};
pub use search::{Engine, Options, SearchInfo, SearchParams};
pub use time::{Limits, TimeManager};
