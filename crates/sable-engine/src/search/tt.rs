//! Shared transposition table.
//!
//! Entries are two atomic words: the position key XOR-folded with the data
//! word, and the data word itself. A reader recomputes the XOR and rejects
//! the entry unless it matches, so a torn write can never validate. No
//! locks; all threads read and write the same table during search.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use sable_core::{pack_move, unpack_move, Move, Position};

/// Bound bits stored with a TT score. `LOWER` means the score failed high,
/// `UPPER` that no move improved alpha; both bits set means exact.
pub const BOUND_LOWER: u8 = 0b01;
/// See [`BOUND_LOWER`].
pub const BOUND_UPPER: u8 = 0b10;
/// Both bound bits: the stored score is exact.
pub const BOUND_EXACT: u8 = BOUND_LOWER | BOUND_UPPER;

/// A decoded TT probe hit.
#[derive(Debug, Clone, Copy)]
pub struct TtEntry {
    /// Remaining depth of the stored search.
    pub depth: i32,
    /// Stored score, still in TT-normalized form.
    pub score: i32,
    /// Bound bits ([`BOUND_LOWER`] / [`BOUND_UPPER`]).
    pub bound: u8,
    /// Best move of the stored search, if any.
    pub best_move: Option<Move>,
}

/// Data word layout: move(16) | depth(8) | bound(2) | generation(6) | score(16).
fn pack_data(mv: Option<Move>, depth: i32, bound: u8, generation: u8, score: i32) -> u64 {
    let mv_bits = u64::from(mv.map_or(0, pack_move));
    let depth_bits = u64::from(depth.clamp(0, 255) as u8) << 16;
    let bound_bits = u64::from(bound & 0x3) << 24;
    let gen_bits = u64::from(generation & 0x3F) << 26;
    let score_bits = u64::from(score as i16 as u16) << 32;
    mv_bits | depth_bits | bound_bits | gen_bits | score_bits
}

fn data_move(data: u64) -> Option<Move> {
    unpack_move((data & 0xFFFF) as u16)
}

fn data_depth(data: u64) -> i32 {
    ((data >> 16) & 0xFF) as i32
}

fn data_bound(data: u64) -> u8 {
    ((data >> 24) & 0x3) as u8
}

fn data_generation(data: u64) -> u8 {
    ((data >> 26) & 0x3F) as u8
}

fn data_score(data: u64) -> i32 {
    i32::from((data >> 32) as u16 as i16)
}

struct Slot {
    key: AtomicU64,
    data: AtomicU64,
}

/// Fixed-size shared transposition table with generational replacement.
pub struct TransTable {
    slots: Box<[Slot]>,
    mask: usize,
    megabytes: usize,
    generation: AtomicU8,
}

impl TransTable {
    /// Allocate a table of roughly `megabytes` MB (entry count rounded down
    /// to a power of two).
    pub fn new(megabytes: usize) -> Self {
        let bytes = megabytes.max(1) * 1024 * 1024;
        let entry_size = std::mem::size_of::<Slot>();
        let count = ((bytes / entry_size).next_power_of_two() >> 1).max(1);
        let slots = (0..count)
            .map(|_| Slot {
                key: AtomicU64::new(0),
                data: AtomicU64::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: count - 1,
            megabytes,
            generation: AtomicU8::new(0),
        }
    }

    /// Configured size in megabytes.
    pub fn megabytes(&self) -> usize {
        self.megabytes
    }

    /// Advance the generation counter. Called once per search so replacement
    /// prefers entries from the search in progress.
    pub fn prepare_new_search(&self) {
        let generation = self.generation.load(Ordering::Relaxed);
        self.generation
            .store(generation.wrapping_add(1) & 0x3F, Ordering::Relaxed);
    }

    /// Erase every entry.
    pub fn clear(&self) {
        for slot in self.slots.iter() {
            slot.key.store(0, Ordering::Relaxed);
            slot.data.store(0, Ordering::Relaxed);
        }
        self.generation.store(0, Ordering::Relaxed);
    }

    /// Probe for `p`. The score is returned still TT-normalized; callers
    /// rebase it with `value_from_tt`. The move is only a hint and is
    /// revalidated by move generation.
    pub fn read(&self, p: &Position) -> Option<TtEntry> {
        let key = p.key();
        let slot = &self.slots[(key as usize) & self.mask];
        let stored_key = slot.key.load(Ordering::Relaxed);
        let data = slot.data.load(Ordering::Relaxed);
        if data == 0 || stored_key ^ data != key {
            return None;
        }
        Some(TtEntry {
            depth: data_depth(data),
            score: data_score(data),
            bound: data_bound(data),
            best_move: data_move(data),
        })
    }

    /// Store a result for `p`. The entry written during the current
    /// generation wins collisions; within a generation, deeper searches win.
    pub fn update(&self, p: &Position, depth: i32, score: i32, bound: u8, best_move: Option<Move>) {
        let key = p.key();
        let slot = &self.slots[(key as usize) & self.mask];
        let generation = self.generation.load(Ordering::Relaxed);

        let old_data = slot.data.load(Ordering::Relaxed);
        if old_data != 0
            && data_generation(old_data) == generation
            && data_depth(old_data) > depth
            && slot.key.load(Ordering::Relaxed) ^ old_data != key
        {
            return;
        }

        let data = pack_data(best_move, depth, bound, generation, score);
        slot.key.store(key ^ data, Ordering::Relaxed);
        slot.data.store(data, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for TransTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransTable")
            .field("slots", &self.slots.len())
            .field("megabytes", &self.megabytes)
            .finish()
    }
}
