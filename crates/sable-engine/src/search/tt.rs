//! Shared transposition table.
//!
//! Workers probe and store without locks. Each slot is two `u64` words: a
//! packed data word and a key word holding `hash ^ data`, so a torn
//! read (old key with new data, or vice versa) fails verification and is
//! indistinguishable from a miss. A wrong-but-consistent entry is harmless
//! because the search validates probed moves before playing them.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use cozy_chess::{Move, Piece, Square};

use crate::search::{MATED_IN_MAX_PLY, MATE_IN_MAX_PLY};

/// Bound carried by a stored score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Bound {
    /// Empty slot.
    None = 0,
    /// Exact score (PV node).
    Exact = 1,
    /// Lower bound (fail high).
    Lower = 2,
    /// Upper bound (fail low).
    Upper = 3,
}

impl Bound {
    const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => Bound::Exact,
            2 => Bound::Lower,
            3 => Bound::Upper,
            _ => Bound::None,
        }
    }
}

/// Result of a successful probe, with the score already converted back from
/// node-relative mate distance.
#[derive(Debug, Clone, Copy)]
pub struct TtHit {
    pub mv: Option<Move>,
    pub depth: i32,
    pub score: i32,
    pub bound: Bound,
}

/// Convert a search score to its stored form: mate scores become
/// distance-from-node so they are path-independent.
pub fn score_to_tt(score: i32, ply: usize) -> i16 {
    let adjusted = if score >= MATE_IN_MAX_PLY {
        score + ply as i32
    } else if score <= MATED_IN_MAX_PLY {
        score - ply as i32
    } else {
        score
    };
    adjusted as i16
}

/// Reverse of [`score_to_tt`].
pub fn score_from_tt(score: i16, ply: usize) -> i32 {
    let score = i32::from(score);
    if score >= MATE_IN_MAX_PLY {
        score - ply as i32
    } else if score <= MATED_IN_MAX_PLY {
        score + ply as i32
    } else {
        score
    }
}

/// 15-bit move encoding: from(6) | to(6) | promotion(3). A move can never
/// have `from == to`, so the all-zero pattern means "no move".
fn pack_move(mv: Move) -> u16 {
    let promo = match mv.promotion {
        None => 0u16,
        Some(Piece::Knight) => 1,
        Some(Piece::Bishop) => 2,
        Some(Piece::Rook) => 3,
        Some(Piece::Queen) => 4,
        Some(_) => 0,
    };
    mv.from as u16 | ((mv.to as u16) << 6) | (promo << 12)
}

fn unpack_move(bits: u16) -> Option<Move> {
    let from = Square::index((bits & 0x3F) as usize);
    let to = Square::index(((bits >> 6) & 0x3F) as usize);
    if from == to {
        return None;
    }
    let promotion = match (bits >> 12) & 0x07 {
        1 => Some(Piece::Knight),
        2 => Some(Piece::Bishop),
        3 => Some(Piece::Rook),
        4 => Some(Piece::Queen),
        _ => None,
    };
    Some(Move {
        from,
        to,
        promotion,
    })
}

/// Data word layout: move(0..16) | score(16..32) | depth(32..48) |
/// bound(48..50) | generation(50..58).
fn pack_data(mv: Option<Move>, score: i16, depth: i16, bound: Bound, generation: u8) -> u64 {
    u64::from(mv.map_or(0, pack_move))
        | (u64::from(score as u16) << 16)
        | (u64::from(depth as u16) << 32)
        | (u64::from(bound as u8) << 48)
        | (u64::from(generation) << 50)
}

fn data_score(data: u64) -> i16 {
    (data >> 16) as u16 as i16
}

fn data_depth(data: u64) -> i16 {
    (data >> 32) as u16 as i16
}

fn data_bound(data: u64) -> Bound {
    Bound::from_bits(((data >> 48) & 0x03) as u8)
}

fn data_generation(data: u64) -> u8 {
    ((data >> 50) & 0xFF) as u8
}

struct Slot {
    key: AtomicU64,
    data: AtomicU64,
}

/// Fixed-size, power-of-two table shared by all search threads.
pub struct TranspositionTable {
    slots: Box<[Slot]>,
    mask: u64,
    generation: AtomicU8,
}

impl TranspositionTable {
    /// Allocate a table of the given size in MiB, rounded down to a power of
    /// two slot count.
    pub fn new(mb: usize) -> Self {
        let bytes = mb.max(1) * 1024 * 1024;
        let num_slots = (bytes / std::mem::size_of::<Slot>())
            .next_power_of_two()
            .max(2)
            >> 1;
        let slots = (0..num_slots)
            .map(|_| Slot {
                key: AtomicU64::new(0),
                data: AtomicU64::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            mask: (num_slots - 1) as u64,
            slots,
            generation: AtomicU8::new(0),
        }
    }

    pub fn clear(&self) {
        for slot in self.slots.iter() {
            slot.key.store(0, Ordering::Relaxed);
            slot.data.store(0, Ordering::Relaxed);
        }
        self.generation.store(0, Ordering::Relaxed);
    }

    /// Advance the generation tag. Called once per `start`.
    pub fn new_generation(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    fn generation(&self) -> u8 {
        self.generation.load(Ordering::Relaxed)
    }

    pub fn probe(&self, hash: u64, ply: usize) -> Option<TtHit> {
        let slot = &self.slots[(hash & self.mask) as usize];
        let key = slot.key.load(Ordering::Relaxed);
        let data = slot.data.load(Ordering::Relaxed);
        if key ^ data != hash {
            return None;
        }
        let bound = data_bound(data);
        if bound == Bound::None {
            return None;
        }
        Some(TtHit {
            mv: unpack_move(data as u16),
            depth: i32::from(data_depth(data)),
            score: score_from_tt(data_score(data), ply),
            bound,
        })
    }

    /// Store an entry. Replacement: same key or empty slot always; otherwise
    /// a stale-generation entry loses, then shallower-or-equal depth loses.
    pub fn store(
        &self,
        hash: u64,
        depth: i32,
        score: i32,
        bound: Bound,
        mv: Option<Move>,
        ply: usize,
    ) {
        let slot = &self.slots[(hash & self.mask) as usize];
        let old_key = slot.key.load(Ordering::Relaxed);
        let old_data = slot.data.load(Ordering::Relaxed);
        let generation = self.generation();

        let same_key = old_key ^ old_data == hash;
        let replace = same_key
            || data_bound(old_data) == Bound::None
            || data_generation(old_data) != generation
            || depth >= i32::from(data_depth(old_data));
        if !replace {
            return;
        }

        let depth = depth.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        let data = pack_data(mv, score_to_tt(score, ply), depth, bound, generation);
        slot.data.store(data, Ordering::Relaxed);
        slot.key.store(hash ^ data, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for TranspositionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranspositionTable")
            .field("slots", &self.slots.len())
            .field("generation", &self.generation())
            .finish()
    }
}
