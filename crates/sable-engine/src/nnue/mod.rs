//! NNUE evaluation.
//!
//! A king-bucketed feature transformer feeds two 1024-wide perspective
//! accumulators and an 8-wide PSQT head; a small quantised network
//! (2·1024 → 16 → 32 → 1) turns them into a centipawn score. The
//! accumulators are maintained incrementally across make/unmake and must
//! stay bit-identical to a full rebuild.

mod accumulator;
mod features;
mod network;

pub use accumulator::{material_bucket, Accumulator, AccumulatorStack};
pub use features::{feature_index, king_bucket, NUM_FEATURES};
pub use network::{
    blob_len, global, install, Network, NetworkError, WeightDesc, WeightType, MANIFEST,
};

use cozy_chess::Board;

/// Evaluate a position from scratch, without accumulator reuse.
pub fn evaluate(network: &Network, board: &Board) -> i32 {
    Accumulator::from_position(network, board).evaluate(network, board.side_to_move())
}
