//! The feature-transformer accumulator and its stack.
//!
//! One accumulator caches both perspectives' transformer outputs plus the
//! PSQT side sums for one position. Advancing by a move applies the feature
//! delta; when a side's king moved, that perspective is rebuilt from scratch
//! instead. The stack mirrors the position stack from the search root down.

use cozy_chess::{Board, Color};

use crate::MAX_PLY;

use super::features::{feature_diff, features_of};
use super::network::{Network, FT_CLIP, HIDDEN, L1, PSQT_BUCKETS};

/// Output-head selector from the piece count.
pub fn material_bucket(board: &Board) -> usize {
    (board.occupied().len() as usize - 1) / 4
}

#[derive(Clone)]
#[repr(align(64))]
pub struct Accumulator {
    white: [i16; HIDDEN],
    black: [i16; HIDDEN],
    white_psqt: [i16; PSQT_BUCKETS],
    black_psqt: [i16; PSQT_BUCKETS],
    bucket: usize,
}

fn add_feature(
    vals: &mut [i16; HIDDEN],
    psqt: &mut [i16; PSQT_BUCKETS],
    network: &Network,
    feature: usize,
) {
    let weights = &network.ft_weights[feature * HIDDEN..(feature + 1) * HIDDEN];
    for (value, weight) in vals.iter_mut().zip(weights) {
        *value += *weight;
    }
    let weights = &network.psqt_weights[feature * PSQT_BUCKETS..(feature + 1) * PSQT_BUCKETS];
    for (value, weight) in psqt.iter_mut().zip(weights) {
        *value += *weight;
    }
}

fn sub_feature(
    vals: &mut [i16; HIDDEN],
    psqt: &mut [i16; PSQT_BUCKETS],
    network: &Network,
    feature: usize,
) {
    let weights = &network.ft_weights[feature * HIDDEN..(feature + 1) * HIDDEN];
    for (value, weight) in vals.iter_mut().zip(weights) {
        *value -= *weight;
    }
    let weights = &network.psqt_weights[feature * PSQT_BUCKETS..(feature + 1) * PSQT_BUCKETS];
    for (value, weight) in psqt.iter_mut().zip(weights) {
        *value -= *weight;
    }
}

fn clip(x: i16) -> i32 {
    i32::from(x).clamp(0, FT_CLIP)
}

impl Accumulator {
    /// Full rebuild of both perspectives.
    pub fn from_position(network: &Network, board: &Board) -> Self {
        let mut acc = Self {
            white: [0; HIDDEN],
            black: [0; HIDDEN],
            white_psqt: [0; PSQT_BUCKETS],
            black_psqt: [0; PSQT_BUCKETS],
            bucket: material_bucket(board),
        };
        acc.refresh_view(network, board, Color::White);
        acc.refresh_view(network, board, Color::Black);
        acc
    }

    fn view_mut(&mut self, view: Color) -> (&mut [i16; HIDDEN], &mut [i16; PSQT_BUCKETS]) {
        match view {
            Color::White => (&mut self.white, &mut self.white_psqt),
            Color::Black => (&mut self.black, &mut self.black_psqt),
        }
    }

    fn refresh_view(&mut self, network: &Network, board: &Board, view: Color) {
        let (vals, psqt) = self.view_mut(view);
        *vals = network.ft_biases;
        *psqt = network.psqt_biases;
        for feature in features_of(view, board).iter() {
            add_feature(vals, psqt, network, feature);
        }
    }

    /// Accumulator for `cur`, derived from the accumulator of `prev`. A
    /// perspective whose king moved is refreshed; the other takes the
    /// occupancy delta.
    pub fn advance(network: &Network, prev: &Self, cur: &Board, prev_board: &Board) -> Self {
        let mut acc = prev.clone();
        acc.bucket = material_bucket(cur);
        for view in [Color::White, Color::Black] {
            if cur.king(view) != prev_board.king(view) {
                acc.refresh_view(network, cur, view);
            } else {
                let (added, removed) = feature_diff(view, cur, prev_board);
                let (vals, psqt) = acc.view_mut(view);
                for feature in added.iter() {
                    add_feature(vals, psqt, network, feature);
                }
                for feature in removed.iter() {
                    sub_feature(vals, psqt, network, feature);
                }
            }
        }
        acc
    }

    /// Forward pass from `view`'s perspective, in centipawn scale.
    pub fn evaluate(&self, network: &Network, view: Color) -> i32 {
        let (ours, theirs, our_psqt, their_psqt) = match view {
            Color::White => (&self.white, &self.black, &self.white_psqt, &self.black_psqt),
            Color::Black => (&self.black, &self.white, &self.black_psqt, &self.white_psqt),
        };

        let mut l1_out = network.l1_biases;
        for (i, out) in l1_out.iter_mut().enumerate() {
            let row = &network.l1_weights[i * 2 * HIDDEN..(i + 1) * 2 * HIDDEN];
            let mut acc = 0i32;
            for (x, w) in ours.iter().zip(&row[..HIDDEN]) {
                acc += clip(*x) * i32::from(*w);
            }
            for (x, w) in theirs.iter().zip(&row[HIDDEN..]) {
                acc += clip(*x) * i32::from(*w);
            }
            *out += acc;
            *out >>= 16;
        }

        let mut l2_out = network.l2_biases;
        for (i, out) in l2_out.iter_mut().enumerate() {
            let row = &network.l2_weights[i * L1..(i + 1) * L1];
            for (x, w) in l1_out.iter().zip(row) {
                *out += (*x).max(0) * i32::from(*w);
            }
        }

        let mut out = network.out_bias;
        for (x, w) in l2_out.iter().zip(&network.out_weights) {
            out += (*x).max(0) * i32::from(*w);
        }
        out >>= 16;

        let psqt = (i32::from(our_psqt[self.bucket]) / 2
            - i32::from(their_psqt[self.bucket]) / 2)
            * 100
            >> 8;
        out + psqt
    }
}

/// Accumulators for the search path, top entry matching the position stack's
/// top. Capacity is reserved up front; the search never allocates here.
pub struct AccumulatorStack {
    stack: Vec<Accumulator>,
}

impl AccumulatorStack {
    pub fn new(network: &Network, root: &Board) -> Self {
        let mut stack = Vec::with_capacity(MAX_PLY + 1);
        stack.push(Accumulator::from_position(network, root));
        Self { stack }
    }

    pub fn last(&self) -> &Accumulator {
        self.stack.last().expect("accumulator stack empty")
    }

    pub fn do_move(&mut self, network: &Network, prev_board: &Board, cur_board: &Board) {
        let next = Accumulator::advance(network, self.last(), cur_board, prev_board);
        self.stack.push(next);
    }

    /// A null move changes no pieces; the copy keeps the stacks aligned.
    pub fn do_null(&mut self) {
        let top = self.last().clone();
        self.stack.push(top);
    }

    pub fn undo_move(&mut self) {
        self.stack.pop().expect("accumulator stack underflow");
        assert!(
            !self.stack.is_empty(),
            "accumulator stack underflow: popped the root accumulator"
        );
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}
