//! Feature-transformer input indexing.
//!
//! One feature per (king bucket, piece square, piece code) triple, computed
//! from the perspective of one side. Black's view flips ranks; a king on the
//! e–h files flips files, so the bucket table only needs the a–d half.

use cozy_chess::{Board, Color, File, Piece, Square};

/// King buckets after folding the board files.
pub const KING_BUCKETS: usize = 32;

/// Six piece types, ours and theirs.
pub const PIECE_CODES: usize = 12;

/// Input dimension of the feature transformer.
pub const NUM_FEATURES: usize = KING_BUCKETS * PIECE_CODES * Square::NUM;

#[rustfmt::skip]
const KING_BUCKET: [usize; Square::NUM] = [
     0,  1,  2,  3,  3,  2,  1,  0,
     4,  5,  6,  7,  7,  6,  5,  4,
     8,  9, 10, 11, 11, 10,  9,  8,
    12, 13, 14, 15, 15, 14, 13, 12,
    16, 17, 18, 19, 19, 18, 17, 16,
    20, 21, 22, 23, 23, 22, 21, 20,
    24, 25, 26, 27, 27, 26, 25, 24,
    28, 29, 30, 31, 31, 30, 29, 28,
];

pub fn king_bucket(sq: Square) -> usize {
    KING_BUCKET[sq as usize]
}

/// Feature index of `piece` (owned by `piece_color`) on `sq`, seen by `view`
/// whose king stands on `ksq`.
pub fn feature_index(
    view: Color,
    ksq: Square,
    sq: Square,
    piece: Piece,
    piece_color: Color,
) -> usize {
    let (mut rel_sq, rel_ksq) = match view {
        Color::White => (sq, ksq),
        Color::Black => (sq.flip_rank(), ksq.flip_rank()),
    };
    if (rel_ksq.file() as usize) > (File::D as usize) {
        rel_sq = rel_sq.flip_file();
    }
    let code = (piece as usize) * 2 + usize::from(piece_color != view);
    king_bucket(rel_ksq) + (rel_sq as usize) * KING_BUCKETS + code * KING_BUCKETS * Square::NUM
}

/// Changed feature indices between two positions. A full refresh touches at
/// most the 32 occupied squares; a single move touches at most four.
pub struct FeatureList {
    data: [u16; 32],
    len: usize,
}

impl FeatureList {
    pub fn new() -> Self {
        Self {
            data: [0; 32],
            len: 0,
        }
    }

    fn push(&mut self, feature: usize) {
        debug_assert!(feature < NUM_FEATURES);
        self.data[self.len] = feature as u16;
        self.len += 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.data[..self.len].iter().map(|&f| f as usize)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for FeatureList {
    fn default() -> Self {
        Self::new()
    }
}

/// Every active feature of `board` from `view`.
pub fn features_of(view: Color, board: &Board) -> FeatureList {
    let ksq = board.king(view);
    let mut features = FeatureList::new();
    for sq in board.occupied() {
        let piece = board.piece_on(sq).expect("occupied square without a piece");
        let color = board.color_on(sq).expect("occupied square without a color");
        features.push(feature_index(view, ksq, sq, piece, color));
    }
    features
}

/// (added, removed) features between `prev` and `cur` for a perspective
/// whose king did not move, derived from the per-colour occupancy XOR.
pub fn feature_diff(view: Color, cur: &Board, prev: &Board) -> (FeatureList, FeatureList) {
    debug_assert_eq!(cur.king(view), prev.king(view));
    let ksq = cur.king(view);
    let mut added = FeatureList::new();
    let mut removed = FeatureList::new();

    for color in [Color::White, Color::Black] {
        let diff = prev.colors(color) ^ cur.colors(color);
        for sq in diff {
            if prev.colors(color).has(sq) {
                let piece = prev.piece_on(sq).expect("occupied square without a piece");
                removed.push(feature_index(view, ksq, sq, piece, color));
            } else {
                let piece = cur.piece_on(sq).expect("occupied square without a piece");
                added.push(feature_index(view, ksq, sq, piece, color));
            }
        }
    }
    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn king_buckets_fold_the_files() {
        assert_eq!(king_bucket(Square::A1), 0);
        assert_eq!(king_bucket(Square::H1), 0);
        assert_eq!(king_bucket(Square::D1), king_bucket(Square::E1));
        assert_eq!(king_bucket(Square::H8), 28);
        assert!(KING_BUCKET.iter().all(|&b| b < KING_BUCKETS));
    }

    #[test]
    fn feature_indices_stay_in_bounds() {
        for view in [Color::White, Color::Black] {
            for piece_color in [Color::White, Color::Black] {
                for piece in Piece::ALL {
                    for ksq in [Square::A1, Square::E1, Square::H8, Square::D5] {
                        for sq in Square::ALL {
                            let idx = feature_index(view, ksq, sq, piece, piece_color);
                            assert!(idx < NUM_FEATURES);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn views_disagree_on_ownership() {
        // A white pawn is "ours" for white and "theirs" for black.
        let white = feature_index(Color::White, Square::E1, Square::E4, Piece::Pawn, Color::White);
        let black = feature_index(Color::Black, Square::E8, Square::E4, Piece::Pawn, Color::White);
        let white_code = (white / (KING_BUCKETS * Square::NUM)) % 2;
        let black_code = (black / (KING_BUCKETS * Square::NUM)) % 2;
        assert_ne!(white_code, black_code);
    }

    #[test]
    fn mirror_positions_share_indices() {
        // Black's view of a rank-flipped board equals white's view of the
        // original when colors swap.
        let white = feature_index(Color::White, Square::C1, Square::D4, Piece::Rook, Color::White);
        let black = feature_index(
            Color::Black,
            Square::C1.flip_rank(),
            Square::D4.flip_rank(),
            Piece::Rook,
            Color::Black,
        );
        assert_eq!(white, black);
    }

    #[test]
    fn startpos_has_32_features() {
        let board = Board::default();
        assert_eq!(features_of(Color::White, &board).len(), 32);
        assert_eq!(features_of(Color::Black, &board).len(), 32);
    }

    #[test]
    fn quiet_move_diff_is_one_add_one_remove() {
        let prev = Board::default();
        let mut cur = prev.clone();
        cur.play_unchecked("g1f3".parse().unwrap());
        let (added, removed) = feature_diff(Color::White, &cur, &prev);
        assert_eq!(added.len(), 1);
        assert_eq!(removed.len(), 1);
    }

    #[test]
    fn capture_diff_removes_the_victim() {
        let prev: Board = "4k3/8/8/3p4/4P3/8/8/4K3 w - - 0 1".parse().unwrap();
        let mut cur = prev.clone();
        cur.play_unchecked("e4d5".parse().unwrap());
        let (added, removed) = feature_diff(Color::White, &cur, &prev);
        assert_eq!(added.len(), 1);
        assert_eq!(removed.len(), 2);
    }
}
