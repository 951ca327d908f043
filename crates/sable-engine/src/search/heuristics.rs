//! History heuristics: butterfly, continuation, capture and pawn tables.
//!
//! All tables share one update discipline: the move that caused a beta
//! cutoff gains `depth² · scale`, every other move of the same category
//! loses a fraction of its score, and entries stay inside
//! `[0, HISTORY_MAX]`.

use cozy_chess::{Board, Color, Move, Piece, Square};

use crate::alloc_zeroed_box;
use crate::position::{is_en_passant, Positions};

/// Ceiling for every history entry.
pub const HISTORY_MAX: i32 = 50_000_000;

/// How many plies back the continuation history looks.
pub const CONT_PLANES: usize = 2;

const BUTTERFLY_SCALE: i32 = 500;
const BUTTERFLY_DECAY: i32 = 50;
const CONT_SCALE: i32 = 300;
const CONT_DECAY: i32 = 100;
const PAWN_SCALE: i32 = 200;
const PAWN_DECAY: i32 = 30;
const CAPTURE_SCALE: i32 = 1000;
const CAPTURE_DECAY: i32 = 5;

/// What happened to a move at a cutoff: it either caused the cutoff or was
/// searched ahead of the move that did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryUpdate {
    Bonus,
    Penalty,
}

impl HistoryUpdate {
    fn apply(self, entry: &mut i32, depth: i32, scale: i32, decay: i32) {
        match self {
            HistoryUpdate::Bonus => *entry += depth * depth * scale,
            HistoryUpdate::Penalty => *entry -= *entry / decay,
        }
        *entry = (*entry).clamp(0, HISTORY_MAX);
    }
}

type PieceToTable = [[[i32; Square::NUM]; Piece::NUM]; Color::NUM];
type CaptureTable = [PieceToTable; Piece::NUM];
type ContTable = [[[PieceToTable; Square::NUM]; Piece::NUM]; Color::NUM];

/// Thread-local heuristic scores. The continuation table is ~9 MiB and the
/// rest is small; everything lives on the heap.
pub struct HistoryTables {
    butterfly: Box<PieceToTable>,
    pawn: Box<PieceToTable>,
    capture: Box<CaptureTable>,
    cont: Box<ContTable>,
}

fn attacker(board: &Board, mv: Move) -> (Color, Piece) {
    let piece = board.piece_on(mv.from).expect("no piece on source square");
    (board.side_to_move(), piece)
}

fn victim_kind(board: &Board, mv: Move) -> Piece {
    if is_en_passant(board, mv) {
        Piece::Pawn
    } else {
        board.piece_on(mv.to).expect("capture without a victim")
    }
}

impl HistoryTables {
    pub fn new() -> Self {
        Self {
            butterfly: alloc_zeroed_box(),
            pawn: alloc_zeroed_box(),
            capture: alloc_zeroed_box(),
            cont: alloc_zeroed_box(),
        }
    }

    /// Butterfly score of a quiet move.
    pub fn butterfly_score(&self, board: &Board, mv: Move) -> i32 {
        let (color, piece) = attacker(board, mv);
        self.butterfly[color as usize][piece as usize][mv.to as usize]
    }

    /// Pawn-plane score of a quiet pawn move (zero for anything else).
    pub fn pawn_score(&self, board: &Board, mv: Move) -> i32 {
        let (color, piece) = attacker(board, mv);
        if piece != Piece::Pawn {
            return 0;
        }
        self.pawn[color as usize][piece as usize][mv.to as usize]
    }

    pub fn capture_score(&self, board: &Board, mv: Move) -> i32 {
        let (color, piece) = attacker(board, mv);
        let victim = victim_kind(board, mv);
        self.capture[victim as usize][color as usize][piece as usize][mv.to as usize]
    }

    /// Sum of the continuation planes behind the current node for a
    /// candidate move. Null moves contribute nothing for their plane.
    pub fn cont_score(&self, positions: &Positions, board: &Board, mv: Move) -> i32 {
        let (color, piece) = attacker(board, mv);
        let mut sum = 0;
        for back in 0..CONT_PLANES {
            if let Some((prev_color, prev_piece, prev_to)) = positions.cont_key_back(back) {
                sum += self.cont[prev_color as usize][prev_piece as usize][prev_to as usize]
                    [color as usize][piece as usize][mv.to as usize];
            }
        }
        sum
    }

    /// Combined quiet-move score used by the orderer.
    pub fn quiet_score(&self, positions: &Positions, board: &Board, mv: Move) -> i64 {
        i64::from(self.cont_score(positions, board, mv))
            + i64::from(self.butterfly_score(board, mv))
    }

    /// Reward `best` and decay the other quiets after a beta cutoff by a
    /// quiet move. Touches the butterfly, pawn and continuation planes.
    pub fn update_quiets(
        &mut self,
        positions: &Positions,
        board: &Board,
        quiets: impl Iterator<Item = Move>,
        best: Move,
        depth: i32,
    ) {
        for mv in quiets {
            let update = if mv == best {
                HistoryUpdate::Bonus
            } else {
                HistoryUpdate::Penalty
            };
            let (color, piece) = attacker(board, mv);

            update.apply(
                &mut self.butterfly[color as usize][piece as usize][mv.to as usize],
                depth,
                BUTTERFLY_SCALE,
                BUTTERFLY_DECAY,
            );

            if piece == Piece::Pawn {
                update.apply(
                    &mut self.pawn[color as usize][piece as usize][mv.to as usize],
                    depth,
                    PAWN_SCALE,
                    PAWN_DECAY,
                );
            }

            for back in 0..CONT_PLANES {
                if let Some((prev_color, prev_piece, prev_to)) = positions.cont_key_back(back) {
                    update.apply(
                        &mut self.cont[prev_color as usize][prev_piece as usize]
                            [prev_to as usize][color as usize][piece as usize]
                            [mv.to as usize],
                        depth,
                        CONT_SCALE,
                        CONT_DECAY,
                    );
                }
            }
        }
    }

    /// Reward `best` and decay the other captures after a cutoff by a
    /// tactical move.
    pub fn update_captures(
        &mut self,
        board: &Board,
        captures: impl Iterator<Item = Move>,
        best: Move,
        depth: i32,
    ) {
        for mv in captures {
            let update = if mv == best {
                HistoryUpdate::Bonus
            } else {
                HistoryUpdate::Penalty
            };
            let (color, piece) = attacker(board, mv);
            let victim = victim_kind(board, mv);
            update.apply(
                &mut self.capture[victim as usize][color as usize][piece as usize]
                    [mv.to as usize],
                depth,
                CAPTURE_SCALE,
                CAPTURE_DECAY,
            );
        }
    }
}

impl Default for HistoryTables {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cozy_chess::Board;

    fn mv(s: &str) -> Move {
        s.parse().unwrap()
    }

    #[test]
    fn tables_start_zeroed() {
        let history = HistoryTables::new();
        let board = Board::default();
        assert_eq!(history.butterfly_score(&board, mv("g1f3")), 0);
        assert_eq!(history.pawn_score(&board, mv("e2e4")), 0);
    }

    #[test]
    fn cutoff_winner_gains_losers_decay() {
        let mut history = HistoryTables::new();
        let positions = Positions::new(Board::default(), &[]);
        let board = Board::default();
        let quiets = [mv("g1f3"), mv("b1c3")];

        // Prime both, then reward only g1f3.
        history.update_quiets(&positions, &board, quiets.iter().copied(), mv("g1f3"), 4);
        history.update_quiets(&positions, &board, quiets.iter().copied(), mv("b1c3"), 4);
        let loser_after_win = history.butterfly_score(&board, mv("g1f3"));
        history.update_quiets(&positions, &board, quiets.iter().copied(), mv("g1f3"), 4);

        assert!(history.butterfly_score(&board, mv("g1f3")) > loser_after_win);
        assert!(history.butterfly_score(&board, mv("b1c3")) > 0);
    }

    #[test]
    fn scores_clamp_at_the_ceiling() {
        let mut history = HistoryTables::new();
        let positions = Positions::new(Board::default(), &[]);
        let board = Board::default();
        let quiets = [mv("g1f3")];
        for _ in 0..200 {
            history.update_quiets(&positions, &board, quiets.iter().copied(), mv("g1f3"), 30);
        }
        assert_eq!(history.butterfly_score(&board, mv("g1f3")), HISTORY_MAX);
    }

    #[test]
    fn penalties_never_go_negative() {
        let mut history = HistoryTables::new();
        let positions = Positions::new(Board::default(), &[]);
        let board = Board::default();
        let quiets = [mv("g1f3"), mv("b1c3")];
        for _ in 0..50 {
            history.update_quiets(&positions, &board, quiets.iter().copied(), mv("g1f3"), 2);
        }
        assert!(history.butterfly_score(&board, mv("b1c3")) >= 0);
    }

    #[test]
    fn pawn_plane_only_tracks_pawn_moves() {
        let mut history = HistoryTables::new();
        let positions = Positions::new(Board::default(), &[]);
        let board = Board::default();
        let quiets = [mv("e2e4"), mv("g1f3")];
        history.update_quiets(&positions, &board, quiets.iter().copied(), mv("e2e4"), 3);

        assert!(history.pawn_score(&board, mv("e2e4")) > 0);
        assert_eq!(history.pawn_score(&board, mv("g1f3")), 0);
        assert!(history.butterfly_score(&board, mv("g1f3")) >= 0);
    }

    #[test]
    fn continuation_depends_on_previous_move() {
        let mut history = HistoryTables::new();
        let board_after = |moves: &[&str]| {
            let mvs: Vec<Move> = moves.iter().map(|s| mv(s)).collect();
            Positions::new(Board::default(), &mvs)
        };

        let line_a = board_after(&["e2e4", "e7e5"]);
        let line_b = board_after(&["d2d4", "d7d5"]);
        let board_a = line_a.board().clone();
        let board_b = line_b.board().clone();
        let quiets = [mv("g1f3")];

        history.update_quiets(&line_a, &board_a, quiets.iter().copied(), mv("g1f3"), 5);

        assert!(history.cont_score(&line_a, &board_a, mv("g1f3")) > 0);
        assert_eq!(history.cont_score(&line_b, &board_b, mv("g1f3")), 0);
    }

    #[test]
    fn capture_history_keys_on_the_victim() {
        let mut history = HistoryTables::new();
        // White queen on d4 can take either the e5 pawn or the d5 knight.
        let board: Board = "4k3/8/8/3np3/3Q4/8/8/4K3 w - - 0 1".parse().unwrap();
        let captures = [mv("d4e5"), mv("d4d5")];
        history.update_captures(&board, captures.iter().copied(), mv("d4d5"), 4);

        assert!(history.capture_score(&board, mv("d4d5")) > 0);
        assert_eq!(history.capture_score(&board, mv("d4e5")), 0);
    }

    #[test]
    fn en_passant_victim_is_a_pawn() {
        let board: Board = "rnbqkbnr/ppp1pppp/8/3pP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 3"
            .parse()
            .unwrap();
        let mut history = HistoryTables::new();
        let captures = [mv("e5d6")];
        history.update_captures(&board, captures.iter().copied(), mv("e5d6"), 3);
        assert!(history.capture_score(&board, mv("e5d6")) > 0);
    }
}
