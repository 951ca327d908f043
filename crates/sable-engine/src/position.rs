//! Position stack: the root-to-current path of the search.
//!
//! Move generation, legality and hashing come from `cozy-chess`; this module
//! adds the path bookkeeping the search needs on top of it: ply accounting,
//! twofold-repetition and insufficient-material detection, continuation-history
//! keys, and UCI rendering of the crate's king-takes-rook castling encoding.

use cozy_chess::{Board, Color, File, Move, Piece, Square};

/// Continuation-history key: who moved, which piece, and where it landed.
pub type ContKey = (Color, Piece, Square);

struct Entry {
    board: Board,
    /// Key of the move that produced this position; `None` at the stack
    /// bottom and after a null move.
    cont_key: Option<ContKey>,
    null: bool,
}

/// Ordered sequence of positions from the game start to the node being
/// searched. The top is always the current node; `do_move` appends and
/// `undo_move` pops. Entries before the search root come from the game
/// history and exist so repetitions across the root are detected.
pub struct Positions {
    entries: Vec<Entry>,
    root: usize,
}

impl Positions {
    /// Build the stack from a base position and the game moves that lead to
    /// the search root.
    pub fn new(base: Board, game_moves: &[Move]) -> Self {
        let mut positions = Self {
            entries: Vec::with_capacity(game_moves.len() + crate::MAX_PLY + 1),
            root: 0,
        };
        positions.entries.push(Entry {
            board: base,
            cont_key: None,
            null: false,
        });
        for &mv in game_moves {
            positions.do_move(mv);
        }
        positions.root = positions.entries.len() - 1;
        positions
    }

    /// The board at the node currently being searched.
    pub fn board(&self) -> &Board {
        &self.entries.last().expect("position stack empty").board
    }

    /// The board one entry below the top.
    pub fn previous_board(&self) -> &Board {
        &self.entries[self.entries.len() - 2].board
    }

    /// Distance of the current node from the search root.
    pub fn ply(&self) -> usize {
        self.entries.len() - 1 - self.root
    }

    pub fn do_move(&mut self, mv: Move) {
        let top = self.board();
        let mover = top.side_to_move();
        let piece = top.piece_on(mv.from).expect("no piece on source square");
        let mut board = top.clone();
        board.play_unchecked(mv);
        self.entries.push(Entry {
            board,
            cont_key: Some((mover, piece, mv.to)),
            null: false,
        });
    }

    /// Pass the turn. Only callable when the side to move is not in check.
    pub fn do_null(&mut self) {
        let board = self
            .board()
            .null_move()
            .expect("null move while in check");
        self.entries.push(Entry {
            board,
            cont_key: None,
            null: true,
        });
    }

    pub fn undo_move(&mut self) {
        assert!(
            self.entries.len() > self.root + 1,
            "position stack underflow: undo below the search root"
        );
        self.entries.pop();
    }

    /// Whether the current position was produced by a null move.
    pub fn last_was_null(&self) -> bool {
        self.entries.last().expect("position stack empty").null
    }

    /// Continuation key `back` plies behind the current node (0 = the move
    /// that produced the current position). `None` past the stack bottom or
    /// across a null move.
    pub fn cont_key_back(&self, back: usize) -> Option<ContKey> {
        let idx = self.entries.len().checked_sub(1 + back)?;
        self.entries[idx].cont_key
    }

    /// Twofold repetition: the current position occurred earlier on the path.
    pub fn is_repetition(&self) -> bool {
        let top = self.entries.len() - 1;
        let hash = self.entries[top].board.hash();
        self.entries[..top].iter().any(|e| e.board.hash() == hash)
    }

    /// Draw by repetition or insufficient material.
    pub fn is_draw(&self) -> bool {
        self.is_repetition() || is_insufficient_material(self.board())
    }

    /// Whether `child` (one move below the current node) would be an
    /// immediate draw. Used to veto transposition hits whose stored score
    /// cannot reflect the repetition.
    pub fn would_draw(&self, child: &Board) -> bool {
        let hash = child.hash();
        self.entries.iter().any(|e| e.board.hash() == hash)
            || is_insufficient_material(child)
    }
}

/// Bare kings, or a lone minor piece against a bare king.
pub fn is_insufficient_material(board: &Board) -> bool {
    board.occupied().len() <= 3
        && (board.pieces(Piece::Pawn)
            | board.pieces(Piece::Rook)
            | board.pieces(Piece::Queen))
        .is_empty()
}

/// cozy-chess encodes castling as the king capturing its own rook.
pub fn is_castling(board: &Board, mv: Move) -> bool {
    board.piece_on(mv.from) == Some(Piece::King)
        && board.color_on(mv.to) == Some(board.side_to_move())
}

pub fn is_en_passant(board: &Board, mv: Move) -> bool {
    board.piece_on(mv.from) == Some(Piece::Pawn)
        && mv.from.file() != mv.to.file()
        && board.piece_on(mv.to).is_none()
}

/// Capture or en passant. Castling is not a capture even though its target
/// square holds the friendly rook.
pub fn is_capture(board: &Board, mv: Move) -> bool {
    board.colors(!board.side_to_move()).has(mv.to) || is_en_passant(board, mv)
}

/// Render a move in standard UCI, translating the king-takes-rook castling
/// encoding back to a two-square king move.
pub fn move_to_uci(board: &Board, mv: Move) -> String {
    if is_castling(board, mv) {
        let file = if (mv.to.file() as usize) > (mv.from.file() as usize) {
            File::G
        } else {
            File::C
        };
        let to = Square::new(file, mv.from.rank());
        Move {
            from: mv.from,
            to,
            promotion: None,
        }
        .to_string()
    } else {
        mv.to_string()
    }
}

/// Parse a UCI move against a position, translating a two-square king move
/// into the king-takes-rook encoding when needed.
pub fn parse_uci_move(board: &Board, s: &str) -> Option<Move> {
    let mut mv: Move = s.parse().ok()?;
    if board.piece_on(mv.from) == Some(Piece::King) && !board.is_legal(mv) {
        let file = if (mv.to.file() as usize) > (mv.from.file() as usize) {
            File::H
        } else {
            File::A
        };
        mv.to = Square::new(file, mv.from.rank());
    }
    board.is_legal(mv).then_some(mv)
}
