//! Lazy SMP coordinator.
//!
//! Workers run independent iterative-deepening loops over the same root and
//! share only the transposition table and the time manager. The coordinator
//! joins them and plays the move most workers agree on.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use cozy_chess::{Board, Move};
use tracing::debug;

use crate::nnue;
use crate::position::move_to_uci;
use crate::search::control::TimeManager;
use crate::search::thread::SearchThread;
use crate::search::tt::TranspositionTable;
use crate::search::{SearchResult, INF};

/// The search recursion is deep and every frame carries move lists; the
/// default thread stack is too tight.
const WORKER_STACK: usize = 8 * 1024 * 1024;

pub struct SearchHandler {
    tt: TranspositionTable,
    tm: TimeManager,
    num_threads: usize,
    root: Option<(Board, Vec<Move>)>,
    searchmoves: Vec<Move>,
}

impl SearchHandler {
    pub fn new(hash_mb: usize) -> Self {
        Self {
            tt: TranspositionTable::new(hash_mb),
            tm: TimeManager::infinite(Arc::new(AtomicBool::new(false))),
            num_threads: 1,
            root: None,
            searchmoves: Vec::new(),
        }
    }

    /// Configure the next search: worker count, budget, the root position
    /// with the game moves that lead to it (they feed repetition
    /// detection), and an optional `searchmoves` restriction. When
    /// `searchmoves` is non-empty only those root moves are considered.
    pub fn set(
        &mut self,
        num_threads: usize,
        tm: TimeManager,
        base: Board,
        game_moves: &[Move],
        searchmoves: &[Move],
    ) {
        self.num_threads = num_threads.max(1);
        self.tm = tm;
        self.root = Some((base, game_moves.to_vec()));
        self.searchmoves = searchmoves.to_vec();
    }

    pub fn resize_tt(&mut self, mb: usize) {
        self.tt = TranspositionTable::new(mb);
    }

    pub fn clear_tt(&self) {
        self.tt.clear();
    }

    /// Raise the stop flag; safe to call from another thread while
    /// [`start`](Self::start) is blocked on its workers.
    pub fn stop_all(&self) {
        self.tm.stop();
    }

    /// Run the configured search to completion, print `bestmove`, and
    /// return the majority-voted result.
    pub fn start(&self) -> SearchResult {
        let (base, game_moves) = self.root.as_ref().expect("search root not configured");
        self.tt.new_generation();
        self.tm.start();
        let network = nnue::global();

        let results: Vec<SearchResult> = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.num_threads)
                .map(|id| {
                    let tm = &self.tm;
                    let tt = &self.tt;
                    let moves = game_moves.as_slice();
                    let searchmoves = self.searchmoves.as_slice();
                    thread::Builder::new()
                        .name(format!("search-{id}"))
                        .stack_size(WORKER_STACK)
                        .spawn_scoped(scope, move || {
                            let mut worker = SearchThread::new(
                                id,
                                tm,
                                tt,
                                network,
                                base.clone(),
                                moves,
                                searchmoves,
                            );
                            worker.iterative_deepening()
                        })
                        .expect("failed to spawn search worker")
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("search worker panicked"))
                .collect()
        });

        let voted = majority_vote(&results);
        let total_nodes: u64 = results.iter().map(|r| r.nodes).sum();
        debug!(threads = self.num_threads, nodes = total_nodes, "workers joined");

        let mut result = results.into_iter().next().unwrap_or(SearchResult {
            best_move: None,
            score: -INF,
            depth: 0,
            nodes: 0,
        });
        result.best_move = voted;
        result.nodes = total_nodes;

        // The current position is needed to render castling; replay the
        // history over the base board.
        if let Some(mv) = voted {
            let mut root_board = base.clone();
            for &m in game_moves {
                root_board.play_unchecked(m);
            }
            println!("bestmove {}", move_to_uci(&root_board, mv));
        }

        result
    }
}

/// The move most workers settled on; ties go to the earlier worker.
fn majority_vote(results: &[SearchResult]) -> Option<Move> {
    let mut tally: Vec<(Move, usize)> = Vec::new();
    for result in results {
        let Some(mv) = result.best_move else { continue };
        match tally.iter_mut().find(|(m, _)| *m == mv) {
            Some((_, count)) => *count += 1,
            None => tally.push((mv, 1)),
        }
    }

    let mut best: Option<(Move, usize)> = None;
    for (mv, count) in tally {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((mv, count));
        }
    }
    best.map(|(mv, _)| mv)
}

impl std::fmt::Debug for SearchHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchHandler")
            .field("tt", &self.tt)
            .field("num_threads", &self.num_threads)
            .finish()
    }
}

impl Default for SearchHandler {
    fn default() -> Self {
        Self::new(16)
    }
}
