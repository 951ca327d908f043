//! One search worker: iterative deepening, aspiration windows, negamax and
//! quiescence.
//!
//! Each worker owns its position stack, accumulator stack, search stack and
//! history tables; only the transposition table and the time manager are
//! shared. Cancellation is cooperative: once the stop flag is up, every
//! recursion level returns 0 and the caller discards the iteration.

use std::collections::HashMap;

use cozy_chess::{Board, Move, Piece};

use crate::nnue::{AccumulatorStack, Network};
use crate::position::{is_capture, move_to_uci, Positions};
use crate::search::control::TimeManager;
use crate::search::heuristics::HistoryTables;
use crate::search::ordering::{lmp_threshold, lmr_reduction, score_moves, MoveList};
use crate::search::see::see;
use crate::search::stack::SearchStack;
use crate::search::tt::{Bound, TranspositionTable};
use crate::search::{mate_in, mated_in, SearchResult, INF, MATE, MATED_IN_MAX_PLY, MATE_IN_MAX_PLY};
use crate::MAX_PLY;

const FUTILITY_BASE_MARGIN: i32 = 100;
const FUTILITY_DEPTH_SCALE: i32 = 120;

fn futility_margin(depth: i32) -> i32 {
    let depth = depth.clamp(1, MAX_PLY as i32);
    FUTILITY_BASE_MARGIN + FUTILITY_DEPTH_SCALE * depth
}

/// Pieces that matter for zugzwang detection: anything but pawns and kings.
fn minor_major_count(board: &Board) -> u32 {
    (board.pieces(Piece::Knight)
        | board.pieces(Piece::Bishop)
        | board.pieces(Piece::Rook)
        | board.pieces(Piece::Queen))
    .len()
}

/// Exponentially-smoothed variance of the per-iteration score swing, used to
/// size the aspiration window.
struct AspirationStats {
    variance: f64,
}

const ASPIRATION_LAMBDA: f64 = 0.95;

impl AspirationStats {
    fn new() -> Self {
        Self { variance: 10_000.0 }
    }

    fn window(&self) -> i32 {
        ((2.0 * self.variance.sqrt()) as i32).clamp(8, 300)
    }

    fn update(&mut self, delta: i32) {
        let squared = f64::from(delta) * f64::from(delta);
        self.variance = ASPIRATION_LAMBDA * self.variance + (1.0 - ASPIRATION_LAMBDA) * squared;
    }
}

pub struct SearchThread<'a> {
    thread_id: usize,
    tm: &'a TimeManager,
    tt: &'a TranspositionTable,
    network: &'a Network,

    positions: Positions,
    accumulators: AccumulatorStack,
    ss: SearchStack,
    history: HistoryTables,

    nodes: u64,
    tt_hits: u64,
    /// Nodes spent refuting each root move across earlier iterations; feeds
    /// root ordering at higher depths.
    root_time: HashMap<Move, u64>,
    /// `searchmoves` restriction: when non-empty, only these candidates are
    /// considered at the root.
    root_moves: Vec<Move>,
    best_move: Option<Move>,
    asp: AspirationStats,
}

impl<'a> SearchThread<'a> {
    pub fn new(
        thread_id: usize,
        tm: &'a TimeManager,
        tt: &'a TranspositionTable,
        network: &'a Network,
        base: Board,
        game_moves: &[Move],
        searchmoves: &[Move],
    ) -> Self {
        let positions = Positions::new(base, game_moves);
        let accumulators = AccumulatorStack::new(network, positions.board());
        Self {
            thread_id,
            tm,
            tt,
            network,
            positions,
            accumulators,
            ss: SearchStack::new(),
            history: HistoryTables::new(),
            nodes: 0,
            tt_hits: 0,
            root_time: HashMap::new(),
            root_moves: searchmoves.to_vec(),
            best_move: None,
            asp: AspirationStats::new(),
        }
    }

    fn board(&self) -> &Board {
        self.positions.board()
    }

    fn ply(&self) -> usize {
        self.positions.ply()
    }

    pub fn nodes(&self) -> u64 {
        self.nodes
    }

    pub fn tt_hits(&self) -> u64 {
        self.tt_hits
    }

    fn do_move(&mut self, mv: Move) {
        self.positions.do_move(mv);
        self.accumulators.do_move(
            self.network,
            self.positions.previous_board(),
            self.positions.board(),
        );
    }

    fn do_null(&mut self) {
        self.positions.do_null();
        self.accumulators.do_null();
    }

    fn undo_move(&mut self) {
        self.positions.undo_move();
        self.accumulators.undo_move();
    }

    /// Static evaluation of the current node, clamped inside the mate range
    /// and damped toward zero as the fifty-move clock runs down.
    fn evaluate(&self) -> i32 {
        let board = self.board();
        let mut eval = self.accumulators.last().evaluate(self.network, board.side_to_move());
        eval = eval.clamp(MATED_IN_MAX_PLY + 1, MATE_IN_MAX_PLY - 1);
        eval -= eval * i32::from(board.halfmove_clock()) / 101;
        eval
    }

    // -----------------------------------------------------------------------
    // Iterative deepening
    // -----------------------------------------------------------------------

    pub fn iterative_deepening(&mut self) -> SearchResult {
        let mut prev_eval = self.evaluate();
        let mut depth = 1;

        loop {
            self.tm.update_depth(depth);
            if self.tm.should_stop() || depth as usize > MAX_PLY {
                break;
            }

            let eval = self.aspiration_window(depth, prev_eval);

            if !self.tm.should_stop() {
                prev_eval = eval;
                if self.thread_id == 0 {
                    self.report_iteration(depth, eval);
                }
            }

            depth += 1;
        }

        SearchResult {
            best_move: self.best_move,
            score: prev_eval,
            depth: depth - 1,
            nodes: self.nodes,
        }
    }

    fn report_iteration(&self, depth: i32, eval: i32) {
        let score = if eval >= MATE_IN_MAX_PLY {
            format!("mate in {}", MATE - eval)
        } else {
            eval.to_string()
        };
        let best = self
            .best_move
            .map_or_else(|| "(none)".to_string(), |mv| move_to_uci(self.board(), mv));
        println!(
            "Depth {depth} Eval {score} Nodes {nodes} best {best}",
            nodes = self.nodes
        );
        let pv = self.pv_line(depth).join(" ");
        println!("PV (Eval {eval}): {pv}");
    }

    /// Recover the principal variation by walking transposition moves from
    /// the root, stopping at misses, illegal (collided) moves or terminals.
    fn pv_line(&self, max_len: i32) -> Vec<String> {
        let mut pv = Vec::new();
        let mut board = self.board().clone();
        for _ in 0..max_len {
            let Some(hit) = self.tt.probe(board.hash(), 0) else {
                break;
            };
            let Some(mv) = hit.mv else { break };
            if !board.is_legal(mv) {
                break;
            }
            pv.push(move_to_uci(&board, mv));
            board.play_unchecked(mv);
            let mut any_moves = false;
            board.generate_moves(|_| {
                any_moves = true;
                true
            });
            if !any_moves {
                break;
            }
        }
        pv
    }

    // -----------------------------------------------------------------------
    // Aspiration window
    // -----------------------------------------------------------------------

    fn aspiration_window(&mut self, depth: i32, prev_eval: i32) -> i32 {
        // Shallow iterations are cheap and noisy; search them wide open.
        if depth <= 7 {
            let eval = self.negamax(depth, -INF, INF);
            if depth > 1 {
                self.asp.update(eval - prev_eval);
            }
            return eval;
        }

        let mut window = self.asp.window();
        let mut alpha = prev_eval - window;
        let mut beta = prev_eval + window;
        let mut eval = self.negamax(depth, alpha, beta);

        while eval <= alpha || eval >= beta {
            if self.tm.should_stop() {
                break;
            }
            window *= 2;
            alpha = (eval - window).clamp(-INF, INF);
            beta = (eval + window).clamp(-INF, INF);
            eval = self.negamax(depth, alpha, beta);
        }

        self.asp.update(eval - prev_eval);
        eval
    }

    // -----------------------------------------------------------------------
    // Negamax
    // -----------------------------------------------------------------------

    pub(crate) fn negamax(&mut self, mut depth: i32, mut alpha: i32, mut beta: i32) -> i32 {
        if self.thread_id == 0 && self.nodes % 4096 == 0 {
            self.tm.update_time();
        }

        let board = self.board().clone();
        let ply = self.ply();
        let alpha_org = alpha;
        let is_root = ply == 0;
        let in_check = !board.checkers().is_empty();

        // Check extension.
        depth += i32::from(in_check);

        if depth <= 0 {
            return self.qsearch(alpha, beta);
        }

        self.nodes += 1;

        if !is_root {
            if self.positions.is_draw() {
                return 0;
            }
            if ply >= MAX_PLY {
                return self.evaluate();
            }

            // Mate-distance pruning: the worst case is being mated here, the
            // best case is mating next ply.
            alpha = alpha.max(mated_in(ply));
            beta = beta.min(mate_in(ply + 1));
            if alpha >= beta {
                return alpha;
            }
        }

        let is_pv = beta - alpha > 1;
        let excluded = self.ss.node(ply).excluded;

        let hash = board.hash();
        let mut tt_hit = if excluded.is_some() {
            None
        } else {
            self.tt.probe(hash, ply)
        };
        // Veto hits whose move walks into an immediate draw: the stored
        // score cannot account for the repetition.
        if let Some(hit) = &tt_hit {
            if let Some(tt_mv) = hit.mv {
                if !board.is_legal(tt_mv) {
                    tt_hit = None;
                } else {
                    let mut child = board.clone();
                    child.play_unchecked(tt_mv);
                    if self.positions.would_draw(&child) {
                        tt_hit = None;
                    }
                }
            }
        }
        if !is_pv {
            if let Some(hit) = &tt_hit {
                if hit.depth >= depth {
                    let cutoff = match hit.bound {
                        Bound::Exact => true,
                        Bound::Lower => hit.score >= beta,
                        Bound::Upper => hit.score <= alpha,
                        Bound::None => false,
                    };
                    if cutoff {
                        self.tt_hits += 1;
                        return hit.score;
                    }
                }
            }
        }

        let static_eval = if in_check {
            0
        } else if let Some(hit) = &tt_hit {
            hit.score
        } else {
            self.evaluate()
        };
        self.ss.node_mut(ply).eval = static_eval;

        // Has the line improved our position over the last couple of moves?
        let improving = if in_check {
            false
        } else if ply >= 4 {
            static_eval > self.ss.node(ply - 4).eval
        } else if ply >= 2 {
            static_eval > self.ss.node(ply - 2).eval
        } else {
            true
        };

        // Reverse futility: an eval this far above beta fails high outright.
        if !is_root && !is_pv && !in_check && depth < 9 {
            let margin = (depth - i32::from(improving)) * 77 - self.ss.node(ply - 1).eval / 400;
            if static_eval >= beta + margin {
                return static_eval;
            }
        }

        // Null move: hand over the turn and search reduced; only with enough
        // material to rule out zugzwang, and never when the TT already says
        // we fail low.
        if !is_root
            && !is_pv
            && !in_check
            && !self.positions.last_was_null()
            && depth >= 3
            && static_eval >= beta
            && tt_hit
                .as_ref()
                .map_or(true, |hit| hit.bound != Bound::Upper || hit.score > beta)
            && static_eval.abs() < MATE_IN_MAX_PLY
            && minor_major_count(&board) >= 3
        {
            let reduction = 3 + depth / 3 + ((static_eval - beta) / 100).clamp(0, 4);
            self.do_null();
            let mut score = -self.negamax(depth - reduction - 1, -beta, -(beta - 1));
            self.undo_move();

            if score >= beta {
                if score.abs() >= MATE_IN_MAX_PLY {
                    // A null-move refutation proves nothing about mates.
                    score = beta;
                }
                return score;
            }
        }

        let mut moves = MoveList::legal(&board);
        if moves.is_empty() {
            return if in_check { mated_in(ply) } else { 0 };
        }
        if is_root && !self.root_moves.is_empty() {
            moves.retain(|mv| self.root_moves.contains(&mv));
            if moves.is_empty() {
                // The restriction excluded every legal move; there is
                // nothing to search and nothing to report.
                return 0;
            }
        }

        let tt_move = tt_hit.as_ref().and_then(|hit| hit.mv);
        if is_root && depth > 7 {
            // Order root moves by how much work their refutation took in
            // earlier iterations; the TT move stays in front regardless.
            for entry in moves.iter_mut() {
                entry.score += self.root_time.get(&entry.mv).copied().unwrap_or(0) as i64;
                if tt_move == Some(entry.mv) {
                    entry.score = i64::MAX;
                }
            }
        } else {
            let killer1 = self.ss.node(ply).killer1;
            let killer2 = self.ss.node(ply).killer2;
            score_moves(
                &mut moves,
                &board,
                &self.positions,
                &self.history,
                tt_move,
                killer1,
                killer2,
            );
        }
        moves.sort();

        // Probcut: when the eval towers over beta, a tactical move that
        // clears beta + 150 in a cheap scout (verified shallow) ends the
        // node early.
        if !is_root && excluded.is_none() && !is_pv && !in_check && depth >= 3
            && static_eval >= beta + 150
        {
            let prob_beta = beta + 150;
            let mut tactical = moves.tactical(&board);
            let killer1 = self.ss.node(ply).killer1;
            let killer2 = self.ss.node(ply).killer2;
            score_moves(
                &mut tactical,
                &board,
                &self.positions,
                &self.history,
                tt_move,
                killer1,
                killer2,
            );
            tactical.sort();

            for idx in 0..tactical.len() {
                let entry = tactical.get(idx);
                if tt_move == Some(entry.mv) || entry.score < -1_000_000 {
                    continue;
                }
                self.do_move(entry.mv);
                let mut score = -self.qsearch(-prob_beta, -(prob_beta - 1));
                if score >= prob_beta {
                    let prob_depth = (depth - 4).max(1);
                    score = -self.negamax(prob_depth, -prob_beta, -(prob_beta - 1));
                }
                self.undo_move();

                if score >= prob_beta {
                    return score;
                }
            }
        }

        let mut best_eval = -INF;
        let mut local_best: Option<Move> = None;
        let mut first_move = true;
        let mut move_idx: i32 = 0;
        let mut skip_quiets = false;

        let mut quiets = MoveList::new();
        let mut captures = MoveList::new();

        for idx in 0..moves.len() {
            let mv = moves.get(idx).mv;
            if Some(mv) == excluded {
                continue;
            }

            let is_cap = is_capture(&board, mv);
            let is_quiet = !is_cap && mv.promotion.is_none();
            if is_quiet {
                quiets.push(mv);
            }
            if is_cap {
                captures.push(mv);
            }

            // Selective pruning, once one real score is on the board.
            if !is_root && local_best.is_some() && best_eval > -MATE {
                let lmr_depth = lmr_reduction(is_quiet, depth, move_idx as usize);

                if is_quiet {
                    if skip_quiets {
                        move_idx += 1;
                        first_move = false;
                        continue;
                    }

                    // Late-move pruning: past this many quiets, the ordering
                    // has spoken.
                    if !is_pv
                        && !in_check
                        && depth <= 7
                        && quiets.len() as i32 > lmp_threshold(improving, depth)
                    {
                        skip_quiets = true;
                        move_idx += 1;
                        first_move = false;
                        continue;
                    }

                    // Futility: a quiet move cannot lift a hopeless eval
                    // past alpha.
                    if !is_pv && !in_check && lmr_depth <= 6 {
                        let margin = futility_margin(depth);
                        if static_eval + margin + 100 * i32::from(improving) <= alpha {
                            skip_quiets = true;
                            move_idx += 1;
                            first_move = false;
                            continue;
                        }
                    }

                    if depth <= 8 && see(&board, mv) + 70 * depth < 0 {
                        move_idx += 1;
                        first_move = false;
                        continue;
                    }
                } else if is_cap && depth <= 6 && see(&board, mv) + 15 * depth * depth < 0 {
                    move_idx += 1;
                    first_move = false;
                    continue;
                }
            }

            let mut search_depth = depth;
            let begin_nodes = self.nodes;

            // Singular extension: verify the TT move against the rest of the
            // node at reduced depth; a lone survivor earns an extension, a
            // verification fail-high ends the node.
            if !is_root
                && !is_pv
                && depth >= 6
                && tt_move == Some(mv)
                && moves.len() > 1
            {
                if let Some(hit) = &tt_hit {
                    if hit.bound == Bound::Lower
                        && hit.depth >= depth - 3
                        && hit.score.abs() < MATE_IN_MAX_PLY
                    {
                        let singular_beta = hit.score - depth;
                        let singular_depth = (depth - 1) / 2;

                        self.ss.node_mut(ply).excluded = Some(mv);
                        let singular_score =
                            self.negamax(singular_depth, singular_beta - 1, singular_beta);
                        self.ss.node_mut(ply).excluded = None;

                        if singular_score < singular_beta {
                            search_depth += 1;
                            let prior_doubles = if ply > 0 {
                                self.ss.node(ply - 1).double_extensions
                            } else {
                                0
                            };
                            if singular_score < singular_beta - 20
                                && self.ss.node(ply).double_extensions <= 5
                            {
                                search_depth += 1;
                                self.ss.node_mut(ply).double_extensions = prior_doubles + 1;
                            }
                        } else if hit.score >= beta {
                            return hit.score;
                        } else {
                            // Not singular, not a cutoff: the TT move gets a
                            // shallower look.
                            search_depth = (search_depth - 1).max(1);
                        }
                    }
                }
            }

            let is_killer = self.ss.is_killer(ply, mv);

            self.do_move(mv);

            let mut score = -INF;
            let mut fullsearch = !is_pv || !first_move;

            // Late-move reductions: late, unexciting moves get a reduced
            // null-window probe first.
            if depth >= 3 && !in_check && move_idx > 2 * (1 + i32::from(is_pv)) {
                let mut reduction =
                    lmr_reduction(is_quiet, depth, move_idx as usize).min(depth - 1);
                reduction += i32::from(!improving);
                reduction += i32::from(!is_pv);
                if is_killer {
                    reduction -= 2;
                }
                let reduction = reduction.clamp(1, depth - 1);

                score = -self.negamax(search_depth - reduction - 1, -alpha - 1, -alpha);
                fullsearch = score > alpha && reduction != 1;

                // The probe beat expectations by a margin: look one deeper.
                if score > best_eval + 70 + 12 * (search_depth - reduction) {
                    search_depth += 1;
                }
            }

            if fullsearch {
                score = -self.negamax(search_depth - 1, -alpha - 1, -alpha);
            }

            // PVS: the first move, and any move landing inside the window,
            // gets the full window.
            if is_pv && (first_move || (score > alpha && score < beta)) {
                score = -self.negamax(search_depth - 1, -beta, -alpha);
            }

            self.undo_move();

            if is_root {
                *self.root_time.entry(mv).or_insert(0) += self.nodes - begin_nodes;
            }

            // Out of time: the result is garbage, the caller discards it.
            if self.tm.should_stop() {
                return 0;
            }

            if score > best_eval {
                best_eval = score;
                local_best = Some(mv);
            }
            if score > alpha {
                alpha = score;
            }

            if alpha >= beta {
                if is_quiet {
                    self.ss.store_killer(ply, mv);
                    self.history.update_quiets(
                        &self.positions,
                        &board,
                        quiets.moves(),
                        mv,
                        depth,
                    );
                }
                if is_cap {
                    self.history
                        .update_captures(&board, captures.moves(), mv, depth);
                }
                break;
            }

            first_move = false;
            move_idx += 1;
        }

        let local_best =
            local_best.expect("negamax exhausted a non-empty move list without a best move");

        let best_valid = !self.tm.should_stop() && excluded.is_none();
        if is_root && best_valid {
            self.best_move = Some(local_best);
        }

        let bound = if best_eval <= alpha_org {
            Bound::Upper
        } else if best_eval >= beta {
            Bound::Lower
        } else {
            Bound::Exact
        };
        if best_valid {
            self.tt
                .store(hash, depth, best_eval, bound, Some(local_best), ply);
        }

        best_eval
    }

    // -----------------------------------------------------------------------
    // Quiescence
    // -----------------------------------------------------------------------

    pub(crate) fn qsearch(&mut self, mut alpha: i32, beta: i32) -> i32 {
        if self.thread_id == 0 && self.nodes % 4096 == 0 {
            self.tm.update_time();
        }

        self.nodes += 1;

        let board = self.board().clone();
        let ply = self.ply();
        let is_pv = beta - alpha > 1;

        if ply >= MAX_PLY {
            return self.evaluate();
        }
        if self.positions.is_draw() {
            return 0;
        }

        let moves = MoveList::legal(&board);
        if moves.is_empty() {
            return if !board.checkers().is_empty() {
                mated_in(ply)
            } else {
                0
            };
        }

        let hash = board.hash();
        let mut tt_hit = self.tt.probe(hash, ply);
        if let Some(hit) = &tt_hit {
            if let Some(tt_mv) = hit.mv {
                if !board.is_legal(tt_mv) {
                    tt_hit = None;
                } else {
                    let mut child = board.clone();
                    child.play_unchecked(tt_mv);
                    if self.positions.would_draw(&child) {
                        tt_hit = None;
                    }
                }
            }
        }
        if !is_pv {
            if let Some(hit) = &tt_hit {
                let cutoff = match hit.bound {
                    Bound::Exact => true,
                    Bound::Lower => hit.score >= beta,
                    Bound::Upper => hit.score <= alpha,
                    Bound::None => false,
                };
                if cutoff {
                    self.tt_hits += 1;
                    return hit.score;
                }
            }
        }

        // Stand pat: doing nothing is always on the table.
        let stand_pat = self.evaluate();
        self.ss.node_mut(ply).eval = stand_pat;
        if stand_pat >= beta {
            return beta;
        }
        if stand_pat > alpha {
            alpha = stand_pat;
        }

        let mut tactical = moves.tactical(&board);
        let tt_move = tt_hit.as_ref().and_then(|hit| hit.mv);
        let killer1 = self.ss.node(ply).killer1;
        let killer2 = self.ss.node(ply).killer2;
        score_moves(
            &mut tactical,
            &board,
            &self.positions,
            &self.history,
            tt_move,
            killer1,
            killer2,
        );
        tactical.sort();

        let mut best_eval = stand_pat;
        for idx in 0..tactical.len() {
            let entry = tactical.get(idx);
            let mv = entry.mv;

            // Hopeless captures: deeply negative SEE, or not enough upside
            // to reach alpha even when the capture stands.
            if !is_pv {
                if let Some(victim) = board.piece_on(mv.to) {
                    let upside = i64::from(crate::search::see::piece_value(victim))
                        + 2 * entry.score
                        + i64::from(best_eval);
                    if entry.score < -5_000_000 || upside < i64::from(alpha) {
                        continue;
                    }
                }
            }

            self.do_move(mv);
            let score = -self.qsearch(-beta, -alpha);
            self.undo_move();

            if self.tm.should_stop() {
                break;
            }

            if score > best_eval {
                best_eval = score;
            }
            if best_eval > alpha {
                alpha = best_eval;
            }
            if alpha >= beta {
                break;
            }
        }

        best_eval
    }
}
