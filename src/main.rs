use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cozy_chess::Board;
use tracing::info;

use sable_engine::nnue;
use sable_engine::position::parse_uci_move;
use sable_engine::time::limits_for_clock;
use sable_engine::{Network, SearchHandler, SearchLimits, TimeManager};

/// Chess best-move search with NNUE evaluation.
#[derive(Parser)]
#[command(name = "sable", version, about)]
struct Args {
    /// Position to search as a FEN string; defaults to the starting position.
    #[arg(long)]
    fen: Option<String>,

    /// Moves played after the FEN (long algebraic, e.g. g1f3). Also feeds
    /// repetition detection.
    #[arg(long = "move")]
    moves: Vec<String>,

    /// Restrict the search to these root moves (repeatable).
    #[arg(long = "searchmove")]
    searchmoves: Vec<String>,

    /// Maximum search depth in plies.
    #[arg(long, default_value_t = 10)]
    depth: i32,

    /// Fixed time budget for the move, in milliseconds.
    #[arg(long)]
    movetime_ms: Option<u64>,

    /// Remaining clock time in milliseconds (alternative to --movetime-ms).
    #[arg(long)]
    clock_ms: Option<u64>,

    /// Clock increment in milliseconds; only meaningful with --clock-ms.
    #[arg(long, default_value_t = 0)]
    inc_ms: u64,

    /// Number of Lazy SMP search threads.
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Transposition table size in MiB.
    #[arg(long, default_value_t = 16)]
    hash: usize,

    /// NNUE weight blob. Without it the engine evaluates with a zeroed
    /// network (material-blind, still legal).
    #[arg(long)]
    eval_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if let Some(path) = &args.eval_file {
        let network = Network::load(path)
            .with_context(|| format!("loading weight blob {}", path.display()))?;
        nnue::install(network);
        info!(path = %path.display(), "weight blob loaded");
    }

    let base: Board = match &args.fen {
        Some(fen) => fen
            .parse()
            .map_err(|err| anyhow::anyhow!("invalid FEN `{fen}`: {err:?}"))?,
        None => Board::default(),
    };

    let mut game_moves = Vec::new();
    let mut current = base.clone();
    for text in &args.moves {
        let Some(mv) = parse_uci_move(&current, text) else {
            bail!("move `{text}` is not legal in the given position");
        };
        current.play_unchecked(mv);
        game_moves.push(mv);
    }

    let mut searchmoves = Vec::new();
    for text in &args.searchmoves {
        let Some(mv) = parse_uci_move(&current, text) else {
            bail!("searchmove `{text}` is not legal in the root position");
        };
        searchmoves.push(mv);
    }

    let limits = match (args.movetime_ms, args.clock_ms) {
        (Some(movetime), _) => {
            let budget = Duration::from_millis(movetime);
            SearchLimits {
                depth: Some(args.depth),
                soft: Some(budget),
                hard: Some(budget),
            }
        }
        (None, Some(clock)) => limits_for_clock(
            Duration::from_millis(clock),
            Duration::from_millis(args.inc_ms),
            None,
            Some(args.depth),
        ),
        (None, None) => SearchLimits {
            depth: Some(args.depth),
            ..SearchLimits::default()
        },
    };

    let stopped = Arc::new(AtomicBool::new(false));
    let tm = TimeManager::new(stopped, limits);

    let mut handler = SearchHandler::new(args.hash);
    handler.set(args.threads, tm, base, &game_moves, &searchmoves);
    let result = handler.start();

    info!(
        depth = result.depth,
        nodes = result.nodes,
        score = result.score,
        "search finished"
    );
    Ok(())
}
