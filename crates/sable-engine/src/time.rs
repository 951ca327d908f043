//! Clock arithmetic: turn remaining time and increment into search budgets.
//!
//! Basic budget enforcement only: the clock is split evenly over an assumed
//! number of remaining moves, the increment tops the share up, and a hard
//! cap keeps any single move from draining the clock.

use std::time::Duration;

use crate::search::control::SearchLimits;

/// Moves assumed left in the game when the GUI gives no `movestogo`.
const DEFAULT_HORIZON: u32 = 24;

/// A search never gets less than this.
const FLOOR: Duration = Duration::from_millis(1);

/// Soft and hard budgets for one move.
///
/// The soft budget is one horizon-share of the clock plus half the
/// increment (the increment refunds itself, but spending it all would leave
/// no cushion). The hard budget allows overshooting the share a few times
/// over, but never more than a quarter of what is left on the clock.
pub fn compute_limits(
    remaining: Duration,
    increment: Duration,
    moves_to_go: Option<u32>,
) -> (Duration, Duration) {
    // Held back for move transmission latency, so the flag never falls on
    // overhead alone.
    let margin = (remaining / 16).min(Duration::from_millis(50));
    let usable = remaining.saturating_sub(margin);
    if usable.is_zero() {
        return (FLOOR, FLOOR);
    }

    let horizon = moves_to_go.unwrap_or(DEFAULT_HORIZON).max(1);
    let share = usable / horizon + increment / 2;

    let hard = (share * 4).min(usable / 4).clamp(FLOOR, usable);
    let soft = share.clamp(FLOOR, hard);

    (soft, hard)
}

/// Budget for a whole search from clock parameters and an optional depth cap.
pub fn limits_for_clock(
    remaining: Duration,
    increment: Duration,
    moves_to_go: Option<u32>,
    depth: Option<i32>,
) -> SearchLimits {
    let (soft, hard) = compute_limits(remaining, increment, moves_to_go);
    SearchLimits {
        depth,
        soft: Some(soft),
        hard: Some(hard),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_stays_at_or_below_hard() {
        for (remaining, increment) in [
            (Duration::from_secs(60), Duration::ZERO),
            (Duration::from_secs(60), Duration::from_secs(2)),
            (Duration::from_millis(200), Duration::from_secs(10)),
            (Duration::from_secs(1), Duration::ZERO),
        ] {
            let (soft, hard) = compute_limits(remaining, increment, None);
            assert!(soft <= hard, "{remaining:?}+{increment:?}: {soft:?} > {hard:?}");
            assert!(hard <= remaining);
            assert!(soft >= FLOOR);
        }
    }

    #[test]
    fn increment_raises_the_soft_budget() {
        let (without, _) = compute_limits(Duration::from_secs(60), Duration::ZERO, None);
        let (with, _) = compute_limits(Duration::from_secs(60), Duration::from_secs(2), None);
        assert!(with > without);
    }

    #[test]
    fn scramble_mode_near_flag_fall() {
        let (soft, hard) = compute_limits(Duration::from_millis(5), Duration::ZERO, None);
        assert_eq!(soft, FLOOR);
        assert_eq!(hard, FLOOR);
    }

    #[test]
    fn moves_to_go_splits_the_clock() {
        let (few, _) = compute_limits(Duration::from_secs(60), Duration::ZERO, Some(2));
        let (many, _) = compute_limits(Duration::from_secs(60), Duration::ZERO, Some(40));
        assert!(few > many);
    }

    #[test]
    fn hard_cap_holds_a_quarter_of_the_clock() {
        // A huge increment cannot push the hard budget past usable / 4.
        let remaining = Duration::from_secs(40);
        let (_, hard) = compute_limits(remaining, Duration::from_secs(600), None);
        assert!(hard <= remaining / 4);
    }

    #[test]
    fn clock_limits_carry_the_depth_cap() {
        let limits = limits_for_clock(Duration::from_secs(10), Duration::ZERO, None, Some(12));
        assert_eq!(limits.depth, Some(12));
        assert!(limits.soft.is_some());
        assert!(limits.hard.is_some());
    }
}
