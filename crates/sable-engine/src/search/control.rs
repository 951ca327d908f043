//! Search control: the shared stop flag and the depth/time budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Budget for one search, as handed to the coordinator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchLimits {
    /// Maximum iteration depth.
    pub depth: Option<i32>,
    /// Soft time budget: no new iteration starts past this point.
    pub soft: Option<Duration>,
    /// Hard time budget: the search aborts mid-iteration past this point.
    pub hard: Option<Duration>,
}

/// Shared between all workers of one search. Thread 0 polls the clock every
/// 4096 nodes through [`update_time`](TimeManager::update_time); every other
/// worker only reads the atomic flag.
pub struct TimeManager {
    stopped: Arc<AtomicBool>,
    start: Mutex<Option<Instant>>,
    limits: SearchLimits,
}

impl TimeManager {
    pub fn new(stopped: Arc<AtomicBool>, limits: SearchLimits) -> Self {
        Self {
            stopped,
            start: Mutex::new(None),
            limits,
        }
    }

    /// No budget at all: stops only on the external flag.
    pub fn infinite(stopped: Arc<AtomicBool>) -> Self {
        Self::new(stopped, SearchLimits::default())
    }

    /// Start the clock. Called by the coordinator right before the workers
    /// are spawned.
    pub fn start(&self) {
        *self.start.lock().expect("start mutex poisoned") = Some(Instant::now());
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn should_stop(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// The externally shareable stop flag (for `stop_all` from another thread).
    pub fn stop_flag(&self) -> &Arc<AtomicBool> {
        &self.stopped
    }

    /// Announce the upcoming iteration depth. Trips the stop flag when the
    /// depth budget is exhausted or the soft time limit has already elapsed.
    pub fn update_depth(&self, depth: i32) {
        if let Some(max_depth) = self.limits.depth {
            if depth > max_depth {
                self.stop();
                return;
            }
        }
        if let Some(soft) = self.limits.soft {
            if self.elapsed() >= soft {
                self.stop();
            }
        }
    }

    /// Hard-limit poll; cheap enough to call every few thousand nodes.
    pub fn update_time(&self) {
        if let Some(hard) = self.limits.hard {
            if self.elapsed() >= hard {
                self.stop();
            }
        }
    }

    /// Time since [`start`](Self::start); zero if the clock never started.
    pub fn elapsed(&self) -> Duration {
        self.start
            .lock()
            .expect("start mutex poisoned")
            .map_or(Duration::ZERO, |s| s.elapsed())
    }
}
