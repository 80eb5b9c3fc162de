//! Frame budget tracking for cooperative task execution
//!
//! Tracks wall-clock time spent since the last yield so that batched work
//! can hand control back to the host event loop before it misses a frame.

use std::time::{Duration, Instant};

/// Frame budget for 60 FPS displays (16.67ms)
pub const FRAME_BUDGET_60FPS: Duration = Duration::from_micros(16_667);

/// Tracks elapsed time against a per-frame budget
///
/// The budget is measured from the most recent [`FrameBudget::reset`], so a
/// runner that resets after each yield measures "time since the last yield"
/// rather than total running time.
#[derive(Debug, Clone)]
pub struct FrameBudget {
    started: Instant,
    budget: Duration,
}

impl FrameBudget {
    /// Create a budget tracker with a custom budget
    pub fn new(budget: Duration) -> Self {
        Self { started: Instant::now(), budget }
    }

    /// Create a budget tracker for one 60 FPS frame
    pub fn for_60fps() -> Self {
        Self::new(FRAME_BUDGET_60FPS)
    }

    /// Restart the clock for a new frame
    pub fn reset(&mut self) {
        self.started = Instant::now();
    }

    /// Time elapsed since the last reset
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left in the budget, `Duration::ZERO` once exceeded
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// Whether the budget has been used up
    pub fn is_exceeded(&self) -> bool {
        self.remaining() == Duration::ZERO
    }

    /// The configured budget
    pub fn budget(&self) -> Duration {
        self.budget
    }
}

impl Default for FrameBudget {
    fn default() -> Self {
        Self::for_60fps()
    }
}
