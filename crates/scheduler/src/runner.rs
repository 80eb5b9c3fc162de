//! Cooperative batched task execution
//!
//! Runs a sequence of independent work items in submission order, yielding
//! control back to the host between bounded slices so that a long batch
//! never starves input handling or painting.
//!
//! A work item is a [`Task`]: a small state machine polled through
//! [`Task::run_step`]. Single-shot work completes in one step; work with
//! internal suspension points (resolve, then draw) returns
//! [`StepResult::Pending`] in between, and the runner treats each step
//! boundary as a legal yield point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::budget::{FrameBudget, FRAME_BUDGET_60FPS};
use crate::host::{select_yield_backend, HostScheduler, YieldBackend};

/// Longest a single task may run before the runner yields (5ms)
pub const TASK_SLICE: Duration = Duration::from_millis(5);

/// Default number of tasks run between yields
pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Outcome of polling one task step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// The task hit a suspension point and has more work left
    Pending,

    /// The task finished
    Complete,

    /// The task failed; the runner records it and moves on
    Failed,
}

/// A unit of work driven step by step
pub trait Task {
    fn run_step(&mut self) -> StepResult;
}

impl<F> Task for F
where
    F: FnMut() -> StepResult,
{
    fn run_step(&mut self) -> StepResult {
        self()
    }
}

/// Execution profile of the embedding host engine
///
/// Weaker engines get smaller batches so each slice stays short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostProfile {
    /// Full-strength engine, batches of 3
    Standard,

    /// Constrained engine, batches of 2
    Constrained,

    /// Minimal engine, one task per slice
    Minimal,
}

impl HostProfile {
    pub fn batch_size(self) -> usize {
        match self {
            HostProfile::Standard => 3,
            HostProfile::Constrained => 2,
            HostProfile::Minimal => 1,
        }
    }
}

/// Configuration for a [`TaskRunner`]
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Tasks to run before an unconditional yield
    pub batch_size: usize,

    /// Per-task duration that forces a yield when exceeded
    pub task_slice: Duration,

    /// Cumulative duration since the last yield that forces a yield
    pub frame_budget: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            task_slice: TASK_SLICE,
            frame_budget: FRAME_BUDGET_60FPS,
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a configuration from the host engine profile
    pub fn for_profile(profile: HostProfile) -> Self {
        Self::default().with_batch_size(profile.batch_size())
    }

    /// Set the batch size (minimum 1)
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the per-task slice threshold
    pub fn with_task_slice(mut self, task_slice: Duration) -> Self {
        self.task_slice = task_slice;
        self
    }

    /// Set the cumulative frame budget
    pub fn with_frame_budget(mut self, frame_budget: Duration) -> Self {
        self.frame_budget = frame_budget;
        self
    }
}

/// Counters accumulated across `run_batched` calls
#[derive(Debug, Clone, Copy, Default)]
pub struct RunnerStats {
    /// Tasks that ran to completion
    pub tasks_completed: u64,

    /// Tasks that reported failure (swallowed, siblings unaffected)
    pub tasks_failed: u64,

    /// Times control was handed back to the host
    pub yields: u64,

    /// Total steps polled
    pub steps: u64,
}

/// Executes task batches cooperatively
///
/// Tasks run strictly in submission order, each driven to completion
/// before the next starts. After every completed task the runner yields if
/// any of three conditions hold: the batch size has been reached, the task
/// itself overran [`RunnerConfig::task_slice`], or cumulative time since
/// the last yield overran [`RunnerConfig::frame_budget`]. Between steps of
/// a multi-step task only the frame budget is checked. Both the batch
/// count and the budget clock restart after each yield.
///
/// # Example
///
/// ```
/// use quire_scheduler::{RunnerConfig, StepResult, Task, TaskRunner};
///
/// let mut runner = TaskRunner::new(RunnerConfig::default());
///
/// let tasks: Vec<Box<dyn Task>> = (0..4)
///     .map(|_| Box::new(|| StepResult::Complete) as Box<dyn Task>)
///     .collect();
///
/// runner.run_batched(tasks);
/// assert_eq!(runner.stats().tasks_completed, 4);
/// ```
pub struct TaskRunner {
    config: RunnerConfig,
    backend: Box<dyn YieldBackend>,
    stats: RunnerStats,
}

impl TaskRunner {
    /// Create a runner with the generic yield fallback
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_backend(config, select_yield_backend(None))
    }

    /// Create a runner that probes the host scheduler for a yield primitive
    pub fn with_host(config: RunnerConfig, host: Arc<dyn HostScheduler>) -> Self {
        Self::with_backend(config, select_yield_backend(Some(host)))
    }

    /// Create a runner with an explicit yield backend
    pub fn with_backend(config: RunnerConfig, backend: Box<dyn YieldBackend>) -> Self {
        Self { config, backend, stats: RunnerStats::default() }
    }

    /// Run every task to completion, in order, yielding between slices
    ///
    /// A failed task is recorded and skipped; it never aborts the batch.
    pub fn run_batched(&mut self, tasks: Vec<Box<dyn Task>>) {
        let mut since_yield = 0usize;
        let mut budget = FrameBudget::new(self.config.frame_budget);

        for mut task in tasks {
            let task_start = Instant::now();
            let mut failed = false;

            loop {
                let result = task.run_step();
                self.stats.steps += 1;

                match result {
                    StepResult::Pending => {
                        if budget.is_exceeded() {
                            self.yield_control(&mut budget);
                            since_yield = 0;
                        }
                    }
                    StepResult::Complete => {
                        self.stats.tasks_completed += 1;
                        break;
                    }
                    StepResult::Failed => {
                        self.stats.tasks_failed += 1;
                        tracing::warn!("task failed, continuing with next");
                        failed = true;
                        break;
                    }
                }
            }

            // A failed task does not count toward the batch window.
            if failed {
                continue;
            }

            since_yield += 1;
            let task_duration = task_start.elapsed();

            if since_yield >= self.config.batch_size
                || task_duration > self.config.task_slice
                || budget.is_exceeded()
            {
                self.yield_control(&mut budget);
                since_yield = 0;
            }
        }
    }

    fn yield_control(&mut self, budget: &mut FrameBudget) {
        tracing::trace!(backend = self.backend.name(), "yielding to host");
        self.backend.yield_now();
        self.stats.yields += 1;
        budget.reset();
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> RunnerStats {
        self.stats
    }

    /// The active configuration
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }
}
