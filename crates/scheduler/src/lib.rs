//! Cooperative task scheduling for the viewer
//!
//! Long work such as rasterizing pages is split into small tasks and run
//! in bounded batches, with control handed back to the host between
//! slices so the UI thread keeps painting. The yield mechanism is probed
//! once at construction: a host-provided scheduler primitive when one
//! exists, otherwise a generic fallback.
//!
//! # Example
//!
//! ```
//! use quire_scheduler::{RunnerConfig, StepResult, Task, TaskRunner};
//!
//! let mut runner = TaskRunner::new(RunnerConfig::default());
//!
//! let tasks: Vec<Box<dyn Task>> = vec![
//!     Box::new(|| StepResult::Complete),
//!     Box::new(|| StepResult::Complete),
//! ];
//!
//! runner.run_batched(tasks);
//! assert_eq!(runner.stats().tasks_completed, 2);
//! ```

mod budget;
mod host;
mod runner;

pub use budget::{FrameBudget, FRAME_BUDGET_60FPS};
pub use host::{
    select_yield_backend, HostScheduler, HostYield, PostPriority, ThreadYield, TimerYield,
    YieldBackend,
};
pub use runner::{
    HostProfile, RunnerConfig, RunnerStats, StepResult, Task, TaskRunner, DEFAULT_BATCH_SIZE,
    TASK_SLICE,
};
