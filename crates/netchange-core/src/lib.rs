//! Execution primitives for netchange.
//!
//! This crate provides the small runtime the notifier is built on:
//!
//! - [`task_runner`]: explicit executors (`SequencedTaskRunner`,
//!   `ManualTaskRunner`, `InlineTaskRunner`, `ThreadPoolRunner`)
//! - [`observer_list`]: observer registries that deliver on each observer's
//!   own runner
//! - [`timer`]: a restartable one-shot timer
//! - [`serial_worker`]: coalescing, one-at-a-time background jobs
//! - [`sequence`]: sequence identity and affinity checks
//!
//! # Getting Started
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use netchange_core::prelude::*;
//!
//! let runner = ManualTaskRunner::new();
//! let timer = OneShotTimer::new(runner.clone());
//! timer.start(Duration::from_millis(500), || println!("fired"));
//! runner.fast_forward_by(Duration::from_millis(500));
//! ```

pub(crate) mod delayed_queue;
pub mod error;
pub mod logging;
pub mod observer_list;
pub mod sequence;
pub mod serial_worker;
pub mod task_runner;
pub mod timer;

pub use error::{RuntimeError, RuntimeResult};
pub use observer_list::{ObserverId, ObserverList};
pub use sequence::{
    SequenceChecker, SequenceId, are_sequence_checks_enabled, current_sequence,
    set_sequence_checks_enabled,
};
pub use serial_worker::{SerialWorker, SerialWorkerState};
pub use task_runner::{
    InlineTaskRunner, ManualTaskRunner, RunnerConfig, SequencedTaskRunner, SharedTaskRunner, Task,
    TaskRunner, TaskRunnerExt, ThreadPoolConfig, ThreadPoolRunner,
};
pub use timer::OneShotTimer;

/// Commonly used items.
pub mod prelude {
    pub use crate::observer_list::ObserverList;
    pub use crate::serial_worker::SerialWorker;
    pub use crate::task_runner::{
        InlineTaskRunner, ManualTaskRunner, SequencedTaskRunner, SharedTaskRunner, TaskRunner,
        TaskRunnerExt, ThreadPoolRunner,
    };
    pub use crate::timer::OneShotTimer;
}
