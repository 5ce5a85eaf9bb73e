//! Error types for the execution primitives.

use thiserror::Error;

/// Errors raised while creating or driving task runners.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A dedicated runner thread could not be spawned.
    #[error("failed to spawn runner thread `{name}`: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The rayon pool backing a [`ThreadPoolRunner`](crate::task_runner::ThreadPoolRunner)
    /// could not be built.
    #[error("failed to build thread pool: {0}")]
    ThreadPoolBuild(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
