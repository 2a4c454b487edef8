//! Cluster coordinator errors.

use thiserror::Error;

use tron_core::{CoreError, TaskId};

/// Errors raised while building or driving the coordinator.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The cluster's current leader could not be determined.
    #[error("Failed to resolve leader for '{address}': {reason}")]
    LeaderResolution { address: String, reason: String },

    /// No execution provider registered under this name.
    #[error("Unknown execution provider: {0}")]
    UnknownProvider(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The executor refused or failed a launch.
    #[error("Failed to launch task {task_id}: {reason}")]
    Launch { task_id: TaskId, reason: String },

    /// The executor refused or failed a kill request.
    #[error("Failed to kill task {task_id}: {reason}")]
    Kill { task_id: TaskId, reason: String },

    /// The runner no longer accepts work.
    #[error("Runner is stopping")]
    RunnerStopped,

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Core domain error.
    #[error(transparent)]
    Core(#[from] CoreError),
}
