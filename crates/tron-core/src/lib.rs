//! Tron Cluster Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network or cluster clients
//! - Async runtime specifics
//!
//! It holds the task identifiers, the events the cluster delivers, task
//! configuration and the per-attempt task state machine.

pub mod error;
pub mod event;
pub mod ids;
pub mod output;
pub mod status;
pub mod task;
pub mod task_config;

// Re-export commonly used types
pub use error::CoreError;
pub use event::{ClusterEvent, ControlEvent, ControlMessage, TaskEvent};
pub use ids::{RunId, TaskId};
pub use output::{FileSerializer, NullSerializer, OutputStream, TaskSerializer};
pub use status::{StatusCode, TaskState};
pub use task::ClusterTask;
pub use task_config::{Constraint, DockerParameter, TaskConfig, TaskSpec, Volume, VolumeMode};
