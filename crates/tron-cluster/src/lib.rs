//! Tron Cluster Coordinator Library
//!
//! This crate maps action runs onto tasks launched on a shared compute
//! cluster, tracks every task through the cluster's event stream and handles
//! leader discovery, submission, event dispatch and shutdown.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
#[cfg(any(test, feature = "test-util"))]
pub mod fakes;
pub mod leader;
pub mod queue;
pub mod runner;

pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorBuilder, TaskHandle};
pub use error::ClusterError;
pub use executor::{
    ExecutionClient, ExecutionClientFactory, HttpExecutionClient, ProviderConfig, ProviderRegistry,
};
pub use leader::{HttpLeaderResolver, LeaderResolver};
pub use queue::{EventQueue, EventSender, UnboundedEventQueue};
pub use runner::{Runner, SubscriptionRunner};
