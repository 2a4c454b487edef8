//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one execution attempt on the cluster.
///
/// Assigned when the task configuration is built and reported back by every
/// event the cluster emits for that attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new TaskId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh attempt identity for the given run.
    ///
    /// The run identity is kept as a readable prefix: `<run_id>.<uuid>`.
    pub fn generate(run_id: &RunId) -> Self {
        Self(format!("{}.{}", run_id, Uuid::new_v4().simple()))
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Logical identity of the action run a task executes.
///
/// Stable across retries, unlike [`TaskId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Create a new RunId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_generate_is_unique_per_attempt() {
        let run_id = RunId::new("my_service.job.1.action");
        let id1 = TaskId::generate(&run_id);
        let id2 = TaskId::generate(&run_id);
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("my_service.job.1.action."));
    }

    #[test]
    fn test_id_display() {
        let id = TaskId::new("123abcuuid");
        assert_eq!(format!("{}", id), "123abcuuid");
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = RunId::new("job.2.action");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"job.2.action\"");
    }
}
