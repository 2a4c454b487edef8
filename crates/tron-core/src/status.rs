//! Task states and the status codes reported by the cluster.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Local lifecycle state of a launched task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Task configured or submitted, not yet seen running.
    #[default]
    Pending,
    /// Task reported running by the cluster.
    Running,
    /// Task finished successfully.
    Succeeded,
    /// Task ended for any other reason.
    Failed,
}

impl TaskState {
    /// Returns true if the task reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Position in the forward-only lifecycle.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed => 2,
        }
    }

    /// Move towards `next` unless that would go backwards.
    ///
    /// Terminal states never change.
    pub fn advance(self, next: TaskState) -> TaskState {
        if self.is_terminal() || next.rank() < self.rank() {
            self
        } else {
            next
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status code carried by a task event (`platform_type` on the wire).
///
/// Anything the cluster sends that is not listed here, including a missing
/// code, becomes [`StatusCode::Unrecognized`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum StatusCode {
    Staging,
    Starting,
    Running,
    Killing,
    Unreachable,
    Finished,
    Failed,
    Killed,
    Lost,
    Error,
    Dropped,
    Gone,
    Unrecognized(Option<String>),
}

impl StatusCode {
    /// Parse a platform code. Accepts `running` as well as `TASK_RUNNING`.
    pub fn parse(code: Option<&str>) -> Self {
        let Some(raw) = code else {
            return Self::Unrecognized(None);
        };
        let normalized = raw.trim().to_ascii_lowercase();
        let name = normalized.strip_prefix("task_").unwrap_or(&normalized);
        match name {
            "staging" => Self::Staging,
            "starting" => Self::Starting,
            "running" => Self::Running,
            "killing" => Self::Killing,
            "unreachable" => Self::Unreachable,
            "finished" => Self::Finished,
            "failed" => Self::Failed,
            "killed" => Self::Killed,
            "lost" => Self::Lost,
            "error" => Self::Error,
            "dropped" => Self::Dropped,
            "gone" => Self::Gone,
            _ => Self::Unrecognized(Some(raw.to_string())),
        }
    }

    /// The code as the platform spells it, if any.
    pub fn as_str(&self) -> Option<&str> {
        let s = match self {
            Self::Staging => "staging",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Killing => "killing",
            Self::Unreachable => "unreachable",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Killed => "killed",
            Self::Lost => "lost",
            Self::Error => "error",
            Self::Dropped => "dropped",
            Self::Gone => "gone",
            Self::Unrecognized(raw) => return raw.as_deref(),
        };
        Some(s)
    }

    /// Codes reported while the cluster is still placing the task.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Staging | Self::Starting)
    }

    /// Returns true for the running code.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true only for the recognized success code.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        Self::Unrecognized(None)
    }
}

impl From<Option<String>> for StatusCode {
    fn from(code: Option<String>) -> Self {
        Self::parse(code.as_deref())
    }
}

impl From<StatusCode> for Option<String> {
    fn from(code: StatusCode) -> Self {
        code.as_str().map(str::to_string)
    }
}

impl From<&str> for StatusCode {
    fn from(code: &str) -> Self {
        Self::parse(Some(code))
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str().unwrap_or("unknown"))
    }
}
