//! Notifications delivered by the cluster and by the coordinator itself.

use crate::ids::TaskId;
use crate::status::StatusCode;
use serde::{Deserialize, Serialize};

/// Status update for a single task attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Attempt this event refers to.
    pub task_id: TaskId,
    /// Platform status code.
    #[serde(rename = "platform_type", default)]
    pub status: StatusCode,
    /// Payload exactly as the cluster sent it.
    #[serde(default)]
    pub raw: serde_json::Value,
    /// No further events will arrive for this task.
    #[serde(default)]
    pub terminal: bool,
    /// Only meaningful when `terminal` is set.
    #[serde(default)]
    pub success: bool,
    /// Human readable reason, when the cluster gives one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskEvent {
    /// Create a non-terminal event.
    pub fn new(task_id: TaskId, status: impl Into<StatusCode>) -> Self {
        Self {
            task_id,
            status: status.into(),
            raw: serde_json::Value::Null,
            terminal: false,
            success: false,
            message: None,
        }
    }

    /// Create a terminal event.
    pub fn terminal(task_id: TaskId, status: impl Into<StatusCode>, success: bool) -> Self {
        Self {
            terminal: true,
            success,
            ..Self::new(task_id, status)
        }
    }

    /// Builder method to attach a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Builder method to attach the raw payload.
    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }
}

/// Messages that control the coordinator rather than a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMessage {
    /// Stop the runner and end the dispatch loop.
    Stop,
}

/// Control notification unrelated to any task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEvent {
    pub message: ControlMessage,
}

impl ControlEvent {
    /// The stop request.
    pub fn stop() -> Self {
        Self {
            message: ControlMessage::Stop,
        }
    }
}

/// Everything that flows through the coordinator's event queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClusterEvent {
    Task(TaskEvent),
    Control(ControlEvent),
}

impl ClusterEvent {
    /// Shorthand for a stop control event.
    pub fn stop() -> Self {
        Self::Control(ControlEvent::stop())
    }
}

impl From<TaskEvent> for ClusterEvent {
    fn from(event: TaskEvent) -> Self {
        Self::Task(event)
    }
}

impl From<ControlEvent> for ClusterEvent {
    fn from(event: ControlEvent) -> Self {
        Self::Control(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_event_from_wire() {
        let event: ClusterEvent = serde_json::from_value(json!({
            "kind": "task",
            "task_id": "123abcuuid",
            "platform_type": "running",
            "raw": {"state": "TASK_RUNNING"},
        }))
        .unwrap();

        match event {
            ClusterEvent::Task(ev) => {
                assert_eq!(ev.task_id, TaskId::new("123abcuuid"));
                assert_eq!(ev.status, StatusCode::Running);
                assert!(!ev.terminal);
                assert_eq!(ev.raw["state"], "TASK_RUNNING");
            }
            other => panic!("Expected task event, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_platform_type_is_unrecognized() {
        let event: TaskEvent = serde_json::from_value(json!({
            "task_id": "123abcuuid",
            "terminal": true,
        }))
        .unwrap();

        assert_eq!(event.status, StatusCode::Unrecognized(None));
        assert!(event.terminal);
        assert!(!event.success);
    }

    #[test]
    fn test_control_stop_from_wire() {
        let event: ClusterEvent =
            serde_json::from_value(json!({"kind": "control", "message": "stop"})).unwrap();
        assert_eq!(event, ClusterEvent::stop());
    }
}
