//! State machine for one task attempt on the cluster.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::event::TaskEvent;
use crate::ids::{RunId, TaskId};
use crate::output::{OutputStream, TaskSerializer};
use crate::status::{StatusCode, TaskState};
use crate::task_config::TaskConfig;

/// Tracks one execution attempt of an action run from creation to outcome.
///
/// The task is mutated only through [`ClusterTask::handle_event`] (and
/// [`ClusterTask::started`]). Once a terminal event has been applied it no
/// longer changes.
pub struct ClusterTask {
    run_id: RunId,
    config: TaskConfig,
    serializer: Arc<dyn TaskSerializer>,
    state: TaskState,
    last_status: Option<StatusCode>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl ClusterTask {
    /// Create a new task in `Pending`.
    pub fn new(run_id: RunId, config: TaskConfig, serializer: Arc<dyn TaskSerializer>) -> Self {
        Self {
            run_id,
            config,
            serializer,
            state: TaskState::Pending,
            last_status: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Identity the cluster reports for this attempt.
    pub fn task_id(&self) -> &TaskId {
        &self.config.task_id
    }

    /// Action run this task executes.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Configuration handed to the runner.
    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Status code of the last accepted event.
    pub fn last_status(&self) -> Option<&StatusCode> {
        self.last_status.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Any terminal state reached.
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    /// Finished successfully.
    pub fn is_complete(&self) -> bool {
        self.state == TaskState::Succeeded
    }

    /// Finished for any reason other than success.
    pub fn is_failed(&self) -> bool {
        self.state == TaskState::Failed
    }

    /// Mark the task as already running.
    ///
    /// Used when attaching to an attempt whose staging and running events
    /// were never observed.
    pub fn started(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = self.state.advance(TaskState::Running);
        self.started_at.get_or_insert_with(Utc::now);
    }

    /// Apply one event from the cluster.
    pub fn handle_event(&mut self, event: &TaskEvent) {
        if event.task_id != self.config.task_id {
            debug!(
                task_id = %self.config.task_id,
                event_task_id = %event.task_id,
                "Ignoring event for another task"
            );
            return;
        }

        if self.state.is_terminal() {
            debug!(
                task_id = %self.config.task_id,
                state = %self.state,
                status = %event.status,
                "Ignoring event for finished task"
            );
            return;
        }

        let next = Self::next_state(event);

        if let Err(e) = self.log_event_info(event) {
            warn!(
                task_id = %self.config.task_id,
                error = %e,
                "Failed to record task event"
            );
        }

        self.last_status = Some(event.status.clone());
        match next {
            Some(next) => self.transition(next),
            None => info!(
                task_id = %self.config.task_id,
                status = %event.status,
                "Unhandled non-terminal status"
            ),
        }
    }

    fn next_state(event: &TaskEvent) -> Option<TaskState> {
        if event.terminal {
            if event.success && event.status.is_success() {
                Some(TaskState::Succeeded)
            } else {
                Some(TaskState::Failed)
            }
        } else if event.status.is_running() {
            Some(TaskState::Running)
        } else if event.status.is_pending() {
            Some(TaskState::Pending)
        } else {
            None
        }
    }

    fn transition(&mut self, next: TaskState) {
        let previous = self.state;
        self.state = previous.advance(next);
        if previous == self.state {
            return;
        }

        info!(
            task_id = %self.config.task_id,
            run_id = %self.run_id,
            from = %previous,
            to = %self.state,
            "Task state changed"
        );

        let now = Utc::now();
        if self.state == TaskState::Running {
            self.started_at.get_or_insert(now);
        }
        if self.state.is_terminal() {
            self.finished_at = Some(now);
            let line = format!("Task {} exited: {}", self.config.task_id, self.state);
            if let Err(e) = self.serializer.write(OutputStream::Stderr, &line) {
                warn!(task_id = %self.config.task_id, error = %e, "Failed to record task exit");
            }
        }
    }

    fn log_event_info(&self, event: &TaskEvent) -> Result<(), CoreError> {
        let line = serde_json::to_string(&json!({
            "task_id": event.task_id,
            "platform_type": event.status,
            "terminal": event.terminal,
            "success": event.success,
            "message": event.message,
            "raw": event.raw,
        }))?;
        self.serializer.write(OutputStream::Stderr, &line)
    }
}

impl fmt::Debug for ClusterTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterTask")
            .field("task_id", &self.config.task_id)
            .field("run_id", &self.run_id)
            .field("state", &self.state)
            .field("last_status", &self.last_status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::NullSerializer;
    use crate::task_config::TaskSpec;
    use std::sync::Mutex;
    use std::time::Duration;

    const TASK_ID: &str = "123abcuuid";

    /// Records lines, optionally failing every write.
    #[derive(Default)]
    struct RecordingSerializer {
        fail: bool,
        lines: Mutex<Vec<(OutputStream, String)>>,
    }

    impl TaskSerializer for RecordingSerializer {
        fn write(&self, stream: OutputStream, line: &str) -> Result<(), CoreError> {
            self.lines.lock().unwrap().push((stream, line.to_string()));
            if self.fail {
                return Err(CoreError::InvalidInput("output closed".to_string()));
            }
            Ok(())
        }
    }

    fn task_with(serializer: Arc<dyn TaskSerializer>) -> ClusterTask {
        let config = TaskConfig::from_spec(
            TaskId::new(TASK_ID),
            "my_service.job.1.action",
            TaskSpec::new("echo hello world", 1.0, 10.0),
            Vec::new(),
            Duration::from_secs(300),
        );
        ClusterTask::new(RunId::new("my_service.job.1.action"), config, serializer)
    }

    fn task() -> ClusterTask {
        task_with(Arc::new(NullSerializer))
    }

    fn event(status: &str) -> TaskEvent {
        TaskEvent::new(TaskId::new(TASK_ID), status)
    }

    fn terminal(status: Option<&str>, success: bool) -> TaskEvent {
        TaskEvent::terminal(TaskId::new(TASK_ID), StatusCode::parse(status), success)
    }

    #[test]
    fn test_handle_staging() {
        let mut task = task();
        task.handle_event(&event("staging"));
        assert_eq!(task.state(), TaskState::Pending);
        assert_eq!(task.last_status(), Some(&StatusCode::Staging));
    }

    #[test]
    fn test_handle_running() {
        let mut task = task();
        task.handle_event(&event("running"));
        assert_eq!(task.state(), TaskState::Running);
        assert!(task.started_at().is_some());
    }

    #[test]
    fn test_handle_running_for_other_task() {
        let mut task = task();
        task.handle_event(&TaskEvent::new(TaskId::new("other321"), "running"));
        assert_eq!(task.state(), TaskState::Pending);
        assert!(task.last_status().is_none());
    }

    #[test]
    fn test_handle_finished() {
        let mut task = task();
        task.started();
        task.handle_event(&terminal(Some("finished"), true));
        assert!(task.is_complete());
        assert!(!task.is_failed());
        assert!(task.is_done());
        assert!(task.finished_at().is_some());
    }

    #[test]
    fn test_terminal_failures_are_failed() {
        for code in [Some("failed"), Some("killed"), Some("lost"), Some("error"), None] {
            let mut task = task();
            task.started();
            task.handle_event(&terminal(code, false));
            assert!(task.is_failed(), "code {:?} should fail", code);
            assert!(task.is_done());
            assert!(!task.is_complete());
        }
    }

    #[test]
    fn test_success_flag_needs_success_code() {
        let mut unknown = task();
        unknown.handle_event(&terminal(Some("some_platform_type"), true));
        assert!(unknown.is_failed());

        let mut killed = task();
        killed.handle_event(&terminal(Some("killed"), true));
        assert!(killed.is_failed());
    }

    #[test]
    fn test_pending_may_fail_directly() {
        let mut task = task();
        task.handle_event(&terminal(Some("error"), false));
        assert_eq!(task.state(), TaskState::Failed);
        assert!(task.started_at().is_none());
    }

    #[test]
    fn test_handle_success_sequence() {
        let mut task = task();
        task.handle_event(&event("staging"));
        assert_eq!(task.state(), TaskState::Pending);
        task.handle_event(&event("running"));
        assert_eq!(task.state(), TaskState::Running);
        task.handle_event(&terminal(Some("finished"), true));
        assert!(task.is_complete());

        // Nothing moves a finished task.
        task.handle_event(&terminal(Some("lost"), false));
        task.handle_event(&event("running"));
        task.handle_event(&event("staging"));
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.last_status(), Some(&StatusCode::Finished));
    }

    #[test]
    fn test_staging_after_running_does_not_regress() {
        let mut task = task();
        task.handle_event(&event("running"));
        task.handle_event(&event("staging"));
        assert_eq!(task.state(), TaskState::Running);
    }

    #[test]
    fn test_other_non_terminal_status_is_accepted() {
        let mut task = task();
        task.handle_event(&event("running"));
        task.handle_event(&event("killing"));
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(task.last_status(), Some(&StatusCode::Killing));
    }

    #[test]
    fn test_log_event_error_still_commits() {
        let serializer = Arc::new(RecordingSerializer {
            fail: true,
            ..Default::default()
        });
        let mut task = task_with(serializer.clone());

        task.handle_event(&event("running"));

        assert_eq!(serializer.lines.lock().unwrap().len(), 1);
        assert_eq!(task.state(), TaskState::Running);
    }

    #[test]
    fn test_events_and_exit_are_recorded() {
        let serializer = Arc::new(RecordingSerializer::default());
        let mut task = task_with(serializer.clone());

        task.handle_event(&event("running").with_message("launched"));
        task.handle_event(&terminal(Some("failed"), false));

        let lines = serializer.lines.lock().unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|(stream, _)| *stream == OutputStream::Stderr));

        let first: serde_json::Value = serde_json::from_str(&lines[0].1).unwrap();
        assert_eq!(first["platform_type"], "running");
        assert_eq!(first["message"], "launched");
        assert_eq!(lines[2].1, format!("Task {} exited: failed", TASK_ID));
    }

    #[test]
    fn test_started_does_not_touch_finished_task() {
        let mut task = task();
        task.handle_event(&terminal(Some("lost"), false));
        task.started();
        assert!(task.is_failed());
    }
}
