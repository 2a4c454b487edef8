//! Runner: launches task configurations and relays executor events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tron_core::{RunId, StatusCode, TaskConfig, TaskEvent, TaskId, TaskSpec};

use crate::error::ClusterError;
use crate::executor::ExecutionClient;
use crate::queue::EventSender;

/// Delay before re-subscribing to a dropped executor event stream.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Launches tasks on the cluster on behalf of the coordinator.
pub trait Runner: Send + Sync {
    /// Launch a task. Failures are reported as task events, never returned.
    fn run(&self, config: TaskConfig);

    /// Ask the cluster to kill a launched task. Its end arrives as an event.
    fn kill(&self, task_id: TaskId);

    /// Stop launching and stop relaying events.
    fn stop(&self);

    /// Returns true once `stop` has been called.
    fn is_stopping(&self) -> bool;

    /// Build the configuration for one attempt of `run_id`.
    fn task_config(
        &self,
        run_id: &RunId,
        spec: TaskSpec,
        uris: Vec<String>,
        offer_timeout: Duration,
    ) -> TaskConfig {
        TaskConfig::from_spec(
            TaskId::generate(run_id),
            run_id.as_str(),
            spec,
            uris,
            offer_timeout,
        )
    }
}

/// Runner bound to an execution client and the coordinator's event queue.
///
/// Holds a subscription to the executor's event stream for its whole life,
/// re-subscribing when the stream drops, until stopped.
pub struct SubscriptionRunner {
    client: Arc<dyn ExecutionClient>,
    events: EventSender,
    stopping: AtomicBool,
    cancel: CancellationToken,
}

impl SubscriptionRunner {
    /// Create the runner and start relaying executor events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(client: Arc<dyn ExecutionClient>, events: EventSender) -> Arc<Self> {
        let runner = Arc::new(Self {
            client,
            events,
            stopping: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(subscribe_loop(
            runner.client.clone(),
            runner.events.clone(),
            runner.cancel.clone(),
        ));

        runner
    }
}

impl Runner for SubscriptionRunner {
    fn run(&self, config: TaskConfig) {
        if self.is_stopping() {
            warn!(task_id = %config.task_id, "Runner is stopping, refusing launch");
            self.events.send(
                TaskEvent::terminal(config.task_id, StatusCode::Error, false)
                    .with_message(ClusterError::RunnerStopped.to_string()),
            );
            return;
        }

        let client = self.client.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            info!(task_id = %config.task_id, cmd = %config.cmd, "Launching task");
            if let Err(e) = client.launch(&config).await {
                error!(task_id = %config.task_id, error = %e, "Launch failed");
                events.send(
                    TaskEvent::terminal(config.task_id, StatusCode::Error, false)
                        .with_message(e.to_string()),
                );
            }
        });
    }

    fn kill(&self, task_id: TaskId) {
        if self.is_stopping() {
            warn!(task_id = %task_id, "Runner is stopping, not killing task");
            return;
        }

        let client = self.client.clone();
        tokio::spawn(async move {
            info!(task_id = %task_id, "Killing task");
            if let Err(e) = client.kill(&task_id).await {
                warn!(task_id = %task_id, error = %e, "Kill failed");
            }
        });
    }

    fn stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            info!("Stopping runner");
            self.cancel.cancel();
        }
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

async fn subscribe_loop(
    client: Arc<dyn ExecutionClient>,
    events: EventSender,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        if let Err(e) = client.stream_events(events.clone(), cancel.clone()).await {
            warn!(error = %e, "Executor event stream failed");
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {
                info!("Re-subscribing to executor events");
            }
        }
    }
}
