//! Cluster coordinator: task registry, submission and event dispatch.
//!
//! The coordinator owns the runner, the event queue and the registry of every
//! submitted task. A single dispatch loop drains the queue and applies one
//! event at a time, so a task's state machine never sees concurrent events.
//!
//! ```text
//! executor ──► runner ──┐
//!                       ├──► EventQueue ──► dispatch loop ──► registry[task_id].handle_event
//! stop()  ──────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tron_core::{
    ClusterEvent, ClusterTask, ControlMessage, RunId, StatusCode, TaskEvent, TaskId,
    TaskSerializer, TaskSpec, TaskState,
};

use crate::config::{Config, DOCKERCFG_LOCATION, MESOS_ROLE, OFFER_TIMEOUT, PROVIDER_NAME};
use crate::error::ClusterError;
use crate::executor::{ExecutionClient, ExecutionClientFactory, ProviderConfig, ProviderRegistry};
use crate::leader::{HttpLeaderResolver, LeaderResolver};
use crate::queue::{EventQueue, EventSender, UnboundedEventQueue};
use crate::runner::{Runner, SubscriptionRunner};

type RunnerConstructor =
    Box<dyn FnOnce(Arc<dyn ExecutionClient>, EventSender) -> Arc<dyn Runner> + Send>;

/// A registered task plus the channel its observers watch.
struct Entry {
    task: ClusterTask,
    state_tx: watch::Sender<TaskState>,
}

struct Inner {
    runner: Arc<dyn Runner>,
    queue: Arc<dyn EventQueue>,
    tasks: Mutex<HashMap<TaskId, Entry>>,
}

impl Inner {
    async fn process_event(&self, event: ClusterEvent) {
        match event {
            ClusterEvent::Task(event) => self.process_task_event(&event).await,
            ClusterEvent::Control(control) => match control.message {
                ControlMessage::Stop => {
                    info!("Received stop, shutting down cluster runner");
                    self.runner.stop();
                    self.queue.cancel();
                }
            },
        }
    }

    async fn process_task_event(&self, event: &TaskEvent) {
        let mut tasks = self.tasks.lock().await;
        let entry = tasks
            .get_mut(&event.task_id)
            .filter(|entry| entry.task.task_id() == &event.task_id);

        let Some(entry) = entry else {
            debug!(
                task_id = %event.task_id,
                status = %event.status,
                "Dropping event for unknown task"
            );
            return;
        };

        entry.task.handle_event(event);

        let state = entry.task.state();
        entry.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

/// Owns the cluster session, the live task registry and the event queue.
pub struct Coordinator {
    cluster_address: String,
    inner: Arc<Inner>,
    dispatch: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Start building a coordinator for `cluster_address`.
    ///
    /// Every collaborator defaults to its production implementation.
    pub fn builder(cluster_address: impl Into<String>, config: Config) -> CoordinatorBuilder {
        CoordinatorBuilder {
            cluster_address: cluster_address.into(),
            config,
            resolver: None,
            executors: None,
            queue: None,
            runner: None,
        }
    }

    /// Connect with production collaborators.
    pub async fn connect(
        cluster_address: impl Into<String>,
        config: Config,
    ) -> Result<Self, ClusterError> {
        Self::builder(cluster_address, config).build().await
    }

    fn start(cluster_address: String, runner: Arc<dyn Runner>, queue: Arc<dyn EventQueue>) -> Self {
        let inner = Arc::new(Inner {
            runner,
            queue,
            tasks: Mutex::new(HashMap::new()),
        });
        let dispatch = tokio::spawn(dispatch_loop(inner.clone()));

        Self {
            cluster_address,
            inner,
            dispatch: Some(dispatch),
        }
    }

    /// Address this coordinator was built for.
    pub fn cluster_address(&self) -> &str {
        &self.cluster_address
    }

    /// Build a task for one attempt of `run_id`. Does not submit it.
    ///
    /// The registry credentials and offer timeout are always attached.
    pub fn create_task(
        &self,
        run_id: RunId,
        spec: TaskSpec,
        serializer: Arc<dyn TaskSerializer>,
    ) -> ClusterTask {
        let config = self.inner.runner.task_config(
            &run_id,
            spec,
            vec![DOCKERCFG_LOCATION.to_string()],
            OFFER_TIMEOUT,
        );
        ClusterTask::new(run_id, config, serializer)
    }

    /// Register `task` and launch it.
    ///
    /// The task is registered before the runner sees its configuration, so
    /// no event for it can arrive unrouted. Launch failures come back as
    /// events. Once the coordinator is stopping the task is failed at once.
    pub async fn submit(&self, task: ClusterTask) -> TaskHandle {
        let task_id = task.task_id().clone();
        let run_id = task.run_id().clone();
        let config = task.config().clone();
        let (state_tx, state_rx) = watch::channel(task.state());

        {
            let mut tasks = self.inner.tasks.lock().await;
            if tasks.insert(task_id.clone(), Entry { task, state_tx }).is_some() {
                warn!(task_id = %task_id, "Replaced an already registered task");
            }
        }

        if self.inner.runner.is_stopping() || self.is_stopped() {
            // Nothing drains the queue any more, so fail the task in place.
            warn!(task_id = %task_id, "Coordinator is stopped, failing task without launch");
            let refused = TaskEvent::terminal(task_id.clone(), StatusCode::Error, false)
                .with_message(ClusterError::RunnerStopped.to_string());
            self.inner.process_task_event(&refused).await;
        } else {
            info!(task_id = %task_id, run_id = %run_id, "Submitting task");
            self.inner.runner.run(config);
        }

        TaskHandle {
            task_id,
            run_id,
            state: state_rx,
        }
    }

    /// Ask the cluster to kill a registered task that has not finished.
    ///
    /// Returns false if the task is unknown or already done. The outcome
    /// arrives as a task event.
    pub async fn kill(&self, task_id: &TaskId) -> bool {
        let live = self
            .inner
            .tasks
            .lock()
            .await
            .get(task_id)
            .is_some_and(|entry| !entry.task.is_done());
        if !live {
            debug!(task_id = %task_id, "Not killing unknown or finished task");
            return false;
        }
        self.inner.runner.kill(task_id.clone());
        true
    }

    /// Route one event. Used by the dispatch loop.
    pub async fn process_event(&self, event: ClusterEvent) {
        self.inner.process_event(event).await;
    }

    /// Number of registered tasks.
    pub async fn task_count(&self) -> usize {
        self.inner.tasks.lock().await.len()
    }

    /// Current state of a registered task.
    pub async fn task_state(&self, task_id: &TaskId) -> Option<TaskState> {
        self.inner
            .tasks
            .lock()
            .await
            .get(task_id)
            .map(|entry| entry.task.state())
    }

    /// Ask the dispatch loop to stop.
    pub fn stop(&self) {
        self.inner.queue.sender().send(ClusterEvent::stop());
    }

    /// Returns true once the dispatch loop has exited.
    pub fn is_stopped(&self) -> bool {
        self.dispatch
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Stop and wait for the dispatch loop to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.dispatch.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatch loop ended abnormally");
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatch.take() {
            if !handle.is_finished() {
                debug!("Coordinator dropped without shutdown, stopping dispatch");
                self.inner.runner.stop();
                self.inner.queue.cancel();
            }
        }
    }
}

/// Drain the queue until it is cancelled or the runner is stopping.
async fn dispatch_loop(inner: Arc<Inner>) {
    debug!("Event dispatch loop started");
    while let Some(event) = inner.queue.get().await {
        inner.process_event(event).await;
        if inner.runner.is_stopping() {
            break;
        }
    }
    info!("Event dispatch loop stopped");
}

/// Builder for [`Coordinator`].
pub struct CoordinatorBuilder {
    cluster_address: String,
    config: Config,
    resolver: Option<Arc<dyn LeaderResolver>>,
    executors: Option<Arc<dyn ExecutionClientFactory>>,
    queue: Option<Arc<dyn EventQueue>>,
    runner: Option<RunnerConstructor>,
}

impl CoordinatorBuilder {
    /// Use a custom leader resolver.
    pub fn resolver(mut self, resolver: Arc<dyn LeaderResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use a custom execution client factory.
    pub fn executors(mut self, executors: Arc<dyn ExecutionClientFactory>) -> Self {
        self.executors = Some(executors);
        self
    }

    /// Use a custom event queue.
    pub fn queue(mut self, queue: Arc<dyn EventQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Use a custom runner, built from the execution client and queue sender.
    pub fn runner<F>(mut self, make: F) -> Self
    where
        F: FnOnce(Arc<dyn ExecutionClient>, EventSender) -> Arc<dyn Runner> + Send + 'static,
    {
        self.runner = Some(Box::new(make));
        self
    }

    /// Resolve the leader, build the runner and start dispatching.
    ///
    /// Nothing is started if the leader cannot be resolved.
    pub async fn build(self) -> Result<Coordinator, ClusterError> {
        let config = self.config;

        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(HttpLeaderResolver::new(
                config.master_port,
                config.request_timeout,
            )?),
        };
        let leader = resolver.resolve(&self.cluster_address).await?;

        let provider_config = ProviderConfig {
            secret: config.secret.clone(),
            mesos_address: leader,
            role: MESOS_ROLE.to_string(),
            framework_name: config.framework_name(),
        };
        let executors = self
            .executors
            .unwrap_or_else(|| Arc::new(ProviderRegistry::with_defaults(config.request_timeout)));
        let client = executors.build(PROVIDER_NAME, provider_config)?;

        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(UnboundedEventQueue::new()));
        let runner = match self.runner {
            Some(make) => make(client, queue.sender()),
            None => SubscriptionRunner::start(client, queue.sender()),
        };

        info!(cluster = %self.cluster_address, "Cluster coordinator started");
        Ok(Coordinator::start(self.cluster_address, runner, queue))
    }
}

/// Observer for a submitted task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    task_id: TaskId,
    run_id: RunId,
    state: watch::Receiver<TaskState>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Latest state applied by the dispatch loop.
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_complete(&self) -> bool {
        self.state() == TaskState::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        self.state() == TaskState::Failed
    }

    /// Wait for a terminal state.
    ///
    /// Returns the last known state if the coordinator goes away first.
    pub async fn wait_done(&mut self) -> TaskState {
        // A closed channel still holds the last published state.
        let _ = self.state.wait_for(TaskState::is_terminal).await;
        *self.state.borrow()
    }
}
