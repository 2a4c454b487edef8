//! In-memory collaborators for tests.
//!
//! Available to this crate's tests and, with the `test-util` feature, to
//! downstream crates.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tron_core::{
    ClusterEvent, CoreError, OutputStream, StatusCode, TaskConfig, TaskEvent, TaskId,
    TaskSerializer,
};

use crate::error::ClusterError;
use crate::executor::{ExecutionClient, ExecutionClientFactory, ProviderConfig};
use crate::leader::LeaderResolver;
use crate::queue::{EventQueue, EventSender, UnboundedEventQueue};
use crate::runner::Runner;

/// Resolves every address to a fixed leader and records the lookups.
pub struct StaticLeaderResolver {
    leader: String,
    calls: Mutex<Vec<String>>,
}

impl StaticLeaderResolver {
    pub fn new(leader: impl Into<String>) -> Self {
        Self {
            leader: leader.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Addresses passed to `resolve`, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LeaderResolver for StaticLeaderResolver {
    async fn resolve(&self, cluster_address: &str) -> Result<String, ClusterError> {
        self.calls.lock().unwrap().push(cluster_address.to_string());
        Ok(self.leader.clone())
    }
}

/// Fails every lookup.
pub struct FailingLeaderResolver;

#[async_trait]
impl LeaderResolver for FailingLeaderResolver {
    async fn resolve(&self, cluster_address: &str) -> Result<String, ClusterError> {
        Err(ClusterError::LeaderResolution {
            address: cluster_address.to_string(),
            reason: "no leader elected".to_string(),
        })
    }
}

#[derive(Default)]
struct Subscription {
    sink: Option<EventSender>,
    pending: Vec<TaskEvent>,
}

/// Execution client that records launches and replays injected events.
#[derive(Default)]
pub struct FakeExecutionClient {
    fail_launches: bool,
    launched: Mutex<Vec<TaskId>>,
    killed: Mutex<Vec<TaskId>>,
    subscription: Mutex<Subscription>,
}

impl FakeExecutionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client whose every launch fails.
    pub fn failing_launches() -> Self {
        Self {
            fail_launches: true,
            ..Self::default()
        }
    }

    /// Task ids launched so far.
    pub fn launched(&self) -> Vec<TaskId> {
        self.launched.lock().unwrap().clone()
    }

    /// Task ids asked to be killed so far.
    pub fn killed(&self) -> Vec<TaskId> {
        self.killed.lock().unwrap().clone()
    }

    /// Deliver an event as if the executor had streamed it.
    pub fn emit(&self, event: TaskEvent) {
        let mut subscription = self.subscription.lock().unwrap();
        match &subscription.sink {
            Some(sink) => {
                sink.send(event);
            }
            None => subscription.pending.push(event),
        }
    }
}

#[async_trait]
impl ExecutionClient for FakeExecutionClient {
    async fn launch(&self, config: &TaskConfig) -> Result<(), ClusterError> {
        if self.fail_launches {
            return Err(ClusterError::Launch {
                task_id: config.task_id.clone(),
                reason: "offer timeout".to_string(),
            });
        }
        self.launched.lock().unwrap().push(config.task_id.clone());
        Ok(())
    }

    async fn kill(&self, task_id: &TaskId) -> Result<(), ClusterError> {
        self.killed.lock().unwrap().push(task_id.clone());
        Ok(())
    }

    async fn stream_events(
        &self,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<(), ClusterError> {
        {
            let mut subscription = self.subscription.lock().unwrap();
            for event in subscription.pending.drain(..) {
                events.send(event);
            }
            subscription.sink = Some(events);
        }
        cancel.cancelled().await;
        Ok(())
    }
}

/// Factory that records what it was asked to build.
#[derive(Default)]
pub struct RecordingExecutorFactory {
    builds: Mutex<Vec<(String, ProviderConfig)>>,
}

impl RecordingExecutorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(provider, config)` pairs, in order.
    pub fn builds(&self) -> Vec<(String, ProviderConfig)> {
        self.builds.lock().unwrap().clone()
    }
}

impl ExecutionClientFactory for RecordingExecutorFactory {
    fn build(
        &self,
        provider: &str,
        config: ProviderConfig,
    ) -> Result<Arc<dyn ExecutionClient>, ClusterError> {
        self.builds
            .lock()
            .unwrap()
            .push((provider.to_string(), config));
        Ok(Arc::new(FakeExecutionClient::new()))
    }
}

/// Runner that records calls instead of launching.
///
/// Built with [`RecordingRunner::completing`] it also reports every launch
/// as staging, running and finished through the queue.
#[derive(Default)]
pub struct RecordingRunner {
    runs: Mutex<Vec<TaskConfig>>,
    kills: Mutex<Vec<TaskId>>,
    stop_calls: AtomicUsize,
    stopping: AtomicBool,
    events: Option<EventSender>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner whose launches all succeed straight away.
    pub fn completing(events: EventSender) -> Self {
        Self {
            events: Some(events),
            ..Self::default()
        }
    }

    /// Configurations passed to `run`, in order.
    pub fn runs(&self) -> Vec<TaskConfig> {
        self.runs.lock().unwrap().clone()
    }

    /// Task ids passed to `kill`, in order.
    pub fn kills(&self) -> Vec<TaskId> {
        self.kills.lock().unwrap().clone()
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl Runner for RecordingRunner {
    fn run(&self, config: TaskConfig) {
        if let Some(events) = &self.events {
            let task_id = config.task_id.clone();
            events.send(TaskEvent::new(task_id.clone(), StatusCode::Staging));
            events.send(TaskEvent::new(task_id.clone(), StatusCode::Running));
            events.send(TaskEvent::terminal(task_id, StatusCode::Finished, true));
        }
        self.runs.lock().unwrap().push(config);
    }

    fn kill(&self, task_id: TaskId) {
        self.kills.lock().unwrap().push(task_id);
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stopping.store(true, Ordering::SeqCst);
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

/// Unbounded queue that counts reads and cancellations.
#[derive(Default)]
pub struct CountingEventQueue {
    inner: UnboundedEventQueue,
    get_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl CountingEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventQueue for CountingEventQueue {
    fn sender(&self) -> EventSender {
        self.inner.sender()
    }

    async fn get(&self) -> Option<ClusterEvent> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get().await
    }

    fn cancel(&self) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.cancel();
    }
}

/// Serializer that keeps every line in memory.
#[derive(Default)]
pub struct RecordingSerializer {
    lines: Mutex<Vec<(OutputStream, String)>>,
}

impl RecordingSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(OutputStream, String)> {
        self.lines.lock().unwrap().clone()
    }
}

impl TaskSerializer for RecordingSerializer {
    fn write(&self, stream: OutputStream, line: &str) -> Result<(), CoreError> {
        self.lines.lock().unwrap().push((stream, line.to_string()));
        Ok(())
    }
}

/// Accept one HTTP connection on localhost and answer it with `response`.
///
/// The returned handle resolves to the raw request head.
pub async fn serve_once(response: &'static str) -> (SocketAddr, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("listener address");
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept connection");
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.expect("read request");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket.write_all(response.as_bytes()).await.expect("write response");
        let _ = socket.shutdown().await;
        String::from_utf8_lossy(&request).into_owned()
    });
    (addr, server)
}
