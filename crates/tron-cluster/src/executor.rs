//! Execution clients: the link to the external cluster executor.
//!
//! The executor owns offer matching and the task lifecycle on the cluster.
//! This side only hands it task configurations and relays the status
//! updates it streams back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tron_core::{TaskConfig, TaskEvent, TaskId};

use crate::config::PROVIDER_NAME;
use crate::error::ClusterError;
use crate::queue::EventSender;

/// Settings handed to a provider when building its client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderConfig {
    pub secret: String,
    pub mesos_address: String,
    pub role: String,
    pub framework_name: String,
}

/// Client for one cluster executor.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Hand a task to the executor.
    async fn launch(&self, config: &TaskConfig) -> Result<(), ClusterError>;

    /// Ask the executor to kill a launched task. The outcome arrives as an event.
    async fn kill(&self, task_id: &TaskId) -> Result<(), ClusterError>;

    /// Forward status updates into `events` until cancelled or the stream ends.
    async fn stream_events(
        &self,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<(), ClusterError>;
}

/// Builds execution clients by provider name.
pub trait ExecutionClientFactory: Send + Sync {
    fn build(
        &self,
        provider: &str,
        config: ProviderConfig,
    ) -> Result<Arc<dyn ExecutionClient>, ClusterError>;
}

type ProviderBuilder =
    Box<dyn Fn(ProviderConfig) -> Result<Arc<dyn ExecutionClient>, ClusterError> + Send + Sync>;

/// Factory keyed by provider name.
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderBuilder>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registry with the built-in HTTP executor under [`PROVIDER_NAME`].
    pub fn with_defaults(request_timeout: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(PROVIDER_NAME, move |config| {
            let client = HttpExecutionClient::new(config, request_timeout)?;
            Ok(Arc::new(client) as Arc<dyn ExecutionClient>)
        });
        registry
    }

    /// Register (or replace) a provider.
    pub fn register<F>(&mut self, name: impl Into<String>, builder: F)
    where
        F: Fn(ProviderConfig) -> Result<Arc<dyn ExecutionClient>, ClusterError>
            + Send
            + Sync
            + 'static,
    {
        self.providers.insert(name.into(), Box::new(builder));
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionClientFactory for ProviderRegistry {
    fn build(
        &self,
        provider: &str,
        config: ProviderConfig,
    ) -> Result<Arc<dyn ExecutionClient>, ClusterError> {
        let builder = self
            .providers
            .get(provider)
            .ok_or_else(|| ClusterError::UnknownProvider(provider.to_string()))?;
        info!(
            provider = %provider,
            address = %config.mesos_address,
            framework = %config.framework_name,
            "Building execution client"
        );
        builder(config)
    }
}

#[derive(Serialize)]
struct LaunchRequest<'a> {
    framework_name: &'a str,
    role: &'a str,
    task: &'a TaskConfig,
}

/// JSON-over-HTTP client for the executor running at the leader address.
///
/// - `POST /tasks` launches a task.
/// - `POST /tasks/<id>/kill` kills one.
/// - `GET /events?framework=<name>` streams newline-delimited task events.
pub struct HttpExecutionClient {
    client: reqwest::Client,
    base_url: String,
    config: ProviderConfig,
}

impl HttpExecutionClient {
    /// Create a client for the executor at `config.mesos_address`.
    pub fn new(config: ProviderConfig, request_timeout: Duration) -> Result<Self, ClusterError> {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: format!("http://{}", config.mesos_address),
            config,
        })
    }
}

#[async_trait]
impl ExecutionClient for HttpExecutionClient {
    async fn launch(&self, config: &TaskConfig) -> Result<(), ClusterError> {
        let request = LaunchRequest {
            framework_name: &self.config.framework_name,
            role: &self.config.role,
            task: config,
        };

        let response = self
            .client
            .post(format!("{}/tasks", self.base_url))
            .basic_auth(&self.config.framework_name, Some(&self.config.secret))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClusterError::Launch {
                task_id: config.task_id.clone(),
                reason: format!("{}: {}", status, body.trim()),
            });
        }

        debug!(task_id = %config.task_id, "Task accepted by executor");
        Ok(())
    }

    async fn kill(&self, task_id: &TaskId) -> Result<(), ClusterError> {
        let response = self
            .client
            .post(format!("{}/tasks/{}/kill", self.base_url, task_id))
            .basic_auth(&self.config.framework_name, Some(&self.config.secret))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClusterError::Kill {
                task_id: task_id.clone(),
                reason: format!("{}: {}", status, body.trim()),
            });
        }

        debug!(task_id = %task_id, "Kill accepted by executor");
        Ok(())
    }

    async fn stream_events(
        &self,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<(), ClusterError> {
        let mut response = self
            .client
            .get(format!("{}/events", self.base_url))
            .query(&[("framework", self.config.framework_name.as_str())])
            .basic_auth(&self.config.framework_name, Some(&self.config.secret))
            .send()
            .await?
            .error_for_status()?;

        info!(address = %self.config.mesos_address, "Subscribed to executor events");

        let mut decoder = LineDecoder::default();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = response.chunk() => chunk?,
            };
            let Some(chunk) = chunk else {
                warn!("Executor event stream ended");
                break;
            };
            for event in decoder.push(&chunk) {
                if !events.send(event) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// Longest event line accepted from the executor.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a byte stream into newline-delimited task events.
///
/// A line longer than the limit is dropped up to its terminating newline.
struct LineDecoder {
    buf: Vec<u8>,
    scanned: usize,
    limit: usize,
    discarding: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            limit,
            discarding: false,
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<TaskEvent> {
        self.buf.extend_from_slice(bytes);
        let mut decoded = Vec::new();
        let mut start = 0;

        // Bytes before `scanned` were searched on an earlier push.
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            if self.discarding {
                self.discarding = false;
            } else if let Some(event) = decode_line(&self.buf[start..end]) {
                decoded.push(event);
            }
            start = end + 1;
            self.scanned = start;
        }

        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > self.limit {
            warn!(
                bytes = self.buf.len(),
                limit = self.limit,
                "Dropping oversized executor event"
            );
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        decoded
    }
}

fn decode_line(line: &[u8]) -> Option<TaskEvent> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<TaskEvent>(line) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Skipping malformed executor event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::serve_once;
    use tron_core::StatusCode;

    fn provider_config() -> ProviderConfig {
        ProviderConfig {
            secret: "s3cret".to_string(),
            mesos_address: "10.40.1.17:5050".to_string(),
            role: "*".to_string(),
            framework_name: "tron-hostname".to_string(),
        }
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        let err = registry.build("kubernetes", provider_config()).err().unwrap();
        assert!(matches!(err, ClusterError::UnknownProvider(name) if name == "kubernetes"));
    }

    #[test]
    fn test_default_registry_builds_mesos_provider() {
        let registry = ProviderRegistry::with_defaults(Duration::from_secs(1));
        assert!(registry.build(PROVIDER_NAME, provider_config()).is_ok());
    }

    #[test]
    fn test_line_decoder_handles_split_and_malformed_lines() {
        let mut decoder = LineDecoder::default();

        let first = decoder.push(b"{\"task_id\":\"a\",\"platform_type\":\"running\"}\n{\"task_id\"");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, StatusCode::Running);

        let second = decoder.push(b":\"b\",\"platform_type\":\"lost\",\"terminal\":true}\nnot json\n\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].task_id, TaskId::new("b"));
        assert!(second[0].terminal);
    }

    #[test]
    fn test_line_decoder_drops_oversized_line() {
        let mut decoder = LineDecoder::with_limit(32);

        let first = decoder.push(&[b'x'; 40]);
        assert!(first.is_empty());
        assert!(decoder.buf.is_empty());

        // The rest of the oversized line is skipped, the next one decodes.
        let second = decoder.push(b"xxxx\n{\"task_id\":\"a\",\"platform_type\":\"running\"}\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].task_id, TaskId::new("a"));
    }

    #[test]
    fn test_line_decoder_keeps_partial_line_across_pushes() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"{\"task_id\":").is_empty());
        assert!(decoder.push(b"\"a\",").is_empty());
        assert_eq!(decoder.scanned, decoder.buf.len());

        let events = decoder.push(b"\"platform_type\":\"staging\"}\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, StatusCode::Staging);
        assert!(decoder.buf.is_empty());
    }

    #[tokio::test]
    async fn test_kill_posts_to_task_path() {
        let (addr, server) =
            serve_once("HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        let client = HttpExecutionClient::new(
            ProviderConfig {
                mesos_address: addr.to_string(),
                ..provider_config()
            },
            Duration::from_secs(5),
        )
        .unwrap();

        client.kill(&TaskId::new("job.1.action.abc")).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /tasks/job.1.action.abc/kill "));
    }

    #[tokio::test]
    async fn test_kill_rejected_by_executor() {
        let (addr, server) = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 12\r\nConnection: close\r\n\r\nno such task",
        )
        .await;
        let client = HttpExecutionClient::new(
            ProviderConfig {
                mesos_address: addr.to_string(),
                ..provider_config()
            },
            Duration::from_secs(5),
        )
        .unwrap();

        let err = client.kill(&TaskId::new("gone")).await.unwrap_err();
        match err {
            ClusterError::Kill { task_id, reason } => {
                assert_eq!(task_id, TaskId::new("gone"));
                assert!(reason.contains("no such task"));
            }
            other => panic!("Expected kill error, got {:?}", other),
        }
        server.await.unwrap();
    }
}
