//! Cluster coordinator configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tron_core::{FileSerializer, RunId, TaskSerializer};

use crate::error::ClusterError;

/// Provider name handed to the execution client factory.
pub const PROVIDER_NAME: &str = "mesos";

/// Product prefix of the framework name registered with the cluster.
pub const PRODUCT_NAME: &str = "tron";

/// Resource role every task is launched under.
pub const MESOS_ROLE: &str = "*";

/// Registry credentials fetched into every task sandbox.
pub const DOCKERCFG_LOCATION: &str = "file:///root/.dockercfg";

/// How long the cluster may wait for an offer before failing a launch.
pub const OFFER_TIMEOUT: Duration = Duration::from_secs(300);

/// Environment variable holding the framework secret.
pub const SECRET_ENV: &str = "TRON_MESOS_SECRET";

/// Environment variable naming a file that holds the framework secret.
pub const SECRET_FILE_ENV: &str = "TRON_MESOS_SECRET_FILE";

/// Cluster coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port of the cluster controllers, used for leader lookup.
    pub master_port: u16,

    /// Framework secret sent with every executor request.
    pub secret: String,

    /// Hostname override for the framework name.
    pub hostname: Option<String>,

    /// Directory receiving per-run task output.
    pub output_dir: PathBuf,

    /// Timeout for leader lookup and executor requests.
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            master_port: 5050,
            secret: String::new(),
            hostname: None,
            output_dir: PathBuf::from("/var/lib/tron/output"),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Defaults with the secret taken from the process environment.
    pub fn from_env() -> Result<Self, ClusterError> {
        let mut config = Self::default();
        if let Ok(secret) = std::env::var(SECRET_ENV) {
            config.secret = secret;
        } else if let Ok(path) = std::env::var(SECRET_FILE_ENV) {
            config.secret = std::fs::read_to_string(&path)
                .map_err(|e| {
                    ClusterError::Config(format!("Failed to read secret from '{}': {}", path, e))
                })?
                .trim()
                .to_string();
        }
        Ok(config)
    }

    /// Builder method to override the hostname.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Hostname this process registers under.
    pub fn hostname(&self) -> String {
        if let Some(hostname) = &self.hostname {
            return hostname.clone();
        }
        std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// Framework name: `<product>-<hostname>`.
    pub fn framework_name(&self) -> String {
        format!("{}-{}", PRODUCT_NAME, self.hostname())
    }

    /// File serializer writing `run_id`'s output under `output_dir`.
    pub fn serializer_for(&self, run_id: &RunId) -> Result<Arc<dyn TaskSerializer>, ClusterError> {
        Ok(Arc::new(FileSerializer::new(&self.output_dir, run_id)?))
    }
}
