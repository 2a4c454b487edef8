//! Discovery of the cluster's currently leading controller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use tracing::info;

use crate::error::ClusterError;

/// Resolves a cluster address to the address of its current leader.
#[async_trait]
pub trait LeaderResolver: Send + Sync {
    async fn resolve(&self, cluster_address: &str) -> Result<String, ClusterError>;
}

/// Asks any controller for the leader via its `/redirect` endpoint.
///
/// A controller answers with a redirect whose `Location` is the leader,
/// e.g. `//10.40.1.17:5050`. There is no retry.
pub struct HttpLeaderResolver {
    client: reqwest::Client,
    port: u16,
}

impl HttpLeaderResolver {
    /// Create a resolver for controllers listening on `port`.
    pub fn new(port: u16, timeout: Duration) -> Result<Self, ClusterError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self { client, port })
    }
}

#[async_trait]
impl LeaderResolver for HttpLeaderResolver {
    async fn resolve(&self, cluster_address: &str) -> Result<String, ClusterError> {
        let url = format!("http://{}:{}/redirect", cluster_address, self.port);
        let failed = |reason: String| ClusterError::LeaderResolution {
            address: cluster_address.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| failed(format!("no redirect from {} ({})", url, response.status())))?;

        let leader = leader_from_location(location, self.port)
            .ok_or_else(|| failed(format!("unusable redirect location '{}'", location)))?;

        info!(cluster = %cluster_address, leader = %leader, "Resolved cluster leader");
        Ok(leader)
    }
}

/// Extract `host:port` from a redirect location.
fn leader_from_location(location: &str, default_port: u16) -> Option<String> {
    let rest = location
        .strip_prefix("http://")
        .or_else(|| location.strip_prefix("https://"))
        .or_else(|| location.strip_prefix("//"))
        .unwrap_or(location);
    let authority = rest.split('/').next()?.trim();
    if authority.is_empty() {
        return None;
    }
    if authority.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
        Some(authority.to_string())
    } else {
        Some(format!("{}:{}", authority, default_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::serve_once;

    #[test]
    fn test_leader_from_location() {
        assert_eq!(
            leader_from_location("//10.40.1.17:5050", 5050).as_deref(),
            Some("10.40.1.17:5050")
        );
        assert_eq!(
            leader_from_location("http://mesos-master-b.me:5051/", 5050).as_deref(),
            Some("mesos-master-b.me:5051")
        );
        assert_eq!(
            leader_from_location("//mesos-master-c.me", 5050).as_deref(),
            Some("mesos-master-c.me:5050")
        );
        assert_eq!(leader_from_location("//", 5050), None);
    }

    #[tokio::test]
    async fn test_unreachable_cluster_is_a_resolution_error() {
        let resolver = HttpLeaderResolver::new(1, Duration::from_millis(200)).unwrap();
        let err = resolver.resolve("127.0.0.1").await.unwrap_err();
        assert!(matches!(err, ClusterError::LeaderResolution { .. }));
    }

    #[tokio::test]
    async fn test_resolve_reads_redirect_location() {
        let (addr, server) = serve_once(
            "HTTP/1.1 302 Found\r\nLocation: //10.40.1.17:5050\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let resolver = HttpLeaderResolver::new(addr.port(), Duration::from_secs(5)).unwrap();

        let leader = resolver.resolve("127.0.0.1").await.unwrap();
        assert_eq!(leader, "10.40.1.17:5050");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /redirect "));
    }

    #[tokio::test]
    async fn test_resolve_without_redirect_is_an_error() {
        let (addr, server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let resolver = HttpLeaderResolver::new(addr.port(), Duration::from_secs(5)).unwrap();

        let err = resolver.resolve("127.0.0.1").await.unwrap_err();
        assert!(matches!(err, ClusterError::LeaderResolution { address, .. } if address == "127.0.0.1"));
        server.await.unwrap();
    }
}
