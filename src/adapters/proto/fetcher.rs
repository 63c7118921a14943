use std::time::Duration;

use async_trait::async_trait;

use crate::ports::descriptor_compiler::{ProtoError, ProtoFetcher, ProtoResult};

/// `ProtoFetcher` adapter over `reqwest`.
///
/// Non-success statuses and timeouts are reported as
/// [`ProtoError::Network`]; nothing is retried here.
#[derive(Debug, Clone, Default)]
pub struct HttpProtoFetcher {
    client: reqwest::Client,
}

impl HttpProtoFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProtoFetcher for HttpProtoFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> ProtoResult<String> {
        let network = |message: String| ProtoError::Network {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    network(format!("timed out after {}", humantime::format_duration(timeout)))
                } else {
                    network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(network(format!("server answered {status}")));
        }

        response.text().await.map_err(|e| network(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_hosts_are_network_errors() {
        let fetcher = HttpProtoFetcher::new();
        // Port 9 on loopback is the discard port and is normally closed.
        let err = fetcher
            .fetch("http://127.0.0.1:9/auth.proto", Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtoError::Network { .. }));
    }
}
