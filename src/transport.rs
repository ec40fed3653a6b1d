use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;

/// Plaintext GET transport to a bridge.
///
/// The engine only ever needs the body of a successful GET; everything else
/// is an error. Tests substitute a scripted implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url` and return its body
    async fn get(&self, url: &str) -> Result<String>;
}

/// HTTP transport backed by `reqwest`
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport whose requests time out after `request_timeout`
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<String> {
        tracing::trace!("GET {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::RemoteCallFailed(format!("{} returned {}", url, status)));
        }

        Ok(response.text().await?)
    }
}

/// Run a transport request with an upper bound on its duration.
///
/// Applied on top of whatever the transport does itself, so a transport that
/// never answers still cannot hold up a poll loop.
pub(crate) async fn get_with_timeout(
    transport: &dyn Transport,
    url: &str,
    limit: Duration,
) -> Result<String> {
    match timeout(limit, transport.get(url)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!("GET {} timed out after {:?}", url, limit);
            Err(BridgeError::Timeout)
        }
    }
}
