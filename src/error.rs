use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur when talking to an audio bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A command argument was rejected before any network call was made
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The HTTP request failed or returned a non-success status
    #[error("Remote call failed: {0}")]
    RemoteCallFailed(String),

    /// The response body could not be parsed
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Request timed out waiting for response
    #[error("Request timeout")]
    Timeout,

    /// The poller for this service has been detached
    #[error("Poller detached")]
    Detached,

    /// A subscriber fell behind and missed updates
    #[error("Channel error: {0}")]
    Channel(String),

    /// mDNS daemon error
    #[error("mDNS error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BridgeError::Timeout
        } else {
            BridgeError::RemoteCallFailed(err.to_string())
        }
    }
}

impl BridgeError {
    /// Whether this error means the remote answered with something unparseable,
    /// as opposed to not answering at all.
    pub fn is_protocol(&self) -> bool {
        matches!(self, BridgeError::Protocol(_))
    }

    /// Whether this error came from the network (including timeouts)
    pub fn is_network(&self) -> bool {
        matches!(self, BridgeError::RemoteCallFailed(_) | BridgeError::Timeout)
    }
}
