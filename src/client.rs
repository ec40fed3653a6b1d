use crate::config::BridgeConfig;
use crate::dispatcher::CommandDispatcher;
use crate::error::{BridgeError, Result};
use crate::poller::PollerHandle;
use crate::protocol;
use crate::transport::{get_with_timeout, HttpTransport, Transport};
use crate::types::{ConnectionIntent, Device, DeviceStatus, Service, Snapshot};
use std::sync::Arc;

/// Entry point for polling and controlling bridge services
///
/// The client owns the transport and configuration shared by every
/// attachment it creates.
///
/// # Example
///
/// ```no_run
/// use zonebridge::{BridgeClient, BridgeConfig, Service};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = BridgeClient::new(BridgeConfig::default())?;
///     let service = Service {
///         host: "192.168.1.100".into(),
///         port: 50000,
///         name: "Living room".into(),
///         addresses: vec!["192.168.1.100".parse()?],
///     };
///
///     let poller = client.attach(service);
///     let mut updates = poller.subscribe();
///     let update = updates.recv().await?;
///     if let Some(device) = update.devices.first() {
///         client.set_volume(&poller, &device.id, 40).await?;
///     }
///
///     poller.detach();
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct BridgeClient {
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    dispatcher: CommandDispatcher,
}

impl BridgeClient {
    /// Create a client speaking HTTP
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.request_timeout())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a client over a custom transport
    pub fn with_transport(config: BridgeConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            dispatcher: CommandDispatcher::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Start polling a service
    pub fn attach(&self, service: Service) -> PollerHandle {
        PollerHandle::attach(service, self.transport.clone(), &self.config)
    }

    /// Stop polling a service
    pub fn detach(&self, poller: &PollerHandle) {
        poller.detach();
    }

    /// Read one device directly from the bridge, leaving the snapshot alone
    pub async fn fetch_device(&self, poller: &PollerHandle, device_id: &str) -> Result<Device> {
        let url = protocol::status_url(poller.service(), Some(device_id))?;
        let body = get_with_timeout(self.transport.as_ref(), &url, self.config.request_timeout()).await?;

        protocol::parse_status_body(&body)?
            .into_iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| BridgeError::Protocol(format!("Bridge did not report device {}", device_id)))
    }

    /// See [`CommandDispatcher::set_volume`]
    pub async fn set_volume(&self, poller: &PollerHandle, device_id: &str, volume: i32) -> Result<Snapshot> {
        self.dispatcher.set_volume(poller, device_id, volume).await
    }

    /// See [`CommandDispatcher::set_connection`]
    pub async fn set_connection(
        &self,
        poller: &PollerHandle,
        device_id: &str,
        intent: ConnectionIntent,
    ) -> Result<DeviceStatus> {
        self.dispatcher.set_connection(poller, device_id, intent).await
    }

    pub async fn connect(&self, poller: &PollerHandle, device_id: &str) -> Result<DeviceStatus> {
        self.dispatcher.connect(poller, device_id).await
    }

    pub async fn disconnect(&self, poller: &PollerHandle, device_id: &str) -> Result<DeviceStatus> {
        self.dispatcher.disconnect(poller, device_id).await
    }
}
