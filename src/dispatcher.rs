use crate::error::{BridgeError, Result};
use crate::poller::PollerHandle;
use crate::protocol;
use crate::transport::get_with_timeout;
use crate::types::{ConnectionIntent, DeviceStatus, Snapshot, Volume, MAX_VOLUME};

/// Issues device commands against an attached service.
///
/// Successful commands are reflected in the poller's snapshot right away;
/// failed ones force an immediate poll so the snapshot converges back to what
/// the bridge reports. Either way the next poll has the final word.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandDispatcher;

impl CommandDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Set a device's volume (0 to 100)
    ///
    /// Returns the snapshot after the optimistic update.
    pub async fn set_volume(&self, poller: &PollerHandle, device_id: &str, volume: i32) -> Result<Snapshot> {
        if !(0..=i32::from(MAX_VOLUME)).contains(&volume) {
            return Err(BridgeError::InvalidArgument(format!(
                "Volume {} is outside 0..={}",
                volume, MAX_VOLUME
            )));
        }
        let volume = volume as Volume;
        let shared = poller.shared()?;
        let url = protocol::volume_url(poller.service(), device_id, volume)?;

        let seq = shared.begin();
        tracing::debug!("Setting volume of {} to {}", device_id, volume);

        match get_with_timeout(shared.transport(), &url, shared.request_timeout()).await {
            Ok(_) => {
                shared.apply_command(seq, device_id, |device| device.volume = volume);
                Ok(poller.snapshot())
            }
            Err(e) => {
                tracing::warn!("Volume change for {} failed: {}", device_id, e);
                poller.refresh();
                Err(e)
            }
        }
    }

    /// Connect or disconnect a device
    ///
    /// Speeds up polling for a while so the transition shows up quickly.
    /// Returns the status reported by the bridge.
    pub async fn set_connection(
        &self,
        poller: &PollerHandle,
        device_id: &str,
        intent: ConnectionIntent,
    ) -> Result<DeviceStatus> {
        let shared = poller.shared()?;
        let url = protocol::connection_url(poller.service(), device_id, intent)?;
        poller.scheduler().accelerate();

        let seq = shared.begin();
        tracing::debug!("Sending {:?} to {}", intent, device_id);

        let result = match get_with_timeout(shared.transport(), &url, shared.request_timeout()).await {
            Ok(body) => protocol::parse_command_status(&body),
            Err(e) => Err(e),
        };

        match result {
            Ok(status) => {
                shared.apply_command(seq, device_id, |device| device.status = status);
                Ok(status)
            }
            Err(e) => {
                tracing::warn!("{:?} for {} failed: {}", intent, device_id, e);
                poller.refresh();
                Err(e)
            }
        }
    }

    pub async fn connect(&self, poller: &PollerHandle, device_id: &str) -> Result<DeviceStatus> {
        self.set_connection(poller, device_id, ConnectionIntent::Connect).await
    }

    pub async fn disconnect(&self, poller: &PollerHandle, device_id: &str) -> Result<DeviceStatus> {
        self.set_connection(poller, device_id, ConnectionIntent::Disconnect).await
    }
}
