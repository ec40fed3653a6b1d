//! Rust library for discovering and controlling networked audio bridges
//!
//! An audio bridge exposes a set of output zones ("devices") over an
//! unauthenticated plaintext HTTP endpoint and announces itself over mDNS.
//! This library provides:
//!
//! - Discovery of bridges on the local network, deduplicated by host
//! - A per-bridge poll loop that only notifies subscribers on real changes
//! - Volume and connect/disconnect commands with optimistic local updates
//! - Faster polling for a few seconds after a connection change
//!
//! # Quick Start
//!
//! ```no_run
//! use zonebridge::{BridgeClient, BridgeConfig, DirectoryEvent, ServiceDirectory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::default();
//!     let client = BridgeClient::new(config.clone())?;
//!
//!     let mut directory = ServiceDirectory::new(&config);
//!     let mut events = directory.subscribe();
//!     directory.start(None)?;
//!
//!     if let DirectoryEvent::Added(service) = events.recv().await? {
//!         let poller = client.attach(service);
//!         let mut updates = poller.subscribe();
//!
//!         let update = updates.recv().await?;
//!         for device in update.devices.iter() {
//!             println!("{} is {} at volume {}", device.name, device.status, device.volume);
//!         }
//!
//!         if let Some(device) = update.devices.first() {
//!             client.connect(&poller, &device.id).await?;
//!         }
//!         poller.detach();
//!     }
//!
//!     directory.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Discovery**: mDNS browsing into a live service set
//! - **Poller**: one refresh loop per attached service, owning its snapshot
//! - **Dispatcher**: device commands with optimistic updates and forced resync
//! - **Scheduler**: baseline/accelerated poll cadence
//! - **Protocol**: plaintext wire format
//! - **Transport**: HTTP GET seam

mod client;
mod config;
mod discovery;
mod dispatcher;
mod error;
mod poller;
mod protocol;
mod scheduler;
mod subscription;
mod transport;
mod types;

// Public exports
pub use client::BridgeClient;
pub use config::BridgeConfig;
pub use discovery::{ServiceDirectory, ServiceFilter};
pub use dispatcher::CommandDispatcher;
pub use error::{BridgeError, Result};
pub use poller::PollerHandle;
pub use protocol::{parse_command_status, parse_status_body};
pub use scheduler::{Cadence, RefreshScheduler};
pub use subscription::{
    DirectoryEvent, DirectoryReceiver, Receiver, SnapshotReceiver, SnapshotUpdate,
};
pub use transport::{HttpTransport, Transport};
pub use types::{
    find_device, Announcement, ConnectionIntent, Device, DeviceId, DeviceStatus, Service,
    Snapshot, Volume, MAX_VOLUME,
};
