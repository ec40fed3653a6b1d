//! Discover bridges, attach to the first one and log every device change.
//!
//! Usage: `cargo run --example watch [config.toml] [name-prefix]`

use std::sync::Arc;
use zonebridge::{BridgeClient, BridgeConfig, BridgeError, DirectoryEvent, Service, ServiceDirectory, ServiceFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("zonebridge=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => BridgeConfig::load(&path)?,
        None => BridgeConfig::default(),
    };
    let filter: Option<ServiceFilter> = args.next().map(|prefix| {
        let filter: ServiceFilter = Arc::new(move |service: &Service| service.name.starts_with(&prefix));
        filter
    });

    let client = BridgeClient::new(config.clone())?;
    let mut directory = ServiceDirectory::new(&config);
    let mut events = directory.subscribe();
    directory.start(filter)?;

    let service = loop {
        match events.recv().await? {
            DirectoryEvent::Added(service) => break service,
            DirectoryEvent::Removed(service) => {
                tracing::info!("{} went away", service.name);
            }
        }
    };

    let poller = client.attach(service);
    let mut updates = poller.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => {
                let update = match update {
                    Ok(update) => update,
                    Err(BridgeError::Channel(e)) => {
                        tracing::warn!("Skipped updates: {}", e);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                println!("--- {} ---", update.host);
                for device in update.devices.iter() {
                    println!("{:<12} {:<14} {:>3}  {}", device.id, device.status, device.volume, device.name);
                }
            }
        }
    }

    poller.detach();
    directory.stop().await;
    Ok(())
}
