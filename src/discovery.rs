use crate::config::BridgeConfig;
use crate::error::Result;
use crate::subscription::{DirectoryEvent, DirectoryReceiver};
use crate::types::{Announcement, Service};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Predicate deciding which announced services are kept
pub type ServiceFilter = Arc<dyn Fn(&Service) -> bool + Send + Sync>;

#[derive(Default)]
struct DirectoryState {
    /// Known services by host; the first announcement for a host wins
    services: BTreeMap<String, Service>,
    /// Instance name of the announcement that created each host entry
    hosts_by_fullname: HashMap<String, String>,
    filter: Option<ServiceFilter>,
}

impl DirectoryState {
    fn clear(&mut self) {
        self.services.clear();
        self.hosts_by_fullname.clear();
        self.filter = None;
    }
}

/// Live set of bridge services on the local network
///
/// Browses mDNS in the background once started. Services are keyed by host,
/// and later announcements for a host already known are ignored until the
/// directory is stopped or the first announcement is withdrawn.
///
/// # Example
///
/// ```no_run
/// use zonebridge::{BridgeConfig, ServiceDirectory};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut directory = ServiceDirectory::new(&BridgeConfig::default());
///     directory.start(None)?;
///
///     tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
///
///     for service in directory.services() {
///         println!("Found {} at {}:{}", service.name, service.host, service.port);
///     }
///
///     directory.stop().await;
///     Ok(())
/// }
/// ```
pub struct ServiceDirectory {
    service_type: String,
    state: Arc<Mutex<DirectoryState>>,
    event_tx: Arc<broadcast::Sender<DirectoryEvent>>,
    daemon: Option<ServiceDaemon>,
    cancel: Option<CancellationToken>,
    task_handle: Option<JoinHandle<()>>,
}

impl ServiceDirectory {
    /// Create a stopped directory for the configured service type
    pub fn new(config: &BridgeConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            service_type: config.service_type.clone(),
            state: Arc::new(Mutex::new(DirectoryState::default())),
            event_tx: Arc::new(event_tx),
            daemon: None,
            cancel: None,
            task_handle: None,
        }
    }

    /// Subscribe to added and removed services
    pub fn subscribe(&self) -> DirectoryReceiver {
        DirectoryReceiver::new(self.event_tx.subscribe())
    }

    /// Snapshot of the currently known services, ordered by host
    pub fn services(&self) -> Vec<Service> {
        self.state.lock().services.values().cloned().collect()
    }

    /// Number of known services
    pub fn service_count(&self) -> usize {
        self.state.lock().services.len()
    }

    /// Whether the background browser is running
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Start browsing. Services rejected by `filter` are dropped silently.
    ///
    /// If the directory is already running it is stopped first, which also
    /// forgets every known service.
    pub fn start(&mut self, filter: Option<ServiceFilter>) -> Result<()> {
        self.shutdown();
        self.state.lock().filter = filter;

        let daemon = ServiceDaemon::new()?;
        let receiver = daemon.browse(&self.service_type)?;
        tracing::info!("Browsing for {}", self.service_type);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_browser(
            receiver,
            self.state.clone(),
            self.event_tx.clone(),
            cancel.clone(),
        ));

        self.daemon = Some(daemon);
        self.cancel = Some(cancel);
        self.task_handle = Some(handle);
        Ok(())
    }

    /// Stop browsing and forget every known service. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        let handle = self.task_handle.take();
        self.shutdown();
        if let Some(handle) = handle {
            // Give it a moment to stop gracefully
            let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
        }
    }

    /// Feed an announcement from a source other than mDNS.
    ///
    /// Goes through the same validation, filter and deduplication as browsed
    /// announcements. Returns the service if it was added.
    pub fn announce(&self, announcement: Announcement) -> Option<Service> {
        ingest(&self.state, &self.event_tx, announcement)
    }

    /// Withdraw a previously announced instance by its full name
    pub fn withdraw(&self, fullname: &str) -> Option<Service> {
        withdraw(&self.state, &self.event_tx, fullname)
    }

    fn shutdown(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
        if let Some(daemon) = self.daemon.take() {
            if let Err(e) = daemon.stop_browse(&self.service_type) {
                tracing::debug!("Failed to stop browsing cleanly: {}", e);
            }
            let _ = daemon.shutdown();
            tracing::info!("Stopped browsing for {}", self.service_type);
        }
        self.state.lock().clear();
    }
}

impl Drop for ServiceDirectory {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_browser(
    receiver: flume::Receiver<ServiceEvent>,
    state: Arc<Mutex<DirectoryState>>,
    event_tx: Arc<broadcast::Sender<DirectoryEvent>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Browser cancelled");
                break;
            }
            event = receiver.recv_async() => {
                match event {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        ingest(&state, &event_tx, announcement_from_info(&info));
                    }
                    Ok(ServiceEvent::ServiceRemoved(_ty, fullname)) => {
                        withdraw(&state, &event_tx, &fullname);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("mDNS browse channel closed: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

fn announcement_from_info(info: &ServiceInfo) -> Announcement {
    let fullname = info.get_fullname().to_string();
    let name = fullname
        .strip_suffix(info.get_type())
        .map(|s| s.trim_end_matches('.').to_string())
        .unwrap_or_default();

    Announcement {
        name,
        host: Some(info.get_hostname().to_string()),
        port: Some(info.get_port()),
        addresses: info.get_addresses().iter().copied().collect(),
        fullname,
    }
}

fn ingest(
    state: &Mutex<DirectoryState>,
    event_tx: &broadcast::Sender<DirectoryEvent>,
    announcement: Announcement,
) -> Option<Service> {
    let fullname = announcement.fullname.clone();
    let Some(service) = announcement.into_service() else {
        tracing::debug!("Dropping incomplete announcement {:?}", fullname);
        return None;
    };

    // The filter is user code and runs unlocked
    let filter = state.lock().filter.clone();
    if let Some(filter) = filter {
        if !filter(&service) {
            tracing::trace!("Filtered out {} ({})", service.name, service.host);
            return None;
        }
    }

    let mut state = state.lock();
    if state.services.contains_key(&service.host) {
        tracing::trace!("Ignoring repeat announcement for {}", service.host);
        return None;
    }

    tracing::info!("Discovered {} at {}:{}", service.name, service.host, service.port);
    state.services.insert(service.host.clone(), service.clone());
    if !fullname.is_empty() {
        state.hosts_by_fullname.insert(fullname, service.host.clone());
    }
    drop(state);

    let _ = event_tx.send(DirectoryEvent::Added(service.clone()));
    Some(service)
}

fn withdraw(
    state: &Mutex<DirectoryState>,
    event_tx: &broadcast::Sender<DirectoryEvent>,
    fullname: &str,
) -> Option<Service> {
    let mut state = state.lock();
    let host = state.hosts_by_fullname.remove(fullname)?;
    let service = state.services.remove(&host)?;
    drop(state);

    tracing::info!("{} at {} withdrew", service.name, service.host);
    let _ = event_tx.send(DirectoryEvent::Removed(service.clone()));
    Some(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn announcement(instance: &str, host: &str, last_octet: u8) -> Announcement {
        Announcement {
            fullname: format!("{}._http._tcp.local.", instance),
            name: instance.to_string(),
            host: Some(format!("{}.", host)),
            port: Some(8080),
            addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, last_octet))],
        }
    }

    fn directory() -> ServiceDirectory {
        ServiceDirectory::new(&BridgeConfig::default())
    }

    #[tokio::test]
    async fn first_announcement_per_host_wins() {
        let directory = directory();
        let mut events = directory.subscribe();

        let sequence = [
            announcement("Bridge A", "studio.local", 10),
            announcement("Bridge B", "studio.local", 11),
            announcement("Bridge C", "attic.local", 12),
            announcement("Bridge A", "studio.local", 10),
            announcement("Bridge D", "attic.local", 13),
        ];
        for a in sequence {
            directory.announce(a);
        }

        let services = directory.services();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].host, "attic.local");
        assert_eq!(services[0].name, "Bridge C");
        assert_eq!(services[1].host, "studio.local");
        assert_eq!(services[1].name, "Bridge A");

        let mut added = Vec::new();
        while let Some(event) = events.try_recv().unwrap() {
            added.push(event);
        }
        assert_eq!(added.len(), 2);
    }

    #[test]
    fn incomplete_announcements_are_dropped() {
        let directory = directory();
        let mut missing_port = announcement("Bridge", "studio.local", 10);
        missing_port.port = None;
        let mut missing_addresses = announcement("Bridge", "studio.local", 10);
        missing_addresses.addresses.clear();

        assert!(directory.announce(missing_port).is_none());
        assert!(directory.announce(missing_addresses).is_none());
        assert_eq!(directory.service_count(), 0);

        assert!(directory.announce(announcement("Bridge", "studio.local", 10)).is_some());
    }

    #[test]
    fn filter_rejects_silently() {
        let directory = directory();
        directory.state.lock().filter = Some(Arc::new(|s: &Service| s.name.starts_with("Airfoil")));

        assert!(directory.announce(announcement("Printer", "printer.local", 3)).is_none());
        assert!(directory.announce(announcement("Airfoil Den", "den.local", 4)).is_some());
        assert_eq!(directory.service_count(), 1);
    }

    #[test]
    fn filter_may_read_the_directory() {
        let directory = directory();
        let state = directory.state.clone();
        directory.state.lock().filter = Some(Arc::new(move |_: &Service| state.lock().services.is_empty()));

        assert!(directory.announce(announcement("Bridge A", "studio.local", 10)).is_some());
        assert!(directory.announce(announcement("Bridge B", "attic.local", 11)).is_none());
        assert_eq!(directory.service_count(), 1);
    }

    #[tokio::test]
    async fn withdrawal_frees_the_host() {
        let directory = directory();
        directory.announce(announcement("Bridge A", "studio.local", 10));
        let mut events = directory.subscribe();

        // A duplicate's withdrawal does not remove the first service
        assert!(directory.withdraw("Bridge B._http._tcp.local.").is_none());
        assert_eq!(directory.service_count(), 1);

        let removed = directory.withdraw("Bridge A._http._tcp.local.").unwrap();
        assert_eq!(removed.name, "Bridge A");
        assert_eq!(events.try_recv().unwrap(), Some(DirectoryEvent::Removed(removed)));

        assert!(directory.announce(announcement("Bridge B", "studio.local", 11)).is_some());
        assert_eq!(directory.services()[0].name, "Bridge B");
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_forgets_services() {
        let mut directory = directory();
        directory.announce(announcement("Bridge A", "studio.local", 10));

        directory.stop().await;
        directory.stop().await;
        assert_eq!(directory.service_count(), 0);
        assert!(!directory.is_running());

        // The same host is new again after a stop
        assert!(directory.announce(announcement("Bridge A", "studio.local", 10)).is_some());
    }
}
