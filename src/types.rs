use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

/// Device identifier, unique within one service
pub type DeviceId = String;

/// Volume level, 0 to 100
pub type Volume = u8;

/// Highest volume the bridge accepts
pub const MAX_VOLUME: Volume = 100;

/// Full device list of a service at one point in time.
///
/// Devices are individually reference counted so that a single-device update
/// can share every untouched record with the previous snapshot.
pub type Snapshot = Arc<Vec<Arc<Device>>>;

/// A network-reachable bridge control endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// IP address or hostname, unique within a directory
    pub host: String,
    pub port: u16,
    /// Advertised label
    pub name: String,
    /// Candidate addresses, sorted
    pub addresses: Vec<IpAddr>,
}

impl Service {
    /// Address requests are sent to: the first IPv4 address, then any
    /// address, then the host itself
    pub fn request_addr(&self) -> Option<IpAddr> {
        self.addresses
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| self.addresses.first())
            .copied()
            .or_else(|| self.host.parse().ok())
    }

    /// Base URL of the control endpoint, without trailing slash.
    ///
    /// Uses a resolved address when there is one, so `.local` hosts work
    /// without a system mDNS resolver.
    pub fn base_url(&self) -> String {
        match self.request_addr() {
            Some(IpAddr::V6(ip)) => format!("http://[{}]:{}", ip, self.port),
            Some(IpAddr::V4(ip)) => format!("http://{}:{}", ip, self.port),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}

/// A raw announcement as observed on the network.
///
/// Announcements may be partial; [`Announcement::into_service`] rejects the
/// ones that cannot be addressed.
#[derive(Debug, Clone, Default)]
pub struct Announcement {
    /// Fully qualified instance name, used to match later withdrawals
    pub fullname: String,
    pub name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub addresses: Vec<IpAddr>,
}

impl Announcement {
    /// Convert into a [`Service`], or `None` when the host, port or addresses are missing
    pub fn into_service(self) -> Option<Service> {
        let port = self.port.filter(|p| *p != 0)?;
        if self.addresses.is_empty() {
            return None;
        }

        let mut addresses = self.addresses;
        addresses.sort();
        addresses.dedup();

        let host = self
            .host
            .map(|h| h.trim_end_matches('.').to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| addresses[0].to_string());

        let name = if self.name.is_empty() {
            host.clone()
        } else {
            self.name
        };

        Some(Service {
            host,
            port,
            name,
            addresses,
        })
    }
}

/// Connection state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Disconnected,
    Connected,
    Standby,
    Connecting,
    Disconnecting,
    Unknown,
}

impl DeviceStatus {
    /// Map a wire status code. Unrecognized codes become [`DeviceStatus::Unknown`].
    pub fn from_code(code: &str) -> Self {
        match code {
            "0" => DeviceStatus::Disconnected,
            "100" => DeviceStatus::Connected,
            "200" => DeviceStatus::Standby,
            "10" => DeviceStatus::Connecting,
            "400" => DeviceStatus::Disconnecting,
            _ => DeviceStatus::Unknown,
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceStatus::Disconnected => "disconnected",
            DeviceStatus::Connected => "connected",
            DeviceStatus::Standby => "standby",
            DeviceStatus::Connecting => "connecting",
            DeviceStatus::Disconnecting => "disconnecting",
            DeviceStatus::Unknown => "unknown",
        };
        f.pad(s)
    }
}

/// One audio sink exposed by a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub status: DeviceStatus,
    pub volume: Volume,
    pub name: String,
}

/// Requested connection change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionIntent {
    Connect,
    Disconnect,
}

impl ConnectionIntent {
    /// Path segment used by the connection endpoint
    pub fn as_path(&self) -> &'static str {
        match self {
            ConnectionIntent::Connect => "Connect",
            ConnectionIntent::Disconnect => "Disconnect",
        }
    }

    /// The action that flips a device out of its current state
    pub fn toggle_for(status: DeviceStatus) -> Self {
        match status {
            DeviceStatus::Connected | DeviceStatus::Standby | DeviceStatus::Connecting => {
                ConnectionIntent::Disconnect
            }
            _ => ConnectionIntent::Connect,
        }
    }
}

/// Find a device in a snapshot by id
pub fn find_device<'a>(snapshot: &'a Snapshot, id: &str) -> Option<&'a Arc<Device>> {
    snapshot.iter().find(|d| d.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn status_mapping_is_total() {
        assert_eq!(DeviceStatus::from_code("100"), DeviceStatus::Connected);
        assert_eq!(DeviceStatus::from_code("0"), DeviceStatus::Disconnected);
        assert_eq!(DeviceStatus::from_code("200"), DeviceStatus::Standby);
        assert_eq!(DeviceStatus::from_code("10"), DeviceStatus::Connecting);
        assert_eq!(DeviceStatus::from_code("400"), DeviceStatus::Disconnecting);
        for code in ["999", "", "-1", "00", "1e2", " 100", "connected", "\u{1F50A}"] {
            assert_eq!(DeviceStatus::from_code(code), DeviceStatus::Unknown, "code {:?}", code);
        }
    }

    #[test]
    fn announcement_without_port_or_address_is_rejected() {
        let base = Announcement {
            fullname: "Bridge._http._tcp.local.".into(),
            name: "Bridge".into(),
            host: Some("bridge.local.".into()),
            port: Some(8080),
            addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))],
        };

        assert!(Announcement { port: None, ..base.clone() }.into_service().is_none());
        assert!(Announcement { port: Some(0), ..base.clone() }.into_service().is_none());
        assert!(Announcement { addresses: vec![], ..base.clone() }.into_service().is_none());

        let service = base.into_service().unwrap();
        assert_eq!(service.host, "bridge.local");
    }

    #[test]
    fn local_hosts_are_addressed_by_ip() {
        let mut service = Service {
            host: "bridge.local".into(),
            port: 8080,
            name: "Bridge".into(),
            addresses: vec![
                "fe80::1".parse().unwrap(),
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            ],
        };
        assert_eq!(service.base_url(), "http://192.168.1.20:8080");

        service.addresses = vec!["fd00::20".parse().unwrap()];
        assert_eq!(service.base_url(), "http://[fd00::20]:8080");

        service.addresses.clear();
        assert_eq!(service.base_url(), "http://bridge.local:8080");

        service.host = "::1".into();
        assert_eq!(service.base_url(), "http://[::1]:8080");
    }

    #[test]
    fn announcement_falls_back_to_first_address() {
        let service = Announcement {
            port: Some(80),
            addresses: vec![
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)),
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            ],
            ..Default::default()
        }
        .into_service()
        .unwrap();

        assert_eq!(service.host, "10.0.0.2");
        assert_eq!(service.name, "10.0.0.2");
    }

    #[test]
    fn toggle_picks_the_opposite_action() {
        assert_eq!(ConnectionIntent::toggle_for(DeviceStatus::Connected), ConnectionIntent::Disconnect);
        assert_eq!(ConnectionIntent::toggle_for(DeviceStatus::Standby), ConnectionIntent::Disconnect);
        assert_eq!(ConnectionIntent::toggle_for(DeviceStatus::Disconnected), ConnectionIntent::Connect);
        assert_eq!(ConnectionIntent::toggle_for(DeviceStatus::Unknown), ConnectionIntent::Connect);
    }
}
