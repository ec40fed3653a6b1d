//! Plaintext wire format of the bridge control endpoint.
//!
//! ```text
//! GET /v2/                              -> one device per line: "<id> <status> <volume> <name...>"
//! GET /v2/<id>                          -> the same, for one device
//! GET /v2/<id>/Volume/<0-100>           -> acknowledgement
//! GET /v2/<id>/Status/<Connect|Disconnect> -> a single status code
//! ```

use crate::error::{BridgeError, Result};
use crate::types::{ConnectionIntent, Device, DeviceStatus, Service, Volume, MAX_VOLUME};
use reqwest::Url;

const API_VERSION: &str = "v2";

/// Build an endpoint URL, percent-encoding each path segment
fn endpoint(service: &Service, segments: &[&str]) -> Result<String> {
    let invalid = || BridgeError::InvalidArgument(format!("Cannot address {}:{}", service.host, service.port));

    let mut url = Url::parse(&service.base_url()).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .clear()
        .push(API_VERSION)
        .extend(segments);
    Ok(url.into())
}

/// URL of the status feed, for all devices or for one
pub fn status_url(service: &Service, device_id: Option<&str>) -> Result<String> {
    match device_id {
        Some(id) => endpoint(service, &[id]),
        // Trailing slash
        None => endpoint(service, &[""]),
    }
}

/// URL of the volume command
pub fn volume_url(service: &Service, device_id: &str, volume: Volume) -> Result<String> {
    endpoint(service, &[device_id, "Volume", &volume.to_string()])
}

/// URL of the connection command
pub fn connection_url(service: &Service, device_id: &str, intent: ConnectionIntent) -> Result<String> {
    endpoint(service, &[device_id, "Status", intent.as_path()])
}

/// Map a status code, logging the ones we do not recognize
pub fn parse_status_code(code: &str) -> DeviceStatus {
    let status = DeviceStatus::from_code(code);
    if status == DeviceStatus::Unknown {
        tracing::warn!("Unrecognized status code {:?}", code);
    }
    status
}

/// Parse the body of a connection command response
pub fn parse_command_status(body: &str) -> Result<DeviceStatus> {
    let code = body.trim();
    if code.is_empty() || code.split_whitespace().count() != 1 {
        return Err(BridgeError::Protocol(format!(
            "Expected a single status code, got {:?}",
            body
        )));
    }
    Ok(parse_status_code(code))
}

/// Parse one non-blank status line
fn parse_device_line(line: &str) -> Result<Device> {
    let mut tokens = line.split_whitespace();
    let (Some(id), Some(code), Some(volume)) = (tokens.next(), tokens.next(), tokens.next()) else {
        return Err(BridgeError::Protocol(format!("Truncated status line: {:?}", line)));
    };

    let name = tokens.collect::<Vec<_>>().join(" ");
    if name.is_empty() {
        return Err(BridgeError::Protocol(format!("Status line without name: {:?}", line)));
    }

    let volume: Volume = volume
        .parse()
        .ok()
        .filter(|v| *v <= MAX_VOLUME)
        .ok_or_else(|| BridgeError::Protocol(format!("Invalid volume {:?} in {:?}", volume, line)))?;

    Ok(Device {
        id: id.to_string(),
        status: parse_status_code(code),
        volume,
        name,
    })
}

/// Parse a full status feed body. Any malformed line fails the whole body.
pub fn parse_status_body(body: &str) -> Result<Vec<Device>> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_device_line)
        .collect()
}
