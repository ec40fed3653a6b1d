#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use zonebridge::{BridgeClient, BridgeConfig, BridgeError, Result, Service, Transport};

pub const STATUS_PATH: &str = "/v2/";

/// Scripted bridge answering from in-memory responses
pub struct FakeBridge {
    state: Mutex<FakeState>,
    started: Instant,
}

struct FakeState {
    status: Option<String>,
    status_delay: Duration,
    responses: HashMap<String, Option<String>>,
    requests: Vec<(u64, String)>,
}

impl FakeBridge {
    pub fn new(status_body: &str) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                status: Some(status_body.to_string()),
                status_delay: Duration::ZERO,
                responses: HashMap::new(),
                requests: Vec::new(),
            }),
            started: Instant::now(),
        })
    }

    pub fn set_status(&self, body: &str) {
        self.state.lock().status = Some(body.to_string());
    }

    /// Make the status endpoint unreachable
    pub fn fail_status(&self) {
        self.state.lock().status = None;
    }

    pub fn delay_status(&self, delay: Duration) {
        self.state.lock().status_delay = delay;
    }

    /// Answer `path` with `body`; `None` makes the call fail
    pub fn respond(&self, path: &str, body: Option<&str>) {
        self.state
            .lock()
            .responses
            .insert(path.to_string(), body.map(str::to_string));
    }

    /// Every request path so far
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.iter().map(|(_, p)| p.clone()).collect()
    }

    /// Milliseconds since creation at which the status feed was requested
    pub fn status_times(&self) -> Vec<u64> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|(_, p)| p == STATUS_PATH)
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn status_count(&self) -> usize {
        self.status_times().len()
    }
}

#[async_trait]
impl Transport for FakeBridge {
    async fn get(&self, url: &str) -> Result<String> {
        let path = url
            .strip_prefix("http://")
            .and_then(|rest| rest.find('/').map(|idx| rest[idx..].to_string()))
            .unwrap_or_default();

        let (delay, answer) = {
            let mut state = self.state.lock();
            let elapsed = self.started.elapsed().as_millis() as u64;
            state.requests.push((elapsed, path.clone()));
            if path == STATUS_PATH {
                (state.status_delay, state.status.clone())
            } else {
                (Duration::ZERO, state.responses.get(&path).cloned().flatten())
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        answer.ok_or_else(|| BridgeError::RemoteCallFailed(format!("no route for {}", path)))
    }
}

pub fn service() -> Service {
    Service {
        host: "192.168.1.40".into(),
        port: 50000,
        name: "Living room".into(),
        addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40))],
    }
}

pub fn client(bridge: &Arc<FakeBridge>) -> BridgeClient {
    BridgeClient::with_transport(BridgeConfig::default(), bridge.clone())
}

/// Let spawned tasks run without moving the clock
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub const FEED: &str = "dev1 100 30 Kitchen\ndev2 0 70 Den Left\ndev3 200 15 Porch\n";
