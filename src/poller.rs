use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::protocol;
use crate::scheduler::RefreshScheduler;
use crate::subscription::{SnapshotReceiver, SnapshotUpdate};
use crate::transport::{get_with_timeout, Transport};
use crate::types::{Device, DeviceId, Service, Snapshot};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What a successful tick did to the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// Identical to the previous snapshot; nothing emitted
    Unchanged,
    /// Snapshot replaced and emitted
    Updated,
    /// Result arrived too late (detached, or overtaken by a newer poll) and was dropped
    Discarded,
}

/// Last known device list plus the bookkeeping that orders writes to it
struct PollState {
    snapshot: Snapshot,
    /// Source of sequence numbers for polls and commands
    next_seq: u64,
    /// Sequence number of the poll currently reflected in `snapshot`
    applied_poll_seq: u64,
    /// Sequence number of the last command applied per device
    device_seq: HashMap<DeviceId, u64>,
    consecutive_failures: u32,
}

/// State shared between the poll loop, the handle and the dispatcher
pub(crate) struct PollShared {
    service: Service,
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
    state: Mutex<PollState>,
    update_tx: broadcast::Sender<SnapshotUpdate>,
    force: Notify,
    cancel: CancellationToken,
}

impl PollShared {
    fn new(service: Service, transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        let (update_tx, _) = broadcast::channel(64);
        Self {
            service,
            transport,
            request_timeout,
            state: Mutex::new(PollState {
                snapshot: Arc::new(Vec::new()),
                next_seq: 0,
                applied_poll_seq: 0,
                device_seq: HashMap::new(),
                consecutive_failures: 0,
            }),
            update_tx,
            force: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stamp a request that is about to be issued
    pub(crate) fn begin(&self) -> u64 {
        let mut state = self.state.lock();
        state.next_seq += 1;
        state.next_seq
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Caller holds the state lock, so a concurrent subscriber sees either the
    /// old snapshot plus this update or the new snapshot alone
    fn publish(&self, devices: &Snapshot) {
        // No receivers is fine
        let _ = self.update_tx.send(SnapshotUpdate {
            host: self.service.host.clone(),
            devices: devices.clone(),
        });
    }

    /// Reconcile a parsed poll result stamped `seq` against the current snapshot
    fn apply_poll(&self, seq: u64, devices: Vec<Device>) -> TickOutcome {
        if self.cancel.is_cancelled() {
            return TickOutcome::Discarded;
        }

        let mut state = self.state.lock();
        if seq < state.applied_poll_seq {
            tracing::debug!("Dropping poll #{} for {}, #{} already applied", seq, self.service.host, state.applied_poll_seq);
            return TickOutcome::Discarded;
        }

        let previous = state.snapshot.clone();
        let candidate: Vec<Arc<Device>> = devices
            .into_iter()
            .enumerate()
            .map(|(idx, device)| {
                let newer_command = state
                    .device_seq
                    .get(&device.id)
                    .is_some_and(|cmd_seq| *cmd_seq > seq);
                if newer_command {
                    if let Some(current) = previous.iter().find(|d| d.id == device.id) {
                        return current.clone();
                    }
                }
                match previous.get(idx) {
                    Some(current) if **current == device => current.clone(),
                    _ => Arc::new(device),
                }
            })
            .collect();

        state.applied_poll_seq = seq;
        state
            .device_seq
            .retain(|id, _| candidate.iter().any(|d| &d.id == id));

        let unchanged = candidate.len() == previous.len()
            && candidate.iter().zip(previous.iter()).all(|(a, b)| a == b);
        if unchanged {
            tracing::trace!("Poll #{} for {} unchanged", seq, self.service.host);
            return TickOutcome::Unchanged;
        }

        let snapshot: Snapshot = Arc::new(candidate);
        state.snapshot = snapshot.clone();
        self.publish(&snapshot);
        drop(state);

        tracing::debug!("Poll #{} for {} produced {} device(s)", seq, self.service.host, snapshot.len());
        TickOutcome::Updated
    }

    /// Apply an optimistic change to one device, for a command stamped `seq`.
    ///
    /// Devices that are not in the snapshot are never created.
    pub(crate) fn apply_command(
        &self,
        seq: u64,
        device_id: &str,
        change: impl FnOnce(&mut Device),
    ) -> TickOutcome {
        if self.cancel.is_cancelled() {
            return TickOutcome::Discarded;
        }

        let mut state = self.state.lock();
        if seq < state.applied_poll_seq
            || state.device_seq.get(device_id).is_some_and(|s| *s > seq)
        {
            tracing::debug!("Dropping stale command #{} for {}", seq, device_id);
            return TickOutcome::Discarded;
        }

        let Some(idx) = state.snapshot.iter().position(|d| d.id == device_id) else {
            tracing::debug!("Command target {} not in snapshot of {}", device_id, self.service.host);
            return TickOutcome::Discarded;
        };

        let mut updated = (*state.snapshot[idx]).clone();
        change(&mut updated);
        state.device_seq.insert(device_id.to_string(), seq);
        if updated == *state.snapshot[idx] {
            return TickOutcome::Unchanged;
        }

        let mut devices: Vec<Arc<Device>> = state.snapshot.iter().cloned().collect();
        devices[idx] = Arc::new(updated);
        let snapshot: Snapshot = Arc::new(devices);
        state.snapshot = snapshot.clone();
        self.publish(&snapshot);
        TickOutcome::Updated
    }

    fn subscribe(&self) -> SnapshotReceiver {
        let state = self.state.lock();
        let current = (state.applied_poll_seq > 0).then(|| SnapshotUpdate {
            host: self.service.host.clone(),
            devices: state.snapshot.clone(),
        });
        SnapshotReceiver::with_current(self.update_tx.subscribe(), current)
    }

    async fn fetch(&self) -> Result<Vec<Device>> {
        let url = protocol::status_url(&self.service, None)?;
        let body = get_with_timeout(self.transport(), &url, self.request_timeout).await?;
        protocol::parse_status_body(&body)
    }

    /// Fetch, parse and reconcile once
    async fn tick(&self) -> Result<TickOutcome> {
        let seq = self.begin();
        let parsed = self.fetch().await;

        match parsed {
            Ok(devices) => {
                self.state.lock().consecutive_failures = 0;
                Ok(self.apply_poll(seq, devices))
            }
            Err(e) => {
                self.state.lock().consecutive_failures += 1;
                Err(e)
            }
        }
    }
}

/// Handle to the refresh loop of one attached service.
///
/// Clones share the same loop. The loop runs until [`PollerHandle::detach`]
/// is called or the last clone is dropped.
#[derive(Clone)]
pub struct PollerHandle {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    id: Uuid,
    shared: Arc<PollShared>,
    scheduler: RefreshScheduler,
}

impl PollerInner {
    fn stop(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        tracing::info!("Detaching poller {} from {}", self.id, self.shared.service.host);
        self.shared.cancel.cancel();
        self.scheduler.reset();
    }
}

impl Drop for PollerInner {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PollerHandle {
    /// Start polling `service`. The first tick runs immediately.
    pub(crate) fn attach(service: Service, transport: Arc<dyn Transport>, config: &BridgeConfig) -> Self {
        let id = Uuid::new_v4();
        tracing::info!("Attaching poller {} to {} ({}:{})", id, service.name, service.host, service.port);

        let shared = Arc::new(PollShared::new(service, transport, config.request_timeout()));
        let scheduler = RefreshScheduler::new(config);

        tokio::spawn(run_poll_loop(shared.clone(), scheduler.clone()));

        Self {
            inner: Arc::new(PollerInner {
                id,
                shared,
                scheduler,
            }),
        }
    }

    /// Unique id of this attachment
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The service being polled
    pub fn service(&self) -> &Service {
        &self.inner.shared.service
    }

    /// Last known device list
    pub fn snapshot(&self) -> Snapshot {
        self.inner.shared.state.lock().snapshot.clone()
    }

    /// Subscribe to device list changes. No-op polls are not delivered.
    ///
    /// Once the service has been polled, the first value received is the
    /// current snapshot.
    pub fn subscribe(&self) -> SnapshotReceiver {
        self.inner.shared.subscribe()
    }

    /// The cadence controller of this loop
    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.inner.scheduler
    }

    /// Number of failed ticks since the last successful one
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.shared.state.lock().consecutive_failures
    }

    /// Poll now instead of waiting for the next scheduled tick
    pub fn refresh(&self) {
        self.inner.shared.force.notify_one();
    }

    /// Whether the loop is still running
    pub fn is_attached(&self) -> bool {
        !self.inner.shared.cancel.is_cancelled()
    }

    /// Stop the loop. Results of requests still in flight are discarded.
    pub fn detach(&self) {
        self.inner.stop();
    }

    pub(crate) fn shared(&self) -> Result<&PollShared> {
        if self.inner.shared.cancel.is_cancelled() {
            return Err(BridgeError::Detached);
        }
        Ok(self.inner.shared.as_ref())
    }
}

async fn run_poll_loop(shared: Arc<PollShared>, scheduler: RefreshScheduler) {
    let interval_rx = scheduler.subscribe();

    loop {
        let outcome = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            outcome = shared.tick() => outcome,
        };

        match outcome {
            Ok(_) => {}
            Err(e) if e.is_protocol() => {
                tracing::warn!("Poll protocol error from {}: {}", shared.service.host, e);
            }
            Err(e) => {
                tracing::warn!("Poll network error from {}: {}", shared.service.host, e);
            }
        }

        // Read at scheduling time: an interval change applies from the next tick on
        let interval = *interval_rx.borrow();
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = shared.force.notified() => {
                tracing::debug!("Forced poll of {}", shared.service.host);
            }
            _ = sleep(interval) => {}
        }
    }

    tracing::info!("Poll loop for {} stopped", shared.service.host);
}
