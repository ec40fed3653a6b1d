use crate::config::BridgeConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cadence state of one poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Slow interval, the resting state
    Baseline,
    /// Fast interval, held for a window after a connection command
    Accelerated,
}

struct SchedulerState {
    cadence: Cadence,
    /// Bumped on every acceleration; a revert timer only fires for its own generation
    generation: u64,
    revert: Option<JoinHandle<()>>,
}

/// Adaptive refresh scheduler.
///
/// Publishes the current poll interval through a watch channel. The poll loop
/// reads it when it schedules its next tick, so a change never causes an
/// extra tick by itself.
#[derive(Clone)]
pub struct RefreshScheduler {
    baseline: Duration,
    accelerated: Duration,
    window: Duration,
    state: Arc<Mutex<SchedulerState>>,
    interval_tx: Arc<watch::Sender<Duration>>,
}

impl RefreshScheduler {
    pub fn new(config: &BridgeConfig) -> Self {
        let (interval_tx, _) = watch::channel(config.baseline_interval());
        Self {
            baseline: config.baseline_interval(),
            accelerated: config.accelerated_interval(),
            window: config.acceleration_window(),
            state: Arc::new(Mutex::new(SchedulerState {
                cadence: Cadence::Baseline,
                generation: 0,
                revert: None,
            })),
            interval_tx: Arc::new(interval_tx),
        }
    }

    /// Current cadence
    pub fn cadence(&self) -> Cadence {
        self.state.lock().cadence
    }

    /// Current poll interval
    pub fn interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    /// Watch the poll interval
    pub fn subscribe(&self) -> watch::Receiver<Duration> {
        self.interval_tx.subscribe()
    }

    /// Switch to the accelerated interval and (re)start the revert window.
    ///
    /// A pending revert is cancelled and replaced, never stacked.
    pub fn accelerate(&self) {
        let mut state = self.state.lock();

        if let Some(pending) = state.revert.take() {
            pending.abort();
        }
        state.generation += 1;
        let generation = state.generation;

        if state.cadence != Cadence::Accelerated {
            tracing::debug!("Accelerating polling to {:?}", self.accelerated);
            state.cadence = Cadence::Accelerated;
            self.interval_tx.send_replace(self.accelerated);
        }

        let shared = self.state.clone();
        let interval_tx = self.interval_tx.clone();
        let baseline = self.baseline;
        let window = self.window;
        state.revert = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let mut state = shared.lock();
            if state.generation != generation {
                return;
            }
            tracing::debug!("Reverting polling to {:?}", baseline);
            state.cadence = Cadence::Baseline;
            state.revert = None;
            interval_tx.send_replace(baseline);
        }));
    }

    /// Drop back to the baseline interval immediately
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if let Some(pending) = state.revert.take() {
            pending.abort();
        }
        state.generation += 1;
        if state.cadence != Cadence::Baseline {
            state.cadence = Cadence::Baseline;
            self.interval_tx.send_replace(self.baseline);
        }
    }
}
