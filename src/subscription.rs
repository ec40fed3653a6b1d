use crate::error::{BridgeError, Result};
use crate::types::{Service, Snapshot};
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;

/// Change to the set of discovered services
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    /// A service with a host not seen before in this session
    Added(Service),

    /// A previously added service withdrew its announcement
    Removed(Service),
}

/// New device list for an attached service
#[derive(Debug, Clone)]
pub struct SnapshotUpdate {
    /// Host of the service the snapshot belongs to
    pub host: String,

    /// The complete new device list
    pub devices: Snapshot,
}

/// Receiver for a broadcast subscription.
///
/// May hold one value to hand out before anything from the channel, so that
/// late subscribers start from the current state. Dropping the receiver
/// unsubscribes.
pub struct Receiver<T> {
    rx: broadcast::Receiver<T>,
    pending: Option<T>,
}

/// Receiver for directory events
pub type DirectoryReceiver = Receiver<DirectoryEvent>;

/// Receiver for snapshot updates
pub type SnapshotReceiver = Receiver<SnapshotUpdate>;

impl<T: Clone + Send + 'static> Receiver<T> {
    pub(crate) fn new(rx: broadcast::Receiver<T>) -> Self {
        Self { rx, pending: None }
    }

    /// Subscribe with `current` as the first value delivered
    pub(crate) fn with_current(rx: broadcast::Receiver<T>, current: Option<T>) -> Self {
        Self { rx, pending: current }
    }

    /// Receive the next message
    ///
    /// Returns `Detached` once the publishing side has gone away, and
    /// `Channel` if this receiver fell behind. Receiving again after a
    /// `Channel` error continues with the oldest message still buffered.
    pub async fn recv(&mut self) -> Result<T> {
        if let Some(msg) = self.pending.take() {
            return Ok(msg);
        }
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => BridgeError::Detached,
            broadcast::error::RecvError::Lagged(n) => {
                BridgeError::Channel(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive a message without blocking
    ///
    /// Returns `None` if no message is available.
    pub fn try_recv(&mut self) -> Result<Option<T>> {
        if let Some(msg) = self.pending.take() {
            return Ok(Some(msg));
        }
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(BridgeError::Detached),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(BridgeError::Channel(format!("Lagged by {} messages", n)))
            }
        }
    }

    /// Turn the receiver into a stream that skips over lag and ends when the publisher closes
    pub fn into_stream(self) -> impl Stream<Item = T> + Send + Unpin {
        let live = stream::unfold(self.rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => return Some((msg, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Subscriber lagged by {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Box::pin(stream::iter(self.pending).chain(live))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_ends_when_sender_drops() {
        let (tx, rx) = broadcast::channel(8);
        let mut stream = Receiver::new(rx).into_stream();

        tx.send(1u32).unwrap();
        tx.send(2u32).unwrap();
        drop(tx);

        assert_eq!(stream.next().await, Some(1));
        assert_eq!(stream.next().await, Some(2));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn try_recv_reports_empty_and_closed() {
        let (tx, rx) = broadcast::channel::<u32>(8);
        let mut rx = Receiver::new(rx);

        assert!(rx.try_recv().unwrap().is_none());
        drop(tx);
        assert!(matches!(rx.try_recv(), Err(BridgeError::Detached)));
    }

    #[tokio::test]
    async fn lag_is_a_channel_error_and_recovers() {
        let (tx, rx) = broadcast::channel(4);
        let mut rx = Receiver::new(rx);

        for n in 0..10u32 {
            tx.send(n).unwrap();
        }

        let err = rx.recv().await.unwrap_err();
        assert!(matches!(err, BridgeError::Channel(_)));
        assert!(!err.is_protocol());
        assert_eq!(rx.recv().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn current_value_comes_first() {
        let (tx, rx) = broadcast::channel(8);
        let mut rx = Receiver::with_current(rx, Some(0u32));
        tx.send(1).unwrap();

        assert_eq!(rx.try_recv().unwrap(), Some(0));
        assert_eq!(rx.recv().await.unwrap(), 1);
        assert!(rx.try_recv().unwrap().is_none());

        let mut stream = Receiver::with_current(tx.subscribe(), Some(5u32)).into_stream();
        tx.send(6).unwrap();
        drop(tx);
        assert_eq!(stream.next().await, Some(5));
        assert_eq!(stream.next().await, Some(6));
        assert_eq!(stream.next().await, None);
    }
}
