//! Change publishers
//!
//! The poll loop hands each non-empty change batch to exactly one
//! `ChangePublisher` call. Publishing is fire-and-forget.

use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::model::DriveState;

/// Receiver of per-cycle change batches
pub trait ChangePublisher: Send + Sync {
    fn publish(&self, batch: Vec<DriveState>);
}

/// Fans batches out to in-process subscribers
///
/// Lagging receivers lose old batches; no receiver at all is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Vec<DriveState>>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<DriveState>> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl ChangePublisher for BroadcastPublisher {
    fn publish(&self, batch: Vec<DriveState>) {
        let size = batch.len();
        match self.tx.send(batch) {
            Ok(receivers) => trace!("Published {} changes to {} receivers", size, receivers),
            Err(_) => trace!("Published {} changes, no receivers", size),
        }
    }
}

/// Logs each batch at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

impl ChangePublisher for LogPublisher {
    fn publish(&self, batch: Vec<DriveState>) {
        let ids: Vec<u16> = batch.iter().map(|s| s.id).collect();
        debug!("Drive changes: {:?}", ids);
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::model::{DriveCapabilities, DriveRecord};
    use chrono::Utc;

    fn state(id: u16) -> DriveState {
        DriveState::from_record(
            id,
            format!("Drive {id}"),
            &DriveRecord::default(),
            DriveCapabilities::default(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_broadcast_delivers_batch() {
        let publisher = BroadcastPublisher::new(4);
        let mut rx = publisher.subscribe();
        assert_eq!(publisher.receiver_count(), 1);

        publisher.publish(vec![state(1), state(2)]);
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_publish_without_receivers() {
        BroadcastPublisher::new(1).publish(vec![state(1)]);
        LogPublisher.publish(vec![state(1)]);
    }

    #[tokio::test]
    async fn test_lagging_receiver_does_not_block() {
        let publisher = BroadcastPublisher::new(1);
        let mut rx = publisher.subscribe();
        publisher.publish(vec![state(1)]);
        publisher.publish(vec![state(2)]);

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert_eq!(rx.recv().await.unwrap()[0].id, 2);
    }
}
