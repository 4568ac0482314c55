//! Poll loop
//!
//! One worker per controller: ensure connected, read the whole drive table in
//! a single request, decode, diff against the registry, publish the changed
//! drives as one batch, sleep. Both sleeps end early on cancellation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::{decode_table, table_len};
use super::connection::{ConnectionManager, ConnectionState};
use super::events::{derive_events, EventSink};
use super::model::DriveState;
use super::publisher::ChangePublisher;
use super::registry::{DriveRegistry, DriveRegistryReader};
use crate::config::{DriveConfigProvider, DriveSettings, PollingConfig};

/// Table geometry and cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub data_block: u16,
    pub drive_count: u16,
    pub interval: Duration,
}

impl From<&PollingConfig> for PollSettings {
    fn from(config: &PollingConfig) -> Self {
        Self {
            data_block: config.data_block,
            drive_count: config.drive_count,
            interval: config.interval(),
        }
    }
}

/// Result of one read+diff+publish cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// This many drives changed and were published as one batch
    Published(usize),
    Unchanged,
    /// Read or decode failed; the session was dropped
    Failed,
}

/// Poll loop counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub published_batches: u64,
    pub published_drives: u64,
    pub last_success: Option<DateTime<Utc>>,
}

pub struct DrivePoller {
    connection: Arc<ConnectionManager>,
    registry: DriveRegistry,
    publisher: Arc<dyn ChangePublisher>,
    events: Arc<dyn EventSink>,
    drives: Arc<dyn DriveConfigProvider>,
    settings: PollSettings,
    stats: Arc<Mutex<PollStats>>,
}

impl DrivePoller {
    pub fn new(
        connection: Arc<ConnectionManager>,
        publisher: Arc<dyn ChangePublisher>,
        events: Arc<dyn EventSink>,
        drives: Arc<dyn DriveConfigProvider>,
        settings: PollSettings,
    ) -> Self {
        Self {
            connection,
            registry: DriveRegistry::new(),
            publisher,
            events,
            drives,
            settings,
            stats: Arc::new(Mutex::new(PollStats::default())),
        }
    }

    /// Snapshot handle onto the registry this poller writes
    pub fn registry(&self) -> DriveRegistryReader {
        self.registry.reader()
    }

    pub fn stats_handle(&self) -> Arc<Mutex<PollStats>> {
        Arc::clone(&self.stats)
    }

    /// Run until `cancel` fires or the connection is closed
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Poll loop started: DB{} x {} drives every {:?}",
            self.settings.data_block, self.settings.drive_count, self.settings.interval
        );

        while !cancel.is_cancelled() {
            if !self.connection.is_connected() {
                self.connection.ensure_connected().await;
                match self.connection.state() {
                    ConnectionState::Connected => {},
                    ConnectionState::Closed => break,
                    _ => {
                        let backoff = self.connection.backoff_delay();
                        debug!("Reconnect in {:?}", backoff);
                        if !sleep_or_cancel(backoff, &cancel).await {
                            break;
                        }
                        continue;
                    },
                }
            }

            let delay = match self.poll_once().await {
                CycleOutcome::Failed => self.connection.backoff_delay(),
                _ => self.settings.interval,
            };
            if !sleep_or_cancel(delay, &cancel).await {
                break;
            }
        }

        info!("Poll loop stopped");
    }

    /// One read, decode, diff and publish pass
    pub async fn poll_once(&mut self) -> CycleOutcome {
        let PollSettings {
            data_block,
            drive_count,
            ..
        } = self.settings;

        let buffer = match self
            .connection
            .read_block(data_block, 0, table_len(drive_count))
            .await
        {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(data_block, "Drive table read failed: {}", e);
                return self.record_failure();
            },
        };

        let records = match decode_table(&buffer, drive_count) {
            Ok(records) => records,
            Err(e) => {
                error!(data_block, "Drive table decode failed: {}", e);
                self.connection.invalidate(&e).await;
                return self.record_failure();
            },
        };

        let now = Utc::now();
        let mut batch = Vec::new();
        for (id, record) in (1..=drive_count).zip(records.iter()) {
            let settings = self
                .drives
                .drive(id)
                .unwrap_or_else(|| DriveSettings::for_drive(id));
            let candidate =
                DriveState::from_record(id, settings.name, record, settings.capabilities, now);

            let previous = self.registry.get(id);
            if self.registry.upsert_if_changed(id, candidate.clone()) {
                for event in derive_events(previous.as_ref(), &candidate) {
                    self.events.record(event);
                }
                batch.push(candidate);
            }
        }

        let changed = batch.len();
        {
            let mut stats = self.stats.lock();
            stats.cycles += 1;
            stats.last_success = Some(now);
            if changed > 0 {
                stats.published_batches += 1;
                stats.published_drives += changed as u64;
            }
        }

        if changed == 0 {
            return CycleOutcome::Unchanged;
        }
        debug!("{} drives changed", changed);
        self.publisher.publish(batch);
        CycleOutcome::Published(changed)
    }

    fn record_failure(&self) -> CycleOutcome {
        let mut stats = self.stats.lock();
        stats.cycles += 1;
        stats.failed_cycles += 1;
        CycleOutcome::Failed
    }
}

/// Sleep for `delay`; false when cancelled first
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::config::StaticDriveConfig;
    use crate::core::codec::drive_offset;
    use crate::core::connection::ReconnectPolicy;
    use crate::core::events::{ChannelEventSink, DriveEventKind};
    use crate::core::publisher::BroadcastPublisher;
    use crate::error::Result;
    use crate::protocols::virt::{VirtualPlc, VirtualPlcHandle};
    use crate::protocols::PlcTransport;
    use async_trait::async_trait;
    use tokio::sync::broadcast;

    const DB: u16 = 100;
    const DRIVES: u16 = 4;

    struct Fixture {
        poller: DrivePoller,
        plc: VirtualPlcHandle,
        connection: Arc<ConnectionManager>,
        batches: broadcast::Receiver<Vec<DriveState>>,
        events: tokio::sync::mpsc::Receiver<crate::core::events::DriveEvent>,
    }

    /// Controller that answers every read with three bytes missing
    struct TruncatingPlc {
        open: bool,
    }

    #[async_trait]
    impl PlcTransport for TruncatingPlc {
        async fn open(&mut self) -> Result<()> {
            self.open = true;
            Ok(())
        }

        async fn read_bytes(&mut self, _db: u16, _start: usize, len: usize) -> Result<Vec<u8>> {
            Ok(vec![0u8; len.saturating_sub(3)])
        }

        async fn write_bit(&mut self, _db: u16, _byte: usize, _bit: u8, _value: bool) -> Result<()> {
            Ok(())
        }

        async fn write_bytes(&mut self, _db: u16, _start: usize, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn endpoint(&self) -> String {
            "truncating".to_string()
        }
    }

    fn fixture() -> Fixture {
        fixture_with_interval(Duration::from_millis(100))
    }

    fn fixture_with_interval(interval: Duration) -> Fixture {
        let plc = VirtualPlc::new(DB, table_len(DRIVES));
        let handle = plc.handle();
        let connection = Arc::new(ConnectionManager::new(
            Box::new(plc),
            ReconnectPolicy::from_config(5000, 60_000, 1.0),
        ));
        let publisher = BroadcastPublisher::new(16);
        let batches = publisher.subscribe();
        let (sink, events) = ChannelEventSink::new(64);

        let poller = DrivePoller::new(
            Arc::clone(&connection),
            Arc::new(publisher),
            Arc::new(sink),
            Arc::new(StaticDriveConfig::new(DRIVES, Vec::new())),
            PollSettings {
                data_block: DB,
                drive_count: DRIVES,
                interval,
            },
        );
        Fixture {
            poller,
            plc: handle,
            connection,
            batches,
            events,
        }
    }

    #[tokio::test]
    async fn test_first_cycle_publishes_every_drive_once() {
        let mut f = fixture();
        f.connection.ensure_connected().await;

        assert_eq!(f.poller.poll_once().await, CycleOutcome::Published(4));
        let batch = f.batches.try_recv().unwrap();
        assert_eq!(batch.len(), 4);
        assert_eq!(batch[2].name, "Drive 3");
        // Exactly one publish per cycle
        assert!(f.batches.try_recv().is_err());

        assert_eq!(f.poller.poll_once().await, CycleOutcome::Unchanged);
        assert!(f.batches.try_recv().is_err());
        assert_eq!(f.plc.read_count(), 2);
    }

    #[tokio::test]
    async fn test_only_changed_drives_published() {
        let mut f = fixture();
        f.connection.ensure_connected().await;
        f.poller.poll_once().await;
        let _ = f.batches.try_recv();

        // Drive 2 starts running, drive 4 reports speed
        f.plc.set_bytes(DB, drive_offset(2), &[0x02]);
        f.plc.set_bytes(DB, drive_offset(4) + 2, &[0x00, 0x64]);

        assert_eq!(f.poller.poll_once().await, CycleOutcome::Published(2));
        let batch = f.batches.try_recv().unwrap();
        assert_eq!(batch.iter().map(|s| s.id).collect::<Vec<_>>(), vec![2, 4]);
        assert!(batch[0].flags.running);
        assert_eq!(batch[1].speed, 100);

        let event = f.events.try_recv().unwrap();
        assert_eq!(event.drive_id, 2);
        assert!(matches!(event.kind, DriveEventKind::StateChange { ref property, .. } if property == "Running"));
    }

    #[tokio::test]
    async fn test_read_failure_skips_publish_and_disconnects() {
        let mut f = fixture();
        f.connection.ensure_connected().await;
        f.plc.fail_next_reads(1);

        assert_eq!(f.poller.poll_once().await, CycleOutcome::Failed);
        assert_eq!(f.connection.state(), ConnectionState::Disconnected);
        assert!(f.batches.try_recv().is_err());
        assert!(f.poller.registry().is_empty());

        let stats = f.poller.stats_handle().lock().clone();
        assert_eq!(stats.failed_cycles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_backs_off_while_disconnected() {
        let f = fixture();
        f.plc.set_online(false);
        let registry = f.poller.registry();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(f.poller.run(cancel.clone()));

        // Attempts at 0s, 5s and 10s
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(f.connection.stats().failed_connects, 3);
        assert_eq!(f.plc.read_count(), 0);

        // Next attempt at 15s succeeds, then polling every 100ms
        f.plc.set_online(true);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(f.connection.is_connected());
        assert!(f.plc.read_count() >= 5);
        assert_eq!(registry.len(), 4);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_uses_backoff_not_interval() {
        let f = fixture();
        let cancel = CancellationToken::new();
        f.plc.fail_next_reads(1);
        let task = tokio::spawn(f.poller.run(cancel.clone()));

        // Failed read at 0s, reconnect and read again only after 5s
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(f.plc.read_count(), 1);
        assert!(!f.connection.is_connected());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.connection.is_connected());
        assert!(f.plc.read_count() > 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let f = fixture();
        f.plc.set_online(false);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(f.poller.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        // Returns well before the 5s backoff would elapse
        tokio::time::timeout(Duration::from_millis(100), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_short_read_treated_as_connection_failure() {
        let connection = Arc::new(ConnectionManager::new(
            Box::new(TruncatingPlc { open: false }),
            ReconnectPolicy::default(),
        ));
        let publisher = BroadcastPublisher::new(4);
        let mut batches = publisher.subscribe();
        let mut poller = DrivePoller::new(
            Arc::clone(&connection),
            Arc::new(publisher),
            Arc::new(ChannelEventSink::new(4).0),
            Arc::new(StaticDriveConfig::new(DRIVES, Vec::new())),
            PollSettings {
                data_block: DB,
                drive_count: DRIVES,
                interval: Duration::from_millis(100),
            },
        );

        connection.ensure_connected().await;
        assert!(connection.is_connected());

        assert_eq!(poller.poll_once().await, CycleOutcome::Failed);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(batches.try_recv().is_err());
        assert!(poller.registry().is_empty());
        assert_eq!(connection.stats().io_failures, 1);
        assert_eq!(poller.stats_handle().lock().failed_cycles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_poll_interval() {
        let f = fixture_with_interval(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(f.poller.run(cancel.clone()));

        // First cycle ran, loop is now inside the 60s interval sleep
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(f.connection.is_connected());
        assert_eq!(f.plc.read_count(), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_millis(100), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(f.plc.read_count(), 1);
    }
}
