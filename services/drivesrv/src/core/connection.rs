//! Controller connection lifecycle
//!
//! `Disconnected -> Connecting -> Connected`, back to `Disconnected` on any
//! I/O failure, `Closed` only after `close()`. The transport sits behind an
//! async mutex so poll reads and command writes are serialized.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{DriveSrvError, Result};
use crate::protocols::PlcTransport;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal, entered only through `close()`
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Delay between reconnect attempts
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for the grown delay
    pub max_delay: Duration,
    /// 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
    /// Add up to ±25% random jitter
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(initial_delay_ms: u64, max_delay_ms: u64, backoff_multiplier: f64) -> Self {
        Self {
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms.max(initial_delay_ms)),
            backoff_multiplier: backoff_multiplier.max(1.0),
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after `failures` consecutive failed attempts (1-based)
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(63) as i32;
        let mut delay = self
            .initial_delay
            .mul_f64(self.backoff_multiplier.powi(exponent).min(1e6));
        if delay > self.max_delay {
            delay = self.max_delay;
        }

        if self.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }
        delay
    }
}

/// Connection statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStats {
    /// Successful connects
    pub connects: u64,
    /// Failed connect attempts
    pub failed_connects: u64,
    /// Read/write failures that dropped the session
    pub io_failures: u64,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Owns the transport session and its state
pub struct ConnectionManager {
    transport: Mutex<Box<dyn PlcTransport>>,
    endpoint: String,
    state_tx: watch::Sender<ConnectionState>,
    policy: ReconnectPolicy,
    consecutive_failures: AtomicU32,
    stats: SyncMutex<ConnectionStats>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(transport: Box<dyn PlcTransport>, policy: ReconnectPolicy) -> Self {
        let endpoint = transport.endpoint();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport: Mutex::new(transport),
            endpoint,
            state_tx,
            policy,
            consecutive_failures: AtomicU32::new(0),
            stats: SyncMutex::new(ConnectionStats::default()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats.lock().clone()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Delay before the next reconnect attempt
    pub fn backoff_delay(&self) -> Duration {
        let failures = self.consecutive_failures.load(Ordering::Relaxed).max(1);
        self.policy.delay_for(failures)
    }

    /// Move to `next` unless already closed
    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == next {
                return false;
            }
            debug!("Connection state: {} -> {}", state, next);
            *state = next;
            true
        });
    }

    /// Attempt one connect if not connected; failures are logged, not raised
    pub async fn ensure_connected(&self) {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Closed => return,
            _ => {},
        }

        let mut transport = self.transport.lock().await;
        // Someone else may have connected or closed while we waited
        match self.state() {
            ConnectionState::Connected | ConnectionState::Closed => return,
            _ => {},
        }

        self.set_state(ConnectionState::Connecting);
        match transport.open().await {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                {
                    let mut stats = self.stats.lock();
                    stats.connects += 1;
                    stats.last_connected = Some(Utc::now());
                }
                self.set_state(ConnectionState::Connected);
                info!("PLC connected: {}", self.endpoint);
            },
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                {
                    let mut stats = self.stats.lock();
                    stats.failed_connects += 1;
                    stats.last_error = Some(e.to_string());
                }
                self.set_state(ConnectionState::Disconnected);
                warn!(
                    "PLC connect failed ({} attempt{}): {}: {}",
                    failures,
                    if failures == 1 { "" } else { "s" },
                    self.endpoint,
                    e
                );
            },
        }
    }

    /// Lock the transport, failing fast unless connected
    async fn session(&self) -> Result<MutexGuard<'_, Box<dyn PlcTransport>>> {
        self.check_state()?;
        let transport = self.transport.lock().await;
        // The session may have dropped while we waited for the lock
        self.check_state()?;
        Ok(transport)
    }

    fn check_state(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Closed => Err(DriveSrvError::Closed),
            _ => Err(DriveSrvError::NotConnected),
        }
    }

    /// Drop the session after a failed read/write
    async fn settle<T>(
        &self,
        transport: &mut MutexGuard<'_, Box<dyn PlcTransport>>,
        result: Result<T>,
    ) -> Result<T> {
        if let Err(e) = &result {
            transport.close().await;
            {
                let mut stats = self.stats.lock();
                stats.io_failures += 1;
                stats.last_error = Some(e.to_string());
            }
            self.set_state(ConnectionState::Disconnected);
            warn!("PLC I/O failed, session dropped: {}", e);
        }
        result
    }

    /// Drop the session because data read over it cannot be trusted
    pub async fn invalidate(&self, reason: &DriveSrvError) {
        let mut transport = self.transport.lock().await;
        if self.state().is_connected() {
            let _ = self.settle::<()>(&mut transport, Err(reason.clone())).await;
        }
    }

    /// Read `length` bytes of data block `db` in one request
    pub async fn read_block(&self, db: u16, offset: usize, length: usize) -> Result<Vec<u8>> {
        let mut transport = self.session().await?;
        let result = transport.read_bytes(db, offset, length).await;
        let data = self.settle(&mut transport, result).await?;
        if data.len() != length {
            let err = DriveSrvError::transport(format!(
                "short read: expected {length} bytes, got {}",
                data.len()
            ));
            return self.settle(&mut transport, Err(err)).await;
        }
        Ok(data)
    }

    pub async fn write_bit(&self, db: u16, byte: usize, bit: u8, value: bool) -> Result<()> {
        let mut transport = self.session().await?;
        let result = transport.write_bit(db, byte, bit, value).await;
        self.settle(&mut transport, result).await
    }

    pub async fn write_word(&self, db: u16, offset: usize, word: [u8; 2]) -> Result<()> {
        let mut transport = self.session().await?;
        let result = transport.write_bytes(db, offset, &word).await;
        self.settle(&mut transport, result).await
    }

    /// Release the session and enter `Closed`; idempotent
    pub async fn close(&self) {
        let mut transport = self.transport.lock().await;
        transport.close().await;
        let was_closed = self.state_tx.send_replace(ConnectionState::Closed) == ConnectionState::Closed;
        if !was_closed {
            info!("PLC connection closed: {}", self.endpoint);
        }
    }
}
