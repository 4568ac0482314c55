//! Service wiring
//!
//! transport -> connection manager -> poller / dispatcher -> API state.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::AppState;
use crate::config::{AppConfig, DriveConfigProvider, PlcProtocol, StaticDriveConfig};
use crate::core::codec::table_len;
use crate::core::events::{EventSink, TracingEventSink};
use crate::core::{
    BroadcastPublisher, CommandDispatcher, ConnectionManager, DrivePoller, PollSettings,
};
use crate::protocols::s7::S7Client;
use crate::protocols::virt::VirtualPlc;
use crate::protocols::PlcTransport;

/// Capacity of the in-process change broadcast
pub const BROADCAST_CAPACITY: usize = 64;

/// Transport selected by `plc.protocol`
pub fn create_transport(config: &AppConfig) -> Box<dyn PlcTransport> {
    match config.plc.protocol {
        PlcProtocol::S7 => Box::new(S7Client::new(config.plc.s7_config())),
        PlcProtocol::Virtual => {
            warn!("Using virtual PLC, no controller I/O will happen");
            Box::new(VirtualPlc::new(
                config.polling.data_block,
                table_len(config.polling.drive_count),
            ))
        },
    }
}

/// Fully wired engine, poll loop not yet started
pub struct DriveRuntime {
    poller: Option<DrivePoller>,
    poller_task: Option<JoinHandle<()>>,
    connection: Arc<ConnectionManager>,
    dispatcher: Arc<CommandDispatcher>,
    publisher: BroadcastPublisher,
    drives: Arc<StaticDriveConfig>,
    state: AppState,
    cancel: CancellationToken,
}

impl DriveRuntime {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_transport(config, create_transport(config), Arc::new(TracingEventSink))
    }

    pub fn with_transport(
        config: &AppConfig,
        transport: Box<dyn PlcTransport>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let connection = Arc::new(ConnectionManager::new(
            transport,
            config.polling.reconnect_policy(),
        ));
        let drives = Arc::new(StaticDriveConfig::from_config(config));
        let provider: Arc<dyn DriveConfigProvider> = drives.clone();
        let publisher = BroadcastPublisher::new(BROADCAST_CAPACITY);

        let poller = DrivePoller::new(
            Arc::clone(&connection),
            Arc::new(publisher.clone()),
            Arc::clone(&events),
            Arc::clone(&provider),
            PollSettings::from(&config.polling),
        );
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&connection),
            provider,
            events,
            config.polling.data_block,
            config.polling.drive_count,
        ));

        let state = AppState {
            registry: poller.registry(),
            connection: Arc::clone(&connection),
            dispatcher: Arc::clone(&dispatcher),
            poll_stats: poller.stats_handle(),
            drive_count: config.polling.drive_count,
            started_at: Utc::now(),
        };

        Self {
            poller: Some(poller),
            poller_task: None,
            connection,
            dispatcher,
            publisher,
            drives,
            state,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the poll loop; later calls are no-ops
    pub fn start(&mut self) {
        if let Some(poller) = self.poller.take() {
            self.poller_task = Some(tokio::spawn(poller.run(self.cancel.child_token())));
        }
    }

    pub fn app_state(&self) -> AppState {
        self.state.clone()
    }

    pub fn connection(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.connection)
    }

    pub fn dispatcher(&self) -> Arc<CommandDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn publisher(&self) -> &BroadcastPublisher {
        &self.publisher
    }

    /// Settings table, for refreshing drive overrides at runtime
    pub fn drive_config(&self) -> Arc<StaticDriveConfig> {
        Arc::clone(&self.drives)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the poll loop, wait for it, then close the connection
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.poller_task.take() {
            if let Err(e) = task.await {
                warn!("Poll loop task ended abnormally: {}", e);
            }
        }
        self.connection.close().await;
        info!("Drive runtime stopped");
    }
}
