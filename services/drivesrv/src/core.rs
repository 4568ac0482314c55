//! Polling engine
//!
//! Leaves first: `model` and `codec` are pure, `registry` holds last-known
//! state, `connection` owns the transport session, `poller` and `dispatcher`
//! are the two paths that use it.

pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod model;
pub mod poller;
pub mod publisher;
pub mod registry;

pub use connection::{ConnectionManager, ConnectionState, ReconnectPolicy};
pub use dispatcher::CommandDispatcher;
pub use events::{DriveEvent, DriveEventKind, EventSink};
pub use model::{DriveCapabilities, DriveCommand, DriveFlags, DriveRecord, DriveState};
pub use poller::{CycleOutcome, DrivePoller, PollSettings};
pub use publisher::{BroadcastPublisher, ChangePublisher};
pub use registry::{DriveRegistry, DriveRegistryReader};
