//! Publish/subscribe message bus used for inter-component events.
//!
//! A [`MessageBus`] is one client connection. Messages for subscribed topics arrive on the
//! [`BusConnection::inbound`] channel; how they get there is up to the backend.

pub mod error;
pub mod memory;
pub mod moq;

use std::sync::Arc;

use bon::Builder;
use bytes::Bytes;
use tokio::sync::mpsc;

pub use self::error::BusError;
pub use self::memory::{MemoryBroker, MemoryBus};
pub use self::moq::{MoqBus, PresenceFrame};

/// Topic carrying involuntary disconnection notices.
pub const WILL_TOPIC: &str = "ERROR CONNECTION";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Message the bus delivers on a client's behalf if it goes away without disconnecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Bytes,
}

impl LastWill {
    /// The notice every component registers, identifying itself by process id.
    pub fn connection_lost(pid: u32) -> Self {
        Self {
            topic: WILL_TOPIC.to_string(),
            payload: Bytes::from(format!("Connection lost pid: {pid}")),
        }
    }
}

#[derive(Debug, Clone, Builder)]
pub struct BusOptions {
    #[builder(into)]
    pub client_id: String,
    #[builder(into)]
    pub address: String,
    #[builder(default = true)]
    pub clean_session: bool,
    #[builder(default = true)]
    pub automatic_reconnect: bool,
    pub will: Option<LastWill>,
}

/// One client connection to the bus.
pub trait MessageBus: Send + Sync {
    fn client_id(&self) -> &str;

    /// Start delivering messages published on `topic` to the inbound channel.
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BusError>;

    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError>;

    /// Leave cleanly. The last will is not delivered.
    fn disconnect(&self);
}

/// A connected client and the stream of messages for its subscriptions.
pub struct BusConnection {
    pub bus: Arc<dyn MessageBus>,
    pub inbound: mpsc::UnboundedReceiver<BusMessage>,
}

impl std::fmt::Debug for BusConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConnection")
            .field("client_id", &self.bus.client_id())
            .finish_non_exhaustive()
    }
}

/// Which bus implementation components connect through.
#[derive(Debug, Clone)]
pub enum BusBackend {
    /// A moq relay reachable at each component's bus address.
    Relay,
    /// An in-process broker shared by every component.
    Memory(MemoryBroker),
}

impl BusBackend {
    pub async fn connect(&self, options: BusOptions) -> Result<BusConnection, BusError> {
        match self {
            BusBackend::Relay => MoqBus::connect(options).await,
            BusBackend::Memory(broker) => broker.connect(options),
        }
    }
}
