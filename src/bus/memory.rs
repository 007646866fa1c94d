use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{BusConnection, BusError, BusMessage, BusOptions, LastWill, MessageBus, QoS};

#[derive(Debug)]
struct ClientEntry {
    sender: mpsc::UnboundedSender<BusMessage>,
    topics: HashSet<String>,
    will: Option<LastWill>,
}

/// In-process broker with topic fan-out and last-will delivery.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    clients: Arc<DashMap<String, ClientEntry, ahash::RandomState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, options: BusOptions) -> Result<BusConnection, BusError> {
        let (sender, inbound) = mpsc::unbounded_channel();
        match self.clients.entry(options.client_id.clone()) {
            Entry::Occupied(_) => {
                return Err(BusError::DuplicateClient {
                    client_id: options.client_id,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(ClientEntry {
                    sender,
                    topics: HashSet::new(),
                    will: options.will,
                });
            }
        }
        info!(client_id = %options.client_id, "Client connected to memory broker");

        let bus = MemoryBus {
            broker: self.clone(),
            client_id: options.client_id,
            closed: AtomicBool::new(false),
        };
        Ok(BusConnection {
            bus: Arc::new(bus),
            inbound,
        })
    }

    /// Publish from outside any client, the way an environment driver would.
    ///
    /// Returns how many subscribers the message was handed to.
    pub fn publish(&self, topic: &str, payload: Bytes) -> usize {
        let mut delivered = 0;
        for client in self.clients.iter() {
            if !client.topics.contains(topic) {
                continue;
            }
            let message = BusMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            if client.sender.send(message).is_ok() {
                delivered += 1;
            }
        }
        debug!(topic, delivered, "Routed message");
        delivered
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    fn leave(&self, client_id: &str, clean: bool) {
        let Some((_, entry)) = self.clients.remove(client_id) else {
            return;
        };
        if clean {
            info!(client_id, "Client disconnected from memory broker");
            return;
        }
        info!(client_id, "Client connection lost");
        if let Some(will) = entry.will {
            self.publish(&will.topic, will.payload);
        }
    }
}

/// A client of a [`MemoryBroker`]. Dropping it without [`disconnect`](MessageBus::disconnect)
/// counts as losing the connection and fires its last will.
#[derive(Debug)]
pub struct MemoryBus {
    broker: MemoryBroker,
    client_id: String,
    closed: AtomicBool,
}

impl MessageBus for MemoryBus {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BusError> {
        let mut entry = self
            .broker
            .clients
            .get_mut(&self.client_id)
            .ok_or_else(|| BusError::Disconnected {
                client_id: self.client_id.clone(),
            })?;
        entry.topics.insert(topic.to_string());
        debug!(client_id = %self.client_id, topic, ?qos, "Subscribed");
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Disconnected {
                client_id: self.client_id.clone(),
            });
        }
        self.broker.publish(topic, payload);
        Ok(())
    }

    fn disconnect(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.broker.leave(&self.client_id, true);
        }
    }
}

impl Drop for MemoryBus {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.broker.leave(&self.client_id, false);
        }
    }
}
