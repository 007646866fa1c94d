//! Inbound half of the bus: topic subscriptions and message dispatch.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::Component;
use crate::bus::{BusMessage, QoS};
use crate::model::EventKind;
use crate::trace::{CAT_APP_EVENT_RCV, CAT_ENV_EVENT_RCV};

impl Component {
    /// Subscribe to the topic of every inbound event. Returns how many subscriptions succeeded.
    pub(super) fn subscribe_events(&self) -> usize {
        let mut subscribed = 0;
        for (topic, event) in &self.topics {
            match self.bus.subscribe(topic, QoS::AtLeastOnce) {
                Ok(()) => {
                    debug!(component = %self.id, event = %event.name(), topic, "Subscribed");
                    subscribed += 1;
                }
                Err(e) => warn!(component = %self.id, topic, error = %e, "Subscribe failed"),
            }
        }
        subscribed
    }

    /// Start feeding inbound bus messages into the FSMs.
    ///
    /// A component with no inbound events drops its receiver instead.
    pub(super) fn spawn_dispatch(self: &Arc<Self>) {
        let receiver = self.inbound.lock().expect("inbound lock poisoned").take();
        let Some(mut receiver) = receiver else {
            return;
        };
        if self.topics.is_empty() {
            debug!(component = %self.id, "No inbound events, dropping bus receiver");
            return;
        }

        let component = Arc::clone(self);
        self.tasks.spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = component.termination.cancelled() => break,
                    message = receiver.recv() => message,
                };
                let Some(message) = message else {
                    info!(component = %component.id, "Bus receiver closed");
                    break;
                };
                component.dispatch_message(message).await;
            }
        });
    }

    async fn dispatch_message(self: &Arc<Self>, message: BusMessage) {
        let Some(event) = self.topics.get(&message.topic) else {
            debug!(component = %self.id, topic = %message.topic, "Message on unknown topic");
            return;
        };

        let category = match event.kind() {
            EventKind::Environment { .. } => CAT_ENV_EVENT_RCV,
            _ => CAT_APP_EVENT_RCV,
        };
        self.trace.instant(
            event.name(),
            self.pid,
            category,
            vec![
                message.topic.clone(),
                String::from_utf8_lossy(&message.payload).into_owned(),
            ],
        );

        self.receive_event(event.name().to_string()).await;
    }
}
