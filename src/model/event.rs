use std::time::Duration;

/// How an event travels and which side of the bus it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Delivered from the bus, produced by the emulated environment.
    Environment { topic: String },
    /// Delivered from the bus, produced by another component.
    Input { topic: String },
    /// Published to the bus when used as an action.
    Output { topic: String },
    /// Both subscribed and published.
    InputOutput { topic: String },
    /// Fed back into the owning component after `timeout`.
    LocalTimer { timeout: Duration },
}

impl EventKind {
    /// The bus topic for every kind except local timers.
    pub fn topic(&self) -> Option<&str> {
        match self {
            EventKind::Environment { topic }
            | EventKind::Input { topic }
            | EventKind::Output { topic }
            | EventKind::InputOutput { topic } => Some(topic),
            EventKind::LocalTimer { .. } => None,
        }
    }

    /// Whether the component subscribes to this event's topic.
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            EventKind::Environment { .. } | EventKind::Input { .. } | EventKind::InputOutput { .. }
        )
    }

    /// Whether dispatching this event as an action publishes it.
    pub fn is_outbound(&self) -> bool {
        matches!(self, EventKind::Output { .. } | EventKind::InputOutput { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    name: String,
    kind: EventKind,
}

impl Event {
    pub fn new(name: impl Into<String>, kind: EventKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }
}
