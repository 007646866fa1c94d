use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use super::flow::Flow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => f.write_str("TCP"),
            Transport::Udp => f.write_str("UDP"),
        }
    }
}

/// Where a client port sends and which FSM state selects its flow.
#[derive(Debug, Clone)]
pub struct ClientEndpoint {
    remote: SocketAddr,
    fsm: String,
    flows: HashMap<String, Arc<Flow>>,
}

impl ClientEndpoint {
    pub fn new(remote: SocketAddr, fsm: impl Into<String>, flows: HashMap<String, Arc<Flow>>) -> Self {
        Self {
            remote,
            fsm: fsm.into(),
            flows,
        }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn fsm(&self) -> &str {
        &self.fsm
    }

    /// Flow mapped for `state`, if any.
    pub fn flow_for(&self, state: &str) -> Option<&Arc<Flow>> {
        self.flows.get(state)
    }
}

#[derive(Debug, Clone)]
pub enum PortRole {
    Server,
    Client(ClientEndpoint),
}

#[derive(Debug, Clone)]
pub struct Port {
    name: String,
    transport: Transport,
    local: SocketAddr,
    role: PortRole,
}

impl Port {
    pub fn server(name: impl Into<String>, transport: Transport, local: SocketAddr) -> Self {
        Self {
            name: name.into(),
            transport,
            local,
            role: PortRole::Server,
        }
    }

    pub fn client(
        name: impl Into<String>,
        transport: Transport,
        local: SocketAddr,
        endpoint: ClientEndpoint,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            local,
            role: PortRole::Client(endpoint),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn local(&self) -> SocketAddr {
        self.local
    }

    pub fn role(&self) -> &PortRole {
        &self.role
    }

    pub fn endpoint(&self) -> Option<&ClientEndpoint> {
        match &self.role {
            PortRole::Client(endpoint) => Some(endpoint),
            PortRole::Server => None,
        }
    }
}
