//! Error types for port tasks.

use std::net::SocketAddr;

use crate::model::Transport;

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("failed to bind {transport} port ({port}) on {address}")]
    Bind {
        port: String,
        transport: Transport,
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("port ({port}) is not a client port")]
    NotClient { port: String },

    #[error("port ({port}) has no flow for state ({state}) of fsm ({fsm})")]
    NoFlow {
        port: String,
        fsm: String,
        state: String,
    },
}

/// A connection from this peer is already being served.
#[derive(Debug, thiserror::Error)]
#[error("peer {peer} already has an active connection")]
pub struct SessionAlreadyActive {
    pub peer: SocketAddr,
}

#[derive(Debug, thiserror::Error)]
#[error("no active connection for peer {peer}")]
pub struct SessionNotFound {
    pub peer: SocketAddr,
}
