//! Error types for message bus connections.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("failed to connect to bus at {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("client id ({client_id}) is already connected")]
    DuplicateClient { client_id: String },

    #[error("client ({client_id}) is disconnected")]
    Disconnected { client_id: String },

    #[error("relay refused path ({path})")]
    PathUnavailable { path: String },
}
