//! Live TCP/UDP endpoints of a component.

pub mod client;
pub mod error;
pub mod server;
pub mod session;

use std::sync::Arc;

use crate::component_id::ComponentId;
use crate::shutdown::Termination;
use crate::trace::TraceLog;

pub use self::error::PortError;
pub use self::server::BoundServer;
pub use self::session::{ConnectionMap, SessionId};

/// What every port task needs from its owning component.
#[derive(Debug, Clone)]
pub struct PortContext {
    pub component: ComponentId,
    pub pid: u32,
    pub trace: Arc<TraceLog>,
    pub termination: Termination,
}
