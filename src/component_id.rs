use std::fmt::Display;
use std::sync::Arc;

/// The name of an emulated component, unique within one emulation run.
///
/// Cheap to clone; shared by every task a component spawns for log correlation.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ComponentId(Arc<str>);

impl ComponentId {
    /// Create a new [`ComponentId`] from any type that can be converted into an `Arc<str>`.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ComponentId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<&str> for ComponentId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}
