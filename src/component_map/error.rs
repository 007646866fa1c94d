use super::ComponentId;

/// A component with the same id is already registered.
#[derive(Debug, thiserror::Error)]
#[error("component ({id}) is already registered")]
pub struct ComponentAlreadyPresent {
    pub id: ComponentId,
}

#[derive(Debug, thiserror::Error)]
#[error("component ({id}) is not registered")]
pub struct ComponentNotFound {
    pub id: ComponentId,
}
