use super::ComponentId;

/// The component behind a [`ComponentRef`](super::ComponentRef) has been removed from its map.
#[derive(Debug, thiserror::Error)]
#[error("component ({id}) has been removed")]
pub struct ComponentViewInvalid {
    pub id: ComponentId,
}
