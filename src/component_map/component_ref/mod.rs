use std::fmt;
use std::sync::{Arc, Weak};

use self::error::ComponentViewInvalid;
use super::ComponentId;

pub mod error;

/// Non-owning handle to a registered component.
///
/// Access is scoped to [`view`](Self::view) so a caller cannot keep the component alive past its
/// removal from the [`ComponentMap`](super::ComponentMap).
pub struct ComponentRef<T> {
    id: ComponentId,
    weak: Weak<T>,
}

impl<T> ComponentRef<T> {
    pub(super) fn new(id: ComponentId, weak: Weak<T>) -> Self {
        Self { id, weak }
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// Run `view_fn` against the component if it is still registered.
    pub fn view<F: FnOnce(&Arc<T>) -> R, R>(&self, view_fn: F) -> Result<R, ComponentViewInvalid> {
        self.weak
            .upgrade()
            .map(|component| view_fn(&component))
            .ok_or_else(|| ComponentViewInvalid {
                id: self.id.clone(),
            })
    }
}

impl<T> fmt::Debug for ComponentRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRef")
            .field("id", &self.id)
            .field("live", &(self.weak.strong_count() > 0))
            .finish()
    }
}

impl<T> Clone for ComponentRef<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            weak: self.weak.clone(),
        }
    }
}

impl<T> PartialEq<ComponentId> for ComponentRef<T> {
    fn eq(&self, other: &ComponentId) -> bool {
        self.id == *other
    }
}
