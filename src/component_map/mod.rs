use std::sync::Arc;

use dashmap::{DashMap, Entry};

pub use crate::component_id::ComponentId;

use self::component_ref::ComponentRef;
use self::error::{ComponentAlreadyPresent, ComponentNotFound};

pub mod component_ref;
pub mod error;

/// Registry of running components keyed by [`ComponentId`].
///
/// The map holds the only long-lived strong reference. Callers get [`ComponentRef`] handles, and
/// ownership comes back out only through [`remove`](Self::remove).
#[derive(Debug)]
pub struct ComponentMap<T> {
    entries: DashMap<ComponentId, Arc<T>, ahash::RandomState>,
}

impl<T> ComponentMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: ComponentId, component: Arc<T>) -> Result<(), ComponentAlreadyPresent> {
        match self.entries.entry(id) {
            Entry::Occupied(entry) => Err(ComponentAlreadyPresent {
                id: entry.key().clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(component);
                Ok(())
            }
        }
    }

    /// Unregister `id`, handing back the component so the caller can finish it.
    pub fn remove(&self, id: &ComponentId) -> Result<Arc<T>, ComponentNotFound> {
        self.entries
            .remove(id)
            .map(|(_, component)| component)
            .ok_or_else(|| ComponentNotFound { id: id.clone() })
    }

    pub fn get(&self, id: &ComponentId) -> Result<ComponentRef<T>, ComponentNotFound> {
        self.entries
            .view(id, |_, component| ComponentRef::new(id.clone(), Arc::downgrade(component)))
            .ok_or_else(|| ComponentNotFound { id: id.clone() })
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.entries.contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<_> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for ComponentMap<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::default(),
        }
    }
}
