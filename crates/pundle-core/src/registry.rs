//! Priority-ordered collaborator registry.
//!
//! Resolvers, transformers, generators and job transformers all run in
//! priority order (higher first). Registration order breaks ties.

use std::cmp::Reverse;
use std::sync::Arc;

/// Common identity of every pluggable collaborator.
pub trait Component: Send + Sync {
    /// Name used in diagnostics and in resolver ignore sets.
    fn name(&self) -> &str;

    /// Higher priority runs first.
    fn priority(&self) -> i32 {
        0
    }
}

/// Registry that keeps collaborators in priority order.
pub struct Registry<T: ?Sized + Component> {
    items: Vec<Arc<T>>,
}

impl<T: ?Sized + Component> Registry<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Add a collaborator.
    ///
    /// Sorting happens once in [`Registry::into_ordered`] rather than on
    /// every add.
    pub fn add(&mut self, item: Arc<T>) {
        self.items.push(item);
    }

    /// Collaborators sorted by priority, highest first. The sort is stable.
    pub fn into_ordered(mut self) -> Vec<Arc<T>> {
        self.items.sort_by_key(|item| Reverse(item.priority()));
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: ?Sized + Component> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + Component> FromIterator<Arc<T>> for Registry<T> {
    fn from_iter<I: IntoIterator<Item = Arc<T>>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}
