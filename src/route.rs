//! Route table: an ordered list of named, prefix-matched storage
//! backends.
//!
//! Registration and unregistration happen under a write lock; matching
//! happens under a read lock and hands back a [`RouteGuard`] that keeps
//! the matched item's refcount alive until dropped, so an in-flight
//! request can never see its backing storage torn out from under it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::storage::Storage;

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    Exists,
    #[error("busy")]
    Busy,
}

/// A single registered route: a name, the prefixes it answers for, and
/// the storage backend it forwards to.
pub struct RouteItem {
    name: String,
    prefixes: Vec<String>,
    storage: Box<dyn Storage>,
    refcount: AtomicUsize,
}

impl RouteItem {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    fn matches(&self, key: &str) -> bool {
        self.prefixes.iter().any(|prefix| prefix_matches(prefix, key))
    }
}

/// Compares `prefix` against `key` character by character; a trailing
/// `*` in `prefix` matches the remainder of `key` (so `"*"` alone
/// matches everything).
fn prefix_matches(prefix: &str, key: &str) -> bool {
    let mut prefix_chars = prefix.chars();
    let mut key_chars = key.chars();
    loop {
        match (prefix_chars.next(), key_chars.next()) {
            (Some('*'), _) => return true,
            (Some(p), Some(k)) if p == k => continue,
            (Some(_), _) => return false,
            (None, None) => return true,
            (None, Some(_)) => return false,
        }
    }
}

/// Ordered collection of [`RouteItem`]s, most-recently-registered first.
pub struct RouteTable {
    items: RwLock<Vec<Arc<RouteItem>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        RouteTable {
            items: RwLock::new(Vec::new()),
        }
    }

    /// Register a new route. Fails with `Exists` if `name` is already
    /// registered; otherwise inserts at the head so newer registrations
    /// win ties in [`RouteTable::match_key`].
    pub fn register(
        &self,
        name: &str,
        prefixes: Vec<String>,
        storage: Box<dyn Storage>,
    ) -> Result<(), RouteError> {
        let mut items = self.items.write();
        if items.iter().any(|item| item.name == name) {
            return Err(RouteError::Exists);
        }
        items.insert(
            0,
            Arc::new(RouteItem {
                name: name.to_string(),
                prefixes,
                storage,
                refcount: AtomicUsize::new(0),
            }),
        );
        Ok(())
    }

    /// Unregister by name, or the first item in the table when `name`
    /// is `None`. Fails with `Busy` if the item still has live
    /// references, `NotFound` if there is no such item (or the table is
    /// empty, for the wildcard form).
    pub fn unregister(&self, name: Option<&str>) -> Result<(), RouteError> {
        let mut items = self.items.write();
        let index = match name {
            Some(name) => items.iter().position(|item| item.name == name),
            None => {
                if items.is_empty() {
                    None
                } else {
                    Some(0)
                }
            }
        };
        let index = index.ok_or(RouteError::NotFound)?;
        if items[index].refcount.load(Ordering::Acquire) > 0 {
            return Err(RouteError::Busy);
        }
        items.remove(index);
        Ok(())
    }

    /// Find the first item (in table order) whose prefixes match `key`.
    /// Increments the matched item's refcount; dropping the returned
    /// guard decrements it again.
    pub fn match_key(&self, key: &str) -> Result<RouteGuard, RouteError> {
        let items = self.items.read();
        let item = items
            .iter()
            .find(|item| item.matches(key))
            .cloned()
            .ok_or(RouteError::NotFound)?;
        item.refcount.fetch_add(1, Ordering::AcqRel);
        Ok(RouteGuard { item })
    }

    /// Number of currently registered routes.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by [`RouteTable::match_key`]; keeps the matched
/// item's refcount elevated until dropped.
pub struct RouteGuard {
    item: Arc<RouteItem>,
}

impl RouteGuard {
    pub fn storage(&self) -> &dyn Storage {
        self.item.storage()
    }

    pub fn name(&self) -> &str {
        self.item.name()
    }
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        self.item.refcount.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::null::NullStorage;

    #[test]
    fn prefix_matching_rules() {
        assert!(prefix_matches("*", "anything"));
        assert!(prefix_matches("foo.*", "foo.bar"));
        assert!(prefix_matches("foo.bar", "foo.bar"));
        assert!(!prefix_matches("foo.bar", "foo.baz"));
        assert!(!prefix_matches("foo.bar", "foo.ba"));
    }

    #[test]
    fn register_rejects_duplicate_name() {
        let table = RouteTable::new();
        table
            .register("a", vec!["foo.*".to_string()], Box::new(NullStorage))
            .unwrap();
        assert!(matches!(
            table.register("a", vec!["bar.*".to_string()], Box::new(NullStorage)),
            Err(RouteError::Exists)
        ));
    }

    #[test]
    fn most_recent_registration_wins_ties() {
        let table = RouteTable::new();
        table
            .register("old", vec!["*".to_string()], Box::new(NullStorage))
            .unwrap();
        table
            .register("new", vec!["*".to_string()], Box::new(NullStorage))
            .unwrap();
        let guard = table.match_key("anything").unwrap();
        assert_eq!(guard.name(), "new");
    }

    #[test]
    fn unregister_busy_while_referenced() {
        let table = RouteTable::new();
        table
            .register("a", vec!["*".to_string()], Box::new(NullStorage))
            .unwrap();
        let guard = table.match_key("x").unwrap();
        assert!(matches!(table.unregister(Some("a")), Err(RouteError::Busy)));
        drop(guard);
        assert!(table.unregister(Some("a")).is_ok());
    }

    #[test]
    fn unregister_wildcard_removes_first_item() {
        let table = RouteTable::new();
        table
            .register("a", vec!["*".to_string()], Box::new(NullStorage))
            .unwrap();
        assert!(table.unregister(None).is_ok());
        assert!(table.is_empty());
        assert!(matches!(table.unregister(None), Err(RouteError::NotFound)));
    }

    #[test]
    fn match_reports_not_found_with_no_routes() {
        let table = RouteTable::new();
        assert!(matches!(table.match_key("x"), Err(RouteError::NotFound)));
    }
}
