use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

struct Entry<C> {
    component: Arc<C>,
    references: usize,
}

/// Reference-counted set of child components owned by a parent.
///
/// The lock is held only while the map is read or updated; never while a
/// child is started or shut down.
pub struct ComponentRegistry<C> {
    name: String,
    entries: Mutex<HashMap<String, Entry<C>>>,
}

impl<C> ComponentRegistry<C> {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Take a reference to the child registered under `key`, creating it
    /// with `factory` if absent. Returns the child and whether it was created.
    pub fn acquire<F>(&self, key: &str, factory: F) -> (Arc<C>, bool)
    where
        F: FnOnce() -> Arc<C>,
    {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.references += 1;
            debug!(
                "Registry '{}' reused '{}' ({} refs)",
                self.name, key, entry.references
            );
            return (Arc::clone(&entry.component), false);
        }

        let component = factory();
        entries.insert(
            key.to_string(),
            Entry {
                component: Arc::clone(&component),
                references: 1,
            },
        );
        debug!("Registry '{}' created '{}'", self.name, key);
        (component, true)
    }

    /// Drop one reference. Returns the child once its last reference is
    /// released so the caller can shut it down.
    pub fn release(&self, key: &str) -> Option<Arc<C>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        entry.references -= 1;
        if entry.references > 0 {
            debug!(
                "Registry '{}' released '{}' ({} refs left)",
                self.name, key, entry.references
            );
            return None;
        }
        debug!("Registry '{}' removed '{}'", self.name, key);
        entries.remove(key).map(|entry| entry.component)
    }

    pub fn get(&self, key: &str) -> Option<Arc<C>> {
        self.entries
            .lock()
            .get(key)
            .map(|entry| Arc::clone(&entry.component))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn reference_count(&self, key: &str) -> usize {
        self.entries
            .lock()
            .get(key)
            .map_or(0, |entry| entry.references)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Current children without touching reference counts, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, Arc<C>)> {
        let mut children: Vec<_> = self
            .entries
            .lock()
            .iter()
            .map(|(key, entry)| (key.clone(), Arc::clone(&entry.component)))
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        children
    }

    /// Remove every child regardless of reference count, sorted by key.
    pub fn drain(&self) -> Vec<(String, Arc<C>)> {
        let mut children: Vec<_> = self
            .entries
            .lock()
            .drain()
            .map(|(key, entry)| (key, entry.component))
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        children
    }
}
