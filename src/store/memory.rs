//! In-memory store, for tests and embedding.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::{SecureStore, StoreItem};
use crate::Result;

/// Process-local [`SecureStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, StoreItem>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStore for MemoryStore {
    fn list(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().keys().cloned().collect())
    }

    fn get(&self, key: &str) -> Result<Option<StoreItem>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, item: StoreItem) -> Result<()> {
        self.entries.lock().insert(key.to_string(), item);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
