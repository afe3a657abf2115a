//! Secure key-value store for identity and cloud sessions.
//!
//! Entries are flat JSON objects addressed by a comma separated key:
//!
//! | Key | Entity |
//! |-----|--------|
//! | `IdentitySession,{stage},{class}` | [`IdentitySession`](crate::session::IdentitySession) |
//! | `CloudSession,{profile}` | [`CloudSession`](crate::session::CloudSession) |
//!
//! OS keychain backends sit behind the same [`SecureStore`] trait; this crate
//! ships an in-memory store and an owner-only file store.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use broker_core::EnvironmentClass;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::Result;

/// Key prefix for identity sessions
pub const IDENTITY_SESSION_PREFIX: &str = "IdentitySession";

/// Key prefix for cloud sessions
pub const CLOUD_SESSION_PREFIX: &str = "CloudSession";

/// One stored entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreItem {
    /// Human-readable description
    pub label: String,
    /// Serialized entity (JSON)
    pub data: String,
}

/// Abstract secure key-value store.
///
/// `remove` of an absent key succeeds.
pub trait SecureStore: Send + Sync {
    /// All keys currently stored.
    fn list(&self) -> Result<Vec<String>>;

    /// Fetch an entry.
    fn get(&self, key: &str) -> Result<Option<StoreItem>>;

    /// Insert or replace an entry.
    fn set(&self, key: &str, item: StoreItem) -> Result<()>;

    /// Remove an entry.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Storage key for an identity session.
#[must_use]
pub fn identity_key(stage: &str, class: EnvironmentClass) -> String {
    format!("{IDENTITY_SESSION_PREFIX},{stage},{class}")
}

/// Storage key for a profile's cloud session.
#[must_use]
pub fn cloud_key(profile: &str) -> String {
    format!("{CLOUD_SESSION_PREFIX},{profile}")
}

/// Whether `key` belongs to the given entity prefix.
#[must_use]
pub fn has_prefix(key: &str, prefix: &str) -> bool {
    key.split(',').next() == Some(prefix)
}

/// Load and decode an entity. A missing or undecodable entry is `None`.
pub fn load_entity<T: DeserializeOwned>(store: &dyn SecureStore, key: &str) -> Result<Option<T>> {
    let Some(item) = store.get(key)? else {
        debug!(key, "No stored entry");
        return Ok(None);
    };

    match serde_json::from_str(&item.data) {
        Ok(entity) => Ok(Some(entity)),
        Err(e) => {
            warn!(key, error = %e, "Ignoring corrupt store entry");
            Ok(None)
        }
    }
}

/// Encode and persist an entity, replacing any previous entry.
pub fn save_entity<T: Serialize>(
    store: &dyn SecureStore,
    key: &str,
    label: &str,
    entity: &T,
) -> Result<()> {
    let data = serde_json::to_string(entity)?;
    store.remove(key)?;
    store.set(
        key,
        StoreItem {
            label: label.to_string(),
            data,
        },
    )
}
