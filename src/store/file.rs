//! Directory-backed store.
//!
//! Each entry is one owner-only (`0600`) JSON file whose name is derived from
//! a hash of the key, so profile names never reach the filesystem as paths.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{SecureStore, StoreItem};
use crate::{Error, Result};

const ENTRY_SUFFIX: &str = ".entry.json";

/// On-disk record
#[derive(Debug, Serialize, Deserialize)]
struct EntryFile {
    key: String,
    label: String,
    data: String,
}

/// [`SecureStore`] keeping one file per key under a base directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).map_err(|e| {
                Error::Store(format!(
                    "Failed to create store dir {}: {e}",
                    base_dir.display()
                ))
            })?;
            restrict(&base_dir, 0o700);
        }
        Ok(Self { base_dir })
    }

    /// Store directory
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let hash = Sha256::digest(key.as_bytes());
        let name = hex::encode(&hash[..16]);
        self.base_dir.join(format!("{name}{ENTRY_SUFFIX}"))
    }

    /// A missing or unparseable entry is `None`; any other read failure means
    /// the store is unavailable.
    fn read_entry(path: &Path) -> Result<Option<EntryFile>> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Store(format!(
                    "Failed to read store entry {}: {e}",
                    path.display()
                )));
            }
        };
        match serde_json::from_str(&content) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to parse store entry");
                Ok(None)
            }
        }
    }
}

impl SecureStore for FileStore {
    fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.base_dir)
            .map_err(|e| Error::Store(format!("Failed to list store: {e}")))?;

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| Error::Store(format!("Failed to list store: {e}")))?
                .path();
            let is_entry = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(ENTRY_SUFFIX));
            if is_entry {
                if let Some(e) = Self::read_entry(&path)? {
                    keys.push(e.key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn get(&self, key: &str) -> Result<Option<StoreItem>> {
        let path = self.entry_path(key);
        Ok(Self::read_entry(&path)?
            .filter(|e| e.key == key)
            .map(|e| StoreItem {
                label: e.label,
                data: e.data,
            }))
    }

    fn set(&self, key: &str, item: StoreItem) -> Result<()> {
        let path = self.entry_path(key);
        let content = serde_json::to_string_pretty(&EntryFile {
            key: key.to_string(),
            label: item.label,
            data: item.data,
        })?;

        write_private(&path, content.as_bytes())
            .map_err(|e| Error::Store(format!("Failed to write store entry: {e}")))?;

        debug!(key, "Saved store entry");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key, "Removed store entry");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Store(format!("Failed to delete store entry: {e}"))),
        }
    }
}

/// Write a file readable only by its owner.
#[cfg(unix)]
fn write_private(path: &Path, content: &[u8]) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(content)?;
    // mode() only applies on create
    restrict(path, 0o600);
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &[u8]) -> io::Result<()> {
    fs::write(path, content)
}

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        warn!(path = %path.display(), error = %e, "Failed to restrict permissions");
    }
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(data: &str) -> StoreItem {
        StoreItem {
            label: "test entry".to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn round_trip_through_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.set("IdentitySession,prod,nonpci", item(r#"{"a":1}"#)).unwrap();
        store.set("CloudSession,team/a", item(r#"{"b":2}"#)).unwrap();

        let reopened = FileStore::new(dir.path()).unwrap();
        assert_eq!(
            reopened.get("IdentitySession,prod,nonpci").unwrap(),
            Some(item(r#"{"a":1}"#))
        );
        assert_eq!(
            reopened.list().unwrap(),
            vec!["CloudSession,team/a", "IdentitySession,prod,nonpci"]
        );
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.remove("CloudSession,none").unwrap();
        store.set("CloudSession,x", item("{}")).unwrap();
        store.remove("CloudSession,x").unwrap();
        store.remove("CloudSession,x").unwrap();
        assert_eq!(store.get("CloudSession,x").unwrap(), None);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileStore::new(&nested).unwrap();
        assert!(store.base_dir().is_dir());
    }

    #[test]
    fn corrupt_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.set("k", item("{}")).unwrap();
        fs::write(dir.path().join(format!("junk{ENTRY_SUFFIX}")), "not json").unwrap();

        assert_eq!(store.list().unwrap(), vec!["k"]);
    }

    #[test]
    fn unreadable_entry_is_a_store_error() {
        // GIVEN: something that cannot be read as a file at the entry path
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        fs::create_dir(store.entry_path("IdentitySession,prod,nonpci")).unwrap();

        // WHEN/THEN: the failure surfaces instead of reading as "no entry"
        let err = store.get("IdentitySession,prod,nonpci").unwrap_err();
        assert!(matches!(err, Error::Store(_)), "{err:?}");
        assert!(store.list().is_err());

        // other keys are still simply absent
        assert_eq!(store.get("CloudSession,other").unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn entries_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.set("k", item("{}")).unwrap();

        let mode = fs::metadata(store.entry_path("k")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
