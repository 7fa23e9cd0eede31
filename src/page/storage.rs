// src/page/storage.rs — overflow storage interface
//
// Concrete mmap / file-per-key backends are external collaborators; this
// crate supplements the interface with one in-memory implementation so the
// engine is testable without a real backend.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::page::descriptor::PageId;

/// Backend that persists and retrieves evicted dirty page bodies by opaque
/// key. A key written by `save` must be returned exactly by `load` until
/// `delete`.
pub trait PageStorage {
    fn save(&self, key: PageId, bytes: &[u8]) -> Result<()>;
    fn load(&self, key: PageId) -> Result<Vec<u8>>;
    /// Idempotent: deleting a missing key is not an error.
    fn delete(&self, key: PageId) -> Result<()>;
    fn exists(&self, key: PageId) -> Result<bool>;
}

/// In-memory `PageStorage`, used by tests and as a starting point for
/// downstream consumers that haven't wired up a real backend yet.
#[derive(Default)]
pub struct MemoryPageStorage {
    entries: Mutex<HashMap<PageId, Vec<u8>>>,
}

impl MemoryPageStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageStorage for MemoryPageStorage {
    fn save(&self, key: PageId, bytes: &[u8]) -> Result<()> {
        self.entries.lock().unwrap().insert(key, bytes.to_vec());
        Ok(())
    }

    fn load(&self, key: PageId) -> Result<Vec<u8>> {
        match self.entries.lock().unwrap().get(&key) {
            Some(bytes) if !bytes.is_empty() => Ok(bytes.clone()),
            Some(_) => Err(crate::error::BufferError::Storage(format!(
                "overflow entry for {} is empty",
                key
            ))),
            None => Err(crate::error::BufferError::Storage(format!(
                "no overflow entry for {}",
                key
            ))),
        }
    }

    fn delete(&self, key: PageId) -> Result<()> {
        self.entries.lock().unwrap().remove(&key);
        Ok(())
    }

    fn exists(&self, key: PageId) -> Result<bool> {
        Ok(self.entries.lock().unwrap().contains_key(&key))
    }
}

/// A `PageStorage` that always fails, used to exercise the eviction-failure
/// path: a storage error during eviction must not drop the page.
#[cfg(test)]
pub struct FailingPageStorage;

#[cfg(test)]
impl PageStorage for FailingPageStorage {
    fn save(&self, _key: PageId, _bytes: &[u8]) -> Result<()> {
        Err(crate::error::BufferError::Storage("simulated failure".into()))
    }
    fn load(&self, _key: PageId) -> Result<Vec<u8>> {
        Err(crate::error::BufferError::Storage("simulated failure".into()))
    }
    fn delete(&self, _key: PageId) -> Result<()> {
        Ok(())
    }
    fn exists(&self, _key: PageId) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_saved_bytes() {
        let storage = MemoryPageStorage::new();
        let id = PageId::new();
        storage.save(id, b"hello").unwrap();
        assert_eq!(storage.load(id).unwrap(), b"hello");
        assert!(storage.exists(id).unwrap());
    }

    #[test]
    fn delete_is_idempotent() {
        let storage = MemoryPageStorage::new();
        let id = PageId::new();
        storage.delete(id).unwrap();
        storage.delete(id).unwrap();
    }

    #[test]
    fn load_missing_key_errors() {
        let storage = MemoryPageStorage::new();
        assert!(storage.load(PageId::new()).is_err());
    }
}
