//! Key-value engines the profile store can sit on.

mod redb;

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::errors::{AppError, AppResult};

pub use self::redb::RedbBackend;

/// Transactional key-value storage keyed by profile name.
///
/// Every method is atomic. `scan` returns a consistent point-in-time view in
/// key order, and `update` runs read-modify-write inside one transaction so
/// concurrent writers serialize.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> AppResult<()>;

    /// Returns whether the key existed.
    fn delete(&self, key: &str) -> AppResult<bool>;

    fn scan(&self) -> AppResult<Vec<(String, Vec<u8>)>>;

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<&[u8]>) -> AppResult<Vec<u8>>,
    ) -> AppResult<()>;

    fn clear(&self) -> AppResult<()>;
}

/// Volatile backend for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> AppError {
    AppError::Store("memory backend lock poisoned".into())
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        let data = self.data.read().map_err(|_| poisoned())?;
        Ok(data.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> AppResult<()> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> AppResult<bool> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        Ok(data.remove(key).is_some())
    }

    fn scan(&self) -> AppResult<Vec<(String, Vec<u8>)>> {
        let data = self.data.read().map_err(|_| poisoned())?;
        Ok(data
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<&[u8]>) -> AppResult<Vec<u8>>,
    ) -> AppResult<()> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        let next = apply(data.get(key).map(Vec::as_slice))?;
        data.insert(key.to_string(), next);
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        data.clear();
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every backend must share.

    use super::*;

    pub fn put_get_delete(backend: &dyn KvBackend) {
        backend.put("alice", b"one").unwrap();
        assert_eq!(backend.get("alice").unwrap().as_deref(), Some(&b"one"[..]));
        assert!(backend.get("bob").unwrap().is_none());
        assert!(backend.delete("alice").unwrap());
        assert!(!backend.delete("alice").unwrap());
        assert!(backend.get("alice").unwrap().is_none());
    }

    pub fn scan_is_key_ordered(backend: &dyn KvBackend) {
        backend.put("carol", b"3").unwrap();
        backend.put("alice", b"1").unwrap();
        backend.put("bob", b"2").unwrap();
        let keys: Vec<String> = backend.scan().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["alice", "bob", "carol"]);
    }

    pub fn failed_update_writes_nothing(backend: &dyn KvBackend) {
        backend.put("alice", b"kept").unwrap();
        let err = backend
            .update("alice", &mut |_| Err(AppError::Store("refused".into())))
            .unwrap_err();
        assert!(matches!(err, AppError::Store(_)));
        assert_eq!(backend.get("alice").unwrap().as_deref(), Some(&b"kept"[..]));

        backend
            .update("alice", &mut |current| {
                let mut next = current.unwrap_or_default().to_vec();
                next.extend_from_slice(b"+more");
                Ok(next)
            })
            .unwrap();
        assert_eq!(
            backend.get("alice").unwrap().as_deref(),
            Some(&b"kept+more"[..])
        );
    }

    pub fn clear_removes_everything(backend: &dyn KvBackend) {
        backend.put("alice", b"1").unwrap();
        backend.put("bob", b"2").unwrap();
        backend.clear().unwrap();
        assert!(backend.scan().unwrap().is_empty());
        backend.put("carol", b"3").unwrap();
        assert_eq!(backend.scan().unwrap().len(), 1);
    }
}

#[cfg(test)]
mod tests {
    use super::conformance;
    use super::*;

    #[test]
    fn memory_put_get_delete() {
        conformance::put_get_delete(&MemoryBackend::new());
    }

    #[test]
    fn memory_scan_is_key_ordered() {
        conformance::scan_is_key_ordered(&MemoryBackend::new());
    }

    #[test]
    fn memory_failed_update_writes_nothing() {
        conformance::failed_update_writes_nothing(&MemoryBackend::new());
    }

    #[test]
    fn memory_clear_removes_everything() {
        conformance::clear_removes_everything(&MemoryBackend::new());
    }
}
