//! Persistent backend on redb, an embedded ACID key-value store.
//!
//! Each operation runs in its own transaction and commits with immediate
//! durability, so a crash never exposes a half-written record.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;

use super::KvBackend;
use crate::errors::{AppError, AppResult};

const PROFILES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("profiles");

#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path).map_err(AppError::store)?;

        let write_txn = db.begin_write().map_err(AppError::store)?;
        {
            // Opening the table creates it, so readers never see it missing.
            let _table = write_txn
                .open_table(PROFILES_TABLE)
                .map_err(AppError::store)?;
        }
        write_txn.commit().map_err(AppError::store)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }
        debug!(path = %path.display(), "opened profile database");

        Ok(Self { db: Arc::new(db) })
    }
}

impl KvBackend for RedbBackend {
    fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read().map_err(AppError::store)?;
        let table = read_txn
            .open_table(PROFILES_TABLE)
            .map_err(AppError::store)?;
        let value = table.get(key).map_err(AppError::store)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> AppResult<()> {
        let write_txn = self.db.begin_write().map_err(AppError::store)?;
        {
            let mut table = write_txn
                .open_table(PROFILES_TABLE)
                .map_err(AppError::store)?;
            table.insert(key, value).map_err(AppError::store)?;
        }
        write_txn.commit().map_err(AppError::store)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> AppResult<bool> {
        let write_txn = self.db.begin_write().map_err(AppError::store)?;
        let existed = {
            let mut table = write_txn
                .open_table(PROFILES_TABLE)
                .map_err(AppError::store)?;
            let removed = table.remove(key).map_err(AppError::store)?;
            removed.is_some()
        };
        write_txn.commit().map_err(AppError::store)?;
        Ok(existed)
    }

    fn scan(&self) -> AppResult<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read().map_err(AppError::store)?;
        let table = read_txn
            .open_table(PROFILES_TABLE)
            .map_err(AppError::store)?;

        let mut entries = Vec::new();
        for item in table.iter().map_err(AppError::store)? {
            let (key, value) = item.map_err(AppError::store)?;
            entries.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(entries)
    }

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<&[u8]>) -> AppResult<Vec<u8>>,
    ) -> AppResult<()> {
        let write_txn = self.db.begin_write().map_err(AppError::store)?;
        let applied = (|| -> AppResult<()> {
            let mut table = write_txn
                .open_table(PROFILES_TABLE)
                .map_err(AppError::store)?;
            let current = table
                .get(key)
                .map_err(AppError::store)?
                .map(|guard| guard.value().to_vec());
            let next = apply(current.as_deref())?;
            table
                .insert(key, next.as_slice())
                .map_err(AppError::store)?;
            Ok(())
        })();

        match applied {
            Ok(()) => {
                write_txn.commit().map_err(AppError::store)?;
                Ok(())
            }
            Err(err) => {
                write_txn.abort().map_err(AppError::store)?;
                Err(err)
            }
        }
    }

    fn clear(&self) -> AppResult<()> {
        let write_txn = self.db.begin_write().map_err(AppError::store)?;
        {
            let mut table = write_txn
                .open_table(PROFILES_TABLE)
                .map_err(AppError::store)?;
            let mut keys = Vec::new();
            for item in table.iter().map_err(AppError::store)? {
                let (key, _) = item.map_err(AppError::store)?;
                keys.push(key.value().to_string());
            }
            for key in &keys {
                table.remove(key.as_str()).map_err(AppError::store)?;
            }
        }
        write_txn.commit().map_err(AppError::store)?;
        Ok(())
    }
}
