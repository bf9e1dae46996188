use std::io;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, info, warn};

use super::model::{EntryKey, SecretId, SecretRecord};
use super::SecretStore;
use crate::clock;
use crate::error::{Result, SecretError};

/// Entry name (`{id}-{expires_at}.secret`) → JSON body.
const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Thread-safe handle to a redb-backed store.
///
/// Rows are keyed by entry name, so all rows of one id sit next to each other
/// and are found with a prefix range. Removal runs in a write transaction;
/// redb serializes those, which makes `remove` the arbitration point.
#[derive(Clone)]
pub struct RedbStore {
    pub(crate) db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(SecretError::db)?;

        let write_txn = db.begin_write().map_err(SecretError::db)?;
        write_txn.open_table(SECRETS).map_err(SecretError::db)?;
        write_txn.commit().map_err(SecretError::db)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Half-open key range covering every entry of `id`.
    fn id_range(id: &SecretId) -> (String, String) {
        // '.' sorts right after '-'.
        (EntryKey::prefix(id), format!("{id}."))
    }

    /// First entry of `id` and its raw body, if any.
    fn lookup(&self, id: &SecretId) -> Result<Option<(EntryKey, Vec<u8>)>> {
        let (start, end) = Self::id_range(id);
        let read_txn = self.db.begin_read().map_err(SecretError::db)?;
        let table = read_txn.open_table(SECRETS).map_err(SecretError::db)?;

        for item in table
            .range(start.as_str()..end.as_str())
            .map_err(SecretError::db)?
        {
            let (k, v) = item.map_err(SecretError::db)?;
            if let Some(key) = EntryKey::parse(k.value()) {
                return Ok(Some((key, v.value().to_vec())));
            }
        }
        Ok(None)
    }

    fn remove_key(&self, key: &EntryKey) -> Result<bool> {
        let name = key.name();
        let write_txn = self.db.begin_write().map_err(SecretError::db)?;
        let existed = {
            let mut table = write_txn.open_table(SECRETS).map_err(SecretError::db)?;
            let existed = table.remove(name.as_str()).map_err(SecretError::db)?.is_some();
            existed
        };
        write_txn.commit().map_err(SecretError::db)?;
        Ok(existed)
    }
}

impl SecretStore for RedbStore {
    fn put(&self, record: &SecretRecord) -> Result<()> {
        let key = record.key();
        let name = key.name();
        let bytes = record.encode()?;
        let (start, end) = Self::id_range(&record.id);

        let write_txn = self.db.begin_write().map_err(SecretError::db)?;
        {
            let mut table = write_txn.open_table(SECRETS).map_err(SecretError::db)?;
            let taken = table
                .range(start.as_str()..end.as_str())
                .map_err(SecretError::db)?
                .next()
                .is_some();
            if taken {
                // Dropping the transaction aborts it.
                return Err(SecretError::Storage(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("entry already exists for {}", record.id),
                )));
            }
            table
                .insert(name.as_str(), bytes.as_slice())
                .map_err(SecretError::db)?;
        }
        write_txn.commit().map_err(SecretError::db)?;

        debug!(id = %record.id, "stored secret");
        Ok(())
    }

    fn fetch(&self, id: &SecretId, now: i64) -> Result<Option<SecretRecord>> {
        let Some((key, body)) = self.lookup(id)? else {
            return Ok(None);
        };

        if clock::is_expired(key.expires_at, now) {
            if self.remove_key(&key)? {
                debug!(id = %id, "lazy-evicted expired secret");
            }
            return Ok(None);
        }

        match SecretRecord::decode(&key, &body) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(entry = %key, error = %e, "removing undecodable entry");
                self.remove_key(&key)?;
                Ok(None)
            }
        }
    }

    fn remove(&self, record: &SecretRecord) -> Result<bool> {
        self.remove_key(&record.key())
    }

    fn sweep_expired(&self, now: i64) -> Result<usize> {
        // Collect expired names in a read pass first; bodies are never decoded.
        let expired: Vec<String> = {
            let read_txn = self.db.begin_read().map_err(SecretError::db)?;
            let table = read_txn.open_table(SECRETS).map_err(SecretError::db)?;
            let mut names = Vec::new();
            for item in table.iter().map_err(SecretError::db)? {
                let (k, _v) = item.map_err(SecretError::db)?;
                if let Some(key) = EntryKey::parse(k.value()) {
                    if clock::is_expired(key.expires_at, now) {
                        names.push(k.value().to_owned());
                    }
                }
            }
            names
        };

        if expired.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write().map_err(SecretError::db)?;
        let mut removed = 0usize;
        {
            let mut table = write_txn.open_table(SECRETS).map_err(SecretError::db)?;
            for name in &expired {
                // A consumer may have won the row since the read pass.
                if table.remove(name.as_str()).map_err(SecretError::db)?.is_some() {
                    removed += 1;
                }
            }
        }
        write_txn.commit().map_err(SecretError::db)?;

        if removed > 0 {
            info!(removed, "swept expired secrets");
        }
        Ok(removed)
    }
}
