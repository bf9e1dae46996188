use std::collections::BTreeMap;
use std::io;
use std::sync::{Mutex, MutexGuard};

use tracing::warn;

use super::model::{EntryKey, SecretId, SecretRecord};
use super::SecretStore;
use crate::clock;
use crate::error::{Result, SecretError};

/// In-process store keyed by entry name. Holds encoded bodies, so it goes
/// through the same codec as the durable backends. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // Every mutation is a single map operation, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn first_of<'a>(
        map: &'a BTreeMap<String, Vec<u8>>,
        id: &SecretId,
    ) -> Option<(EntryKey, &'a Vec<u8>)> {
        map.range(EntryKey::prefix(id)..format!("{id}."))
            .find_map(|(name, body)| EntryKey::parse(name).map(|key| (key, body)))
    }
}

impl SecretStore for MemoryStore {
    fn put(&self, record: &SecretRecord) -> Result<()> {
        let body = record.encode()?;
        let mut map = self.lock();
        if Self::first_of(&map, &record.id).is_some() {
            return Err(SecretError::Storage(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("entry already exists for {}", record.id),
            )));
        }
        map.insert(record.key().name(), body);
        Ok(())
    }

    fn fetch(&self, id: &SecretId, now: i64) -> Result<Option<SecretRecord>> {
        let mut map = self.lock();
        let Some((key, body)) = Self::first_of(&map, id) else {
            return Ok(None);
        };
        if clock::is_expired(key.expires_at, now) {
            map.remove(&key.name());
            return Ok(None);
        }
        match SecretRecord::decode(&key, body) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(entry = %key, error = %e, "removing undecodable entry");
                map.remove(&key.name());
                Ok(None)
            }
        }
    }

    fn remove(&self, record: &SecretRecord) -> Result<bool> {
        Ok(self.lock().remove(&record.key().name()).is_some())
    }

    fn sweep_expired(&self, now: i64) -> Result<usize> {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|name, _| match EntryKey::parse(name) {
            Some(key) => !clock::is_expired(key.expires_at, now),
            None => true,
        });
        Ok(before - map.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::contract;

    #[test]
    fn satisfies_store_contract() {
        let store = Arc::new(MemoryStore::new());
        contract::run_all(store.clone());
        assert!(store.is_empty());
    }
}
