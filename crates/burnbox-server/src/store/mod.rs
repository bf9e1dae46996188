pub mod crypto;
pub mod db;
pub mod file;
pub mod memory;
pub mod model;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

pub use crypto::{Cipher, Ciphertext, CryptoError, KdfCost, Scheme};
pub use db::RedbStore;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use model::{EntryKey, SecretId, SecretRecord};

use crate::error::Result;

/// Durable mapping from secret id to record.
///
/// Removal is the single arbitration point: when several callers (consumers
/// or the sweep) race for the same entry, exactly one `remove` returns `true`
/// and only that caller may act on the record.
pub trait SecretStore: Send + Sync {
    /// Persist a new record. Never overwrites an existing entry for the same id.
    fn put(&self, record: &SecretRecord) -> Result<()>;

    /// Read the live record for `id` without consuming it.
    ///
    /// Expired or undecodable entries are deleted on the way and reported as
    /// `None`, the same as a missing one.
    fn fetch(&self, id: &SecretId, now: i64) -> Result<Option<SecretRecord>>;

    /// Delete the entry for `record` if it is still there. Returns `true` only
    /// for the caller that actually removed it.
    fn remove(&self, record: &SecretRecord) -> Result<bool>;

    /// Delete every entry whose expiry has passed. Returns how many this call
    /// removed.
    fn sweep_expired(&self, now: i64) -> Result<usize>;

    /// Fetch and consume in one step. A concurrent `take_by_id` or sweep for
    /// the same id sees `None`.
    fn take_by_id(&self, id: &SecretId, now: i64) -> Result<Option<SecretRecord>> {
        match self.fetch(id, now)? {
            Some(record) if self.remove(&record)? => Ok(Some(record)),
            _ => Ok(None),
        }
    }
}

/// Which durable store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// One JSON file per secret under `<data_dir>/secrets/`.
    #[default]
    File,
    /// One row per secret in `<data_dir>/burnbox.db`.
    Redb,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "files" => Ok(Self::File),
            "redb" | "db" => Ok(Self::Redb),
            other => Err(format!("unknown store backend '{other}' (expected file|redb)")),
        }
    }
}

/// Open the configured backend inside `data_dir`.
pub fn open(backend: Backend, data_dir: &Path) -> Result<Arc<dyn SecretStore>> {
    Ok(match backend {
        Backend::File => Arc::new(FileStore::open(data_dir.join("secrets"))?),
        Backend::Redb => Arc::new(RedbStore::open(&data_dir.join("burnbox.db"))?),
    })
}
