use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::model::{EntryKey, SecretId, SecretRecord};
use super::SecretStore;
use crate::clock;
use crate::error::{Result, SecretError};

const TMP_SUFFIX: &str = ".tmp";

/// Temporaries older than this belong to a write that never finished.
const STALE_TMP_AGE: Duration = Duration::from_secs(600);

/// One file per secret, named `{id}-{expires_at}.secret`, in a single directory.
///
/// Writes land in a hidden temporary and are hard-linked into place, so a
/// reader never sees a half-written entry. Deletion is a plain `unlink`; the
/// filesystem lets exactly one of several concurrent unlinks succeed.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (or create) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &EntryKey) -> PathBuf {
        self.dir.join(key.name())
    }

    /// Locate the entry for `id` by scanning for its name prefix.
    fn find(&self, id: &SecretId) -> Result<Option<EntryKey>> {
        let prefix = EntryKey::prefix(id);
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&prefix) {
                continue;
            }
            if let Some(key) = EntryKey::parse(name) {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    fn remove_key(&self, key: &EntryKey) -> Result<bool> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn write_tmp(&self, tmp: &Path, body: &[u8]) -> io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(tmp)?;
        file.write_all(body)?;
        file.sync_all()
    }

    fn remove_stale_tmp(&self, path: &Path) -> io::Result<bool> {
        let age = fs::metadata(path)?
            .modified()?
            .elapsed()
            .unwrap_or_default();
        if age < STALE_TMP_AGE {
            return Ok(false);
        }
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl SecretStore for FileStore {
    fn put(&self, record: &SecretRecord) -> Result<()> {
        if let Some(existing) = self.find(&record.id)? {
            return Err(SecretError::Storage(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("entry already exists: {existing}"),
            )));
        }

        let key = record.key();
        let body = record.encode()?;
        let tmp = self.dir.join(format!(
            ".{}.{:016x}{TMP_SUFFIX}",
            key.name(),
            rand::random::<u64>()
        ));

        let committed = self
            .write_tmp(&tmp, &body)
            .and_then(|()| fs::hard_link(&tmp, self.path(&key)));
        // The temporary is garbage whether or not the link succeeded.
        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %e, "failed to remove temporary entry");
            }
        }
        committed?;

        debug!(id = %record.id, "stored secret");
        Ok(())
    }

    fn fetch(&self, id: &SecretId, now: i64) -> Result<Option<SecretRecord>> {
        let Some(key) = self.find(id)? else {
            return Ok(None);
        };

        if clock::is_expired(key.expires_at, now) {
            if self.remove_key(&key)? {
                debug!(id = %id, "lazy-evicted expired secret");
            }
            return Ok(None);
        }

        let body = match fs::read(self.path(&key)) {
            Ok(body) => body,
            // Consumed or swept since we listed the directory.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

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
        let mut removed = 0usize;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            if let Some(key) = EntryKey::parse(name) {
                if !clock::is_expired(key.expires_at, now) {
                    continue;
                }
                match self.remove_key(&key) {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => warn!(entry = %key, error = %e, "failed to remove expired entry"),
                }
            } else if name.starts_with('.') && name.ends_with(TMP_SUFFIX) {
                match self.remove_stale_tmp(&entry.path()) {
                    Ok(true) => debug!(name, "removed stale temporary entry"),
                    Ok(false) => {}
                    Err(e) => warn!(name, error = %e, "failed to inspect temporary entry"),
                }
            }
        }

        if removed > 0 {
            info!(removed, "swept expired secrets");
        }
        Ok(removed)
    }
}

/// Back-date a file's modification time (test helper).
#[cfg(test)]
fn age_file(path: &Path, by: Duration) {
    let file = fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(std::time::SystemTime::now() - by).unwrap();
}
