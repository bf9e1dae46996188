use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::clock;
use crate::error::{Result, SecretError};
use crate::store::{Cipher, SecretId, SecretRecord, SecretStore};

/// Create/retrieve use cases on top of a [`SecretStore`] and a [`Cipher`].
///
/// Key derivation and storage I/O block, so each call runs them on the
/// blocking pool. Dropping a call's future does not interrupt a write
/// half-way: the blocking step runs to completion on its own.
#[derive(Clone)]
pub struct SecretService {
    store: Arc<dyn SecretStore>,
    cipher: Cipher,
}

impl SecretService {
    pub fn new(store: Arc<dyn SecretStore>, cipher: Cipher) -> Self {
        Self { store, cipher }
    }

    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    /// Encrypt `content` under `pin` and store it until `expires_at`.
    ///
    /// Content and pin are expected to be non-empty; the transport checks that.
    pub async fn create_secret(
        &self,
        content: &str,
        expires_at: DateTime<Utc>,
        pin: &str,
    ) -> Result<SecretId> {
        let expires_at = expires_at.timestamp_millis();
        if clock::is_expired(expires_at, clock::now_millis()) {
            return Err(SecretError::ExpirationInPast);
        }

        let content = Zeroizing::new(content.to_owned());
        let pin = Zeroizing::new(pin.to_owned());
        let (store, cipher) = (self.store.clone(), self.cipher);

        let id = blocking(move || {
            let ciphertext = cipher.encrypt(&content, &pin)?;
            let record = SecretRecord::new(ciphertext, expires_at);
            store.put(&record)?;
            Ok(record.id)
        })
        .await?;

        info!(id = %id, expires_at, scheme = ?self.cipher.scheme(), "secret created");
        Ok(id)
    }

    /// Decrypt and destroy the secret behind `id`.
    ///
    /// A wrong pin leaves the secret in place. Only the caller whose removal
    /// wins gets the payload; everyone else sees `NotFound`.
    pub async fn retrieve_secret(&self, id: &str, pin: &str) -> Result<String> {
        let id: SecretId = id.parse()?;
        let pin = Zeroizing::new(pin.to_owned());
        let (store, cipher) = (self.store.clone(), self.cipher);

        let result = blocking(move || {
            let record = store
                .fetch(&id, clock::now_millis())?
                .ok_or(SecretError::NotFound)?;

            let plaintext = cipher.decrypt(&record.ciphertext, &pin)?;

            if !store.remove(&record)? {
                // A concurrent consumer or the sweep got there first.
                return Err(SecretError::NotFound);
            }
            if record.is_expired(clock::now_millis()) {
                // Expired while we were decrypting; it is gone either way.
                return Err(SecretError::NotFound);
            }
            Ok(plaintext)
        })
        .await;

        match &result {
            Ok(_) => info!(id = %id, "secret consumed"),
            Err(SecretError::WrongPin) => warn!(id = %id, "wrong pin for secret"),
            Err(SecretError::NotFound) => debug!(id = %id, "secret not found or expired"),
            Err(e) => warn!(id = %id, error = %e, "secret retrieval failed"),
        }
        result
    }

    /// Purge every expired secret. Returns how many were removed.
    pub async fn clean_expired_secrets(&self) -> Result<usize> {
        let store = self.store.clone();
        blocking(move || store.sweep_expired(clock::now_millis())).await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SecretError::internal(format!("blocking task failed: {e}")))?
}
