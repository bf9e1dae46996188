use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::crypto::{Ciphertext, KdfCost, NONCE_LEN, SALT_LEN};
use crate::error::{Result, SecretError};

/// Suffix shared by every durable entry name.
pub const ENTRY_SUFFIX: &str = ".secret";

const VERSION_LEGACY: u8 = 1;
const VERSION_SEALED: u8 = 2;

/// 128-bit random identifier, rendered as 32 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretId(Uuid);

impl SecretId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SecretId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Accepts the bare 32-digit form as well as hyphenated/braced GUIDs.
impl FromStr for SecretId {
    type Err = SecretError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| SecretError::InvalidId)
    }
}

/// The name of a durable entry: `{id}-{expires_at}.secret`.
///
/// Carrying the expiry in the name lets the sweep decide without reading
/// the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryKey {
    pub id: SecretId,
    pub expires_at: i64,
}

impl EntryKey {
    /// Prefix shared by every entry of `id`, whatever its expiry.
    pub fn prefix(id: &SecretId) -> String {
        format!("{id}-")
    }

    pub fn name(&self) -> String {
        format!("{}-{}{ENTRY_SUFFIX}", self.id, self.expires_at)
    }

    /// Returns `None` for anything that isn't an entry name.
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(ENTRY_SUFFIX)?;
        let (id, expires_at) = stem.split_once('-')?;
        if id.len() != 32 {
            return None;
        }
        Some(Self {
            id: id.parse().ok()?,
            expires_at: expires_at.parse().ok()?,
        })
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// The durable unit. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub id: SecretId,
    pub ciphertext: Ciphertext,
    /// Epoch milliseconds; the record is dead from this instant on.
    pub expires_at: i64,
}

impl SecretRecord {
    pub fn new(ciphertext: Ciphertext, expires_at: i64) -> Self {
        Self {
            id: SecretId::new(),
            ciphertext,
            expires_at,
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey {
            id: self.id,
            expires_at: self.expires_at,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        crate::clock::is_expired(self.expires_at, now)
    }

    /// Serialize the entry body (JSON).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = match &self.ciphertext {
            Ciphertext::Legacy(bytes) => EntryBody {
                id: self.id.to_string(),
                content: B64.encode(bytes),
                version: None,
                salt: None,
                nonce: None,
                kdf: None,
            },
            Ciphertext::Sealed {
                bytes,
                salt,
                nonce,
                cost,
            } => EntryBody {
                id: self.id.to_string(),
                content: B64.encode(bytes),
                version: Some(VERSION_SEALED),
                salt: Some(B64.encode(salt)),
                nonce: Some(B64.encode(nonce)),
                kdf: Some(*cost),
            },
        };
        serde_json::to_vec(&body).map_err(|e| SecretError::internal(format!("encode entry: {e}")))
    }

    /// Rebuild a record from its entry name and body.
    pub fn decode(key: &EntryKey, body: &[u8]) -> Result<Self> {
        let body: EntryBody = serde_json::from_slice(body)
            .map_err(|e| SecretError::corrupt(format!("{key}: {e}")))?;

        let id: SecretId = body
            .id
            .parse()
            .map_err(|_| SecretError::corrupt(format!("{key}: bad id")))?;
        if id != key.id {
            return Err(SecretError::corrupt(format!("{key}: id does not match name")));
        }

        let bytes = B64
            .decode(&body.content)
            .map_err(|e| SecretError::corrupt(format!("{key}: content: {e}")))?;

        let ciphertext = match body.version.unwrap_or(VERSION_LEGACY) {
            VERSION_LEGACY => Ciphertext::Legacy(bytes),
            VERSION_SEALED => {
                let cost = body
                    .kdf
                    .ok_or_else(|| SecretError::corrupt(format!("{key}: missing kdf")))?;
                cost.check()
                    .map_err(|e| SecretError::corrupt(format!("{key}: {e}")))?;
                Ciphertext::Sealed {
                    bytes,
                    salt: fixed::<SALT_LEN>(key, "salt", body.salt.as_deref())?,
                    nonce: fixed::<NONCE_LEN>(key, "nonce", body.nonce.as_deref())?,
                    cost,
                }
            }
            v => return Err(SecretError::corrupt(format!("{key}: unknown version {v}"))),
        };

        Ok(Self {
            id,
            ciphertext,
            expires_at: key.expires_at,
        })
    }
}

fn fixed<const N: usize>(key: &EntryKey, field: &str, value: Option<&str>) -> Result<[u8; N]> {
    let raw = value.ok_or_else(|| SecretError::corrupt(format!("{key}: missing {field}")))?;
    let bytes = B64
        .decode(raw)
        .map_err(|e| SecretError::corrupt(format!("{key}: {field}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| SecretError::corrupt(format!("{key}: {field} must be {N} bytes")))
}

/// On-disk JSON. Field names match entries written by the first version of
/// the service; unknown fields are ignored.
#[derive(Debug, Serialize, Deserialize)]
struct EntryBody {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Content")]
    content: String,
    #[serde(rename = "Version", default, skip_serializing_if = "Option::is_none")]
    version: Option<u8>,
    #[serde(rename = "Salt", default, skip_serializing_if = "Option::is_none")]
    salt: Option<String>,
    #[serde(rename = "Nonce", default, skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    #[serde(rename = "Kdf", default, skip_serializing_if = "Option::is_none")]
    kdf: Option<KdfCost>,
}
