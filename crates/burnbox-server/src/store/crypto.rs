use std::str::FromStr;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha384;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::SecretError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// IV shared by every legacy entry. Kept only so old entries stay readable
/// and `Scheme::Legacy` output stays byte-compatible.
const LEGACY_IV: [u8; 16] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16,
];
const LEGACY_ITERATIONS: u32 = 1000;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Wrong pin or mangled ciphertext.
    #[error("decryption failed")]
    DecryptionFailed,

    #[error("key derivation: {0}")]
    Kdf(String),

    #[error("encryption: {0}")]
    Encryption(String),
}

impl From<CryptoError> for SecretError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::DecryptionFailed => SecretError::WrongPin,
            other => SecretError::Internal(other.to_string()),
        }
    }
}

/// Which construction protects newly written secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    /// PBKDF2-SHA384 (no salt) + AES-128-CBC with a fixed IV. Entry version 1.
    Legacy,
    /// Argon2id with a per-record salt + ChaCha20Poly1305. Entry version 2.
    #[default]
    Sealed,
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "sealed" => Ok(Self::Sealed),
            other => Err(format!("unknown cipher scheme '{other}' (expected sealed|legacy)")),
        }
    }
}

/// Argon2id cost parameters. Stored with every sealed entry so they can be
/// raised later without breaking existing secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfCost {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfCost {
    fn default() -> Self {
        Self {
            m_cost: 65536, // 64 MiB
            t_cost: 3,
            p_cost: 1,
        }
    }
}

/// Upper bounds for costs read back from storage.
const MAX_M_COST: u32 = 4 * 65536;
const MAX_T_COST: u32 = 16;
const MAX_P_COST: u32 = 8;

impl KdfCost {
    fn params(&self) -> Result<Params, CryptoError> {
        Params::new(self.m_cost, self.t_cost, self.p_cost, Some(32))
            .map_err(|e| CryptoError::Kdf(format!("argon2 params: {e}")))
    }

    /// Reject costs Argon2 would refuse, or that would be too expensive to run.
    pub fn check(&self) -> Result<(), CryptoError> {
        self.params()?;
        if self.m_cost > MAX_M_COST || self.t_cost > MAX_T_COST || self.p_cost > MAX_P_COST {
            return Err(CryptoError::Kdf(format!(
                "argon2 cost out of range (m={}, t={}, p={})",
                self.m_cost, self.t_cost, self.p_cost
            )));
        }
        Ok(())
    }
}

/// Encrypted payload as it travels between the cipher and the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ciphertext {
    Legacy(Vec<u8>),
    Sealed {
        bytes: Vec<u8>,
        salt: [u8; SALT_LEN],
        nonce: [u8; NONCE_LEN],
        cost: KdfCost,
    },
}

impl Ciphertext {
    pub fn scheme(&self) -> Scheme {
        match self {
            Self::Legacy(_) => Scheme::Legacy,
            Self::Sealed { .. } => Scheme::Sealed,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Legacy(bytes) => bytes,
            Self::Sealed { bytes, .. } => bytes,
        }
    }
}

/// Symmetric key material, wiped on drop.
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey<const N: usize>([u8; N]);

impl<const N: usize> EncryptionKey<N> {
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

/// Encrypts new secrets with the configured scheme and decrypts any scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cipher {
    scheme: Scheme,
    cost: KdfCost,
}

impl Cipher {
    pub fn new(scheme: Scheme) -> Self {
        Self {
            scheme,
            cost: KdfCost::default(),
        }
    }

    pub fn with_cost(mut self, cost: KdfCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn encrypt(&self, plaintext: &str, pin: &str) -> Result<Ciphertext, CryptoError> {
        match self.scheme {
            Scheme::Legacy => encrypt_legacy(plaintext, pin).map(Ciphertext::Legacy),
            Scheme::Sealed => seal(plaintext, pin, self.cost),
        }
    }

    /// Decrypts with whatever scheme produced `ciphertext`.
    pub fn decrypt(&self, ciphertext: &Ciphertext, pin: &str) -> Result<String, CryptoError> {
        match ciphertext {
            Ciphertext::Legacy(bytes) => decrypt_legacy(bytes, pin),
            Ciphertext::Sealed {
                bytes,
                salt,
                nonce,
                cost,
            } => open(bytes, pin, salt, nonce, *cost),
        }
    }
}

// ── Legacy: PBKDF2-SHA384 + AES-128-CBC ─────────────────────────────────────

/// Stretch `pin` into the 16-byte legacy key. Pure function of the pin.
pub fn derive_key(pin: &str) -> EncryptionKey<16> {
    let password = Zeroizing::new(utf16le(pin));
    let mut key = [0u8; 16];
    pbkdf2::pbkdf2_hmac::<Sha384>(&password, &[], LEGACY_ITERATIONS, &mut key);
    EncryptionKey(key)
}

pub fn encrypt_legacy(plaintext: &str, pin: &str) -> Result<Vec<u8>, CryptoError> {
    let key = derive_key(pin);
    let encryptor = Aes128CbcEnc::new_from_slices(key.as_bytes(), &LEGACY_IV)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let data = Zeroizing::new(utf16le(plaintext));
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(&data))
}

/// A wrong pin shows up as bad padding, an odd byte count or broken UTF-16.
pub fn decrypt_legacy(ciphertext: &[u8], pin: &str) -> Result<String, CryptoError> {
    let key = derive_key(pin);
    let decryptor = Aes128CbcDec::new_from_slices(key.as_bytes(), &LEGACY_IV)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let plain = Zeroizing::new(
        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?,
    );
    if plain.len() % 2 != 0 {
        return Err(CryptoError::DecryptionFailed);
    }
    let units: Zeroizing<Vec<u16>> = Zeroizing::new(
        plain
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect(),
    );
    String::from_utf16(&units).map_err(|_| CryptoError::DecryptionFailed)
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

// ── Sealed: Argon2id + ChaCha20Poly1305 ──────────────────────────────────────

pub fn derive_sealed_key(
    pin: &str,
    salt: &[u8; SALT_LEN],
    cost: KdfCost,
) -> Result<EncryptionKey<32>, CryptoError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, cost.params()?);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(pin.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::Kdf(format!("argon2 hash: {e}")))?;
    Ok(EncryptionKey(key))
}

fn seal(plaintext: &str, pin: &str, cost: KdfCost) -> Result<Ciphertext, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let key = derive_sealed_key(pin, &salt, cost)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let bytes = cipher
        .encrypt(&Nonce::from(nonce), plaintext.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(Ciphertext::Sealed {
        bytes,
        salt,
        nonce,
        cost,
    })
}

fn open(
    ciphertext: &[u8],
    pin: &str,
    salt: &[u8; SALT_LEN],
    nonce: &[u8; NONCE_LEN],
    cost: KdfCost,
) -> Result<String, CryptoError> {
    let key = derive_sealed_key(pin, salt, cost)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let plain = cipher
        .decrypt(&Nonce::from(*nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    String::from_utf8(plain).map_err(|e| {
        let mut bytes = e.into_bytes();
        bytes.zeroize();
        CryptoError::DecryptionFailed
    })
}

/// Cheap Argon2 parameters so tests don't spend seconds per derivation.
#[cfg(test)]
pub(crate) const TEST_COST: KdfCost = KdfCost {
    m_cost: 64,
    t_cost: 1,
    p_cost: 1,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed() -> Cipher {
        Cipher::new(Scheme::Sealed).with_cost(TEST_COST)
    }

    #[test]
    fn legacy_round_trip() {
        let ct = encrypt_legacy("hello, burnbox", "123456").unwrap();
        assert_eq!(decrypt_legacy(&ct, "123456").unwrap(), "hello, burnbox");
    }

    #[test]
    fn legacy_round_trip_non_ascii() {
        let text = "пароль 🔑 ключ";
        let ct = encrypt_legacy(text, "0000").unwrap();
        assert_eq!(decrypt_legacy(&ct, "0000").unwrap(), text);
    }

    // Reference values computed independently: PBKDF2-HMAC-SHA384 over the
    // UTF-16LE pin (empty salt, 1000 rounds, 16 bytes), then AES-128-CBC with
    // PKCS#7 and the fixed IV over UTF-16LE text.
    #[test]
    fn legacy_matches_known_vectors() {
        use base64::{engine::general_purpose::STANDARD as B64, Engine as _};

        let hex = |bytes: &[u8]| bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();

        assert_eq!(
            hex(derive_key("123456").as_bytes()),
            "3305fec97a7ce703ff4b4adecc4371f2"
        );
        assert_eq!(
            B64.encode(encrypt_legacy("hello", "123456").unwrap()),
            "6TMWnN0jj3oy00Jv1jv1tQ=="
        );

        assert_eq!(
            hex(derive_key("pin").as_bytes()),
            "a9cb1f3229643db6237a1fb051fb4602"
        );
        let ct = B64
            .decode("qzNE+SdaYuOaAW7ZubsQFc63S6sTrzRZSeUXKx30NaQ=")
            .unwrap();
        assert_eq!(encrypt_legacy("пароль 🔑", "pin").unwrap(), ct);
        assert_eq!(decrypt_legacy(&ct, "pin").unwrap(), "пароль 🔑");
    }

    #[test]
    fn kdf_cost_bounds() {
        assert!(KdfCost::default().check().is_ok());
        assert!(TEST_COST.check().is_ok());
        let zero = KdfCost {
            m_cost: 0,
            t_cost: 0,
            p_cost: 0,
        };
        assert!(zero.check().is_err());
        let huge = KdfCost {
            m_cost: u32::MAX,
            ..KdfCost::default()
        };
        assert!(huge.check().is_err());
    }

    #[test]
    fn legacy_is_deterministic() {
        // Fixed IV + unsalted KDF: same input, same output.
        assert_eq!(derive_key("42").as_bytes(), derive_key("42").as_bytes());
        assert_ne!(derive_key("42").as_bytes(), derive_key("43").as_bytes());
        assert_eq!(
            encrypt_legacy("same", "42").unwrap(),
            encrypt_legacy("same", "42").unwrap()
        );
    }

    #[test]
    fn legacy_ciphertext_is_block_aligned_utf16() {
        // "ab" is 4 bytes of UTF-16LE, padded to one AES block.
        let ct = encrypt_legacy("ab", "1").unwrap();
        assert_eq!(ct.len(), 16);
        let ct = encrypt_legacy("abcdefgh", "1").unwrap();
        assert_eq!(ct.len(), 32);
    }

    #[test]
    fn legacy_wrong_pin_fails() {
        for (right, wrong) in [("123456", "654321"), ("1", "2"), ("pin", "pim")] {
            let ct = encrypt_legacy("secret", right).unwrap();
            assert!(matches!(
                decrypt_legacy(&ct, wrong),
                Err(CryptoError::DecryptionFailed)
            ));
        }
    }

    #[test]
    fn legacy_rejects_truncated_ciphertext() {
        let ct = encrypt_legacy("secret", "1").unwrap();
        assert!(decrypt_legacy(&ct[..ct.len() - 3], "1").is_err());
    }

    #[test]
    fn sealed_round_trip() {
        let cipher = sealed();
        let ct = cipher.encrypt("hello, burnbox", "123456").unwrap();
        assert_eq!(ct.scheme(), Scheme::Sealed);
        assert_eq!(cipher.decrypt(&ct, "123456").unwrap(), "hello, burnbox");
    }

    #[test]
    fn sealed_wrong_pin_fails() {
        let cipher = sealed();
        let ct = cipher.encrypt("secret", "key-one").unwrap();
        assert!(matches!(
            cipher.decrypt(&ct, "key-two"),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn sealed_salts_every_record() {
        let cipher = sealed();
        let a = cipher.encrypt("same", "42").unwrap();
        let b = cipher.encrypt("same", "42").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn decrypt_follows_the_ciphertext_scheme() {
        let legacy = Ciphertext::Legacy(encrypt_legacy("old", "9").unwrap());
        assert_eq!(sealed().decrypt(&legacy, "9").unwrap(), "old");
    }

    #[test]
    fn wrong_pin_maps_to_wrong_pin_error() {
        let err: SecretError = CryptoError::DecryptionFailed.into();
        assert!(matches!(err, SecretError::WrongPin));
        let err: SecretError = CryptoError::Kdf("bad".into()).into();
        assert!(matches!(err, SecretError::Internal(_)));
    }

    #[test]
    fn scheme_parses() {
        assert_eq!("Legacy".parse::<Scheme>().unwrap(), Scheme::Legacy);
        assert_eq!("sealed".parse::<Scheme>().unwrap(), Scheme::Sealed);
        assert!("aes".parse::<Scheme>().is_err());
    }
}
