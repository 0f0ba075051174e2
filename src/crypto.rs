use std::fmt;

use picky_krb::constants::etypes::{AES128_CTS_HMAC_SHA1_96, AES256_CTS_HMAC_SHA1_96};
use picky_krb::crypto::{CipherSuite, KerberosCryptoError};
use rand::rngs::OsRng;
use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{CodecError, Decode, Encode};
use crate::messages::EncryptedData;
use crate::secret::Secret;

/// Encryption types the KDC is able to negotiate.
///
/// [Encryption Type Assignment Numbers](https://www.rfc-editor.org/rfc/rfc3961#section-8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EncryptionType {
    Aes256CtsHmacSha196,
    Aes128CtsHmacSha196,
}

impl EncryptionType {
    /// Maps the assigned etype number to the [EncryptionType].
    ///
    /// Returns `None` for etypes this KDC does not implement.
    pub fn from_etype(etype: usize) -> Option<Self> {
        match etype {
            AES256_CTS_HMAC_SHA1_96 => Some(EncryptionType::Aes256CtsHmacSha196),
            AES128_CTS_HMAC_SHA1_96 => Some(EncryptionType::Aes128CtsHmacSha196),
            _ => None,
        }
    }

    pub fn etype(self) -> usize {
        match self {
            EncryptionType::Aes256CtsHmacSha196 => AES256_CTS_HMAC_SHA1_96,
            EncryptionType::Aes128CtsHmacSha196 => AES128_CTS_HMAC_SHA1_96,
        }
    }

    pub fn cipher_suite(self) -> CipherSuite {
        match self {
            EncryptionType::Aes256CtsHmacSha196 => CipherSuite::Aes256CtsHmacSha196,
            EncryptionType::Aes128CtsHmacSha196 => CipherSuite::Aes128CtsHmacSha196,
        }
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionType::Aes256CtsHmacSha196 => write!(f, "aes256-cts-hmac-sha1-96"),
            EncryptionType::Aes128CtsHmacSha196 => write!(f, "aes128-cts-hmac-sha1-96"),
        }
    }
}

/// Kerberos encryption key: the key material along with its encryption type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    pub etype: EncryptionType,
    pub value: Secret<Vec<u8>>,
}

impl EncryptionKey {
    pub fn new(etype: EncryptionType, value: Vec<u8>) -> Self {
        Self {
            etype,
            value: Secret::new(value),
        }
    }
}

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("{0} is not supported by the cipher service")]
    UnsupportedEncryptionType(usize),

    #[error("encrypted data etype ({data}) does not match the key etype ({key})")]
    EncryptionTypeMismatch { key: EncryptionType, data: usize },

    #[error("decryption or integrity check failed: {0:?}")]
    Integrity(KerberosCryptoError),

    #[error("encryption failed: {0:?}")]
    Encryption(KerberosCryptoError),

    #[error("key derivation failed: {0:?}")]
    KeyDerivation(KerberosCryptoError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Symmetric cipher primitives used by the Authentication Service.
///
/// The KDC never touches raw cipher algorithms: fresh session keys, sealing and unsealing
/// all go through this trait, so tests and alternative crypto backends can be plugged in.
pub trait CipherService: Send + Sync + fmt::Debug {
    /// Generates a fresh random key for the given encryption type.
    fn random_key(&self, etype: EncryptionType) -> Result<EncryptionKey, CipherError>;

    /// Derives a long-term key from a password.
    ///
    /// [String to key](https://www.rfc-editor.org/rfc/rfc3962#section-4).
    fn string_to_key(&self, etype: EncryptionType, password: &[u8], salt: &[u8]) -> Result<EncryptionKey, CipherError>;

    /// Encrypts and integrity-protects `plaintext` under `key` for the given key usage.
    fn encrypt(&self, key: &EncryptionKey, key_usage: i32, plaintext: &[u8]) -> Result<EncryptedData, CipherError>;

    /// Inverse of [CipherService::encrypt]. Fails when the data has been tampered with or the key is wrong.
    fn decrypt(&self, key: &EncryptionKey, key_usage: i32, data: &EncryptedData) -> Result<Vec<u8>, CipherError>;
}

/// [CipherService] backed by the `picky-krb` RFC 3962 implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PickyCipher;

impl CipherService for PickyCipher {
    fn random_key(&self, etype: EncryptionType) -> Result<EncryptionKey, CipherError> {
        let mut key = vec![0; etype.cipher_suite().cipher().key_size()];
        OsRng.fill_bytes(&mut key);

        Ok(EncryptionKey::new(etype, key))
    }

    fn string_to_key(&self, etype: EncryptionType, password: &[u8], salt: &[u8]) -> Result<EncryptionKey, CipherError> {
        let key = etype
            .cipher_suite()
            .cipher()
            .generate_key_from_password(password, salt)
            .map_err(CipherError::KeyDerivation)?;

        Ok(EncryptionKey::new(etype, key))
    }

    fn encrypt(&self, key: &EncryptionKey, key_usage: i32, plaintext: &[u8]) -> Result<EncryptedData, CipherError> {
        let cipher = key
            .etype
            .cipher_suite()
            .cipher()
            .encrypt(key.value.as_ref(), key_usage, plaintext)
            .map_err(CipherError::Encryption)?;

        Ok(EncryptedData {
            etype: key.etype.etype(),
            kvno: None,
            cipher,
        })
    }

    fn decrypt(&self, key: &EncryptionKey, key_usage: i32, data: &EncryptedData) -> Result<Vec<u8>, CipherError> {
        let data_etype = EncryptionType::from_etype(data.etype).ok_or(CipherError::UnsupportedEncryptionType(data.etype))?;
        if data_etype != key.etype {
            return Err(CipherError::EncryptionTypeMismatch {
                key: key.etype,
                data: data.etype,
            });
        }

        key.etype
            .cipher_suite()
            .cipher()
            .decrypt(key.value.as_ref(), key_usage, &data.cipher)
            .map_err(CipherError::Integrity)
    }
}

/// Encodes `plaintext` and seals it under `key`.
pub fn seal<T: Encode>(
    cipher: &dyn CipherService,
    key: &EncryptionKey,
    plaintext: &T,
    key_usage: i32,
) -> Result<EncryptedData, CipherError> {
    let encoded = plaintext.encode()?;

    cipher.encrypt(key, key_usage, &encoded)
}

/// Unseals `data` with `key` and decodes the recovered plaintext as `T`.
pub fn unseal<T: Decode>(
    cipher: &dyn CipherService,
    key: &EncryptionKey,
    data: &EncryptedData,
    key_usage: i32,
) -> Result<T, CipherError> {
    let plaintext = cipher.decrypt(key, key_usage, data)?;

    Ok(T::decode(&plaintext)?)
}
