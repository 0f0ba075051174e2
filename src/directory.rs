use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::config::DomainUser;
use crate::crypto::{CipherError, CipherService, EncryptionType};
use crate::principal::{PrincipalEntry, PrincipalName};

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("directory backend failure: {0}")]
    Backend(String),

    #[error("invalid domain user name: {0}")]
    InvalidUserName(String),

    #[error("failed to derive the user key: {0}")]
    KeyDerivation(#[from] CipherError),
}

/// Principal store consulted by the Authentication Service.
pub trait PrincipalDirectory: Send + Sync + fmt::Debug {
    /// Resolves the principal of the given realm.
    ///
    /// Returns `Ok(None)` when the principal does not exist.
    fn lookup(&self, principal: &PrincipalName, realm: &str) -> Result<Option<PrincipalEntry>, DirectoryError>;
}

/// [PrincipalDirectory] kept in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    entries: HashMap<String, PrincipalEntry>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the entry, replacing the previous entry of the same principal.
    pub fn insert(&mut self, entry: PrincipalEntry) {
        let key = PrincipalEntry::lookup_key(&entry.principal, &entry.realm);
        self.entries.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the directory from the password records.
    ///
    /// The user's long-term keys are derived from the password for every etype in `encryption_types`.
    pub fn from_domain_users(
        realm: &str,
        users: &[DomainUser],
        cipher: &dyn CipherService,
        encryption_types: &[EncryptionType],
    ) -> Result<Self, DirectoryError> {
        let mut directory = Self::new();

        for user in users {
            let name = match user.username.split_once('@') {
                Some((name, _domain)) => name,
                None => user.username.as_str(),
            };
            if name.is_empty() {
                return Err(DirectoryError::InvalidUserName(user.username.clone()));
            }

            let mut entry = PrincipalEntry::new(PrincipalName::principal(name), realm).with_salt(user.salt.as_str());
            for etype in encryption_types {
                entry = entry.with_key(cipher.string_to_key(
                    *etype,
                    user.password.as_bytes(),
                    user.salt.as_bytes(),
                )?);
            }

            debug!(username = %user.username, "Domain user added to the directory");

            directory.insert(entry);
        }

        Ok(directory)
    }
}

impl PrincipalDirectory for InMemoryDirectory {
    fn lookup(&self, principal: &PrincipalName, realm: &str) -> Result<Option<PrincipalEntry>, DirectoryError> {
        Ok(self
            .entries
            .get(&PrincipalEntry::lookup_key(principal, realm))
            .cloned())
    }
}
