use std::collections::HashMap;
use std::fmt;

use picky_krb::constants::types::{NT_ENTERPRISE, NT_PRINCIPAL, NT_SRV_INST};
use time::OffsetDateTime;

use crate::crypto::{EncryptionKey, EncryptionType};
use crate::TGT_SERVICE_NAME;

/// Kerberos principal name.
///
/// [PrincipalName](https://www.rfc-editor.org/rfc/rfc4120#section-5.2.2):
/// ```not_rust
/// PrincipalName   ::= SEQUENCE {
///         name-type       [0] Int32,
///         name-string     [1] SEQUENCE OF KerberosString
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrincipalName {
    pub name_type: u8,
    pub name_string: Vec<String>,
}

impl PrincipalName {
    pub fn new(name_type: u8, name_string: Vec<String>) -> Self {
        Self { name_type, name_string }
    }

    /// `NT-PRINCIPAL` name of a user (e.g. `pw13`).
    pub fn principal(name: impl Into<String>) -> Self {
        Self::new(NT_PRINCIPAL, vec![name.into()])
    }

    /// `NT-SRV-INST` name of a service (e.g. `HTTP/www.example.com`).
    pub fn service(service: impl Into<String>, instance: impl Into<String>) -> Self {
        Self::new(NT_SRV_INST, vec![service.into(), instance.into()])
    }

    /// Name of the ticket-granting service for the given realm: `krbtgt/REALM`.
    pub fn krbtgt(realm: impl Into<String>) -> Self {
        Self::service(TGT_SERVICE_NAME, realm)
    }

    pub fn is_enterprise(&self) -> bool {
        self.name_type == NT_ENTERPRISE
    }
}

impl fmt::Display for PrincipalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name_string.join("/"))
    }
}

/// One-time-password (hardware token) method configured for a principal.
///
/// Principals carrying a method are pre-authenticated by the OTP subsystem
/// instead of the encrypted timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OtpMethod {
    Enigma,
    DigiPath,
    SKeyK0,
    SKey,
    SecurId,
    CryptoCard,
}

/// Directory record for a client or server principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalEntry {
    pub principal: PrincipalName,
    pub realm: String,
    /// Long-term keys of the principal.
    pub keys: HashMap<EncryptionType, EncryptionKey>,
    pub disabled: bool,
    pub locked_out: bool,
    /// Account expiration time. `None` means the account never expires.
    pub expiration: Option<OffsetDateTime>,
    pub otp_method: Option<OtpMethod>,
    /// Salt used for the password-to-key derivation.
    ///
    /// Usually, it is equal to `{REALM}{username}` (e.g. "EXAMPLE.COMpw13").
    pub salt: Option<String>,
    pub last_successful_auth: Option<OffsetDateTime>,
}

impl PrincipalEntry {
    pub fn new(principal: PrincipalName, realm: impl Into<String>) -> Self {
        Self {
            principal,
            realm: realm.into(),
            keys: HashMap::new(),
            disabled: false,
            locked_out: false,
            expiration: None,
            otp_method: None,
            salt: None,
            last_successful_auth: None,
        }
    }

    pub fn with_key(mut self, key: EncryptionKey) -> Self {
        self.keys.insert(key.etype, key);
        self
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn with_otp_method(mut self, otp_method: OtpMethod) -> Self {
        self.otp_method = Some(otp_method);
        self
    }

    pub fn key(&self, etype: EncryptionType) -> Option<&EncryptionKey> {
        self.keys.get(&etype)
    }

    /// Directory key of the principal: `name@realm`, lowercased.
    ///
    /// Separators inside components are escaped, so `["krbtgt/EXAMPLE.COM"]` and `["krbtgt", "EXAMPLE.COM"]`
    /// have different keys. An enterprise name already carries the realm inside its single component.
    pub fn lookup_key(principal: &PrincipalName, realm: &str) -> String {
        let enterprise = principal.is_enterprise();
        let name = principal
            .name_string
            .iter()
            .map(|component| escape_component(component, enterprise))
            .collect::<Vec<_>>()
            .join("/");

        if enterprise {
            name.to_ascii_lowercase()
        } else {
            format!("{name}@{realm}").to_ascii_lowercase()
        }
    }
}

fn escape_component(component: &str, keep_at: bool) -> String {
    let mut escaped = String::with_capacity(component.len());
    for c in component.chars() {
        if c == '\\' || c == '/' || (c == '@' && !keep_at) {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}
