use std::borrow::Cow;

use picky_krb::constants::error_codes::{
    KDC_ERR_C_PRINCIPAL_UNKNOWN, KDC_ERR_CANNOT_POSTDATE, KDC_ERR_ETYPE_NOSUPP, KDC_ERR_NEVER_VALID,
    KDC_ERR_PREAUTH_FAILED, KDC_ERR_PREAUTH_REQUIRED, KDC_ERR_S_PRINCIPAL_UNKNOWN, KDC_ERR_WRONG_REALM,
    KRB_AP_ERR_MSG_TYPE, KRB_ERR_GENERIC,
};
use picky_krb::messages::KrbError;
use thiserror::Error;
use time::OffsetDateTime;

use crate::codec::{self, CodecError, KrbErrorParams};
use crate::crypto::EncryptionType;
use crate::flags::KdcOptions;
use crate::messages::{KdcRequest, PaData};
use crate::principal::PrincipalName;

/// Policy and key [error codes](https://www.rfc-editor.org/rfc/rfc4120#section-7.5.9) reported by the Authentication Service.
pub mod error_codes {
    pub const KDC_ERR_BAD_PVNO: u32 = 3;
    pub const KDC_ERR_NULL_KEY: u32 = 9;
    pub const KDC_ERR_POLICY: u32 = 12;
    pub const KDC_ERR_BADOPTION: u32 = 13;
    pub const KDC_ERR_CLIENT_REVOKED: u32 = 18;
    pub const KRB_AP_ERR_BAD_INTEGRITY: u32 = 31;
}

use self::error_codes::{
    KDC_ERR_BADOPTION, KDC_ERR_BAD_PVNO, KDC_ERR_CLIENT_REVOKED, KDC_ERR_NULL_KEY, KDC_ERR_POLICY,
    KRB_AP_ERR_BAD_INTEGRITY,
};

/// Data the client needs to retry the request with pre-authentication.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreAuthHint {
    /// Encryption types supported by the realm.
    pub encryption_types: Vec<EncryptionType>,
    /// Salt of the client long-term key, when the client is known.
    pub salt: Option<String>,
}

impl PreAuthHint {
    /// Encodes the hint as `METHOD-DATA`: an empty `PA-ENC-TIMESTAMP` and the `PA-ETYPE-INFO2`.
    pub fn method_data(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode_method_data(&[
            PaData::new(
                PaData::ETYPE_INFO2,
                codec::encode_etype_info2(&self.encryption_types, self.salt.as_deref())?,
            ),
            PaData::new(PaData::ENC_TIMESTAMP, Vec::new()),
        ])
    }
}

#[derive(Error, Debug)]
pub enum KdcError {
    #[error("KDC_ERR_BAD_PVNO: got invalid Kerberos version ({version}): expected [{expected}]")]
    BadProtocolVersion { version: u32, expected: u8 },

    #[error("KRB_AP_ERR_MSG_TYPE: {0}")]
    BadMessageType(CodecError),

    #[error("KDC_ERR_WRONG_REALM: wrong realm: {0}")]
    WrongRealm(String),

    #[error("KDC_ERR_ETYPE_NOSUPP: none of the requested etypes ({0:?}) is supported by the realm")]
    UnsupportedEncryptionType(Vec<usize>),

    #[error("KDC_ERR_C_PRINCIPAL_UNKNOWN: {0}")]
    UnknownClientPrincipal(String),

    #[error("KDC_ERR_S_PRINCIPAL_UNKNOWN: {0}")]
    UnknownServerPrincipal(String),

    #[error("KDC_ERR_NULL_KEY: {0}")]
    NullKey(String),

    #[error("KDC_ERR_CLIENT_REVOKED: {0}")]
    ClientRevoked(&'static str),

    #[error("KDC_ERR_PREAUTH_REQUIRED: additional pre-authentication required")]
    PreAuthRequired(PreAuthHint),

    #[error("KDC_ERR_PREAUTH_FAILED: {0}")]
    PreAuthFailed(&'static str),

    #[error("KRB_AP_ERR_BAD_INTEGRITY: {0}")]
    BadIntegrity(String),

    #[error("KDC_ERR_POLICY: {0}")]
    PolicyViolation(&'static str),

    #[error("KDC_ERR_BADOPTION: {0:?} options are not allowed in AS_REQ")]
    BadOption(KdcOptions),

    #[error("KDC_ERR_CANNOT_POSTDATE: {0}")]
    CannotPostdate(&'static str),

    #[error("KDC_ERR_NEVER_VALID: {0}")]
    NeverValid(String),

    #[error("KRB_ERR_GENERIC: internal error: {0}")]
    Internal(String),
}

impl KdcError {
    /// [Error codes](https://www.rfc-editor.org/rfc/rfc4120#section-7.5.9) of the KRB-ERROR message.
    pub fn error_code(&self) -> u32 {
        match self {
            KdcError::BadProtocolVersion { .. } => KDC_ERR_BAD_PVNO,
            KdcError::BadMessageType(_) => KRB_AP_ERR_MSG_TYPE,
            KdcError::WrongRealm(_) => KDC_ERR_WRONG_REALM,
            KdcError::UnsupportedEncryptionType(_) => KDC_ERR_ETYPE_NOSUPP,
            KdcError::UnknownClientPrincipal(_) => KDC_ERR_C_PRINCIPAL_UNKNOWN,
            KdcError::UnknownServerPrincipal(_) => KDC_ERR_S_PRINCIPAL_UNKNOWN,
            KdcError::NullKey(_) => KDC_ERR_NULL_KEY,
            KdcError::ClientRevoked(_) => KDC_ERR_CLIENT_REVOKED,
            KdcError::PreAuthRequired(_) => KDC_ERR_PREAUTH_REQUIRED,
            KdcError::PreAuthFailed(_) => KDC_ERR_PREAUTH_FAILED,
            KdcError::BadIntegrity(_) => KRB_AP_ERR_BAD_INTEGRITY,
            KdcError::PolicyViolation(_) => KDC_ERR_POLICY,
            KdcError::BadOption(_) => KDC_ERR_BADOPTION,
            KdcError::CannotPostdate(_) => KDC_ERR_CANNOT_POSTDATE,
            KdcError::NeverValid(_) => KDC_ERR_NEVER_VALID,
            KdcError::Internal(_) => KRB_ERR_GENERIC,
        }
    }

    /// Text of the KRB-ERROR `e-text` field.
    ///
    /// Errors carrying internal details (directory backends, ciphers, decoding) are reduced to
    /// the RFC error description. The details are only reported in the logs.
    pub fn e_text(&self) -> Cow<'static, str> {
        match self {
            KdcError::BadMessageType(_) => Cow::Borrowed("KRB_AP_ERR_MSG_TYPE: invalid message type"),
            KdcError::UnknownClientPrincipal(_) => {
                Cow::Borrowed("KDC_ERR_C_PRINCIPAL_UNKNOWN: client not found in Kerberos database")
            }
            KdcError::UnknownServerPrincipal(_) => {
                Cow::Borrowed("KDC_ERR_S_PRINCIPAL_UNKNOWN: server not found in Kerberos database")
            }
            KdcError::NullKey(_) => Cow::Borrowed("KDC_ERR_NULL_KEY: the client or server has a null key"),
            KdcError::BadIntegrity(_) => {
                Cow::Borrowed("KRB_AP_ERR_BAD_INTEGRITY: integrity check on decrypted field failed")
            }
            KdcError::Internal(_) => Cow::Borrowed("KRB_ERR_GENERIC: generic error"),
            _ => Cow::Owned(self.to_string()),
        }
    }

    /// Converts the error into the KRB-ERROR message sent back to the client.
    ///
    /// `request` is the request that failed, if it was decoded far enough to know its client and service.
    pub fn into_krb_error(
        self,
        request: Option<&KdcRequest>,
        kdc_realm: &str,
        now: OffsetDateTime,
    ) -> Result<KrbError, CodecError> {
        let e_data = match &self {
            KdcError::PreAuthRequired(hint) => Some(hint.method_data()?),
            _ => None,
        };
        let e_text = self.e_text();

        let krbtgt = PrincipalName::krbtgt(kdc_realm);
        let sname = request.and_then(|request| request.sname.as_ref()).unwrap_or(&krbtgt);
        let cname = request.and_then(|request| request.cname.as_ref());

        codec::krb_error(KrbErrorParams {
            error_code: self.error_code(),
            now,
            realm: kdc_realm,
            sname,
            crealm: cname.map(|_| kdc_realm),
            cname,
            e_text: Some(e_text.as_ref()),
            e_data,
        })
    }

    /// KRB-ERROR for messages that could not be decoded as AS_REQ at all.
    pub fn invalid_raw_krb_message_error(kdc_realm: &str, now: OffsetDateTime) -> Result<KrbError, CodecError> {
        codec::krb_error(KrbErrorParams {
            error_code: KRB_ERR_GENERIC,
            now,
            realm: kdc_realm,
            sname: &PrincipalName::krbtgt(kdc_realm),
            crealm: None,
            cname: None,
            e_text: Some("input message is not a valid AS_REQ"),
            e_data: None,
        })
    }
}
