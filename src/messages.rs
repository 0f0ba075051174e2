//! Kerberos structures of the Authentication Service exchange.
//!
//! These are decoded (or about to be encoded) forms of the RFC 4120 messages.
//! The DER representation lives in [crate::codec].

use picky_krb::constants::types::{PA_ENC_TIMESTAMP, PA_ETYPE_INFO2_TYPE};
use time::OffsetDateTime;

use crate::crypto::EncryptionKey;
use crate::flags::{KdcOptions, TicketFlags};
use crate::principal::PrincipalName;

/// [PA-DATA](https://www.rfc-editor.org/rfc/rfc4120#section-5.2.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaData {
    pub padata_type: u32,
    pub value: Vec<u8>,
}

impl PaData {
    /// `PA-ENC-TIMESTAMP`: encrypted `PA-ENC-TS-ENC`.
    pub const ENC_TIMESTAMP: u32 = PA_ENC_TIMESTAMP[0] as u32;
    /// `PA-ETYPE-INFO2`: supported etypes along with the key derivation salt.
    pub const ETYPE_INFO2: u32 = PA_ETYPE_INFO2_TYPE[0] as u32;

    pub fn new(padata_type: u32, value: Vec<u8>) -> Self {
        Self { padata_type, value }
    }
}

/// [HostAddress](https://www.rfc-editor.org/rfc/rfc4120#section-5.2.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    pub addr_type: i32,
    pub address: Vec<u8>,
}

/// [EncryptedData](https://www.rfc-editor.org/rfc/rfc4120#section-5.2.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    /// Raw etype number. It may name an etype this KDC does not implement.
    pub etype: usize,
    pub kvno: Option<u32>,
    pub cipher: Vec<u8>,
}

/// Decrypted value of the `PA-ENC-TIMESTAMP` pre-authentication data.
///
/// [PA-ENC-TS-ENC](https://www.rfc-editor.org/rfc/rfc4120#section-5.2.7.2):
/// ```not_rust
/// PA-ENC-TS-ENC           ::= SEQUENCE {
///         patimestamp     [0] KerberosTime -- client's time --,
///         pausec          [1] Microseconds OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreAuthTimestamp {
    pub timestamp: OffsetDateTime,
    pub usec: Option<u32>,
}

/// Parsed AS_REQ.
///
/// [KRB_KDC_REQ Definition](https://www.rfc-editor.org/rfc/rfc4120#section-5.4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcRequest {
    pub pvno: u32,
    pub padata: Vec<PaData>,
    pub kdc_options: KdcOptions,
    pub cname: Option<PrincipalName>,
    pub realm: String,
    pub sname: Option<PrincipalName>,
    pub from: Option<OffsetDateTime>,
    /// Requested end time. `None` is the "19700101000000Z" sentinel: the maximum lifetime permitted by policy.
    pub till: Option<OffsetDateTime>,
    pub rtime: Option<OffsetDateTime>,
    pub nonce: u32,
    /// Requested etypes in the client preference order.
    pub etypes: Vec<usize>,
    pub addresses: Option<Vec<HostAddress>>,
}

/// [TransitedEncoding](https://www.rfc-editor.org/rfc/rfc4120#section-5.3).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransitedEncoding {
    pub tr_type: i32,
    pub contents: Vec<u8>,
}

impl TransitedEncoding {
    /// `DOMAIN-X500-COMPRESS` encoding.
    pub const DOMAIN_X500_COMPRESS: i32 = 1;

    /// Transited field of a ticket issued directly by the client's realm: no realm has been transited.
    pub fn empty() -> Self {
        Self {
            tr_type: Self::DOMAIN_X500_COMPRESS,
            contents: Vec::new(),
        }
    }
}

/// [EncTicketPart](https://www.rfc-editor.org/rfc/rfc4120#section-5.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncTicketPart {
    pub flags: TicketFlags,
    pub key: EncryptionKey,
    pub crealm: String,
    pub cname: PrincipalName,
    pub transited: TransitedEncoding,
    pub auth_time: OffsetDateTime,
    pub start_time: Option<OffsetDateTime>,
    pub end_time: OffsetDateTime,
    pub renew_till: Option<OffsetDateTime>,
    pub caddr: Option<Vec<HostAddress>>,
}

/// [Ticket](https://www.rfc-editor.org/rfc/rfc4120#section-5.3).
///
/// The [EncTicketPart] is only ever stored sealed under the service key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub realm: String,
    pub sname: PrincipalName,
    pub enc_part: EncryptedData,
}

/// [LastReq](https://www.rfc-editor.org/rfc/rfc4120#section-5.4.2) entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastReqEntry {
    pub lr_type: i32,
    pub lr_value: OffsetDateTime,
}

/// [EncASRepPart](https://www.rfc-editor.org/rfc/rfc4120#section-5.4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncAsRepPart {
    pub key: EncryptionKey,
    pub last_req: Vec<LastReqEntry>,
    pub nonce: u32,
    pub key_expiration: Option<OffsetDateTime>,
    pub flags: TicketFlags,
    pub auth_time: OffsetDateTime,
    pub start_time: Option<OffsetDateTime>,
    pub end_time: OffsetDateTime,
    pub renew_till: Option<OffsetDateTime>,
    pub srealm: String,
    pub sname: PrincipalName,
    pub caddr: Option<Vec<HostAddress>>,
}

/// Sealed AS_REP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationReply {
    pub padata: Vec<PaData>,
    pub crealm: String,
    pub cname: PrincipalName,
    pub ticket: Ticket,
    /// [EncAsRepPart] sealed under the client key.
    pub enc_part: EncryptedData,
    /// Plaintext of `enc_part`. Kept for the caller and never encoded.
    pub reply_part: EncAsRepPart,
}
