//! Authentication Service (AS exchange) of a Kerberos Key Distribution Center.
//!
//! [AuthenticationService] turns an AS_REQ into a sealed AS_REP:
//! etype negotiation, client lookup and policy checks, pre-authentication,
//! ticket issuance and reply sealing. Every failure is reported as a [KdcError]
//! that can be converted into a KRB-ERROR message.

pub mod as_exchange;
pub mod clock;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod flags;
pub mod messages;
pub mod policy;
pub mod preauth;
pub mod principal;
pub mod replay;
pub mod reply;
pub mod secret;
pub mod ticket;

use picky_asn1::wrapper::{ExplicitContextTag0, OctetStringAsn1};
use picky_asn1_der::Asn1DerError;
use picky_krb::messages::{AsReq, KdcProxyMessage};
use tracing::{instrument, warn};

pub use crate::as_exchange::{AuthContext, AuthenticationService};
use crate::codec::{CodecError, Encode};
pub use crate::config::{DomainUser, KdcConfig};
pub use crate::error::{KdcError, PreAuthHint};
use crate::messages::KdcRequest;

/// Kerberos versions.
///
/// [5.4.1. KRB_KDC_REQ Definition](https://www.rfc-editor.org/rfc/rfc4120#section-5.4.1):
/// ```not_rust
/// pvno            [1] INTEGER (5) ,
/// ```
pub const KERBEROS_VERSION: u8 = 0x05;
/// Name of the ticket-granting service.
///
/// [Name of the TGS](https://www.rfc-editor.org/rfc/rfc4120#section-7.3):
/// > The principal identifier of the ticket-granting service shall be composed of three parts:
/// > the realm of the KDC issuing the TGS ticket, and a two-part name of type NT-SRV-INST,
/// > with the first part "krbtgt" and the second part the name of the realm that will accept the TGT.
pub const TGT_SERVICE_NAME: &str = "krbtgt";

/// Handles the DER-encoded AS_REQ.
///
/// Returns the DER-encoded AS_REP or KRB-ERROR. Input that is not an AS_REQ is answered with a generic KRB-ERROR.
/// The only way this function can fail is when it fails to encode the reply itself.
#[instrument(level = "debug", skip_all, fields(len = raw_as_req.len()))]
pub fn handle_raw_as_req(service: &AuthenticationService, raw_as_req: &[u8]) -> Result<Vec<u8>, CodecError> {
    let realm = service.config().realm.as_str();
    let now = service.now();

    let Ok(as_req) = picky_asn1_der::from_bytes::<AsReq>(raw_as_req) else {
        warn!("Input message is not a valid AS_REQ");

        return Ok(picky_asn1_der::to_vec(&KdcError::invalid_raw_krb_message_error(realm, now)?)?);
    };

    let request = match KdcRequest::try_from(&as_req) {
        Ok(request) => request,
        Err(err @ CodecError::UnexpectedMessageType { .. }) => {
            let kdc_err = KdcError::BadMessageType(err);
            warn!(%kdc_err, "Invalid AS_REQ message type");

            return Ok(picky_asn1_der::to_vec(&kdc_err.into_krb_error(None, realm, now)?)?);
        }
        Err(err) => {
            warn!(%err, "Malformed AS_REQ");

            return Ok(picky_asn1_der::to_vec(&KdcError::invalid_raw_krb_message_error(realm, now)?)?);
        }
    };

    match service.handle_as_req(&request) {
        Ok(reply) => reply.encode(),
        Err(kdc_err) => Ok(picky_asn1_der::to_vec(&kdc_err.into_krb_error(Some(&request), realm, now)?)?),
    }
}

/// Handles [KdcProxyMessage] by acting as the KDC.
///
/// The `kerb-message` of [MS-KKDCP](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-kkdcp/)
/// carries the Kerberos message prefixed with its 4-byte big-endian length. Only AS_REQ is processed:
/// any other Kerberos message is answered with a generic KRB-ERROR.
pub fn handle_kdc_proxy_message(
    msg: KdcProxyMessage,
    service: &AuthenticationService,
) -> Result<KdcProxyMessage, CodecError> {
    let KdcProxyMessage {
        kerb_message,
        target_domain,
        dclocator_hint,
    } = msg;
    let raw_krb_message = kerb_message
        .0
        .0
        .as_slice()
        .get(4..)
        .ok_or(CodecError::Asn1(Asn1DerError::TruncatedData))?;

    let reply_message = handle_raw_as_req(service, raw_krb_message)?;

    let len = reply_message.len();
    let len = u32::try_from(len).map_err(|_| CodecError::MessageTooLarge(len))?;
    let mut kerb_message = Vec::with_capacity(reply_message.len() + 4);
    kerb_message.extend_from_slice(&len.to_be_bytes());
    kerb_message.extend_from_slice(&reply_message);

    Ok(KdcProxyMessage {
        kerb_message: ExplicitContextTag0::from(OctetStringAsn1::from(kerb_message)),
        target_domain,
        dclocator_hint,
    })
}
