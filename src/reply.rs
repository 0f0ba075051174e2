use picky_krb::constants::key_usages::AS_REP_ENC;
use tracing::instrument;

use crate::codec::encode_etype_info2;
use crate::crypto::{seal, CipherService, EncryptionKey, EncryptionType};
use crate::error::KdcError;
use crate::flags::TicketFlags;
use crate::messages::{AuthenticationReply, EncAsRepPart, KdcRequest, LastReqEntry, PaData};
use crate::principal::{PrincipalEntry, PrincipalName};
use crate::ticket::IssuedTicket;

/// [LastReq](https://www.rfc-editor.org/rfc/rfc4120#section-5.4.2) type of the last initial request
/// times, regardless of the server the tickets were issued for.
pub const LR_TYPE_LAST_INITIAL_REQUEST: i32 = 0;

#[derive(Debug)]
pub struct ReplyParams<'a> {
    pub request: &'a KdcRequest,
    pub issued: IssuedTicket,
    pub crealm: &'a str,
    pub cname: &'a PrincipalName,
    pub client: &'a PrincipalEntry,
    pub client_key: &'a EncryptionKey,
    pub etype: EncryptionType,
    pub cipher: &'a dyn CipherService,
}

/// Assembles the AS_REP and seals its encrypted part under the client key.
#[instrument(level = "debug", skip_all)]
pub fn build_reply(params: ReplyParams<'_>) -> Result<AuthenticationReply, KdcError> {
    let ReplyParams {
        request,
        issued,
        crealm,
        cname,
        client,
        client_key,
        etype,
        cipher,
    } = params;
    let IssuedTicket { ticket, enc_part } = issued;

    let last_req = client
        .last_successful_auth
        .map(|lr_value| LastReqEntry {
            lr_type: LR_TYPE_LAST_INITIAL_REQUEST,
            lr_value,
        })
        .into_iter()
        .collect();

    let reply_part = EncAsRepPart {
        key: enc_part.key,
        last_req,
        nonce: request.nonce,
        key_expiration: client.expiration,
        flags: enc_part.flags,
        auth_time: enc_part.auth_time,
        start_time: enc_part.start_time,
        end_time: enc_part.end_time,
        renew_till: enc_part
            .renew_till
            .filter(|_| enc_part.flags.contains(TicketFlags::RENEWABLE)),
        srealm: ticket.realm.clone(),
        sname: ticket.sname.clone(),
        caddr: enc_part.caddr,
    };

    let sealed = seal(cipher, client_key, &reply_part, AS_REP_ENC)
        .map_err(|err| KdcError::Internal(format!("AS_REP encryption failed: {err}")))?;

    let etype_info2 = encode_etype_info2(&[etype], client.salt.as_deref())
        .map_err(|err| KdcError::Internal(format!("PA-ETYPE-INFO2 encoding failed: {err}")))?;

    Ok(AuthenticationReply {
        padata: vec![PaData::new(PaData::ETYPE_INFO2, etype_info2)],
        crealm: crealm.to_owned(),
        cname: cname.clone(),
        ticket,
        enc_part: sealed,
        reply_part,
    })
}
