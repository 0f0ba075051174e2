//! DER representation of the AS exchange structures.
//!
//! The ASN.1 grammar itself is implemented by `picky-krb`. This module only maps the
//! [crate::messages] structures to and from their `picky-krb` counterparts.

use picky_asn1::bit_string::BitString;
use picky_asn1::date::GeneralizedTime;
use picky_asn1::restricted_string::IA5String;
use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3,
    ExplicitContextTag4, ExplicitContextTag5, ExplicitContextTag6, ExplicitContextTag7, ExplicitContextTag8,
    ExplicitContextTag9, ExplicitContextTag10, ExplicitContextTag11, ExplicitContextTag12, IntegerAsn1,
    OctetStringAsn1, Optional,
};
use picky_asn1_der::application_tag::ApplicationTag;
use picky_asn1_der::Asn1DerError;
use picky_krb::constants::types::{AS_REP_MSG_TYPE, AS_REQ_MSG_TYPE, ENC_AS_REP_PART_TYPE, KRB_ERROR_MSG_TYPE};
use picky_krb::data_types as krb;
use picky_krb::messages::{AsRep, AsReq, EncKdcRepPart, KdcRep, KdcReq, KdcReqBody, KrbError, KrbErrorInner};
use thiserror::Error;
use time::OffsetDateTime;

use crate::crypto::{EncryptionKey, EncryptionType};
use crate::flags::{KdcOptions, TicketFlags};
use crate::messages::{
    AuthenticationReply, EncAsRepPart, EncTicketPart, EncryptedData, HostAddress, KdcRequest, LastReqEntry, PaData,
    PreAuthTimestamp, Ticket, TransitedEncoding,
};
use crate::principal::PrincipalName;
use crate::KERBEROS_VERSION;

/// [Microseconds](https://www.rfc-editor.org/rfc/rfc4120#section-5.2.4):
/// ```not_rust
/// Microseconds    ::= INTEGER (0..999999)
/// ```
pub const MAX_MICROSECONDS: u32 = 999_999;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("ASN1 DER encoding failed: {0:?}")]
    Asn1(#[from] Asn1DerError),

    #[error("got invalid Kerberos message type ({msg_type:?}): expected [{expected}]")]
    UnexpectedMessageType { msg_type: Vec<u8>, expected: u8 },

    #[error("{0} is not a valid INTEGER value")]
    InvalidInteger(&'static str),

    #[error("{0} is not a valid KerberosTime value")]
    InvalidTime(&'static str),

    #[error("{0} is not a valid KerberosString")]
    InvalidString(&'static str),

    #[error("unsupported encryption key type: {0}")]
    UnsupportedKeyType(usize),

    #[error("message is too large: {0} bytes")]
    MessageTooLarge(usize),
}

/// Structure that can be serialized into its DER representation.
pub trait Encode {
    fn encode(&self) -> Result<Vec<u8>, CodecError>;
}

/// Structure that can be parsed from its DER representation.
pub trait Decode: Sized {
    fn decode(raw: &[u8]) -> Result<Self, CodecError>;
}

fn integer_to_i64(integer: &IntegerAsn1, field: &'static str) -> Result<i64, CodecError> {
    let bytes = integer.0.as_slice();
    let Some(first) = bytes.first() else {
        return Ok(0);
    };

    let padding = if first & 0x80 != 0 { 0xff } else { 0x00 };
    let significant = bytes
        .iter()
        .position(|byte| *byte != padding)
        .map(|position| &bytes[position..])
        .unwrap_or_default();
    if significant.len() > 8 {
        return Err(CodecError::InvalidInteger(field));
    }

    // Sign-extension: start from all ones for negative numbers.
    let mut value = if padding == 0xff { -1_i64 } else { 0 };
    for byte in significant {
        value = (value << 8) | i64::from(*byte);
    }

    Ok(value)
}

fn integer_to_u32(integer: &IntegerAsn1, field: &'static str) -> Result<u32, CodecError> {
    u32::try_from(integer_to_i64(integer, field)?).map_err(|_| CodecError::InvalidInteger(field))
}

/// Reads a `nonce` field.
///
/// Clients commonly put four raw random bytes on the wire, which DER reads as a negative
/// number whenever the high bit is set. The low 32 bits of the two's complement value are kept.
fn nonce_from_asn1(integer: &IntegerAsn1) -> Result<u32, CodecError> {
    let value = integer_to_i64(integer, "nonce")?;
    if !(i64::from(i32::MIN)..=i64::from(u32::MAX)).contains(&value) {
        return Err(CodecError::InvalidInteger("nonce"));
    }

    Ok(value as u32)
}

fn integer_from_i64(value: i64) -> IntegerAsn1 {
    let bytes = value.to_be_bytes();
    // Minimal two's complement encoding: drop leading bytes that only repeat the sign bit.
    let start = (0..bytes.len() - 1)
        .find(|&i| {
            !((bytes[i] == 0x00 && bytes[i + 1] & 0x80 == 0) || (bytes[i] == 0xff && bytes[i + 1] & 0x80 != 0))
        })
        .unwrap_or(bytes.len() - 1);

    IntegerAsn1::from(bytes[start..].to_vec())
}

fn integer_from_u32(value: u32) -> IntegerAsn1 {
    integer_from_i64(i64::from(value))
}

fn kerberos_string(value: &str, field: &'static str) -> Result<krb::KerberosStringAsn1, CodecError> {
    Ok(krb::KerberosStringAsn1::from(
        IA5String::from_string(value.to_owned()).map_err(|_| CodecError::InvalidString(field))?,
    ))
}

fn realm_to_asn1(realm: &str) -> Result<krb::Realm, CodecError> {
    Ok(krb::Realm::from(
        IA5String::from_string(realm.to_owned()).map_err(|_| CodecError::InvalidString("realm"))?,
    ))
}

fn kerberos_time(time: OffsetDateTime) -> krb::KerberosTime {
    krb::KerberosTime::from(GeneralizedTime::from(time))
}

fn time_from_asn1(time: &krb::KerberosTime, field: &'static str) -> Result<OffsetDateTime, CodecError> {
    OffsetDateTime::try_from(time.0.clone()).map_err(|_| CodecError::InvalidTime(field))
}

/// `19700101000000Z` is the "unspecified" value of the `till` and `rtime` KDC-REQ fields.
fn optional_time_from_asn1(time: &krb::KerberosTime, field: &'static str) -> Result<Option<OffsetDateTime>, CodecError> {
    let time = time_from_asn1(time, field)?;

    Ok((time != OffsetDateTime::UNIX_EPOCH).then_some(time))
}

fn flags_to_asn1(bits: u32) -> krb::KerberosFlags {
    krb::KerberosFlags::from(BitString::with_bytes(bits.to_be_bytes().to_vec()))
}

fn flags_from_asn1(flags: &krb::KerberosFlags) -> u32 {
    // The first byte of the raw BIT STRING is the number of unused bits.
    let payload = flags.0.as_bytes().get(1..).unwrap_or_default();

    let mut raw = [0; 4];
    for (dst, src) in raw.iter_mut().zip(payload) {
        *dst = *src;
    }

    u32::from_be_bytes(raw)
}

fn principal_name_to_asn1(name: &PrincipalName) -> Result<krb::PrincipalName, CodecError> {
    let name_string = name
        .name_string
        .iter()
        .map(|component| kerberos_string(component, "principal name"))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(krb::PrincipalName {
        name_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![name.name_type])),
        name_string: ExplicitContextTag1::from(Asn1SequenceOf::from(name_string)),
    })
}

fn principal_name_from_asn1(name: &krb::PrincipalName) -> Result<PrincipalName, CodecError> {
    let name_type = u8::try_from(integer_to_i64(&name.name_type.0, "name-type")?)
        .map_err(|_| CodecError::InvalidInteger("name-type"))?;

    Ok(PrincipalName::new(
        name_type,
        name.name_string.0.0.iter().map(|component| component.to_string()).collect(),
    ))
}

fn host_addresses_to_asn1(addresses: &[HostAddress]) -> Vec<krb::HostAddress> {
    addresses
        .iter()
        .map(|address| krb::HostAddress {
            addr_type: ExplicitContextTag0::from(integer_from_i64(i64::from(address.addr_type))),
            address: ExplicitContextTag1::from(OctetStringAsn1::from(address.address.clone())),
        })
        .collect()
}

fn host_addresses_from_asn1(addresses: &[krb::HostAddress]) -> Result<Vec<HostAddress>, CodecError> {
    addresses
        .iter()
        .map(|address| {
            Ok(HostAddress {
                addr_type: i32::try_from(integer_to_i64(&address.addr_type.0, "addr-type")?)
                    .map_err(|_| CodecError::InvalidInteger("addr-type"))?,
                address: address.address.0.0.clone(),
            })
        })
        .collect()
}

fn encryption_key_to_asn1(key: &EncryptionKey) -> krb::EncryptionKey {
    krb::EncryptionKey {
        key_type: ExplicitContextTag0::from(integer_from_i64(key.etype.etype() as i64)),
        key_value: ExplicitContextTag1::from(OctetStringAsn1::from(key.value.as_ref().clone())),
    }
}

fn encryption_key_from_asn1(key: &krb::EncryptionKey) -> Result<EncryptionKey, CodecError> {
    let key_type = usize::try_from(integer_to_i64(&key.key_type.0, "keytype")?)
        .map_err(|_| CodecError::InvalidInteger("keytype"))?;
    let etype = EncryptionType::from_etype(key_type).ok_or(CodecError::UnsupportedKeyType(key_type))?;

    Ok(EncryptionKey::new(etype, key.key_value.0.0.clone()))
}

fn encrypted_data_to_asn1(data: &EncryptedData) -> krb::EncryptedData {
    krb::EncryptedData {
        etype: ExplicitContextTag0::from(integer_from_i64(data.etype as i64)),
        kvno: Optional::from(
            data.kvno
                .map(|kvno| ExplicitContextTag1::from(integer_from_u32(kvno))),
        ),
        cipher: ExplicitContextTag2::from(OctetStringAsn1::from(data.cipher.clone())),
    }
}

fn encrypted_data_from_asn1(data: &krb::EncryptedData) -> Result<EncryptedData, CodecError> {
    Ok(EncryptedData {
        etype: usize::try_from(integer_to_i64(&data.etype.0, "etype")?)
            .map_err(|_| CodecError::InvalidInteger("etype"))?,
        kvno: data
            .kvno
            .0
            .as_ref()
            .map(|kvno| integer_to_u32(&kvno.0, "kvno"))
            .transpose()?,
        cipher: data.cipher.0.0.clone(),
    })
}

fn pa_data_to_asn1(pa_data: &PaData) -> krb::PaData {
    krb::PaData {
        padata_type: ExplicitContextTag1::from(integer_from_u32(pa_data.padata_type)),
        padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(pa_data.value.clone())),
    }
}

fn ticket_to_asn1(ticket: &Ticket) -> Result<krb::Ticket, CodecError> {
    Ok(krb::Ticket::from(krb::TicketInner {
        tkt_vno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        realm: ExplicitContextTag1::from(realm_to_asn1(&ticket.realm)?),
        sname: ExplicitContextTag2::from(principal_name_to_asn1(&ticket.sname)?),
        enc_part: ExplicitContextTag3::from(encrypted_data_to_asn1(&ticket.enc_part)),
    }))
}

impl Encode for EncryptedData {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(picky_asn1_der::to_vec(&encrypted_data_to_asn1(self))?)
    }
}

impl Decode for EncryptedData {
    fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        encrypted_data_from_asn1(&picky_asn1_der::from_bytes::<krb::EncryptedData>(raw)?)
    }
}

impl Encode for PreAuthTimestamp {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(picky_asn1_der::to_vec(&krb::PaEncTsEnc {
            patimestamp: ExplicitContextTag0::from(kerberos_time(self.timestamp)),
            pausec: Optional::from(
                self.usec
                    .map(|usec| ExplicitContextTag1::from(integer_from_u32(usec.min(MAX_MICROSECONDS)))),
            ),
        })?)
    }
}

impl Decode for PreAuthTimestamp {
    fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        let timestamp: krb::PaEncTsEnc = picky_asn1_der::from_bytes(raw)?;

        let usec = timestamp
            .pausec
            .0
            .as_ref()
            .map(|usec| integer_to_u32(&usec.0, "pausec"))
            .transpose()?;
        if usec.is_some_and(|usec| usec > MAX_MICROSECONDS) {
            return Err(CodecError::InvalidInteger("pausec"));
        }

        Ok(PreAuthTimestamp {
            timestamp: time_from_asn1(&timestamp.patimestamp.0, "patimestamp")?,
            usec,
        })
    }
}

impl Encode for EncTicketPart {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let enc_ticket_part = krb::EncTicketPart::from(krb::EncTicketPartInner {
            flags: ExplicitContextTag0::from(flags_to_asn1(self.flags.bits())),
            key: ExplicitContextTag1::from(encryption_key_to_asn1(&self.key)),
            crealm: ExplicitContextTag2::from(realm_to_asn1(&self.crealm)?),
            cname: ExplicitContextTag3::from(principal_name_to_asn1(&self.cname)?),
            transited: ExplicitContextTag4::from(krb::TransitedEncoding {
                tr_type: ExplicitContextTag0::from(integer_from_i64(i64::from(self.transited.tr_type))),
                contents: ExplicitContextTag1::from(OctetStringAsn1::from(self.transited.contents.clone())),
            }),
            auth_time: ExplicitContextTag5::from(kerberos_time(self.auth_time)),
            starttime: Optional::from(self.start_time.map(|time| ExplicitContextTag6::from(kerberos_time(time)))),
            endtime: ExplicitContextTag7::from(kerberos_time(self.end_time)),
            renew_till: Optional::from(self.renew_till.map(|time| ExplicitContextTag8::from(kerberos_time(time)))),
            caddr: Optional::from(
                self.caddr
                    .as_deref()
                    .map(|caddr| ExplicitContextTag9::from(Asn1SequenceOf::from(host_addresses_to_asn1(caddr)))),
            ),
            authorization_data: Optional::from(None),
        });

        Ok(picky_asn1_der::to_vec(&enc_ticket_part)?)
    }
}

impl Decode for EncTicketPart {
    fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        let enc_ticket_part: krb::EncTicketPart = picky_asn1_der::from_bytes(raw)?;
        let krb::EncTicketPartInner {
            flags,
            key,
            crealm,
            cname,
            transited,
            auth_time,
            starttime,
            endtime,
            renew_till,
            caddr,
            authorization_data: _,
        } = enc_ticket_part.0;

        Ok(EncTicketPart {
            flags: TicketFlags::from_bits_retain(flags_from_asn1(&flags.0)),
            key: encryption_key_from_asn1(&key.0)?,
            crealm: crealm.0.to_string(),
            cname: principal_name_from_asn1(&cname.0)?,
            transited: TransitedEncoding {
                tr_type: i32::try_from(integer_to_i64(&transited.0.tr_type.0, "tr-type")?)
                    .map_err(|_| CodecError::InvalidInteger("tr-type"))?,
                contents: transited.0.contents.0.0.clone(),
            },
            auth_time: time_from_asn1(&auth_time.0, "authtime")?,
            start_time: starttime
                .0
                .as_ref()
                .map(|time| time_from_asn1(&time.0, "starttime"))
                .transpose()?,
            end_time: time_from_asn1(&endtime.0, "endtime")?,
            renew_till: renew_till
                .0
                .as_ref()
                .map(|time| time_from_asn1(&time.0, "renew-till"))
                .transpose()?,
            caddr: caddr
                .0
                .as_ref()
                .map(|caddr| host_addresses_from_asn1(&caddr.0.0))
                .transpose()?,
        })
    }
}

impl Encode for Ticket {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(picky_asn1_der::to_vec(&ticket_to_asn1(self)?)?)
    }
}

impl Decode for Ticket {
    fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        let ticket: krb::Ticket = picky_asn1_der::from_bytes(raw)?;
        let krb::TicketInner {
            tkt_vno: _,
            realm,
            sname,
            enc_part,
        } = ticket.0;

        Ok(Ticket {
            realm: realm.0.to_string(),
            sname: principal_name_from_asn1(&sname.0)?,
            enc_part: encrypted_data_from_asn1(&enc_part.0)?,
        })
    }
}

impl Encode for EncAsRepPart {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let last_req = self
            .last_req
            .iter()
            .map(|entry| krb::LastReqInner {
                lr_type: ExplicitContextTag0::from(integer_from_i64(i64::from(entry.lr_type))),
                lr_value: ExplicitContextTag1::from(kerberos_time(entry.lr_value)),
            })
            .collect::<Vec<_>>();

        let enc_part = ApplicationTag::<_, ENC_AS_REP_PART_TYPE>::from(EncKdcRepPart {
            key: ExplicitContextTag0::from(encryption_key_to_asn1(&self.key)),
            last_req: ExplicitContextTag1::from(krb::LastReq::from(last_req)),
            // RFC (https://datatracker.ietf.org/doc/html/rfc4120#section-3.1):
            // > The encrypted part of the KRB_AS_REP message also contains the nonce
            // > that MUST be matched with the nonce from the KRB_AS_REQ message.
            nonce: ExplicitContextTag2::from(integer_from_u32(self.nonce)),
            key_expiration: Optional::from(
                self.key_expiration
                    .map(|time| ExplicitContextTag3::from(kerberos_time(time))),
            ),
            flags: ExplicitContextTag4::from(flags_to_asn1(self.flags.bits())),
            auth_time: ExplicitContextTag5::from(kerberos_time(self.auth_time)),
            start_time: Optional::from(self.start_time.map(|time| ExplicitContextTag6::from(kerberos_time(time)))),
            end_time: ExplicitContextTag7::from(kerberos_time(self.end_time)),
            renew_till: Optional::from(self.renew_till.map(|time| ExplicitContextTag8::from(kerberos_time(time)))),
            srealm: ExplicitContextTag9::from(realm_to_asn1(&self.srealm)?),
            sname: ExplicitContextTag10::from(principal_name_to_asn1(&self.sname)?),
            caadr: Optional::from(
                self.caddr
                    .as_deref()
                    .map(|caddr| ExplicitContextTag11::from(Asn1SequenceOf::from(host_addresses_to_asn1(caddr)))),
            ),
            encrypted_pa_data: Optional::from(None),
        });

        Ok(picky_asn1_der::to_vec(&enc_part)?)
    }
}

impl Decode for EncAsRepPart {
    fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        let enc_part: ApplicationTag<EncKdcRepPart, ENC_AS_REP_PART_TYPE> = picky_asn1_der::from_bytes(raw)?;
        let EncKdcRepPart {
            key,
            last_req,
            nonce,
            key_expiration,
            flags,
            auth_time,
            start_time,
            end_time,
            renew_till,
            srealm,
            sname,
            caadr: caddr,
            encrypted_pa_data: _,
        } = enc_part.0;

        let last_req = last_req
            .0
            .0
            .iter()
            .map(|entry| {
                Ok(LastReqEntry {
                    lr_type: i32::try_from(integer_to_i64(&entry.lr_type.0, "lr-type")?)
                        .map_err(|_| CodecError::InvalidInteger("lr-type"))?,
                    lr_value: time_from_asn1(&entry.lr_value.0, "lr-value")?,
                })
            })
            .collect::<Result<Vec<_>, CodecError>>()?;

        Ok(EncAsRepPart {
            key: encryption_key_from_asn1(&key.0)?,
            last_req,
            nonce: nonce_from_asn1(&nonce.0)?,
            key_expiration: key_expiration
                .0
                .as_ref()
                .map(|time| time_from_asn1(&time.0, "key-expiration"))
                .transpose()?,
            flags: TicketFlags::from_bits_retain(flags_from_asn1(&flags.0)),
            auth_time: time_from_asn1(&auth_time.0, "authtime")?,
            start_time: start_time
                .0
                .as_ref()
                .map(|time| time_from_asn1(&time.0, "starttime"))
                .transpose()?,
            end_time: time_from_asn1(&end_time.0, "endtime")?,
            renew_till: renew_till
                .0
                .as_ref()
                .map(|time| time_from_asn1(&time.0, "renew-till"))
                .transpose()?,
            srealm: srealm.0.to_string(),
            sname: principal_name_from_asn1(&sname.0)?,
            caddr: caddr
                .0
                .as_ref()
                .map(|caddr| host_addresses_from_asn1(&caddr.0.0))
                .transpose()?,
        })
    }
}

/// Encodes `ETYPE-INFO2` for the given etypes.
///
/// [PA-ETYPE-INFO2](https://www.rfc-editor.org/rfc/rfc4120#section-5.2.7.5).
pub fn encode_etype_info2(etypes: &[EncryptionType], salt: Option<&str>) -> Result<Vec<u8>, CodecError> {
    let salt = salt.map(|salt| kerberos_string(salt, "salt")).transpose()?;

    let entries = etypes
        .iter()
        .map(|etype| krb::EtypeInfo2Entry {
            etype: ExplicitContextTag0::from(integer_from_i64(etype.etype() as i64)),
            salt: Optional::from(salt.clone().map(ExplicitContextTag1::from)),
            s2kparams: Optional::from(None),
        })
        .collect::<Vec<_>>();

    Ok(picky_asn1_der::to_vec(&Asn1SequenceOf::from(entries))?)
}

/// Encodes `METHOD-DATA`: a sequence of `PA-DATA`.
///
/// Used as `e-data` of the KDC_ERR_PREAUTH_REQUIRED error.
pub fn encode_method_data(pa_datas: &[PaData]) -> Result<Vec<u8>, CodecError> {
    Ok(picky_asn1_der::to_vec(&Asn1SequenceOf::from(
        pa_datas.iter().map(pa_data_to_asn1).collect::<Vec<_>>(),
    ))?)
}

impl TryFrom<&AsReq> for KdcRequest {
    type Error = CodecError;

    fn try_from(as_req: &AsReq) -> Result<Self, Self::Error> {
        let KdcReq {
            pvno,
            msg_type,
            padata,
            req_body,
        } = &as_req.0;

        if msg_type.0.0 != [AS_REQ_MSG_TYPE] {
            return Err(CodecError::UnexpectedMessageType {
                msg_type: msg_type.0.0.clone(),
                expected: AS_REQ_MSG_TYPE,
            });
        }

        let KdcReqBody {
            kdc_options,
            cname,
            realm,
            sname,
            from,
            till,
            rtime,
            nonce,
            etype,
            addresses,
            enc_authorization_data: _,
            additional_tickets: _,
        } = &req_body.0;

        let padata = padata
            .0
            .as_ref()
            .map(|pa_datas| {
                pa_datas
                    .0
                    .0
                    .iter()
                    .map(|pa_data| {
                        Ok(PaData {
                            padata_type: integer_to_u32(&pa_data.padata_type.0, "padata-type")?,
                            value: pa_data.padata_data.0.0.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, CodecError>>()
            })
            .transpose()?
            .unwrap_or_default();

        // Negative etypes are reserved for local use and are never negotiated.
        let etypes = etype
            .0
            .0
            .iter()
            .filter_map(|etype| {
                integer_to_i64(etype, "etype")
                    .ok()
                    .and_then(|etype| usize::try_from(etype).ok())
            })
            .collect();

        Ok(KdcRequest {
            pvno: integer_to_u32(&pvno.0, "pvno")?,
            padata,
            kdc_options: KdcOptions::from_bits_retain(flags_from_asn1(&kdc_options.0)),
            cname: cname
                .0
                .as_ref()
                .map(|cname| principal_name_from_asn1(&cname.0))
                .transpose()?,
            realm: realm.0.to_string(),
            sname: sname
                .0
                .as_ref()
                .map(|sname| principal_name_from_asn1(&sname.0))
                .transpose()?,
            from: from
                .0
                .as_ref()
                .map(|from| time_from_asn1(&from.0, "from"))
                .transpose()?,
            till: optional_time_from_asn1(&till.0, "till")?,
            rtime: rtime
                .0
                .as_ref()
                .map(|rtime| optional_time_from_asn1(&rtime.0, "rtime"))
                .transpose()?
                .flatten(),
            nonce: nonce_from_asn1(&nonce.0)?,
            etypes,
            addresses: addresses
                .0
                .as_ref()
                .map(|addresses| host_addresses_from_asn1(&addresses.0.0))
                .transpose()?,
        })
    }
}

/// Builds the AS_REP message.
///
/// The plaintext `reply_part` is not part of the message: the caller only gets its sealed form.
pub fn as_rep_from_reply(reply: &AuthenticationReply) -> Result<AsRep, CodecError> {
    let padata = if reply.padata.is_empty() {
        None
    } else {
        Some(ExplicitContextTag2::from(Asn1SequenceOf::from(
            reply.padata.iter().map(pa_data_to_asn1).collect::<Vec<_>>(),
        )))
    };

    Ok(AsRep::from(KdcRep {
        pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![AS_REP_MSG_TYPE])),
        padata: Optional::from(padata),
        crealm: ExplicitContextTag3::from(realm_to_asn1(&reply.crealm)?),
        cname: ExplicitContextTag4::from(principal_name_to_asn1(&reply.cname)?),
        ticket: ExplicitContextTag5::from(ticket_to_asn1(&reply.ticket)?),
        enc_part: ExplicitContextTag6::from(encrypted_data_to_asn1(&reply.enc_part)),
    }))
}

impl Encode for AuthenticationReply {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(picky_asn1_der::to_vec(&as_rep_from_reply(self)?)?)
    }
}

/// Fields of the KRB-ERROR message produced by the KDC.
#[derive(Debug)]
pub struct KrbErrorParams<'a> {
    pub error_code: u32,
    pub now: OffsetDateTime,
    pub realm: &'a str,
    pub sname: &'a PrincipalName,
    pub crealm: Option<&'a str>,
    pub cname: Option<&'a PrincipalName>,
    pub e_text: Option<&'a str>,
    pub e_data: Option<Vec<u8>>,
}

/// Builds the [KRB-ERROR](https://www.rfc-editor.org/rfc/rfc4120#section-5.9.1) message.
///
/// An `e-text` that is not a valid KerberosString is omitted.
pub fn krb_error(params: KrbErrorParams<'_>) -> Result<KrbError, CodecError> {
    let KrbErrorParams {
        error_code,
        now,
        realm,
        sname,
        crealm,
        cname,
        e_text,
        e_data,
    } = params;

    Ok(KrbError::from(KrbErrorInner {
        pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![KRB_ERROR_MSG_TYPE])),
        ctime: Optional::from(None),
        cusec: Optional::from(None),
        stime: ExplicitContextTag4::from(kerberos_time(now)),
        susec: ExplicitContextTag5::from(integer_from_u32(now.microsecond().min(MAX_MICROSECONDS))),
        error_code: ExplicitContextTag6::from(error_code),
        crealm: Optional::from(crealm.map(realm_to_asn1).transpose()?.map(ExplicitContextTag7::from)),
        cname: Optional::from(cname.map(principal_name_to_asn1).transpose()?.map(ExplicitContextTag8::from)),
        realm: ExplicitContextTag9::from(realm_to_asn1(realm)?),
        sname: ExplicitContextTag10::from(principal_name_to_asn1(sname)?),
        e_text: Optional::from(
            e_text
                .and_then(|e_text| kerberos_string(e_text, "e-text").ok())
                .map(ExplicitContextTag11::from),
        ),
        e_data: Optional::from(e_data.map(|e_data| ExplicitContextTag12::from(OctetStringAsn1::from(e_data)))),
    }))
}
