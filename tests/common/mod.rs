#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use kdc::clock::{Clock, FixedClock};
use kdc::crypto::{EncryptionKey, EncryptionType, PickyCipher};
use kdc::directory::InMemoryDirectory;
use kdc::flags::KdcOptions;
use kdc::principal::{PrincipalEntry, PrincipalName};
use kdc::{AuthenticationService, DomainUser, KdcConfig};
use picky_asn1::bit_string::BitString;
use picky_asn1::date::GeneralizedTime;
use picky_asn1::restricted_string::IA5String;
use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3,
    ExplicitContextTag4, ExplicitContextTag5, ExplicitContextTag6, ExplicitContextTag7, ExplicitContextTag8,
    IntegerAsn1, OctetStringAsn1, Optional,
};
use picky_krb::constants::types::{AS_REQ_MSG_TYPE, NT_PRINCIPAL, NT_SRV_INST, PA_ENC_TIMESTAMP, PA_ENC_TIMESTAMP_KEY_USAGE};
use picky_krb::crypto::CipherSuite;
use picky_krb::data_types::{
    EncryptedData, KerberosFlags, KerberosStringAsn1, KerberosTime, PaData, PaEncTsEnc, PrincipalName as KrbPrincipalName,
    Realm,
};
use picky_krb::messages::{AsRep, AsReq, KdcReq, KdcReqBody, KrbError};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

pub const REALM: &str = "EXAMPLE.COM";
pub const USERNAME: &str = "pw13";
pub const PASSWORD: &str = "qweQWE123!@#";
pub const SALT: &str = "EXAMPLE.COMpw13";
pub const NOW: OffsetDateTime = datetime!(2026-10-14 12:00:00 UTC);
/// `till` value meaning "as long as the KDC allows".
pub const UNSPECIFIED: OffsetDateTime = OffsetDateTime::UNIX_EPOCH;

pub fn init_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

pub fn user_key() -> Vec<u8> {
    CipherSuite::Aes256CtsHmacSha196
        .cipher()
        .generate_key_from_password(PASSWORD.as_bytes(), SALT.as_bytes())
        .unwrap()
}

pub const KRBTGT_KEY: [u8; 32] = [0x33; 32];

/// Directory with the `pw13` user and the `krbtgt/EXAMPLE.COM` service.
pub fn directory(config: &KdcConfig, modify_user: impl FnOnce(&mut PrincipalEntry)) -> InMemoryDirectory {
    let users = [DomainUser {
        username: format!("{USERNAME}@{REALM}"),
        password: PASSWORD.to_owned(),
        salt: SALT.to_owned(),
    }];
    let mut directory =
        InMemoryDirectory::from_domain_users(REALM, &users, &PickyCipher, &config.encryption_types).unwrap();

    let mut user = kdc::directory::PrincipalDirectory::lookup(&directory, &PrincipalName::principal(USERNAME), REALM)
        .unwrap()
        .unwrap();
    modify_user(&mut user);
    directory.insert(user);

    directory.insert(
        PrincipalEntry::new(PrincipalName::krbtgt(REALM), REALM)
            .with_key(EncryptionKey::new(EncryptionType::Aes256CtsHmacSha196, KRBTGT_KEY.to_vec())),
    );

    directory
}

pub fn service(config: KdcConfig) -> AuthenticationService {
    service_with_user(config, |_| {})
}

pub fn service_with_user(config: KdcConfig, modify_user: impl FnOnce(&mut PrincipalEntry)) -> AuthenticationService {
    init_tracing();

    let directory = directory(&config, modify_user);

    AuthenticationService::new(config, Arc::new(directory)).with_clock(Arc::new(FixedClock(NOW)))
}

/// Clock the test moves forward by hand.
#[derive(Debug)]
pub struct ManualClock(Mutex<OffsetDateTime>);

impl ManualClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, duration: Duration) {
        *self.0.lock().unwrap() += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.0.lock().unwrap()
    }
}

fn kerberos_string(value: &str) -> KerberosStringAsn1 {
    KerberosStringAsn1::from(IA5String::from_string(value.to_owned()).unwrap())
}

fn kerberos_time(time: OffsetDateTime) -> KerberosTime {
    KerberosTime::from(GeneralizedTime::from(time))
}

#[derive(Debug, Clone)]
pub struct AsReqParams {
    pub options: KdcOptions,
    pub from: Option<OffsetDateTime>,
    pub till: OffsetDateTime,
    pub rtime: Option<OffsetDateTime>,
    /// Client time sealed into `PA-ENC-TIMESTAMP`. `None` means no pre-authentication data.
    pub timestamp: Option<OffsetDateTime>,
    pub realm: &'static str,
    pub etypes: Vec<u8>,
    pub nonce: u32,
}

impl Default for AsReqParams {
    fn default() -> Self {
        Self {
            options: KdcOptions::empty(),
            from: None,
            till: NOW + Duration::hours(1),
            rtime: None,
            timestamp: Some(NOW),
            realm: REALM,
            etypes: vec![18, 17],
            nonce: 0x1234_5678,
        }
    }
}

fn pa_enc_timestamp(timestamp: OffsetDateTime, key: &[u8]) -> PaData {
    let pa_enc_ts_enc = PaEncTsEnc {
        patimestamp: ExplicitContextTag0::from(kerberos_time(timestamp)),
        pausec: Optional::from(Some(ExplicitContextTag1::from(IntegerAsn1::from(vec![0x00])))),
    };

    let cipher = CipherSuite::Aes256CtsHmacSha196
        .cipher()
        .encrypt(
            key,
            PA_ENC_TIMESTAMP_KEY_USAGE,
            &picky_asn1_der::to_vec(&pa_enc_ts_enc).unwrap(),
        )
        .unwrap();

    PaData {
        padata_type: ExplicitContextTag1::from(IntegerAsn1::from(PA_ENC_TIMESTAMP.to_vec())),
        padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(
            picky_asn1_der::to_vec(&EncryptedData {
                etype: ExplicitContextTag0::from(IntegerAsn1::from(vec![u8::from(CipherSuite::Aes256CtsHmacSha196)])),
                kvno: Optional::from(None),
                cipher: ExplicitContextTag2::from(OctetStringAsn1::from(cipher)),
            })
            .unwrap(),
        )),
    }
}

/// Builds the DER-encoded AS_REQ of `pw13` for `krbtgt/EXAMPLE.COM`.
pub fn as_req(params: &AsReqParams) -> Vec<u8> {
    let pa_datas = params
        .timestamp
        .map(|timestamp| vec![pa_enc_timestamp(timestamp, &user_key())])
        .unwrap_or_default();

    let as_req = AsReq::from(KdcReq {
        pvno: ExplicitContextTag1::from(IntegerAsn1::from(vec![5])),
        msg_type: ExplicitContextTag2::from(IntegerAsn1::from(vec![AS_REQ_MSG_TYPE])),
        padata: Optional::from(Some(ExplicitContextTag3::from(Asn1SequenceOf::from(pa_datas)))),
        req_body: ExplicitContextTag4::from(KdcReqBody {
            kdc_options: ExplicitContextTag0::from(KerberosFlags::from(BitString::with_bytes(
                params.options.bits().to_be_bytes().to_vec(),
            ))),
            cname: Optional::from(Some(ExplicitContextTag1::from(KrbPrincipalName {
                name_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![NT_PRINCIPAL])),
                name_string: ExplicitContextTag1::from(Asn1SequenceOf::from(vec![kerberos_string(USERNAME)])),
            }))),
            realm: ExplicitContextTag2::from(Realm::from(IA5String::from_string(params.realm.to_owned()).unwrap())),
            sname: Optional::from(Some(ExplicitContextTag3::from(KrbPrincipalName {
                name_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![NT_SRV_INST])),
                name_string: ExplicitContextTag1::from(Asn1SequenceOf::from(vec![
                    kerberos_string("krbtgt"),
                    kerberos_string(REALM),
                ])),
            }))),
            from: Optional::from(params.from.map(|from| ExplicitContextTag4::from(kerberos_time(from)))),
            till: ExplicitContextTag5::from(kerberos_time(params.till)),
            rtime: Optional::from(params.rtime.map(|rtime| ExplicitContextTag6::from(kerberos_time(rtime)))),
            nonce: ExplicitContextTag7::from(IntegerAsn1::from(params.nonce.to_be_bytes().to_vec())),
            etype: ExplicitContextTag8::from(Asn1SequenceOf::from(
                params
                    .etypes
                    .iter()
                    .map(|etype| IntegerAsn1::from(vec![*etype]))
                    .collect::<Vec<_>>(),
            )),
            addresses: Optional::from(None),
            enc_authorization_data: Optional::from(None),
            additional_tickets: Optional::from(None),
        }),
    });

    picky_asn1_der::to_vec(&as_req).unwrap()
}

#[derive(Debug)]
pub enum KdcReply {
    AsRep(AsRep),
    Error(KrbError),
}

impl KdcReply {
    pub fn parse(raw: &[u8]) -> Self {
        if let Ok(as_rep) = picky_asn1_der::from_bytes::<AsRep>(raw) {
            KdcReply::AsRep(as_rep)
        } else {
            KdcReply::Error(picky_asn1_der::from_bytes::<KrbError>(raw).unwrap())
        }
    }

    pub fn unwrap_as_rep(self) -> AsRep {
        match self {
            KdcReply::AsRep(as_rep) => as_rep,
            KdcReply::Error(krb_error) => panic!("unexpected KRB-ERROR: {:?}", krb_error.0.e_text),
        }
    }

    pub fn unwrap_error_code(self) -> u32 {
        match self {
            KdcReply::AsRep(_) => panic!("expected KRB-ERROR, got AS_REP"),
            KdcReply::Error(krb_error) => krb_error.0.error_code.0,
        }
    }

    pub fn unwrap_krb_error(self) -> KrbError {
        match self {
            KdcReply::AsRep(_) => panic!("expected KRB-ERROR, got AS_REP"),
            KdcReply::Error(krb_error) => krb_error,
        }
    }
}
