use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::KdcConfig;
use crate::crypto::{CipherService, EncryptionKey, EncryptionType, PickyCipher};
use crate::directory::PrincipalDirectory;
use crate::error::KdcError;
use crate::messages::{AuthenticationReply, KdcRequest};
use crate::policy::{verify_client_policy, verify_option_policy};
use crate::preauth::{verify_pre_auth, OtpVerifier, PreAuthOutcome, PreAuthParams};
use crate::principal::{PrincipalEntry, PrincipalName};
use crate::replay::{InMemoryReplayCache, ReplayCache};
use crate::reply::{build_reply, ReplyParams};
use crate::ticket::{issue_ticket, IssueTicketParams};
use crate::KERBEROS_VERSION;

/// State of one AS exchange once the client has been authenticated and the service resolved.
///
/// Built exactly once per request and never shared between requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub now: OffsetDateTime,
    pub etype: EncryptionType,
    pub cname: PrincipalName,
    pub client: PrincipalEntry,
    /// Key the reply is sealed with: the long-term key or the OTP-derived key.
    pub client_key: EncryptionKey,
    pub pre_authenticated: bool,
    pub sname: PrincipalName,
    pub server: PrincipalEntry,
}

/// Kerberos Authentication Service.
///
/// Holds the realm configuration and the collaborators shared by all requests.
#[derive(Debug, Clone)]
pub struct AuthenticationService {
    config: Arc<KdcConfig>,
    directory: Arc<dyn PrincipalDirectory>,
    cipher: Arc<dyn CipherService>,
    replay_cache: Arc<dyn ReplayCache>,
    otp: Option<Arc<dyn OtpVerifier>>,
    clock: Arc<dyn Clock>,
}

impl AuthenticationService {
    pub fn new(config: KdcConfig, directory: Arc<dyn PrincipalDirectory>) -> Self {
        let replay_cache = Arc::new(InMemoryReplayCache::new(config.replay_cache_retention()));

        Self {
            config: Arc::new(config),
            directory,
            cipher: Arc::new(PickyCipher),
            replay_cache,
            otp: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn CipherService>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_replay_cache(mut self, replay_cache: Arc<dyn ReplayCache>) -> Self {
        self.replay_cache = replay_cache;
        self
    }

    pub fn with_otp_verifier(mut self, otp: Arc<dyn OtpVerifier>) -> Self {
        self.otp = Some(otp);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &KdcConfig {
        &self.config
    }

    /// Current KDC time with the Kerberos one-second resolution.
    pub fn now(&self) -> OffsetDateTime {
        let now = self.clock.now();

        now.replace_nanosecond(0).unwrap_or(now)
    }

    /// Processes the AS_REQ.
    ///
    /// RFC: [Receipt of KRB_AS_REQ Message](https://www.rfc-editor.org/rfc/rfc4120#section-3.1.2).
    #[instrument(level = "debug", skip_all, fields(nonce = request.nonce))]
    pub fn handle_as_req(&self, request: &KdcRequest) -> Result<AuthenticationReply, KdcError> {
        monitor_request(request);

        let result = self.authenticate(request, self.now());
        if let Err(err) = &result {
            warn!(%err, error_code = err.error_code(), "AS exchange failed");
        }

        result
    }

    fn authenticate(&self, request: &KdcRequest, now: OffsetDateTime) -> Result<AuthenticationReply, KdcError> {
        let config = self.config.as_ref();

        if request.pvno != u32::from(KERBEROS_VERSION) {
            return Err(KdcError::BadProtocolVersion {
                version: request.pvno,
                expected: KERBEROS_VERSION,
            });
        }

        let etype = negotiate_etype(&request.etypes, config)?;

        if !request.realm.eq_ignore_ascii_case(&config.realm) {
            return Err(KdcError::WrongRealm(request.realm.clone()));
        }

        let cname = request.cname.as_ref().ok_or_else(|| {
            KdcError::UnknownClientPrincipal("the incoming KDC request does not contain client principal name".to_owned())
        })?;
        let client = self.lookup_client(cname)?;

        verify_client_policy(&client, now)?;
        verify_option_policy(request.kdc_options, config)?;

        let PreAuthOutcome {
            client_key,
            pre_authenticated,
        } = verify_pre_auth(PreAuthParams {
            request,
            client: &client,
            etype,
            config,
            now,
            cipher: self.cipher.as_ref(),
            replay_cache: self.replay_cache.as_ref(),
            otp: self.otp.as_deref(),
        })?;

        let sname = request.sname.as_ref().ok_or_else(|| {
            KdcError::UnknownServerPrincipal("the incoming KDC request does not contain service principal name".to_owned())
        })?;
        let server = self.lookup_server(sname)?;

        let context = AuthContext {
            now,
            etype,
            cname: cname.clone(),
            client,
            client_key,
            pre_authenticated,
            sname: sname.clone(),
            server,
        };
        monitor_context(&context, config);

        let issued = issue_ticket(IssueTicketParams {
            request,
            config,
            now: context.now,
            etype: context.etype,
            cname: &context.cname,
            sname: &context.sname,
            server: &context.server,
            pre_authenticated: context.pre_authenticated,
            cipher: self.cipher.as_ref(),
        })?;

        let reply = build_reply(ReplyParams {
            request,
            issued,
            crealm: &config.realm,
            cname: &context.cname,
            client: &context.client,
            client_key: &context.client_key,
            etype: context.etype,
            cipher: self.cipher.as_ref(),
        })?;
        monitor_reply(&reply);

        Ok(reply)
    }

    fn lookup_client(&self, cname: &PrincipalName) -> Result<PrincipalEntry, KdcError> {
        let entry = self
            .directory
            .lookup(cname, &self.config.realm)
            .map_err(|err| KdcError::UnknownClientPrincipal(format!("client {cname} lookup failed: {err}")))?
            .ok_or_else(|| {
                KdcError::UnknownClientPrincipal(format!(
                    "the requested client principal name ({cname}) is not found in KDC database"
                ))
            })?;

        if entry.keys.is_empty() {
            return Err(KdcError::NullKey(format!("client {cname} has no keys")));
        }

        Ok(entry)
    }

    fn lookup_server(&self, sname: &PrincipalName) -> Result<PrincipalEntry, KdcError> {
        let entry = self
            .directory
            .lookup(sname, &self.config.realm)
            .map_err(|err| KdcError::UnknownServerPrincipal(format!("server {sname} lookup failed: {err}")))?
            .ok_or_else(|| {
                KdcError::UnknownServerPrincipal(format!(
                    "the requested service principal name ({sname}) is not found in KDC database"
                ))
            })?;

        if entry.keys.is_empty() {
            return Err(KdcError::NullKey(format!("server {sname} has no keys")));
        }

        Ok(entry)
    }
}

/// Selects the first client etype (in the client preference order) the realm supports.
pub fn negotiate_etype(requested: &[usize], config: &KdcConfig) -> Result<EncryptionType, KdcError> {
    requested
        .iter()
        .filter_map(|etype| EncryptionType::from_etype(*etype))
        .find(|etype| config.supports(*etype))
        .ok_or_else(|| KdcError::UnsupportedEncryptionType(requested.to_vec()))
}

fn monitor_request(request: &KdcRequest) {
    debug!(
        msg_type = "AS_REQ",
        pvno = request.pvno,
        nonce = request.nonce,
        kdc_options = ?request.kdc_options,
        cname = ?request.cname,
        sname = ?request.sname,
        realm = %request.realm,
        etypes = ?request.etypes,
        from = ?request.from,
        till = ?request.till,
        rtime = ?request.rtime,
        addresses = ?request.addresses,
        padata_types = ?request.padata.iter().map(|pa_data| pa_data.padata_type).collect::<Vec<_>>(),
        "Received AS_REQ"
    );
}

fn monitor_context(context: &AuthContext, config: &KdcConfig) {
    debug!(
        max_time_skew = config.max_time_skew,
        cname = %context.cname,
        sname = %context.sname,
        otp_method = ?context.client.otp_method,
        etype = %context.etype,
        pre_authenticated = context.pre_authenticated,
        "AS exchange context"
    );
}

fn monitor_reply(reply: &AuthenticationReply) {
    let reply_part = &reply.reply_part;

    debug!(
        nonce = reply_part.nonce,
        cname = %reply.cname,
        sname = %reply_part.sname,
        flags = ?reply_part.flags,
        auth_time = %reply_part.auth_time,
        start_time = ?reply_part.start_time,
        end_time = %reply_part.end_time,
        renew_till = ?reply_part.renew_till,
        caddr = ?reply_part.caddr,
        "Responding with AS_REP"
    );
}

#[cfg(test)]
mod tests {
    use picky_krb::constants::types::PA_ENC_TIMESTAMP_KEY_USAGE;
    use time::macros::datetime;
    use time::Duration;

    use super::*;
    use crate::clock::FixedClock;
    use crate::codec::Encode;
    use crate::crypto::seal;
    use crate::directory::{DirectoryError, InMemoryDirectory};
    use crate::flags::{KdcOptions, TicketFlags};
    use crate::messages::{PaData, PreAuthTimestamp};

    const NOW: OffsetDateTime = datetime!(2026-10-14 12:00:00 UTC);
    const ETYPE: EncryptionType = EncryptionType::Aes256CtsHmacSha196;

    #[derive(Debug)]
    struct BrokenDirectory;

    impl PrincipalDirectory for BrokenDirectory {
        fn lookup(&self, _: &PrincipalName, _: &str) -> Result<Option<PrincipalEntry>, DirectoryError> {
            Err(DirectoryError::Backend("connection refused".to_owned()))
        }
    }

    fn client_key() -> EncryptionKey {
        EncryptionKey::new(ETYPE, vec![0x13; 32])
    }

    fn directory() -> InMemoryDirectory {
        let mut directory = InMemoryDirectory::new();
        directory.insert(PrincipalEntry::new(PrincipalName::principal("pw13"), "EXAMPLE.COM").with_key(client_key()));
        directory.insert(
            PrincipalEntry::new(PrincipalName::krbtgt("EXAMPLE.COM"), "EXAMPLE.COM")
                .with_key(EncryptionKey::new(ETYPE, vec![0x55; 32])),
        );
        // No keys at all.
        directory.insert(PrincipalEntry::new(PrincipalName::principal("nokeys"), "EXAMPLE.COM"));

        directory
    }

    fn service(directory: Arc<dyn PrincipalDirectory>) -> AuthenticationService {
        AuthenticationService::new(KdcConfig::default(), directory).with_clock(Arc::new(FixedClock(NOW)))
    }

    fn request() -> KdcRequest {
        let encrypted = seal(
            &PickyCipher,
            &client_key(),
            &PreAuthTimestamp {
                timestamp: NOW,
                usec: Some(0),
            },
            PA_ENC_TIMESTAMP_KEY_USAGE,
        )
        .unwrap();

        KdcRequest {
            pvno: 5,
            padata: vec![PaData::new(PaData::ENC_TIMESTAMP, encrypted.encode().unwrap())],
            kdc_options: KdcOptions::empty(),
            cname: Some(PrincipalName::principal("pw13")),
            realm: "EXAMPLE.COM".to_owned(),
            sname: Some(PrincipalName::krbtgt("EXAMPLE.COM")),
            from: None,
            till: Some(NOW + Duration::hours(1)),
            rtime: None,
            nonce: 7,
            etypes: vec![23, ETYPE.etype()],
            addresses: None,
        }
    }

    #[test]
    fn issues_initial_ticket() {
        let reply = service(Arc::new(directory())).handle_as_req(&request()).unwrap();

        assert_eq!(reply.reply_part.flags, TicketFlags::INITIAL | TicketFlags::PRE_AUTHENT);
        assert_eq!(reply.reply_part.auth_time, NOW);
        assert_eq!(reply.reply_part.end_time, NOW + Duration::hours(1));
        assert_eq!(reply.reply_part.nonce, 7);
        assert_eq!(reply.ticket.sname, PrincipalName::krbtgt("EXAMPLE.COM"));
        assert_eq!(reply.enc_part.etype, ETYPE.etype());
    }

    #[test]
    fn now_is_truncated_to_seconds() {
        let service = service(Arc::new(directory())).with_clock(Arc::new(FixedClock(NOW + Duration::milliseconds(750))));

        assert_eq!(service.now(), NOW);
    }

    #[test]
    fn etype_negotiation() {
        let config = KdcConfig {
            encryption_types: vec![EncryptionType::Aes128CtsHmacSha196],
            ..Default::default()
        };

        assert_eq!(
            negotiate_etype(&[23, 18, 17], &config).unwrap(),
            EncryptionType::Aes128CtsHmacSha196
        );
        assert_eq!(negotiate_etype(&[18, 17], &KdcConfig::default()).unwrap(), ETYPE);
        assert!(matches!(
            negotiate_etype(&[23, 18], &config),
            Err(KdcError::UnsupportedEncryptionType(_))
        ));
    }

    #[test]
    fn pipeline_failures() {
        let service = service(Arc::new(directory()));

        let mut bad_pvno = request();
        bad_pvno.pvno = 4;
        assert!(matches!(
            service.handle_as_req(&bad_pvno),
            Err(KdcError::BadProtocolVersion { version: 4, .. })
        ));

        let mut wrong_realm = request();
        wrong_realm.realm = "OTHER.COM".to_owned();
        assert!(matches!(service.handle_as_req(&wrong_realm), Err(KdcError::WrongRealm(_))));

        let mut unknown_client = request();
        unknown_client.cname = Some(PrincipalName::principal("pw14"));
        assert!(matches!(
            service.handle_as_req(&unknown_client),
            Err(KdcError::UnknownClientPrincipal(_))
        ));

        let mut no_keys = request();
        no_keys.cname = Some(PrincipalName::principal("nokeys"));
        assert!(matches!(service.handle_as_req(&no_keys), Err(KdcError::NullKey(_))));

        let mut unknown_server = request();
        unknown_server.sname = Some(PrincipalName::service("HTTP", "www.example.com"));
        assert!(matches!(
            service.handle_as_req(&unknown_server),
            Err(KdcError::UnknownServerPrincipal(_))
        ));
    }

    #[test]
    fn directory_failure_is_wrapped() {
        let service = service(Arc::new(BrokenDirectory));

        assert!(matches!(
            service.handle_as_req(&request()),
            Err(KdcError::UnknownClientPrincipal(_))
        ));
    }

    #[test]
    fn tgs_options_are_rejected_after_pre_auth() {
        let service = service(Arc::new(directory()));
        let mut request = request();
        request.kdc_options = KdcOptions::VALIDATE;

        assert!(matches!(service.handle_as_req(&request), Err(KdcError::BadOption(_))));
    }
}
