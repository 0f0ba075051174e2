use std::fmt;

use picky_krb::constants::types::PA_ENC_TIMESTAMP_KEY_USAGE;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use crate::codec::Decode;
use crate::config::KdcConfig;
use crate::crypto::{unseal, CipherService, EncryptionKey, EncryptionType};
use crate::error::{KdcError, PreAuthHint};
use crate::messages::{EncryptedData, KdcRequest, PaData, PreAuthTimestamp};
use crate::principal::{OtpMethod, PrincipalEntry};
use crate::replay::{ReplayCache, ReplayCacheRecord, ReplayVerdict};

#[derive(Error, Debug)]
pub enum OtpError {
    #[error("{0:?} OTP method is not supported")]
    UnsupportedMethod(OtpMethod),

    #[error("OTP verification failed: {0}")]
    Verification(String),
}

/// One-time-password subsystem.
pub trait OtpVerifier: Send + Sync + fmt::Debug {
    /// Verifies the client proof and derives the client key of this exchange.
    fn verify(&self, entry: &PrincipalEntry, method: OtpMethod, proof: &[u8]) -> Result<EncryptionKey, OtpError>;
}

/// Pre-authentication method of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreAuthMethod {
    Otp(OtpMethod),
    EncryptedTimestamp,
}

impl PreAuthMethod {
    pub fn of(entry: &PrincipalEntry) -> Self {
        match entry.otp_method {
            Some(method) => PreAuthMethod::Otp(method),
            None => PreAuthMethod::EncryptedTimestamp,
        }
    }
}

/// Result of a successful pre-authentication stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreAuthOutcome {
    /// Key the AS_REP encrypted part is sealed with.
    pub client_key: EncryptionKey,
    /// Whether the client actually has proven its identity.
    pub pre_authenticated: bool,
}

#[derive(Debug)]
pub struct PreAuthParams<'a> {
    pub request: &'a KdcRequest,
    pub client: &'a PrincipalEntry,
    pub etype: EncryptionType,
    pub config: &'a KdcConfig,
    pub now: OffsetDateTime,
    pub cipher: &'a dyn CipherService,
    pub replay_cache: &'a dyn ReplayCache,
    pub otp: Option<&'a dyn OtpVerifier>,
}

fn pre_auth_required(params: &PreAuthParams<'_>) -> KdcError {
    KdcError::PreAuthRequired(PreAuthHint {
        encryption_types: params.config.encryption_types.clone(),
        salt: params.client.salt.clone(),
    })
}

fn find_enc_timestamp(padata: &[PaData]) -> Option<&PaData> {
    padata.iter().find(|pa_data| pa_data.padata_type == PaData::ENC_TIMESTAMP)
}

/// Verifies the client proof of the long-term key possession.
///
/// The verification is attempted exactly once: any failure rejects the whole exchange.
#[instrument(level = "debug", skip_all, fields(client = %params.client.principal))]
pub fn verify_pre_auth(params: PreAuthParams<'_>) -> Result<PreAuthOutcome, KdcError> {
    match PreAuthMethod::of(params.client) {
        PreAuthMethod::Otp(method) => verify_otp(&params, method),
        PreAuthMethod::EncryptedTimestamp => verify_encrypted_timestamp(&params),
    }
}

fn verify_otp(params: &PreAuthParams<'_>, method: OtpMethod) -> Result<PreAuthOutcome, KdcError> {
    if params.request.padata.is_empty() {
        return Err(pre_auth_required(params));
    }

    let proof = find_enc_timestamp(&params.request.padata)
        .ok_or(KdcError::PreAuthFailed("OTP proof is missing"))?;

    let otp = params.otp.ok_or_else(|| {
        warn!(?method, "Client requires OTP but no OTP verifier is configured");

        KdcError::PreAuthFailed("OTP pre-authentication is not available")
    })?;

    let client_key = otp.verify(params.client, method, &proof.value).map_err(|err| {
        warn!(%err, ?method, "OTP verification failed");

        KdcError::PreAuthFailed("OTP verification failed")
    })?;

    debug!(?method, "Client pre-authenticated with OTP");

    Ok(PreAuthOutcome {
        client_key,
        pre_authenticated: true,
    })
}

fn verify_encrypted_timestamp(params: &PreAuthParams<'_>) -> Result<PreAuthOutcome, KdcError> {
    let PreAuthParams {
        request,
        client,
        etype,
        config,
        now,
        cipher,
        replay_cache,
        otp: _,
    } = params;

    let client_key = client.key(*etype).ok_or_else(|| {
        KdcError::NullKey(format!("client {} has no {} key", client.principal, etype))
    })?;

    let Some(pa_enc_timestamp) = find_enc_timestamp(&request.padata) else {
        if config.pa_enc_timestamp_required {
            debug!("PA-ENC-TIMESTAMP is missing");

            return Err(pre_auth_required(params));
        }

        return Ok(PreAuthOutcome {
            client_key: client_key.clone(),
            pre_authenticated: false,
        });
    };

    let encrypted = EncryptedData::decode(&pa_enc_timestamp.value)
        .map_err(|err| KdcError::BadIntegrity(format!("invalid PA-ENC-TIMESTAMP: {err}")))?;
    let timestamp: PreAuthTimestamp = unseal(*cipher, client_key, &encrypted, PA_ENC_TIMESTAMP_KEY_USAGE)
        .map_err(|err| KdcError::BadIntegrity(format!("PA-ENC-TIMESTAMP decryption failed: {err}")))?;

    // RFC (https://www.rfc-editor.org/rfc/rfc4120#section-5.2.7.2):
    // > If the timestamp is not within the allowable clock skew, the KDC ... MUST reject the request.
    let skew = (*now - timestamp.timestamp).abs();
    if skew > config.max_time_skew() {
        warn!(client_time = %timestamp.timestamp, %now, "Client clock skew is too great");

        return Err(KdcError::PreAuthFailed("PA-ENC-TIMESTAMP is outside of the allowable clock skew"));
    }

    let record = ReplayCacheRecord::new(
        &client.principal,
        &client.realm,
        timestamp.timestamp,
        timestamp.usec.unwrap_or_default(),
    );
    if replay_cache.check_and_record(record, *now) == ReplayVerdict::Replay {
        warn!(client_time = %timestamp.timestamp, "PA-ENC-TIMESTAMP replay detected");

        return Err(KdcError::PreAuthFailed("PA-ENC-TIMESTAMP replay"));
    }

    debug!("Client pre-authenticated with PA-ENC-TIMESTAMP");

    Ok(PreAuthOutcome {
        client_key: client_key.clone(),
        pre_authenticated: true,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use time::macros::datetime;
    use time::Duration;

    use super::*;
    use crate::codec::Encode;
    use crate::crypto::{seal, PickyCipher};
    use crate::flags::KdcOptions;
    use crate::principal::PrincipalName;
    use crate::replay::InMemoryReplayCache;

    const NOW: OffsetDateTime = datetime!(2026-10-14 12:00:00 UTC);
    const ETYPE: EncryptionType = EncryptionType::Aes256CtsHmacSha196;

    #[derive(Debug, Default)]
    struct CountingOtp {
        calls: AtomicUsize,
    }

    impl OtpVerifier for CountingOtp {
        fn verify(&self, _: &PrincipalEntry, _: OtpMethod, proof: &[u8]) -> Result<EncryptionKey, OtpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if proof == b"123456" {
                Ok(EncryptionKey::new(ETYPE, vec![0x42; 32]))
            } else {
                Err(OtpError::Verification("wrong code".to_owned()))
            }
        }
    }

    fn client() -> PrincipalEntry {
        PrincipalEntry::new(PrincipalName::principal("pw13"), "EXAMPLE.COM")
            .with_key(EncryptionKey::new(ETYPE, vec![0x13; 32]))
            .with_salt("EXAMPLE.COMpw13")
    }

    fn request(padata: Vec<PaData>) -> KdcRequest {
        KdcRequest {
            pvno: 5,
            padata,
            kdc_options: KdcOptions::empty(),
            cname: Some(PrincipalName::principal("pw13")),
            realm: "EXAMPLE.COM".to_owned(),
            sname: Some(PrincipalName::krbtgt("EXAMPLE.COM")),
            from: None,
            till: Some(NOW + Duration::hours(1)),
            rtime: None,
            nonce: 1,
            etypes: vec![ETYPE.etype()],
            addresses: None,
        }
    }

    fn enc_timestamp(key: &EncryptionKey, timestamp: OffsetDateTime) -> PaData {
        let encrypted = seal(
            &PickyCipher,
            key,
            &PreAuthTimestamp {
                timestamp,
                usec: Some(123),
            },
            PA_ENC_TIMESTAMP_KEY_USAGE,
        )
        .unwrap();

        PaData::new(PaData::ENC_TIMESTAMP, encrypted.encode().unwrap())
    }

    fn verify(
        request: &KdcRequest,
        client: &PrincipalEntry,
        config: &KdcConfig,
        replay_cache: &InMemoryReplayCache,
        otp: Option<&dyn OtpVerifier>,
    ) -> Result<PreAuthOutcome, KdcError> {
        verify_pre_auth(PreAuthParams {
            request,
            client,
            etype: ETYPE,
            config,
            now: NOW,
            cipher: &PickyCipher,
            replay_cache,
            otp,
        })
    }

    #[test]
    fn valid_timestamp() {
        let client = client();
        let request = request(vec![enc_timestamp(client.key(ETYPE).unwrap(), NOW - Duration::seconds(30))]);
        let cache = InMemoryReplayCache::new(Duration::minutes(10));

        let outcome = verify(&request, &client, &KdcConfig::default(), &cache, None).unwrap();

        assert!(outcome.pre_authenticated);
        assert_eq!(&outcome.client_key, client.key(ETYPE).unwrap());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn missing_timestamp() {
        let client = client();
        let cache = InMemoryReplayCache::new(Duration::minutes(10));

        let err = verify(&request(Vec::new()), &client, &KdcConfig::default(), &cache, None).unwrap_err();

        let hint = match err {
            KdcError::PreAuthRequired(hint) => hint,
            err => panic!("unexpected error: {err}"),
        };
        assert_eq!(hint.encryption_types, KdcConfig::default().encryption_types);
        assert_eq!(hint.salt.as_deref(), Some("EXAMPLE.COMpw13"));
    }

    #[test]
    fn optional_pre_auth() {
        let client = client();
        let config = KdcConfig {
            pa_enc_timestamp_required: false,
            ..Default::default()
        };
        let cache = InMemoryReplayCache::new(Duration::minutes(10));

        let outcome = verify(&request(Vec::new()), &client, &config, &cache, None).unwrap();

        assert!(!outcome.pre_authenticated);
        assert_eq!(&outcome.client_key, client.key(ETYPE).unwrap());
    }

    #[test]
    fn missing_client_key() {
        let client = PrincipalEntry::new(PrincipalName::principal("pw13"), "EXAMPLE.COM");
        let cache = InMemoryReplayCache::new(Duration::minutes(10));

        assert!(matches!(
            verify(&request(Vec::new()), &client, &KdcConfig::default(), &cache, None),
            Err(KdcError::NullKey(_))
        ));
    }

    #[test]
    fn timestamp_under_wrong_key() {
        let client = client();
        let wrong_key = EncryptionKey::new(ETYPE, vec![0x14; 32]);
        let request = request(vec![enc_timestamp(&wrong_key, NOW)]);
        let cache = InMemoryReplayCache::new(Duration::minutes(10));

        assert!(matches!(
            verify(&request, &client, &KdcConfig::default(), &cache, None),
            Err(KdcError::BadIntegrity(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn garbage_timestamp() {
        let client = client();
        let request = request(vec![PaData::new(PaData::ENC_TIMESTAMP, vec![1, 2, 3])]);
        let cache = InMemoryReplayCache::new(Duration::minutes(10));

        assert!(matches!(
            verify(&request, &client, &KdcConfig::default(), &cache, None),
            Err(KdcError::BadIntegrity(_))
        ));
    }

    #[test]
    fn clock_skew_is_symmetric() {
        let client = client();
        let config = KdcConfig::default();
        let cache = InMemoryReplayCache::new(Duration::minutes(10));

        for timestamp in [NOW - Duration::seconds(301), NOW + Duration::seconds(301)] {
            let request = request(vec![enc_timestamp(client.key(ETYPE).unwrap(), timestamp)]);

            assert!(matches!(
                verify(&request, &client, &config, &cache, None),
                Err(KdcError::PreAuthFailed(_))
            ));
        }

        let request = request(vec![enc_timestamp(client.key(ETYPE).unwrap(), NOW + Duration::seconds(300))]);
        verify(&request, &client, &config, &cache, None).unwrap();
    }

    #[test]
    fn replayed_timestamp() {
        let client = client();
        let request = request(vec![enc_timestamp(client.key(ETYPE).unwrap(), NOW)]);
        let cache = InMemoryReplayCache::new(Duration::minutes(10));

        verify(&request, &client, &KdcConfig::default(), &cache, None).unwrap();

        assert!(matches!(
            verify(&request, &client, &KdcConfig::default(), &cache, None),
            Err(KdcError::PreAuthFailed("PA-ENC-TIMESTAMP replay"))
        ));
    }

    #[test]
    fn otp_path() {
        let client = client().with_otp_method(OtpMethod::SecurId);
        let config = KdcConfig::default();
        let cache = InMemoryReplayCache::new(Duration::minutes(10));
        let otp = CountingOtp::default();

        assert!(matches!(
            verify(&request(Vec::new()), &client, &config, &cache, Some(&otp)),
            Err(KdcError::PreAuthRequired(_))
        ));

        let wrong = request(vec![PaData::new(PaData::ENC_TIMESTAMP, b"654321".to_vec())]);
        assert!(matches!(
            verify(&wrong, &client, &config, &cache, Some(&otp)),
            Err(KdcError::PreAuthFailed(_))
        ));

        let valid = request(vec![PaData::new(PaData::ENC_TIMESTAMP, b"123456".to_vec())]);
        let outcome = verify(&valid, &client, &config, &cache, Some(&otp)).unwrap();

        assert!(outcome.pre_authenticated);
        assert_eq!(outcome.client_key.value.as_ref(), &vec![0x42; 32]);
        assert_eq!(otp.calls.load(Ordering::SeqCst), 2);
        // The encrypted timestamp is not consulted on the OTP path.
        assert!(cache.is_empty());
    }

    #[test]
    fn otp_without_verifier() {
        let client = client().with_otp_method(OtpMethod::CryptoCard);
        let request = request(vec![PaData::new(PaData::ENC_TIMESTAMP, b"123456".to_vec())]);
        let cache = InMemoryReplayCache::new(Duration::minutes(10));

        assert!(matches!(
            verify(&request, &client, &KdcConfig::default(), &cache, None),
            Err(KdcError::PreAuthFailed(_))
        ));
    }

    #[test]
    fn otp_proof_must_be_present() {
        let client = client().with_otp_method(OtpMethod::SKey);
        let request = request(vec![PaData::new(PaData::ETYPE_INFO2, Vec::new())]);
        let cache = InMemoryReplayCache::new(Duration::minutes(10));
        let otp = CountingOtp::default();

        assert!(matches!(
            verify(&request, &client, &KdcConfig::default(), &cache, Some(&otp)),
            Err(KdcError::PreAuthFailed("OTP proof is missing"))
        ));
        assert_eq!(otp.calls.load(Ordering::SeqCst), 0);
    }
}
