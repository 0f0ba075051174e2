use serde::{Deserialize, Serialize};
use time::Duration;

use crate::crypto::EncryptionType;

/// Domain user credentials.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct DomainUser {
    /// Username in FQDN format (e.g. "pw13@example.com").
    pub username: String,
    /// User password.
    pub password: String,
    /// Salt for generating the user's key.
    ///
    /// Usually, it is equal to `{REALM}{username}` (e.g. "EXAMPLE.COMpw13").
    pub salt: String,
}

/// Realm configuration of the Authentication Service.
///
/// The configuration is immutable for the lifetime of a pipeline run.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdcConfig {
    /// KDC realm.
    ///
    /// For example, `EXAMPLE.COM`.
    pub realm: String,
    /// Supported encryption types in the server preference order.
    pub encryption_types: Vec<EncryptionType>,
    /// The maximum allowed time difference between client and KDC clocks.
    ///
    /// The value must be in seconds.
    pub max_time_skew: u64,
    /// The maximum lifetime of an issued ticket in seconds.
    pub max_ticket_lifetime: u64,
    /// The maximum renewable lifetime (`renew-till - starttime`) in seconds.
    pub max_renewable_lifetime: u64,
    /// How long a verified pre-authentication timestamp stays in the replay cache, in seconds.
    ///
    /// Values below `2 * max_time_skew` are raised to it: a timestamp is accepted while it
    /// is within the skew on either side of the KDC time.
    pub replay_cache_retention: u64,
    /// Whether the client must prove its identity with `PA-ENC-TIMESTAMP`.
    pub pa_enc_timestamp_required: bool,
    pub allow_forwardable: bool,
    pub allow_proxiable: bool,
    pub allow_postdated: bool,
    pub allow_renewable: bool,
    /// Whether a ticket can be issued without the client host addresses inside.
    pub allow_empty_addresses: bool,
}

impl KdcConfig {
    pub fn max_time_skew(&self) -> Duration {
        seconds(self.max_time_skew)
    }

    pub fn max_ticket_lifetime(&self) -> Duration {
        seconds(self.max_ticket_lifetime)
    }

    pub fn max_renewable_lifetime(&self) -> Duration {
        seconds(self.max_renewable_lifetime)
    }

    /// Effective replay cache retention, never shorter than the whole clock skew window.
    pub fn replay_cache_retention(&self) -> Duration {
        seconds(self.replay_cache_retention).max(self.max_time_skew().saturating_mul(2))
    }

    /// Whether the given etype is enabled in this realm.
    pub fn supports(&self, etype: EncryptionType) -> bool {
        self.encryption_types.contains(&etype)
    }
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

impl Default for KdcConfig {
    fn default() -> Self {
        Self {
            realm: "EXAMPLE.COM".to_owned(),
            encryption_types: vec![
                EncryptionType::Aes256CtsHmacSha196,
                EncryptionType::Aes128CtsHmacSha196,
            ],
            max_time_skew: 5 * 60,
            max_ticket_lifetime: 24 * 60 * 60,
            max_renewable_lifetime: 7 * 24 * 60 * 60,
            replay_cache_retention: 10 * 60,
            pa_enc_timestamp_required: true,
            allow_forwardable: true,
            allow_proxiable: true,
            allow_postdated: true,
            allow_renewable: true,
            allow_empty_addresses: true,
        }
    }
}
