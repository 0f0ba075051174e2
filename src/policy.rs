//! Account and option policy checks. Both checks are pure.

use time::OffsetDateTime;
use tracing::warn;

use crate::config::KdcConfig;
use crate::error::KdcError;
use crate::flags::KdcOptions;
use crate::principal::PrincipalEntry;

/// Rejects clients whose account is disabled, locked out or expired.
pub fn verify_client_policy(entry: &PrincipalEntry, now: OffsetDateTime) -> Result<(), KdcError> {
    if entry.disabled {
        warn!(client = %entry.principal, "Client account is disabled");

        return Err(KdcError::ClientRevoked("client account is disabled"));
    }

    if entry.locked_out {
        warn!(client = %entry.principal, "Client account is locked out");

        return Err(KdcError::ClientRevoked("client account is locked out"));
    }

    if let Some(expiration) = entry.expiration {
        if expiration < now {
            warn!(client = %entry.principal, %expiration, "Client account has expired");

            return Err(KdcError::ClientRevoked("client account has expired"));
        }
    }

    Ok(())
}

/// Rejects requests asking for an option category the realm does not permit.
pub fn verify_option_policy(options: KdcOptions, config: &KdcConfig) -> Result<(), KdcError> {
    if options.contains(KdcOptions::FORWARDABLE) && !config.allow_forwardable {
        return Err(KdcError::PolicyViolation("forwardable tickets are not allowed"));
    }

    if options.contains(KdcOptions::PROXIABLE) && !config.allow_proxiable {
        return Err(KdcError::PolicyViolation("proxiable tickets are not allowed"));
    }

    if options.intersects(KdcOptions::ALLOW_POSTDATE | KdcOptions::POSTDATED) && !config.allow_postdated {
        return Err(KdcError::PolicyViolation("postdated tickets are not allowed"));
    }

    if options.contains(KdcOptions::RENEWABLE) && !config.allow_renewable {
        return Err(KdcError::PolicyViolation("renewable tickets are not allowed"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;
    use time::Duration;

    use super::*;
    use crate::principal::PrincipalName;

    const NOW: OffsetDateTime = datetime!(2026-10-14 12:00:00 UTC);

    fn entry() -> PrincipalEntry {
        PrincipalEntry::new(PrincipalName::principal("pw13"), "EXAMPLE.COM")
    }

    #[test]
    fn active_client() {
        let mut entry = entry();
        entry.expiration = Some(NOW + Duration::days(1));

        verify_client_policy(&entry, NOW).unwrap();
    }

    #[test]
    fn revoked_clients() {
        let disabled = PrincipalEntry {
            disabled: true,
            ..entry()
        };
        let locked_out = PrincipalEntry {
            locked_out: true,
            ..entry()
        };
        let expired = PrincipalEntry {
            expiration: Some(NOW - Duration::seconds(1)),
            ..entry()
        };

        for entry in [disabled, locked_out, expired] {
            assert!(matches!(
                verify_client_policy(&entry, NOW),
                Err(KdcError::ClientRevoked(_))
            ));
        }
    }

    #[test]
    fn disallowed_options() {
        let config = KdcConfig {
            allow_forwardable: false,
            allow_postdated: false,
            allow_renewable: false,
            ..Default::default()
        };

        for options in [
            KdcOptions::FORWARDABLE,
            KdcOptions::ALLOW_POSTDATE,
            KdcOptions::POSTDATED,
            KdcOptions::RENEWABLE,
        ] {
            assert!(matches!(
                verify_option_policy(options, &config),
                Err(KdcError::PolicyViolation(_))
            ));
        }

        verify_option_policy(KdcOptions::PROXIABLE | KdcOptions::RENEWABLE_OK, &config).unwrap();
        verify_option_policy(KdcOptions::all(), &KdcConfig::default()).unwrap();
    }
}
