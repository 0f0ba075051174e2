use picky_krb::constants::key_usages::TICKET_REP;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use tracing::{debug, instrument};

use crate::config::KdcConfig;
use crate::crypto::{seal, CipherService, EncryptionType};
use crate::error::KdcError;
use crate::flags::{KdcOptions, TicketCapabilities, TicketFlags};
use crate::messages::{EncTicketPart, HostAddress, KdcRequest, Ticket, TransitedEncoding};
use crate::principal::{PrincipalEntry, PrincipalName};

/// The latest time a [KerberosTime](https://www.rfc-editor.org/rfc/rfc4120#section-5.2.3) can carry.
///
/// Stands for "no upper bound" in the validity window computations.
pub const KERBEROS_TIME_INFINITY: OffsetDateTime = datetime!(9999-12-31 23:59:59 UTC);

fn saturating_add(time: OffsetDateTime, duration: Duration) -> OffsetDateTime {
    time.checked_add(duration)
        .map(|time| time.min(KERBEROS_TIME_INFINITY))
        .unwrap_or(KERBEROS_TIME_INFINITY)
}

/// Validity period of the ticket being issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub start_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
    /// Present only for renewable tickets.
    pub renew_till: Option<OffsetDateTime>,
    pub postdated: bool,
}

impl ValidityWindow {
    pub fn renewable(&self) -> bool {
        self.renew_till.is_some()
    }
}

/// Computes the ticket validity window.
///
/// RFC: [Generation of KRB_AS_REP Message](https://www.rfc-editor.org/rfc/rfc4120#section-3.1.3).
pub fn validity_window(request: &KdcRequest, config: &KdcConfig, now: OffsetDateTime) -> Result<ValidityWindow, KdcError> {
    let max_time_skew = config.max_time_skew();
    let options = request.kdc_options;

    let (start_time, postdated) = match request.from {
        // RFC (https://www.rfc-editor.org/rfc/rfc4120#section-3.1.3):
        // > If it indicates a time in the future beyond the acceptable clock skew, but the POSTDATED option has not
        // > been specified, then the error KDC_ERR_CANNOT_POSTDATE is returned. Otherwise the requested starttime is
        // > checked against the policy of the local realm...
        Some(from) if from > saturating_add(now, max_time_skew) => {
            if !options.contains(KdcOptions::POSTDATED) {
                return Err(KdcError::CannotPostdate("KdcReq::from time is too far in the future"));
            }

            (from, true)
        }
        // RFC (https://www.rfc-editor.org/rfc/rfc4120#section-3.1.3):
        // > If the requested starttime is absent, indicates a time in the past,
        // > or is within the window of acceptable clock skew for the KDC ...,
        // > then the starttime of the ticket is set to the authentication server's current time.
        _ => (now, false),
    };

    let till = request.till.unwrap_or(KERBEROS_TIME_INFINITY);
    // RFC (https://www.rfc-editor.org/rfc/rfc4120#section-3.1.3):
    // > The expiration time of the ticket will be set to the earlier of the requested endtime and a time determined by local policy...
    let end_time = till.min(saturating_add(start_time, config.max_ticket_lifetime()));

    if end_time < start_time {
        return Err(KdcError::NeverValid(format!(
            "end time ({end_time}) is earlier than start time ({start_time})"
        )));
    }
    // RFC (https://www.rfc-editor.org/rfc/rfc4120#section-3.1.3):
    // > If the requested expiration time minus the starttime (as determined above) is less than a site-determined
    // > minimum lifetime, an error message with code KDC_ERR_NEVER_VALID is returned.
    if end_time - start_time < max_time_skew {
        return Err(KdcError::NeverValid(format!(
            "ticket lifetime ({}) is shorter than the allowable clock skew",
            end_time - start_time
        )));
    }

    // RFC (https://www.rfc-editor.org/rfc/rfc4120#section-3.1.3):
    // > If the requested expiration time for the ticket exceeds what was determined as above, and if the
    // > 'RENEWABLE-OK' option was requested, then the 'RENEWABLE' flag is set in the new ticket, and the renew-till
    // > value is set as if the 'RENEWABLE' option were requested and the rtime field of the request set to the till field.
    // An unspecified till never upgrades the ticket.
    let (renewable, rtime) = match request.till {
        Some(till) if options.contains(KdcOptions::RENEWABLE_OK) && till > end_time && config.allow_renewable => {
            (true, Some(till))
        }
        _ => (options.contains(KdcOptions::RENEWABLE), request.rtime),
    };

    let renew_till = if renewable {
        if !config.allow_renewable {
            return Err(KdcError::PolicyViolation("renewable tickets are not allowed"));
        }

        Some(
            rtime
                .unwrap_or(KERBEROS_TIME_INFINITY)
                .min(saturating_add(start_time, config.max_renewable_lifetime())),
        )
    } else {
        None
    };

    Ok(ValidityWindow {
        start_time,
        end_time,
        renew_till,
        postdated,
    })
}

fn client_addresses(request: &KdcRequest, config: &KdcConfig) -> Result<Option<Vec<HostAddress>>, KdcError> {
    match request.addresses.as_deref() {
        Some(addresses) if !addresses.is_empty() => Ok(Some(addresses.to_vec())),
        _ if config.allow_empty_addresses => Ok(None),
        _ => Err(KdcError::PolicyViolation("tickets without client addresses are not allowed")),
    }
}

#[derive(Debug)]
pub struct IssueTicketParams<'a> {
    pub request: &'a KdcRequest,
    pub config: &'a KdcConfig,
    pub now: OffsetDateTime,
    pub etype: EncryptionType,
    pub cname: &'a PrincipalName,
    pub sname: &'a PrincipalName,
    pub server: &'a PrincipalEntry,
    pub pre_authenticated: bool,
    pub cipher: &'a dyn CipherService,
}

/// Issued ticket along with its plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTicket {
    pub ticket: Ticket,
    pub enc_part: EncTicketPart,
}

/// Assembles the ticket and seals it under the server key.
#[instrument(level = "debug", skip_all, fields(sname = %params.sname))]
pub fn issue_ticket(params: IssueTicketParams<'_>) -> Result<IssuedTicket, KdcError> {
    let IssueTicketParams {
        request,
        config,
        now,
        etype,
        cname,
        sname,
        server,
        pre_authenticated,
        cipher,
    } = params;

    let options = request.kdc_options;
    let tgs_only = options.intersection(KdcOptions::TGS_ONLY);
    if !tgs_only.is_empty() {
        return Err(KdcError::BadOption(tgs_only));
    }

    let window = validity_window(request, config, now)?;
    let caddr = client_addresses(request, config)?;

    let flags = TicketFlags::from(TicketCapabilities {
        pre_authenticated,
        forwardable: options.contains(KdcOptions::FORWARDABLE),
        proxiable: options.contains(KdcOptions::PROXIABLE),
        may_postdate: options.contains(KdcOptions::ALLOW_POSTDATE),
        postdated: window.postdated,
        renewable: window.renewable(),
    });

    let server_key = server.key(etype).ok_or_else(|| {
        KdcError::NullKey(format!("server {} has no {} key", server.principal, etype))
    })?;
    let session_key = cipher
        .random_key(etype)
        .map_err(|err| KdcError::Internal(format!("session key generation failed: {err}")))?;

    let enc_part = EncTicketPart {
        flags,
        key: session_key,
        crealm: config.realm.clone(),
        cname: cname.clone(),
        transited: TransitedEncoding::empty(),
        auth_time: now,
        start_time: Some(window.start_time),
        end_time: window.end_time,
        renew_till: window.renew_till,
        caddr,
    };

    let sealed = seal(cipher, server_key, &enc_part, TICKET_REP)
        .map_err(|err| KdcError::Internal(format!("ticket encryption failed: {err}")))?;

    debug!(?flags, start_time = %window.start_time, end_time = %window.end_time, "Ticket issued");

    Ok(IssuedTicket {
        ticket: Ticket {
            realm: config.realm.clone(),
            sname: sname.clone(),
            enc_part: sealed,
        },
        enc_part,
    })
}
