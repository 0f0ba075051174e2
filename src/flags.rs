use bitflags::bitflags;

bitflags! {
    /// This flags appears in the KRB_AS_REQ and KRB_TGS_REQ requests to
    /// the KDC and indicates the flags that the client wants set on the tickets.
    ///
    /// [KDCOptions](https://www.rfc-editor.org/rfc/rfc4120#section-5.4.1)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct KdcOptions: u32 {
        const FORWARDABLE = 0x40000000;
        const FORWARDED = 0x20000000;
        const PROXIABLE = 0x10000000;
        const PROXY = 0x08000000;
        const ALLOW_POSTDATE = 0x04000000;
        const POSTDATED = 0x02000000;
        const RENEWABLE = 0x00800000;
        const OPT_HARDWARE_AUTH = 0x00100000;
        const CANONICALIZE = 0x00010000;
        const DISABLE_TRANSITED_CHECK = 0x00000020;
        const RENEWABLE_OK = 0x00000010;
        const ENC_TKT_IN_SKEY = 0x00000008;
        const RENEW = 0x00000002;
        const VALIDATE = 0x00000001;
    }
}

impl KdcOptions {
    /// Options that only make sense in the ticket-granting exchange.
    ///
    /// An AS_REQ carrying any of them is answered with KDC_ERR_BADOPTION.
    pub const TGS_ONLY: KdcOptions = KdcOptions::RENEW
        .union(KdcOptions::VALIDATE)
        .union(KdcOptions::PROXY)
        .union(KdcOptions::FORWARDED)
        .union(KdcOptions::ENC_TKT_IN_SKEY);
}

bitflags! {
    /// Flags of the issued ticket.
    ///
    /// [TicketFlags](https://www.rfc-editor.org/rfc/rfc4120#section-5.3)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct TicketFlags: u32 {
        const FORWARDABLE = 0x40000000;
        const FORWARDED = 0x20000000;
        const PROXIABLE = 0x10000000;
        const PROXY = 0x08000000;
        const MAY_POSTDATE = 0x04000000;
        const POSTDATED = 0x02000000;
        const INVALID = 0x01000000;
        const RENEWABLE = 0x00800000;
        const INITIAL = 0x00400000;
        const PRE_AUTHENT = 0x00200000;
        const HW_AUTHENT = 0x00100000;
        const TRANSITED_POLICY_CHECKED = 0x00080000;
        const OK_AS_DELEGATE = 0x00040000;
    }
}

/// Capabilities of a ticket issued by the Authentication Service.
///
/// Every field is decided on its own during ticket issuance and the whole set is turned into
/// [TicketFlags] exactly once, when the [EncTicketPart](crate::messages::EncTicketPart) is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TicketCapabilities {
    pub pre_authenticated: bool,
    pub forwardable: bool,
    pub proxiable: bool,
    pub may_postdate: bool,
    pub postdated: bool,
    pub renewable: bool,
}

impl From<TicketCapabilities> for TicketFlags {
    fn from(capabilities: TicketCapabilities) -> Self {
        let TicketCapabilities {
            pre_authenticated,
            forwardable,
            proxiable,
            may_postdate,
            postdated,
            renewable,
        } = capabilities;

        // RFC (https://www.rfc-editor.org/rfc/rfc4120#section-2.1):
        // > The INITIAL flag indicates that a ticket was issued using the AS protocol...
        let mut flags = TicketFlags::INITIAL;

        flags.set(TicketFlags::PRE_AUTHENT, pre_authenticated);
        flags.set(TicketFlags::FORWARDABLE, forwardable);
        flags.set(TicketFlags::PROXIABLE, proxiable);
        flags.set(TicketFlags::MAY_POSTDATE, may_postdate);
        // RFC (https://www.rfc-editor.org/rfc/rfc4120#section-2.4):
        // > ...postdated tickets are issued with the INVALID flag set.
        flags.set(TicketFlags::POSTDATED | TicketFlags::INVALID, postdated);
        flags.set(TicketFlags::RENEWABLE, renewable);

        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_is_always_set() {
        assert_eq!(TicketFlags::from(TicketCapabilities::default()), TicketFlags::INITIAL);
    }

    #[test]
    fn postdated_ticket_is_invalid() {
        let flags = TicketFlags::from(TicketCapabilities {
            pre_authenticated: true,
            postdated: true,
            ..Default::default()
        });

        assert_eq!(
            flags,
            TicketFlags::INITIAL | TicketFlags::PRE_AUTHENT | TicketFlags::POSTDATED | TicketFlags::INVALID
        );
    }

    #[test]
    fn tgs_only_options() {
        assert!(KdcOptions::TGS_ONLY.contains(KdcOptions::RENEW | KdcOptions::ENC_TKT_IN_SKEY));
        assert!(!KdcOptions::TGS_ONLY.intersects(KdcOptions::FORWARDABLE | KdcOptions::RENEWABLE_OK));
    }
}
