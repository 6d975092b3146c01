//! Named SSH channel types, global requests and failure codes.
//!
//! This module also serves as an index of the relevant SSH specifications.

/// [RFC4254](https://tools.ietf.org/html/rfc4254)
pub const SSH_CHANNEL_SESSION: &str = "session";
/// [RFC4254](https://tools.ietf.org/html/rfc4254) local port forwarding
pub const SSH_CHANNEL_DIRECT_TCPIP: &str = "direct-tcpip";
/// [RFC4254](https://tools.ietf.org/html/rfc4254) remote port forwarding
pub const SSH_CHANNEL_FORWARDED_TCPIP: &str = "forwarded-tcpip";
/// [RFC4254](https://tools.ietf.org/html/rfc4254)
pub const SSH_CHANNEL_X11: &str = "x11";
/// OpenSSH [PROTOCOL.agent](https://cvsweb.openbsd.org/src/usr.bin/ssh/PROTOCOL.agent?annotate=HEAD)
pub const SSH_CHANNEL_AUTH_AGENT: &str = "auth-agent@openssh.com";

/// [RFC4254](https://tools.ietf.org/html/rfc4254)
pub const SSH_GLOBAL_TCPIP_FORWARD: &str = "tcpip-forward";
/// [RFC4254](https://tools.ietf.org/html/rfc4254)
pub const SSH_GLOBAL_CANCEL_TCPIP_FORWARD: &str = "cancel-tcpip-forward";

/// [RFC4254](https://tools.ietf.org/html/rfc4254)
pub const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// [RFC4254](https://tools.ietf.org/html/rfc4254)
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanFail {
    SSH_OPEN_ADMINISTRATIVELY_PROHIBITED = 1,
    SSH_OPEN_CONNECT_FAILED = 2,
    SSH_OPEN_UNKNOWN_CHANNEL_TYPE = 3,
    SSH_OPEN_RESOURCE_SHORTAGE = 4,
}

impl ChanFail {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED),
            2 => Some(Self::SSH_OPEN_CONNECT_FAILED),
            3 => Some(Self::SSH_OPEN_UNKNOWN_CHANNEL_TYPE),
            4 => Some(Self::SSH_OPEN_RESOURCE_SHORTAGE),
            _ => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED => "administratively prohibited",
            Self::SSH_OPEN_CONNECT_FAILED => "connect failed",
            Self::SSH_OPEN_UNKNOWN_CHANNEL_TYPE => "unknown channel type",
            Self::SSH_OPEN_RESOURCE_SHORTAGE => "resource shortage",
        }
    }
}

/// Reason text for an open failure code received from the peer
pub fn open_failure_reason(code: u32) -> &'static str {
    ChanFail::from_code(code).map_or("unknown reason", |f| f.describe())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chanfail_codes() {
        for c in 1..=4 {
            assert_eq!(ChanFail::from_code(c).unwrap() as u32, c);
        }
        assert!(ChanFail::from_code(0).is_none());
        assert_eq!(open_failure_reason(2), "connect failed");
        assert_eq!(open_failure_reason(77), "unknown reason");
    }
}
