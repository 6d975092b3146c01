//! Constants and runtime configuration for the channel layer.
//!
//! Loading configuration from files or the command line is left to the
//! application, which fills out a [`MuxConfig`].

use std::path::PathBuf;

pub const DEFAULT_WINDOW: usize = 64 * DEFAULT_MAX_PACKET;
pub const DEFAULT_MAX_PACKET: usize = 32 * 1024;

// forwarded TCP connections
pub const TCP_WINDOW: usize = 64 * TCP_MAX_PACKET;
pub const TCP_MAX_PACKET: usize = 32 * 1024;

// X11 connections are short chatty requests
pub const X11_WINDOW: usize = 4 * X11_MAX_PACKET;
pub const X11_MAX_PACKET: usize = 16 * 1024;

pub const AGENT_WINDOW: usize = 4 * AGENT_MAX_PACKET;
pub const AGENT_MAX_PACKET: usize = 16 * 1024;

/// The channel table grows by this many slots at a time.
pub const CHANNELS_ALLOC_INCREMENT: usize = 10;

/// Hard ceiling on the channel table.
///
/// Reaching it indicates an accounting bug (or a peer trying to exhaust us),
/// ordinary socket exhaustion fails earlier at the OS level.
pub const MAX_CHANNELS: usize = 10000;

/// Largest single read from a local descriptor.
pub const READ_CHUNK: usize = 16 * 1024;

/// A channel stops reading from its descriptor when the input buffer
/// would exceed this.
pub const MAX_BUFFER: usize = 2 * 1024 * 1024;

/// Maximum length of each NUL terminated SOCKS4 field (user, SOCKS4A host),
/// including the terminator.
pub const SOCKS4_MAX_FIELD: usize = 256;

/// First TCP port for X11 displays, display N listens on `X11_BASE_PORT + N`
pub const X11_BASE_PORT: u16 = 6000;

/// Number of display numbers tried when allocating an X11 listener
pub const MAX_DISPLAYS: u16 = 1000;

/// Length of locally generated X11 fake authentication data
/// when the real cookie is not known.
pub const X11_FAKE_DATA_LEN: usize = 16;

/// Channel protocol revision.
///
/// `Legacy` has no window accounting and uses the coarse draining states
/// with an explicit close confirmation, `Current` uses per-direction
/// half-close with EOF and a close echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtoRevision {
    Legacy,
    #[default]
    Current,
}

/// Peer bug compatibility flags
#[derive(Debug, Clone, Copy, Default)]
pub struct Compat {
    /// Peer can't parse the originator port in `x11` channel opens.
    pub x11_no_originator_port: bool,
    /// Peer sends `0.0.0.0` to mean "all addresses" for remote forwards.
    pub old_forward_addr: bool,
}

/// Address families used for listeners and outbound connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrFamily {
    #[default]
    Any,
    Inet,
    Inet6,
}

impl AddrFamily {
    pub fn allows(&self, addr: &std::net::SocketAddr) -> bool {
        match self {
            AddrFamily::Any => true,
            AddrFamily::Inet => addr.is_ipv4(),
            AddrFamily::Inet6 => addr.is_ipv6(),
        }
    }
}

/// Runtime configuration for a [`Runner`](crate::Runner).
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Whether this side is the client of the connection.
    ///
    /// Affects listener bind policy and which channel opens are accepted.
    pub is_client: bool,
    pub revision: ProtoRevision,
    pub compat: Compat,
    /// Allow forwarded listeners to bind non-loopback addresses.
    pub gateway_ports: bool,
    pub address_family: AddrFamily,
    /// Accept `tcpip-forward` requests from the peer (server role)
    pub allow_remote_forwarding: bool,
    /// Local X11 display to connect to for `x11` channel opens (client role)
    pub x11_display: Option<String>,
    /// Local agent socket for `auth-agent@openssh.com` opens (client role)
    pub agent_socket: Option<PathBuf>,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            is_client: true,
            revision: ProtoRevision::Current,
            compat: Compat::default(),
            gateway_ports: false,
            address_family: AddrFamily::Any,
            allow_remote_forwarding: false,
            x11_display: None,
            agent_socket: None,
        }
    }
}

impl MuxConfig {
    pub fn new_client() -> Self {
        Self::default()
    }

    pub fn new_server() -> Self {
        Self { is_client: false, allow_remote_forwarding: true, ..Default::default() }
    }
}
