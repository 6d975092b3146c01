//! Port forwarding: listeners, outbound connections and permissions.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
#[cfg(unix)]
use std::path::Path;

use heapless::Deque;
use socket2::{Domain, Protocol, Socket, Type};

use crate::channel::*;
use crate::channels::Channels;
use crate::config::{self, AddrFamily, MuxConfig};
use crate::error;
use crate::fdio::{ChanIo, Handle, Listener};
use crate::handlers::Accepted;
use crate::packets::{self, ChannelOpenType, GlobalRequest, GlobalRequestType, Packet, TcpipForward};
use crate::sshnames::*;
use crate::traffic::Transport;

/// Outstanding `tcpip-forward` requests awaiting a reply
const MAX_PENDING_FORWARDS: usize = 16;

/// A destination that peer open requests may connect to.
///
/// A host of `"*"` matches any host, a port of 0 any port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermittedOpen {
    pub host: String,
    pub port: u16,
    /// For remote forwards, the port the peer listens on
    pub listen_port: u16,
}

#[derive(Debug, PartialEq, Eq)]
enum OpenMatch {
    /// The entry has no host
    Invalid,
    NoMatch,
    Match,
}

impl PermittedOpen {
    fn matches(&self, host: &str, port: u16) -> OpenMatch {
        if self.host.is_empty() {
            return OpenMatch::Invalid;
        }
        if self.port != 0 && self.port != port {
            return OpenMatch::NoMatch;
        }
        if self.host != "*" && self.host != host {
            return OpenMatch::NoMatch;
        }
        OpenMatch::Match
    }
}

// for open handlers
#[derive(Debug)]
pub(crate) enum DispatchOpenError {
    Error(Error),
    Failure(ChanFail),
}

impl From<Error> for DispatchOpenError {
    fn from(e: Error) -> Self {
        match e {
            Error::NoChannels => Self::Failure(ChanFail::SSH_OPEN_RESOURCE_SHORTAGE),
            e => Self::Error(e),
        }
    }
}

impl From<ChanFail> for DispatchOpenError {
    fn from(f: ChanFail) -> Self {
        Self::Failure(f)
    }
}

#[derive(Debug)]
struct PendingForward {
    listen_port: u16,
    target: FwdTarget,
}

/// Which addresses a forwarding listener binds
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum BindAddr {
    Wildcard,
    Loopback,
    Host(String),
}

/// Applies the listen address policy.
///
/// Without gateway ports a server only binds loopback, whatever the peer asked.
pub(crate) fn bind_addr(listen_host: Option<&str>, conf: &MuxConfig) -> BindAddr {
    let gw = conf.gateway_ports;
    let is_client = conf.is_client;
    match listen_host {
        None if gw => BindAddr::Wildcard,
        None => BindAddr::Loopback,
        Some(h) if gw || is_client => {
            let old_wildcard = conf.compat.old_forward_addr && h == "0.0.0.0" && !is_client;
            if old_wildcard || h.is_empty() || h == "*" || (!is_client && gw) {
                BindAddr::Wildcard
            } else if h == "localhost" {
                BindAddr::Loopback
            } else {
                BindAddr::Host(h.into())
            }
        }
        // explicit loopback is always allowed
        Some(h) if h == "127.0.0.1" || h == "::1" => BindAddr::Host(h.into()),
        Some(_) => BindAddr::Loopback,
    }
}

fn bind_candidates(b: &BindAddr, port: u16, family: AddrFamily) -> Vec<SocketAddr> {
    let addrs: Vec<SocketAddr> = match b {
        BindAddr::Wildcard => vec![
            (Ipv4Addr::UNSPECIFIED, port).into(),
            (Ipv6Addr::UNSPECIFIED, port).into(),
        ],
        BindAddr::Loopback => {
            vec![(Ipv4Addr::LOCALHOST, port).into(), (Ipv6Addr::LOCALHOST, port).into()]
        }
        BindAddr::Host(h) => match (h.as_str(), port).to_socket_addrs() {
            Ok(a) => a.collect(),
            Err(e) => {
                info!("Failed to resolve listen address {h}: {e}");
                Vec::new()
            }
        },
    };
    addrs.into_iter().filter(|a| family.allows(a)).collect()
}

fn bind_tcp(addr: SocketAddr) -> io::Result<mio::net::TcpListener> {
    let sock = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    sock.set_reuse_address(true)?;
    if addr.is_ipv6() {
        // so a v4 wildcard can be bound alongside
        sock.set_only_v6(true)?;
    }
    sock.set_nonblocking(true)?;
    sock.bind(&addr.into())?;
    sock.listen(128)?;
    Ok(mio::net::TcpListener::from_std(sock.into()))
}

/// Resolves a destination to connect candidates, in resolver order.
fn resolve(host: &str, port: u16, family: AddrFamily) -> io::Result<Vec<SocketAddr>> {
    let addrs = (host, port).to_socket_addrs()?.filter(|a| family.allows(a)).collect();
    Ok(addrs)
}

/// Permission lists and forwarding state.
#[derive(Debug, Default)]
pub(crate) struct Forwarding {
    permitted: Vec<PermittedOpen>,
    adm_permitted: Vec<PermittedOpen>,
    all_opens_permitted: bool,
    pending: Deque<PendingForward, MAX_PENDING_FORWARDS>,
}

impl Forwarding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permits peer opens to `host:port`, ending any
    /// [`permit_all_opens()`](Self::permit_all_opens).
    pub fn add_permitted_open(&mut self, host: &str, port: u16) {
        debug!("allow port forwarding to host {host} port {port}");
        self.permitted.push(PermittedOpen { host: host.into(), port, listen_port: 0 });
        self.all_opens_permitted = false;
    }

    /// Adds an administrative restriction. Once any exist,
    /// opens must also match one of them.
    pub fn add_adm_permitted_open(&mut self, host: &str, port: u16) -> usize {
        debug!("config allows port forwarding to host {host} port {port}");
        self.adm_permitted.push(PermittedOpen { host: host.into(), port, listen_port: 0 });
        self.adm_permitted.len()
    }

    /// Has no effect once specific opens have been permitted.
    pub fn permit_all_opens(&mut self) {
        if self.permitted.is_empty() {
            self.all_opens_permitted = true;
        }
    }

    pub fn clear_permitted_opens(&mut self) {
        self.permitted.clear();
    }

    pub fn clear_adm_permitted_opens(&mut self) {
        self.adm_permitted.clear();
    }

    fn check_permitted(&self, host: &str, port: u16) -> Result<(), ChanFail> {
        let mut permit = self.all_opens_permitted;
        let mut invalid = false;
        if !permit {
            for p in &self.permitted {
                match p.matches(host, port) {
                    OpenMatch::Match => {
                        permit = true;
                        break;
                    }
                    OpenMatch::Invalid => invalid = true,
                    OpenMatch::NoMatch => (),
                }
            }
        }

        if !permit {
            if invalid {
                info!("Request to connect to {host} port {port} denied, invalid permit entry");
            } else {
                info!("Request to connect to {host} port {port} denied, no matching permit");
            }
            return Err(ChanFail::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED);
        }

        if !self.adm_permitted.is_empty()
            && !self.adm_permitted.iter().any(|p| p.matches(host, port) == OpenMatch::Match)
        {
            info!("Request to connect to {host} port {port} administratively prohibited");
            return Err(ChanFail::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED);
        }
        Ok(())
    }

    /// Starts a connection for a peer's `direct-tcpip` open, if permitted.
    pub(crate) fn connect_to(
        &self,
        chans: &mut Channels,
        conf: &MuxConfig,
        host: &str,
        port: u16,
        label: &str,
    ) -> Result<ChanNum, DispatchOpenError> {
        self.check_permitted(host, port)?;
        connect_host(chans, conf, host, port, SSH_CHANNEL_DIRECT_TCPIP, label)
    }

    /// Starts a connection for a `forwarded-tcpip` open, to the target
    /// of our remote forward on `listen_port`.
    pub(crate) fn connect_by_listen_port(
        &self,
        chans: &mut Channels,
        conf: &MuxConfig,
        listen_port: u16,
        label: &str,
    ) -> Result<ChanNum, DispatchOpenError> {
        let Some(p) = self.permitted.iter().find(|p| p.listen_port == listen_port) else {
            warn!("Peer requests forwarding for unknown listen port {listen_port}");
            return Err(ChanFail::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED.into());
        };
        connect_host(chans, conf, &p.host, p.port, SSH_CHANNEL_FORWARDED_TCPIP, label)
    }

    /// Binds listeners for a local (`-L` style) forward, returning the listen port.
    ///
    /// An empty `dest_host` with `dest_port` 0 makes a SOCKS listener.
    pub(crate) fn create_local_forward(
        &self,
        chans: &mut Channels,
        conf: &MuxConfig,
        listen_host: Option<&str>,
        listen_port: u16,
        dest_host: &str,
        dest_port: u16,
    ) -> Result<u16> {
        let (target, ctype) = if dest_host.is_empty() && dest_port == 0 {
            (None, "dynamic-tcpip")
        } else {
            (Some(FwdTarget { host: dest_host.into(), port: dest_port }), SSH_CHANNEL_DIRECT_TCPIP)
        };
        bind_listeners(chans, conf, ChanKind::PortListener, listen_host, listen_port, target, ctype)
    }

    /// Asks the peer to listen and forward connections back to `dest_host:dest_port`.
    ///
    /// The reply arrives later through [`on_request_reply()`](Self::on_request_reply).
    pub(crate) fn create_remote_forward(
        &mut self,
        tx: &mut dyn Transport,
        listen_host: Option<&str>,
        listen_port: u16,
        dest_host: &str,
        dest_port: u16,
    ) -> Result<()> {
        let target = FwdTarget { host: dest_host.into(), port: dest_port };
        self.pending
            .push_back(PendingForward { listen_port, target })
            .map_err(|_| Error::msg("Too many pending forward requests"))?;
        let req = GlobalRequestType::TcpipForward(TcpipForward {
            address: remote_bind_address(listen_host).into(),
            port: listen_port as u32,
        });
        tx.send(GlobalRequest { want_reply: true, req }.into())
    }

    pub(crate) fn cancel_remote_forward(
        &mut self,
        tx: &mut dyn Transport,
        listen_host: Option<&str>,
        listen_port: u16,
    ) -> Result<()> {
        let Some(i) = self.permitted.iter().position(|p| p.listen_port == listen_port) else {
            return error::NoAddress { what: format!("remote forward port {listen_port}") }.fail();
        };
        self.permitted.remove(i);
        let req = GlobalRequestType::CancelTcpipForward(TcpipForward {
            address: remote_bind_address(listen_host).into(),
            port: listen_port as u32,
        });
        tx.send(GlobalRequest { want_reply: false, req }.into())
    }

    /// Handles the peer's reply to our oldest `tcpip-forward` request.
    ///
    /// `port` is the allocated port included with a successful reply.
    pub(crate) fn on_request_reply(&mut self, success: bool, port: Option<u32>) {
        let Some(pf) = self.pending.pop_front() else {
            warn!("Unexpected global request reply");
            return;
        };
        if !success {
            warn!("Remote port forwarding failed for listen port {}", pf.listen_port);
            return;
        }
        let listen_port = if pf.listen_port == 0 {
            match port.map(u16::try_from) {
                Some(Ok(p)) => {
                    info!(
                        "Allocated port {p} for remote forward to {}:{}",
                        pf.target.host, pf.target.port
                    );
                    p
                }
                _ => {
                    warn!("Remote forward succeeded without an allocated port");
                    return;
                }
            }
        } else {
            pf.listen_port
        };
        self.permitted.push(PermittedOpen {
            host: pf.target.host,
            port: pf.target.port,
            listen_port,
        });
        self.all_opens_permitted = false;
    }

    /// Handles `tcpip-forward` and `cancel-tcpip-forward` from the peer,
    /// replying if asked.
    pub(crate) fn on_global_request(
        &mut self,
        chans: &mut Channels,
        conf: &MuxConfig,
        tx: &mut dyn Transport,
        req: GlobalRequest,
    ) -> Result<()> {
        // Some(port) on success
        let res: Option<Option<u32>> = match &req.req {
            GlobalRequestType::TcpipForward(f) => self.remote_listen(chans, conf, f),
            GlobalRequestType::CancelTcpipForward(f) => {
                let n = cancel_remote_listeners(chans, &f.address, f.port)?;
                (n > 0).then_some(None)
            }
            GlobalRequestType::Unknown(name) => {
                debug!("Unhandled global request {name}");
                None
            }
        };

        if req.want_reply {
            let p: Packet = match res {
                Some(port) => packets::RequestSuccess { port }.into(),
                None => packets::RequestFailure {}.into(),
            };
            tx.send(p)?;
        }
        Ok(())
    }

    fn remote_listen(
        &self,
        chans: &mut Channels,
        conf: &MuxConfig,
        f: &TcpipForward,
    ) -> Option<Option<u32>> {
        if conf.is_client || !conf.allow_remote_forwarding {
            info!("Refusing remote forward request for port {}", f.port);
            return None;
        }
        let Ok(port) = u16::try_from(f.port) else {
            warn!("Bad remote forward port {}", f.port);
            return None;
        };
        let r = bind_listeners(
            chans,
            conf,
            ChanKind::RemotePortListener,
            Some(f.address.as_str()),
            port,
            None,
            SSH_CHANNEL_FORWARDED_TCPIP,
        );
        match r {
            Ok(p) => Some((port == 0).then_some(p as u32)),
            Err(e) => {
                info!("Remote forward on {}:{port} failed: {e}", f.address);
                None
            }
        }
    }

    /// Turns an accepted connection into a channel and sends its open.
    pub(crate) fn accept(
        &self,
        chans: &mut Channels,
        conf: &MuxConfig,
        tx: &mut dyn Transport,
        a: Accepted,
    ) -> Result<()> {
        let origin = a.origin.clone();
        let (ty, window, max_packet, label) = match a.kind {
            ChanKind::PortListener => {
                let listen_port = a.listen.as_ref().map_or(0, |l| l.port);
                let Some(t) = &a.target else {
                    let label = format!(
                        "dynamic-tcpip: listening port {listen_port}, connect from {} port {}",
                        origin.host, origin.port
                    );
                    let num = chans.create(
                        ChanKind::Dynamic,
                        ChanIo::socket_boxed(a.h),
                        None,
                        config::TCP_WINDOW,
                        config::TCP_MAX_PACKET,
                        ExtUsage::Ignore,
                        &label,
                        false,
                    );
                    return match num {
                        Ok(num) => {
                            chans.get_any_mut(num)?.origin = Some(origin);
                            Ok(())
                        }
                        Err(e) => {
                            warn!("Dropping accepted connection: {e}");
                            Ok(())
                        }
                    };
                };
                let label = format!(
                    "direct-tcpip: listening port {listen_port} for {} port {}, connect from {} port {}",
                    t.host, t.port, origin.host, origin.port
                );
                let ty = ChannelOpenType::DirectTcpip(packets::DirectTcpip {
                    address: t.host.clone(),
                    port: t.port as u32,
                    origin: origin.host.clone(),
                    origin_port: origin.port as u32,
                });
                (ty, config::TCP_WINDOW, config::TCP_MAX_PACKET, label)
            }
            ChanKind::RemotePortListener => {
                let l = a.listen.as_ref().trap()?;
                let label = format!(
                    "forwarded-tcpip: listening port {}, connect from {} port {}",
                    l.port, origin.host, origin.port
                );
                let ty = ChannelOpenType::ForwardedTcpip(packets::ForwardedTcpip {
                    address: l.host.clone(),
                    port: l.port as u32,
                    origin: origin.host.clone(),
                    origin_port: origin.port as u32,
                });
                (ty, config::TCP_WINDOW, config::TCP_MAX_PACKET, label)
            }
            ChanKind::X11Listener => {
                let origin_port =
                    (!conf.compat.x11_no_originator_port).then_some(origin.port as u32);
                let label = format!("X11 connection from {} port {}", origin.host, origin.port);
                let ty = ChannelOpenType::X11(packets::X11 {
                    origin: origin.host.clone(),
                    origin_port,
                });
                (ty, config::X11_WINDOW, config::X11_MAX_PACKET, label)
            }
            ChanKind::AuthListener => (
                ChannelOpenType::AuthAgent,
                config::AGENT_WINDOW,
                config::AGENT_MAX_PACKET,
                "authentication agent connection".to_string(),
            ),
            _ => return Error::bug_msg("accept on non-listener"),
        };

        let num = match chans.create(
            ChanKind::Opening,
            ChanIo::socket_boxed(a.h),
            None,
            window,
            max_packet,
            ExtUsage::Ignore,
            &label,
            false,
        ) {
            Ok(n) => n,
            Err(e) => {
                warn!("Dropping accepted connection: {e}");
                return Ok(());
            }
        };
        let c = chans.get_any_mut(num)?;
        c.ctype = a.ctype;
        c.origin = Some(origin);
        c.target = a.target.clone();
        tx.send(c.open_packet(ty))?;

        if a.single_use {
            debug!("channel {}: single use listener closed", a.listener);
            chans.free(a.listener)?;
        }
        Ok(())
    }
}

/// The address sent in `tcpip-forward` for a requested listen host
fn remote_bind_address(listen_host: Option<&str>) -> &str {
    match listen_host {
        None => "localhost",
        Some("*") => "",
        Some(h) => h,
    }
}

/// Binds a listener channel on each candidate address, returning the port.
///
/// Port 0 is allocated by the first bind and reused for the rest.
fn bind_listeners(
    chans: &mut Channels,
    conf: &MuxConfig,
    kind: ChanKind,
    listen_host: Option<&str>,
    listen_port: u16,
    target: Option<FwdTarget>,
    ctype: &'static str,
) -> Result<u16> {
    let ba = bind_addr(listen_host, conf);
    trace!("listen {listen_host:?} port {listen_port} binds {ba:?}");
    let addrs = bind_candidates(&ba, listen_port, conf.address_family);

    let mut port = listen_port;
    let mut bound = 0;
    for mut a in addrs {
        if port != 0 {
            a.set_port(port);
        }
        let l = match bind_tcp(a) {
            Ok(l) => l,
            Err(e) => {
                // commonly no IPv6 on the host
                debug!("bind {a} failed: {e}");
                continue;
            }
        };
        if port == 0 {
            port = l.local_addr()?.port();
            debug!("allocated listen port {port}");
        }
        let label = match &target {
            Some(t) => format!("port listener {a} for {}:{}", t.host, t.port),
            None => format!("{ctype} listener {a}"),
        };
        let num = chans.create(
            kind,
            ChanIo::listener(Listener::Tcp(l)),
            None,
            0,
            0,
            ExtUsage::Ignore,
            &label,
            false,
        )?;
        let c = chans.get_any_mut(num)?;
        c.ctype = ctype;
        c.target = target.clone();
        c.listen = Some(ListenAddr { host: listen_host.unwrap_or("").into(), port });
        bound += 1;
    }

    if bound == 0 {
        error!("Could not listen on port {listen_port}");
        return error::NoAddress { what: format!("listen port {listen_port}") }.fail();
    }
    Ok(port)
}

/// Frees remote listeners matching a `cancel-tcpip-forward`
fn cancel_remote_listeners(chans: &mut Channels, host: &str, port: u32) -> Result<usize> {
    let nums: Vec<ChanNum> = chans
        .iter()
        .filter(|c| {
            c.kind == ChanKind::RemotePortListener
                && c.listen.as_ref().is_some_and(|l| l.port as u32 == port && l.host == host)
        })
        .map(|c| c.num())
        .collect();
    for n in &nums {
        chans.free(*n)?;
    }
    Ok(nums.len())
}

/// Starts a multi-address connect to `host:port`.
fn connect_host(
    chans: &mut Channels,
    conf: &MuxConfig,
    host: &str,
    port: u16,
    ctype: &'static str,
    label: &str,
) -> Result<ChanNum, DispatchOpenError> {
    let addrs = match resolve(host, port, conf.address_family) {
        Ok(a) if !a.is_empty() => a,
        Ok(_) => {
            info!("connect_to {host}: no usable address");
            return Err(ChanFail::SSH_OPEN_CONNECT_FAILED.into());
        }
        Err(e) => {
            info!("connect_to {host}: unknown host ({e})");
            return Err(ChanFail::SSH_OPEN_CONNECT_FAILED.into());
        }
    };
    connect_addrs(chans, host, port, addrs, ctype, label)
}

/// Creates a `Connecting` channel trying each address in order.
pub(crate) fn connect_addrs(
    chans: &mut Channels,
    host: &str,
    port: u16,
    addrs: Vec<SocketAddr>,
    ctype: &'static str,
    label: &str,
) -> Result<ChanNum, DispatchOpenError> {
    let mut cs = ConnectState::new(host, port, addrs);
    let Some(sock) = cs.connect_next() else {
        info!("connect_to {host} port {port}: failed");
        return Err(ChanFail::SSH_OPEN_CONNECT_FAILED.into());
    };
    let num = chans.create(
        ChanKind::Connecting,
        ChanIo::socket(sock),
        None,
        config::TCP_WINDOW,
        config::TCP_MAX_PACKET,
        ExtUsage::Ignore,
        label,
        false,
    )?;
    let c = chans.get_any_mut(num)?;
    c.ctype = ctype;
    c.target = Some(FwdTarget { host: host.into(), port });
    c.connect = Some(cs);
    Ok(num)
}

/// Connects to the local X server for an `x11` open.
///
/// `display` is in the usual `host:N.screen` form, an empty host or
/// `unix` means the local socket.
pub(crate) fn connect_display(display: &str) -> io::Result<Box<dyn Handle>> {
    let bad = || io::Error::new(io::ErrorKind::InvalidInput, "bad display");
    let (host, rest) = display.rsplit_once(':').ok_or_else(bad)?;
    let num: u16 = rest.split('.').next().and_then(|n| n.parse().ok()).ok_or_else(bad)?;

    #[cfg(unix)]
    if host.is_empty() || host == "unix" {
        let path = format!("/tmp/.X11-unix/X{num}");
        let s = std::os::unix::net::UnixStream::connect(path)?;
        s.set_nonblocking(true)?;
        return Ok(Box::new(mio::net::UnixStream::from_std(s)));
    }

    let port = config::X11_BASE_PORT.checked_add(num).ok_or_else(bad)?;
    let s = std::net::TcpStream::connect((host, port))?;
    s.set_nonblocking(true)?;
    s.set_nodelay(true)?;
    Ok(Box::new(mio::net::TcpStream::from_std(s)))
}

#[cfg(unix)]
pub(crate) fn connect_agent(path: &Path) -> io::Result<Box<dyn Handle>> {
    let s = std::os::unix::net::UnixStream::connect(path)?;
    s.set_nonblocking(true)?;
    Ok(Box::new(mio::net::UnixStream::from_std(s)))
}

/// Binds X11 listeners on the first free display from `offset`.
///
/// Returns the display number.
pub(crate) fn x11_create_display(
    chans: &mut Channels,
    conf: &MuxConfig,
    offset: u16,
    use_localhost: bool,
    single_use: bool,
) -> Result<u16> {
    let ba = if use_localhost { BindAddr::Loopback } else { BindAddr::Wildcard };
    for display in offset..config::MAX_DISPLAYS {
        let port = config::X11_BASE_PORT + display;
        let mut ls = Vec::new();
        let mut in_use = false;
        for a in bind_candidates(&ba, port, conf.address_family) {
            match bind_tcp(a) {
                Ok(l) => ls.push((a, l)),
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    in_use = true;
                    break;
                }
                Err(e) => debug!("bind {a} failed: {e}"),
            }
        }
        if in_use || ls.is_empty() {
            continue;
        }

        for (a, l) in ls {
            let num = chans.create(
                ChanKind::X11Listener,
                ChanIo::listener(Listener::Tcp(l)),
                None,
                0,
                0,
                ExtUsage::Ignore,
                &format!("X11 inet listener {a}"),
                false,
            )?;
            let c = chans.get_any_mut(num)?;
            c.ctype = SSH_CHANNEL_X11;
            c.single_use = single_use;
            c.listen = Some(ListenAddr { host: a.ip().to_string(), port });
        }
        debug!("X11 display {display} listening");
        return Ok(display);
    }
    error!("Failed to allocate an X11 display");
    error::NoAddress { what: "X11 display" }.fail()
}

/// Listens on a unix socket for agent clients.
#[cfg(unix)]
pub(crate) fn create_agent_listener(chans: &mut Channels, path: &Path) -> Result<ChanNum> {
    let l = mio::net::UnixListener::bind(path)?;
    let num = chans.create(
        ChanKind::AuthListener,
        ChanIo::listener(Listener::Unix(l, path.into())),
        None,
        0,
        0,
        ExtUsage::Ignore,
        "auth socket",
        false,
    )?;
    chans.get_any_mut(num)?.ctype = SSH_CHANNEL_AUTH_AGENT;
    Ok(num)
}
