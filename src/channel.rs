#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;
use std::collections::VecDeque;
use std::net::SocketAddr;

use mio::Registry;

use crate::buffer::Buffer;
use crate::config::ProtoRevision;
use crate::fdio::{ChanIo, ExtFd, Origin, Ready};
use crate::packets::{self, ChannelOpenType, Packet};
use crate::traffic::Transport;

/// A SSH protocol channel number
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct ChanNum(pub u32);

impl fmt::Display for ChanNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The role and lifecycle stage of a channel.
///
/// `Open`, `X11Open` and the draining kinds behave differently depending on
/// the [`ProtoRevision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanKind {
    /// Listens for local X11 clients (server role)
    X11Listener,
    /// Listens for local connections to forward to the peer
    PortListener,
    /// Listens on behalf of the peer's `tcpip-forward` request
    RemotePortListener,
    /// Listens for local agent clients (server role)
    AuthListener,
    /// Accepted on a dynamic listener, SOCKS negotiation in progress
    Dynamic,
    /// We have sent an open, waiting for the peer to respond
    Opening,
    /// Non-blocking connect in progress for a peer's open request
    Connecting,
    Open,
    /// X11 connection that hasn't presented valid authentication yet
    X11Open,
    /// Legacy revision, local input is finished and draining to the peer
    InputDraining,
    /// Legacy revision, the peer closed and output is draining locally
    OutputDraining,
    /// Legacy revision, close sent and waiting for confirmation
    Closed,
    /// Dead, will be freed by the garbage collector
    Zombie,
    /// Allocated by the session layer, descriptors not yet attached
    Larval,
}

impl ChanKind {
    pub fn is_listener(&self) -> bool {
        matches!(
            self,
            Self::X11Listener | Self::PortListener | Self::RemotePortListener | Self::AuthListener
        )
    }

    /// Kinds that can't legitimately be addressed by the peer.
    pub fn is_private(&self) -> bool {
        self.is_listener()
            || matches!(self, Self::Larval | Self::Connecting | Self::Opening | Self::Dynamic)
    }
}

/// Per direction half-close state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfState {
    Open,
    /// No more data will arrive, buffered data still to be passed on
    WaitDrain,
    Closed,
}

/// How a channel's extended data descriptor is used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtUsage {
    /// Read and discarded
    Ignore,
    /// Read locally, sent to the peer as stderr
    Read,
    /// Peer's stderr written locally
    Write,
}

/// Flow control state for the direction towards the peer.
#[derive(Debug, Clone)]
pub(crate) struct ChanDir {
    /// Peer's channel number
    pub num: u32,
    pub max_packet: usize,
    pub window: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Flags {
    pub close_sent: bool,
    pub close_rcvd: bool,
    pub eof_sent: bool,
    pub eof_rcvd: bool,
}

/// A forwarding destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FwdTarget {
    pub host: String,
    pub port: u16,
}

/// A listener's bound address
#[derive(Debug, Clone)]
pub(crate) struct ListenAddr {
    /// As requested, may be empty
    pub host: String,
    pub port: u16,
}

/// Progress of a multi-address outbound connect
#[derive(Debug)]
pub struct ConnectState {
    pub host: String,
    pub port: u16,
    pub(crate) attempted: Option<SocketAddr>,
    pub(crate) remaining: VecDeque<SocketAddr>,
}

impl ConnectState {
    pub(crate) fn new(host: &str, port: u16, addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            host: host.into(),
            port,
            attempted: None,
            remaining: addrs.into_iter().collect(),
        }
    }

    /// Starts a connect to the next candidate that doesn't fail immediately.
    pub(crate) fn connect_next(&mut self) -> Option<mio::net::TcpStream> {
        while let Some(a) = self.remaining.pop_front() {
            self.attempted = Some(a);
            match mio::net::TcpStream::connect(a) {
                Ok(s) => {
                    debug!("connecting to {}:{} via {a}", self.host, self.port);
                    return Some(s);
                }
                Err(e) => debug!("connect to {a} failed: {e}"),
            }
        }
        None
    }
}

/// The outcome delivered to a status confirmation callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReply {
    Success,
    Failure,
    /// The channel was freed before a reply arrived
    Abandoned,
}

/// Returned by a detach callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detach {
    /// Keep the callback registered, the channel isn't freed
    Retain,
    /// Unregister the callback, the channel may be freed
    Release,
}

/// Called with `true` once the peer confirms an open, `false` on failure.
pub type OpenConfirmFn = Box<dyn FnOnce(ChanNum, bool)>;
/// Called when a channel becomes dead
pub type DetachFn = Box<dyn FnMut(ChanNum) -> Detach>;
pub type StatusFn = Box<dyn FnOnce(ChanNum, StatusReply)>;

/// Transforms channel data between the local descriptor and the peer.
pub trait ChanFilter {
    /// Data read locally, to be queued in `input` for the peer.
    ///
    /// An error is treated as a read failure.
    fn input(&mut self, num: ChanNum, data: &[u8], input: &mut Buffer) -> Result<()> {
        let _ = num;
        input.append(data);
        Ok(())
    }

    /// Data from the peer, to be queued in `out` for writing locally.
    ///
    /// An error is treated as a write failure.
    fn output(&mut self, num: ChanNum, data: &[u8], out: &mut Buffer) -> Result<()> {
        let _ = num;
        out.append(data);
        Ok(())
    }

    /// Called once when the channel is freed
    fn cleanup(&mut self, _num: ChanNum) {}
}

pub(crate) struct DetachState {
    pub f: DetachFn,
    /// Whether to send a close when checking for dead
    pub close: bool,
    pub notified: bool,
}

pub(crate) struct FilterState {
    pub f: Box<dyn ChanFilter>,
    /// Filtered output pending write
    pub pending: Buffer,
}

pub struct Channel {
    pub(crate) num: ChanNum,
    pub(crate) kind: ChanKind,
    pub(crate) io: ChanIo,
    pub(crate) efd: ExtFd,
    pub(crate) ready: Ready,

    pub(crate) local_window: usize,
    pub(crate) local_window_max: usize,
    /// Bytes written locally since the last window adjust
    pub(crate) local_consumed: usize,
    pub(crate) local_max_packet: usize,
    /// Locally generated bytes at the head of `output`, not peer data
    pub(crate) local_output: usize,

    /// Populated once the peer's channel number is known
    pub(crate) send: Option<ChanDir>,

    /// Read locally, for the peer
    pub(crate) input: Buffer,
    /// From the peer, to write locally
    pub(crate) output: Buffer,
    pub(crate) extended: Buffer,

    pub(crate) istate: HalfState,
    pub(crate) ostate: HalfState,
    pub(crate) flags: Flags,
    pub(crate) ext_usage: ExtUsage,

    pub(crate) label: String,
    pub(crate) ctype: &'static str,
    pub(crate) target: Option<FwdTarget>,
    pub(crate) listen: Option<ListenAddr>,
    pub(crate) origin: Option<Origin>,
    /// Listener is freed after its first accept
    pub(crate) single_use: bool,

    pub(crate) open_confirm: Option<OpenConfirmFn>,
    pub(crate) detach: Option<DetachState>,
    pub(crate) filter: Option<FilterState>,
    pub(crate) status: VecDeque<StatusFn>,

    pub(crate) connect: Option<ConnectState>,
    pub(crate) socks5_auth_done: bool,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("num", &self.num)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("istate", &self.istate)
            .field("ostate", &self.ostate)
            .field("flags", &self.flags)
            .field("io", &self.io)
            .finish_non_exhaustive()
    }
}

impl Channel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        num: ChanNum,
        kind: ChanKind,
        io: ChanIo,
        efd: ExtFd,
        window: usize,
        max_packet: usize,
        ext_usage: ExtUsage,
        label: &str,
    ) -> Self {
        Channel {
            num,
            kind,
            io,
            efd,
            ready: Ready::default(),
            local_window: window,
            local_window_max: window,
            local_consumed: 0,
            local_max_packet: max_packet,
            local_output: 0,
            send: None,
            input: Buffer::new(),
            output: Buffer::new(),
            extended: Buffer::new(),
            istate: HalfState::Open,
            ostate: HalfState::Open,
            flags: Flags::default(),
            ext_usage,
            label: label.into(),
            ctype: "",
            target: None,
            listen: None,
            origin: None,
            single_use: false,
            open_confirm: None,
            detach: None,
            filter: None,
            status: VecDeque::new(),
            connect: None,
            socks5_auth_done: false,
        }
    }

    /// Local channel number
    pub fn num(&self) -> ChanNum {
        self.num
    }

    pub fn kind(&self) -> ChanKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn istate(&self) -> HalfState {
        self.istate
    }

    pub fn ostate(&self) -> HalfState {
        self.ostate
    }

    /// Remote channel number, fails if the peer hasn't confirmed.
    ///
    /// Returned as a plain `u32` since it is a different namespace than `ChanNum`.
    /// This is the channel number included in most sent packets.
    pub fn send_num(&self) -> Result<u32> {
        Ok(self.send.as_ref().ok_or(Error::BadChannelState { num: self.num })?.num)
    }

    /// Space remaining in the peer's window, `None` before it is known.
    pub fn remote_window(&self) -> Option<usize> {
        self.send.as_ref().map(|s| s.window)
    }

    /// Current receive window advertised to the peer
    pub fn local_window(&self) -> usize {
        self.local_window
    }

    pub(crate) fn set_remote(&mut self, num: u32, window: usize, max_packet: usize) {
        self.send = Some(ChanDir { num, window, max_packet });
    }

    /// The `ChannelOpen` for a locally initiated channel
    pub(crate) fn open_packet(&mut self, ty: ChannelOpenType) -> Packet {
        packets::ChannelOpen {
            num: self.num.0,
            initial_window: self.local_window as u32,
            max_packet: self.local_max_packet as u32,
            ty,
        }
        .into()
    }

    /// The `ChannelOpenConfirmation` accepting a peer's open
    pub(crate) fn confirm_packet(&self, rev: ProtoRevision) -> Result<Packet> {
        let (initial_window, max_packet) = match rev {
            ProtoRevision::Legacy => (None, None),
            ProtoRevision::Current => {
                (Some(self.local_window as u32), Some(self.local_max_packet as u32))
            }
        };
        Ok(packets::ChannelOpenConfirmation {
            num: self.send_num()?,
            sender_num: self.num.0,
            initial_window,
            max_packet,
        }
        .into())
    }

    /// Marks the channel for collection regardless of half-close state
    pub(crate) fn mark_dead(&mut self) {
        debug!("channel {}: dead", self.num);
        self.kind = ChanKind::Zombie;
    }

    // Half-close transitions. Each is a no-op outside the state it applies to.

    /// Local read end hit EOF or an error
    pub(crate) fn read_failed(&mut self, rev: ProtoRevision, reg: &Registry) {
        trace!("channel {}: read failed", self.num);
        self.io.close_read(reg);
        match rev {
            ProtoRevision::Legacy => {
                if self.kind == ChanKind::Open {
                    self.kind = ChanKind::InputDraining;
                }
            }
            ProtoRevision::Current => {
                if self.istate == HalfState::Open {
                    self.istate = HalfState::WaitDrain;
                }
            }
        }
    }

    /// All local input has been passed to the peer
    pub(crate) fn ibuf_empty(&mut self, tx: &mut dyn Transport) -> Result<()> {
        if self.istate != HalfState::WaitDrain {
            return Ok(());
        }
        if !self.input.is_empty() {
            return Error::bug_msg("ibuf_empty with pending input");
        }
        if !(self.flags.close_sent || self.flags.close_rcvd) {
            self.send_eof(tx)?;
        }
        self.istate = HalfState::Closed;
        Ok(())
    }

    fn send_eof(&mut self, tx: &mut dyn Transport) -> Result<()> {
        if !self.flags.eof_sent {
            trace!("channel {}: send eof", self.num);
            tx.send(packets::ChannelEof { num: self.send_num()? }.into())?;
            self.flags.eof_sent = true;
        }
        Ok(())
    }

    /// Sends a close if one hasn't been sent.
    pub(crate) fn send_close(&mut self, tx: &mut dyn Transport) -> Result<()> {
        if self.flags.close_sent {
            return Ok(());
        }
        trace!("channel {}: send close", self.num);
        if let Some(s) = &self.send {
            tx.send(packets::ChannelClose { num: s.num }.into())?;
        }
        self.flags.close_sent = true;
        Ok(())
    }

    /// All output from the peer has been written locally
    pub(crate) fn obuf_empty(&mut self, reg: &Registry) {
        if self.ostate == HalfState::WaitDrain {
            trace!("channel {}: output drained", self.num);
            self.io.close_write(reg);
            self.ostate = HalfState::Closed;
        }
    }

    /// Local write end failed, pending output is discarded
    pub(crate) fn write_failed(&mut self, reg: &Registry) {
        trace!("channel {}: write failed", self.num);
        self.io.close_write(reg);
        self.output.clear();
        if let Some(fl) = self.filter.as_mut() {
            fl.pending.clear();
        }
        if matches!(self.ostate, HalfState::Open | HalfState::WaitDrain) {
            self.ostate = HalfState::Closed;
        }
    }

    /// Peer sent EOF
    pub(crate) fn rcvd_eof(&mut self, reg: &Registry) {
        self.flags.eof_rcvd = true;
        if self.ostate == HalfState::Open {
            self.ostate = HalfState::WaitDrain;
        }
        if self.ostate == HalfState::WaitDrain
            && self.pending_output() == 0
            && !self.efd_output_active()
        {
            self.obuf_empty(reg);
        }
    }

    /// Peer sent close
    pub(crate) fn rcvd_close(&mut self, tx: &mut dyn Transport, reg: &Registry) -> Result<()> {
        if self.flags.close_rcvd {
            warn!("channel {}: close received twice", self.num);
        }
        self.flags.close_rcvd = true;
        if self.ostate == HalfState::Open {
            self.ostate = HalfState::WaitDrain;
        }
        match self.istate {
            HalfState::Open => {
                self.io.close_read(reg);
                self.input.clear();
                self.istate = HalfState::Closed;
            }
            HalfState::WaitDrain => {
                self.input.clear();
                self.send_eof(tx)?;
                self.istate = HalfState::Closed;
            }
            HalfState::Closed => (),
        }
        if self.ext_usage != ExtUsage::Write {
            self.efd.close(reg);
        }
        Ok(())
    }

    /// Bytes from the peer not yet written locally
    pub(crate) fn pending_output(&self) -> usize {
        self.output.len() + self.filter.as_ref().map_or(0, |fl| fl.pending.len())
    }

    /// Whether stderr data from the peer may still need writing
    pub(crate) fn efd_output_active(&self) -> bool {
        self.ext_usage == ExtUsage::Write
            && self.efd.0.is_some()
            && (!(self.flags.eof_rcvd || self.flags.close_rcvd) || !self.extended.is_empty())
    }

    /// Whether the channel can be freed.
    ///
    /// If both directions are finished and `send` is set, a close is sent
    /// when one hasn't been already.
    pub(crate) fn is_dead(
        &mut self,
        send: bool,
        rev: ProtoRevision,
        tx: &mut dyn Transport,
    ) -> Result<bool> {
        if self.kind == ChanKind::Zombie {
            return Ok(true);
        }
        if rev == ProtoRevision::Legacy {
            return Ok(false);
        }
        if self.istate != HalfState::Closed || self.ostate != HalfState::Closed {
            return Ok(false);
        }
        if self.ext_usage == ExtUsage::Write && self.efd.0.is_some() && !self.extended.is_empty()
        {
            debug!("channel {}: active efd, {} bytes pending", self.num, self.extended.len());
            return Ok(false);
        }
        if !self.flags.close_sent {
            if send {
                self.send_close(tx)?;
            } else if self.flags.close_rcvd {
                // would be dead once our close is sent
                debug!("channel {}: almost dead", self.num);
                return Ok(true);
            }
        }
        Ok(self.flags.close_sent && self.flags.close_rcvd)
    }

    /// Records `len` bytes of peer data against the local window.
    ///
    /// Returns `false` if the data must be discarded.
    pub(crate) fn account_received(&mut self, len: usize, rev: ProtoRevision) -> bool {
        if rev == ProtoRevision::Legacy {
            return true;
        }
        if len > self.local_max_packet {
            info!(
                "channel {}: rcvd too large data, {len} > max packet {}",
                self.num, self.local_max_packet
            );
        }
        if len > self.local_window {
            info!(
                "channel {}: rcvd too much data, {len} > window {}",
                self.num, self.local_window
            );
            return false;
        }
        self.local_window -= len;
        true
    }

    /// Data arriving after the output side closed is discarded,
    /// but counted as consumed so the peer's window keeps moving.
    pub(crate) fn discard_received(&mut self, len: usize) {
        self.local_window = self.local_window.saturating_sub(len);
        self.local_consumed = (self.local_consumed + len).min(self.local_window_max);
    }

    /// Records bytes written to the local descriptor.
    ///
    /// Locally generated output written first is not counted.
    pub(crate) fn consumed(&mut self, len: usize, rev: ProtoRevision) {
        let local = len.min(self.local_output);
        self.local_output -= local;
        let len = len - local;
        if rev == ProtoRevision::Current {
            self.local_consumed = (self.local_consumed + len).min(self.local_window_max);
        }
    }

    /// Sends a window adjust when enough data has been consumed.
    ///
    /// Adjusting on every write would be chatty, waiting for the whole window
    /// could stall the peer.
    pub(crate) fn check_window(
        &mut self,
        rev: ProtoRevision,
        tx: &mut dyn Transport,
    ) -> Result<()> {
        if rev != ProtoRevision::Current
            || self.kind != ChanKind::Open
            || self.flags.close_sent
            || self.flags.close_rcvd
            || self.local_consumed == 0
        {
            return Ok(());
        }
        let gap = self.local_window_max.saturating_sub(self.local_window);
        if self.local_window < self.local_window_max / 2 || gap > 3 * self.local_max_packet {
            let num = self.send_num()?;
            let adjust = self.local_consumed;
            trace!("channel {}: window {} sent adjust {adjust}", self.num, self.local_window);
            tx.send(packets::ChannelWindowAdjust { num, adjust: adjust as u32 }.into())?;
            self.local_window += adjust;
            self.local_consumed = 0;
        }
        Ok(())
    }

    /// Peer enlarged our send window
    pub(crate) fn add_remote_window(&mut self, adjust: u32) -> Result<()> {
        let s = self.send.as_mut().ok_or(Error::BadChannelState { num: self.num })?;
        s.window = s.window.saturating_add(adjust as usize);
        trace!("channel {}: remote window now {}", self.num, s.window);
        Ok(())
    }

    /// Runs pending status callbacks as abandoned, and the filter cleanup.
    pub(crate) fn release_callbacks(&mut self) {
        for cb in self.status.drain(..) {
            cb(self.num, StatusReply::Abandoned)
        }
        if let Some(mut fl) = self.filter.take() {
            fl.f.cleanup(self.num)
        }
    }

    /// One line describing the channel
    pub(crate) fn summary(&self) -> String {
        let remote = self.send.as_ref().map_or(-1, |s| s.num as i64);
        format!(
            "  #{} {} ({:?} r{} i{:?}/{} o{:?}/{} e[{:?}]/{} cc {})\r\n",
            self.num,
            self.label,
            self.kind,
            remote,
            self.istate,
            self.input.len(),
            self.ostate,
            self.pending_output(),
            self.ext_usage,
            self.extended.len(),
            self.status.len(),
        )
    }
}
