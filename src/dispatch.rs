//! Handling of channel messages received from the peer.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use mio::Registry;

use crate::channel::*;
use crate::channels::Channels;
use crate::config::{self, ProtoRevision};
use crate::fdio::{ChanIo, Origin};
use crate::forward::{self, DispatchOpenError};
use crate::packets::*;
use crate::runner::Runner;
use crate::sshnames::*;
use crate::traffic::Transport;

/// Disconnects for a peer protocol violation
fn violation(tx: &mut dyn Transport, reason: &str) -> Error {
    warn!("Protocol violation: {reason}");
    tx.disconnect(reason);
    Error::SSHProtoError
}

/// Looks up a channel the peer may refer to, disconnecting otherwise.
fn peer_chan<'a>(
    chans: &'a mut Channels,
    num: u32,
    tx: &mut dyn Transport,
    what: &str,
) -> Result<(&'a mut Channel, &'a Registry)> {
    if chans.get(ChanNum(num)).is_err() {
        return Err(violation(tx, &format!("{what} for non-existent channel {num}")));
    }
    chans.split_mut(ChanNum(num))
}

impl Runner {
    /// Handles an inbound channel layer message.
    ///
    /// Peer protocol violations disconnect the transport and return
    /// [`Error::SSHProtoError`].
    pub fn dispatch(&mut self, packet: Packet, tx: &mut dyn Transport) -> Result<()> {
        trace!("dispatch {packet:?}");
        match packet {
            Packet::ChannelOpen(p) => self.on_open(p, tx),
            Packet::ChannelOpenConfirmation(p) => self.on_open_confirmation(p, tx),
            Packet::ChannelOpenFailure(p) => self.on_open_failure(p, tx),
            Packet::ChannelWindowAdjust(p) => self.on_window_adjust(p, tx),
            Packet::ChannelData(p) => self.on_data(p, tx),
            Packet::ChannelDataExt(p) => self.on_extended_data(p, tx),
            Packet::ChannelEof(p) => self.on_eof(p, tx),
            Packet::ChannelClose(p) => self.on_close(p, tx),
            Packet::ChannelCloseConfirmation(p) => self.on_close_confirmation(p, tx),
            Packet::ChannelSuccess(p) => self.on_channel_status(p.num, true, tx),
            Packet::ChannelFailure(p) => self.on_channel_status(p.num, false, tx),
            Packet::GlobalRequest(p) => self.on_global_forward_request(p, tx),
            Packet::RequestSuccess(p) => {
                self.on_request_reply(true, p.port);
                Ok(())
            }
            Packet::RequestFailure(_) => {
                self.on_request_reply(false, None);
                Ok(())
            }
        }
    }

    /// Handles a peer's `ChannelOpen`, replying with a failure if it is refused.
    pub fn on_open(&mut self, p: ChannelOpen, tx: &mut dyn Transport) -> Result<()> {
        match self.on_open_inner(&p, tx) {
            Err(DispatchOpenError::Failure(f)) => {
                debug!("Refusing channel open: {}", f.describe());
                tx.send(
                    ChannelOpenFailure {
                        // the sender's number
                        num: p.num,
                        reason: f as u32,
                        desc: f.describe().into(),
                        lang: String::new(),
                    }
                    .into(),
                )
            }
            Err(DispatchOpenError::Error(e)) => Err(e),
            Ok(()) => Ok(()),
        }
    }

    // the caller sends failure replies
    fn on_open_inner(
        &mut self,
        p: &ChannelOpen,
        tx: &mut dyn Transport,
    ) -> Result<(), DispatchOpenError> {
        let is_client = self.conf.is_client;
        let num = match &p.ty {
            ChannelOpenType::DirectTcpip(t) if !is_client => {
                let port = open_port(t.port)?;
                let label = format!(
                    "direct-tcpip: {}:{port} from {} port {}",
                    t.address, t.origin, t.origin_port
                );
                self.fwd.connect_to(&mut self.chans, &self.conf, &t.address, port, &label)?
            }
            ChannelOpenType::ForwardedTcpip(t) if is_client => {
                let port = open_port(t.port)?;
                let label = format!(
                    "forwarded-tcpip: listen {} port {port}, originator {} port {}",
                    t.address, t.origin, t.origin_port
                );
                self.fwd.connect_by_listen_port(&mut self.chans, &self.conf, port, &label)?
            }
            ChannelOpenType::X11(x) if is_client => self.open_x11(x)?,
            ChannelOpenType::AuthAgent if is_client => self.open_agent()?,
            ty => {
                debug!("Rejecting channel open of type {ty:?}");
                return Err(ChanFail::SSH_OPEN_UNKNOWN_CHANNEL_TYPE.into());
            }
        };

        let rev = self.chans.revision();
        let (window, max_packet) = match rev {
            ProtoRevision::Legacy => (usize::MAX, tx.max_payload()),
            ProtoRevision::Current => (p.initial_window as usize, p.max_packet as usize),
        };
        let c = self.chans.get_any_mut(num)?;
        c.set_remote(p.num, window, max_packet);
        debug!("channel {num}: peer open, remote {} window {window}", p.num);

        // a connecting channel confirms once connected
        if c.kind != ChanKind::Connecting {
            tx.send(c.confirm_packet(rev)?)?;
        }
        Ok(())
    }

    fn open_x11(&mut self, x: &X11) -> Result<ChanNum, DispatchOpenError> {
        if self.x11.is_none() {
            warn!("Peer tried X11 forwarding without a request, possible break-in attempt");
            return Err(ChanFail::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED.into());
        }
        let Some(display) = self.conf.x11_display.as_deref() else {
            info!("X11 open with no local display configured");
            return Err(ChanFail::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED.into());
        };
        let h = forward::connect_display(display).map_err(|e| {
            info!("Connection to X11 display {display} failed: {e}");
            ChanFail::SSH_OPEN_CONNECT_FAILED
        })?;
        let label = format!("x11 from {} port {:?}", x.origin, x.origin_port);
        let num = self.chans.create(
            ChanKind::X11Open,
            ChanIo::socket_boxed(h),
            None,
            config::X11_WINDOW,
            config::X11_MAX_PACKET,
            ExtUsage::Ignore,
            &label,
            false,
        )?;
        let c = self.chans.get_any_mut(num)?;
        c.ctype = SSH_CHANNEL_X11;
        c.origin = Some(Origin {
            host: x.origin.clone(),
            port: x.origin_port.and_then(|p| u16::try_from(p).ok()).unwrap_or(0),
        });
        Ok(num)
    }

    #[cfg(unix)]
    fn open_agent(&mut self) -> Result<ChanNum, DispatchOpenError> {
        let Some(path) = self.conf.agent_socket.as_deref() else {
            warn!("Peer tried agent forwarding without a request, possible break-in attempt");
            return Err(ChanFail::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED.into());
        };
        let h = forward::connect_agent(path).map_err(|e| {
            info!("Connection to agent {} failed: {e}", path.display());
            ChanFail::SSH_OPEN_CONNECT_FAILED
        })?;
        let num = self.chans.create(
            ChanKind::Open,
            ChanIo::socket_boxed(h),
            None,
            config::AGENT_WINDOW,
            config::AGENT_MAX_PACKET,
            ExtUsage::Ignore,
            "authentication agent connection",
            false,
        )?;
        self.chans.get_any_mut(num)?.ctype = SSH_CHANNEL_AUTH_AGENT;
        Ok(num)
    }

    #[cfg(not(unix))]
    fn open_agent(&mut self) -> Result<ChanNum, DispatchOpenError> {
        Err(ChanFail::SSH_OPEN_UNKNOWN_CHANNEL_TYPE.into())
    }

    /// The peer accepted a channel we opened
    pub fn on_open_confirmation(
        &mut self,
        p: ChannelOpenConfirmation,
        tx: &mut dyn Transport,
    ) -> Result<()> {
        let rev = self.chans.revision();
        let Ok(c) = self.chans.get_any_mut(ChanNum(p.num)) else {
            return Err(violation(tx, &format!("open confirmation for unknown channel {}", p.num)));
        };
        if c.kind != ChanKind::Opening {
            return Err(violation(
                tx,
                &format!("open confirmation for non-opening channel {}", p.num),
            ));
        }
        let (window, max_packet) = match rev {
            ProtoRevision::Legacy => (usize::MAX, tx.max_payload()),
            ProtoRevision::Current => match (p.initial_window, p.max_packet) {
                (Some(w), Some(m)) => (w as usize, m as usize),
                _ => return Err(violation(tx, "open confirmation without window")),
            },
        };
        c.set_remote(p.sender_num, window, max_packet);
        c.kind = ChanKind::Open;
        debug!("channel {}: open confirm rwindow {window} rmax {max_packet}", c.num);
        if let Some(f) = c.open_confirm.take() {
            f(c.num, true)
        }
        Ok(())
    }

    /// The peer refused a channel we opened
    pub fn on_open_failure(&mut self, p: ChannelOpenFailure, tx: &mut dyn Transport) -> Result<()> {
        let num = ChanNum(p.num);
        let Ok(c) = self.chans.get_any_mut(num) else {
            return Err(violation(tx, &format!("open failure for unknown channel {}", p.num)));
        };
        if c.kind != ChanKind::Opening {
            return Err(violation(tx, &format!("open failure for non-opening channel {}", p.num)));
        }
        let reason = open_failure_reason(p.reason);
        if p.desc.is_empty() {
            info!("channel {num}: open failed: {reason}");
        } else {
            info!("channel {num}: open failed: {reason}: {}", p.desc);
        }
        if let Some(f) = c.open_confirm.take() {
            f(num, false)
        }
        self.chans.free(num)
    }

    pub fn on_window_adjust(
        &mut self,
        p: ChannelWindowAdjust,
        tx: &mut dyn Transport,
    ) -> Result<()> {
        let (c, _) = peer_chan(&mut self.chans, p.num, tx, "window adjust")?;
        if c.add_remote_window(p.adjust).is_err() {
            return Err(violation(tx, &format!("window adjust for unconfirmed channel {}", p.num)));
        }
        Ok(())
    }

    pub fn on_data(&mut self, p: ChannelData, tx: &mut dyn Transport) -> Result<()> {
        let rev = self.chans.revision();
        let (c, _) = peer_chan(&mut self.chans, p.num, tx, "data")?;
        // can happen while closing
        if !matches!(c.kind, ChanKind::Open | ChanKind::X11Open) {
            trace!("channel {}: ignoring data in {:?}", c.num, c.kind);
            return Ok(());
        }
        let len = p.data.len();
        if rev == ProtoRevision::Current && c.ostate != HalfState::Open {
            trace!("channel {}: discarding {len} bytes after output closed", c.num);
            c.discard_received(len);
            return Ok(());
        }
        if c.account_received(len, rev) {
            c.output.append(&p.data);
        }
        Ok(())
    }

    pub fn on_extended_data(&mut self, p: ChannelDataExt, tx: &mut dyn Transport) -> Result<()> {
        let rev = self.chans.revision();
        if rev == ProtoRevision::Legacy {
            return Err(violation(tx, "extended data in legacy revision"));
        }
        let (c, _) = peer_chan(&mut self.chans, p.num, tx, "extended data")?;
        if c.kind != ChanKind::Open {
            info!("channel {}: extended data for non-open channel", c.num);
            return Ok(());
        }
        let len = p.data.len();
        if c.ostate != HalfState::Open {
            c.discard_received(len);
            return Ok(());
        }
        if c.efd.0.is_none()
            || c.ext_usage != ExtUsage::Write
            || p.code != SSH_EXTENDED_DATA_STDERR
        {
            info!("channel {}: ignoring extended data, code {}", c.num, p.code);
            return Ok(());
        }
        if c.account_received(len, rev) {
            c.extended.append(&p.data);
        }
        Ok(())
    }

    pub fn on_eof(&mut self, p: ChannelEof, tx: &mut dyn Transport) -> Result<()> {
        if self.chans.revision() == ProtoRevision::Legacy {
            return Err(violation(tx, "eof in legacy revision"));
        }
        let (c, reg) = peer_chan(&mut self.chans, p.num, tx, "eof")?;
        debug!("channel {}: rcvd eof", c.num);
        c.rcvd_eof(reg);
        Ok(())
    }

    pub fn on_close(&mut self, p: ChannelClose, tx: &mut dyn Transport) -> Result<()> {
        let rev = self.chans.revision();
        let (c, reg) = peer_chan(&mut self.chans, p.num, tx, "close")?;
        debug!("channel {}: rcvd close", c.num);
        match rev {
            ProtoRevision::Current => c.rcvd_close(tx, reg),
            ProtoRevision::Legacy => {
                tx.send(ChannelCloseConfirmation { num: c.send_num()? }.into())?;
                // a closed channel waits for its own confirmation
                if c.kind == ChanKind::X11Open {
                    // never authenticated
                    c.output.clear();
                }
                if c.kind != ChanKind::Closed {
                    c.input.clear();
                    c.io.close_read(reg);
                    c.kind = ChanKind::OutputDraining;
                }
                Ok(())
            }
        }
    }

    /// Legacy revision only
    pub fn on_close_confirmation(
        &mut self,
        p: ChannelCloseConfirmation,
        tx: &mut dyn Transport,
    ) -> Result<()> {
        if self.chans.revision() != ProtoRevision::Legacy {
            return Err(violation(tx, "close confirmation in current revision"));
        }
        let (c, _) = peer_chan(&mut self.chans, p.num, tx, "close confirmation")?;
        if c.kind != ChanKind::Closed {
            return Err(violation(tx, &format!("close confirmation for open channel {}", p.num)));
        }
        self.chans.free(ChanNum(p.num))
    }

    /// A `ChannelSuccess` or `ChannelFailure`, answered to the oldest
    /// registered status callback.
    pub fn on_channel_status(
        &mut self,
        num: u32,
        success: bool,
        tx: &mut dyn Transport,
    ) -> Result<()> {
        let (c, _) = peer_chan(&mut self.chans, num, tx, "channel status")?;
        let Some(cb) = c.status.pop_front() else {
            debug!("channel {num}: status reply with nothing pending");
            return Ok(());
        };
        let r = if success { StatusReply::Success } else { StatusReply::Failure };
        cb(c.num, r);
        Ok(())
    }

    /// `tcpip-forward` and `cancel-tcpip-forward` from the peer.
    pub fn on_global_forward_request(
        &mut self,
        p: GlobalRequest,
        tx: &mut dyn Transport,
    ) -> Result<()> {
        self.fwd.on_global_request(&mut self.chans, &self.conf, tx, p)
    }

    /// The peer's reply to our oldest outstanding `tcpip-forward`.
    ///
    /// Replies to global requests sent by other layers must not be passed here.
    pub fn on_request_reply(&mut self, success: bool, port: Option<u32>) {
        self.fwd.on_request_reply(success, port)
    }
}

fn open_port(port: u32) -> Result<u16, DispatchOpenError> {
    u16::try_from(port).map_err(|_| {
        debug!("Bad port {port} in channel open");
        ChanFail::SSH_OPEN_CONNECT_FAILED.into()
    })
}
