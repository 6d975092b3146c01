//! Per-kind poll handlers.
//!
//! Before each poll a channel registers the readiness it wants according to
//! its kind. After the poll it services whichever descriptors were ready.
//! The output poll then sends buffered input to the peer.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::io;

use mio::Registry;

use crate::channel::*;
use crate::config::{self, ProtoRevision};
use crate::fdio::{ChanIo, Handle, Origin, Ready};
use crate::packets::{self, ChannelOpenType, DirectTcpip};
use crate::sshnames::*;
use crate::socks;
use crate::traffic::Transport;
use crate::x11::{self, X11Check, X11Spoof};

pub(crate) struct Ctx<'a> {
    pub tx: &'a mut dyn Transport,
    pub reg: &'a Registry,
    pub rev: ProtoRevision,
    pub x11: Option<&'a X11Spoof>,
}

/// A connection accepted by a listener, to become a new channel.
pub(crate) struct Accepted {
    pub listener: ChanNum,
    pub kind: ChanKind,
    pub ctype: &'static str,
    pub target: Option<FwdTarget>,
    pub listen: Option<ListenAddr>,
    pub single_use: bool,
    pub h: Box<dyn Handle>,
    pub origin: Origin,
}

#[derive(Debug, Default)]
struct Want {
    rd: bool,
    wr: bool,
    erd: bool,
    ewr: bool,
}

fn transient(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

impl Channel {
    pub(crate) fn pre_poll(&mut self, cx: &mut Ctx) -> Result<()> {
        use ChanKind::*;
        use ProtoRevision::*;

        self.ready = Ready::default();
        let want = match (self.kind, cx.rev) {
            (X11Listener | PortListener | RemotePortListener | AuthListener, _) => {
                Want { rd: true, ..Default::default() }
            }
            (Connecting, _) => Want { wr: true, ..Default::default() },
            (Dynamic, _) => self.pre_dynamic(),
            (Open, Current) => self.pre_open(cx),
            (Open, Legacy) => self.pre_open_legacy(cx),
            (X11Open, Current) => self.pre_x11_open(cx)?,
            (X11Open, Legacy) => self.pre_x11_open_legacy(cx)?,
            (InputDraining, Legacy) => self.pre_input_draining(cx)?,
            (OutputDraining, Legacy) => self.pre_output_draining(),
            _ => Want::default(),
        };

        let r = self
            .io
            .set_interest(cx.reg, self.num, want.rd, want.wr)
            .and_then(|_| self.efd.set_interest(cx.reg, self.num, want.erd, want.ewr));
        if let Err(e) = r {
            warn!("channel {}: poll registration failed: {e}", self.num);
            self.fail_read(cx)?;
            self.fail_write(cx)?;
        }
        Ok(())
    }

    fn pre_open(&mut self, cx: &mut Ctx) -> Want {
        let mut w = Want::default();
        let limit = self.remote_window().unwrap_or(0);

        if self.istate == HalfState::Open
            && limit > 0
            && self.input.len() < limit
            && self.input.check_alloc(config::READ_CHUNK, config::MAX_BUFFER)
        {
            w.rd = true;
        }

        if matches!(self.ostate, HalfState::Open | HalfState::WaitDrain) {
            if self.pending_output() > 0 {
                w.wr = true;
            } else if self.ostate == HalfState::WaitDrain {
                if self.efd_output_active() {
                    trace!("channel {}: obuf_empty delayed for efd", self.num);
                } else {
                    self.obuf_empty(cx.reg);
                }
            }
        }

        if self.efd.0.is_some()
            && !(self.istate == HalfState::Closed && self.ostate == HalfState::Closed)
        {
            if self.ext_usage == ExtUsage::Write && !self.extended.is_empty() {
                w.ewr = true;
            } else if !self.flags.eof_sent
                && self.ext_usage != ExtUsage::Write
                && self.extended.len() < limit
            {
                w.erd = true;
            }
        }
        w
    }

    fn pre_open_legacy(&mut self, cx: &mut Ctx) -> Want {
        Want {
            rd: self.input.len() < cx.tx.max_payload(),
            wr: self.pending_output() > 0,
            ..Default::default()
        }
    }

    fn pre_input_draining(&mut self, cx: &mut Ctx) -> Result<Want> {
        if self.input.is_empty() {
            self.send_close(cx.tx)?;
            debug!("channel {}: closing after input drain", self.num);
            self.kind = ChanKind::Closed;
        }
        Ok(Want { wr: self.pending_output() > 0, ..Default::default() })
    }

    fn pre_output_draining(&mut self) -> Want {
        if self.pending_output() == 0 {
            self.mark_dead();
            Want::default()
        } else {
            Want { wr: true, ..Default::default() }
        }
    }

    fn pre_x11_open(&mut self, cx: &mut Ctx) -> Result<Want> {
        match self.x11_check(cx) {
            X11Check::NeedMore => Ok(Want::default()),
            X11Check::Accept => {
                debug!("channel {}: X11 authentication ok", self.num);
                self.kind = ChanKind::Open;
                Ok(self.pre_open(cx))
            }
            X11Check::Reject => {
                self.read_failed(cx.rev, cx.reg);
                self.input.clear();
                self.ibuf_empty(cx.tx)?;
                self.output.clear();
                self.write_failed(cx.reg);
                Ok(Want::default())
            }
        }
    }

    fn pre_x11_open_legacy(&mut self, cx: &mut Ctx) -> Result<Want> {
        match self.x11_check(cx) {
            X11Check::NeedMore => Ok(Want::default()),
            X11Check::Accept => {
                self.kind = ChanKind::Open;
                Ok(self.pre_open_legacy(cx))
            }
            X11Check::Reject => {
                self.abort_legacy(cx)?;
                Ok(Want::default())
            }
        }
    }

    /// Checks the client's setup packet, rejecting it if the peer stopped
    /// sending before it was complete.
    fn x11_check(&mut self, cx: &Ctx) -> X11Check {
        if self.flags.close_rcvd || self.ostate != HalfState::Open {
            debug!("channel {}: X11 peer finished before authentication", self.num);
            return X11Check::Reject;
        }
        let r = x11::check_auth(cx.x11, &mut self.output);
        if r == X11Check::Reject {
            error!(
                "channel {}: X11 connection rejected because of wrong authentication, \
                possible attack",
                self.num
            );
        }
        r
    }

    fn pre_dynamic(&mut self) -> Want {
        Want {
            rd: self.input.check_alloc(config::READ_CHUNK, config::MAX_BUFFER),
            wr: !self.output.is_empty(),
            ..Default::default()
        }
    }

    /// Services ready descriptors.
    ///
    /// A listener returns an accepted connection for the caller to turn
    /// into a channel.
    pub(crate) fn post_poll(&mut self, cx: &mut Ctx) -> Result<Option<Accepted>> {
        use ChanKind::*;
        match self.kind {
            X11Listener | PortListener | RemotePortListener | AuthListener => {
                return Ok(self.post_listener());
            }
            Connecting => self.post_connecting(cx)?,
            Dynamic => self.post_dynamic(cx)?,
            Open | X11Open | InputDraining | OutputDraining => self.post_open(cx)?,
            Opening | Closed | Zombie | Larval => (),
        }
        Ok(None)
    }

    fn post_open(&mut self, cx: &mut Ctx) -> Result<()> {
        self.handle_rfd(cx)?;
        self.handle_wfd(cx)?;
        self.handle_efd(cx);
        self.check_window(cx.rev, cx.tx)
    }

    fn post_listener(&mut self) -> Option<Accepted> {
        if !self.ready.rd {
            return None;
        }
        let l = self.io.get_listener()?;
        match l.accept() {
            Ok((h, origin)) => {
                debug!(
                    "channel {}: {} accepted connection from {}:{}",
                    self.num, self.label, origin.host, origin.port
                );
                Some(Accepted {
                    listener: self.num,
                    kind: self.kind,
                    ctype: self.ctype,
                    target: self.target.clone(),
                    listen: self.listen.clone(),
                    single_use: self.single_use,
                    h,
                    origin,
                })
            }
            Err(e) if transient(&e) => None,
            Err(e) => {
                warn!("channel {}: accept failed: {e}", self.num);
                None
            }
        }
    }

    fn post_connecting(&mut self, cx: &mut Ctx) -> Result<()> {
        if !self.ready.wr {
            return Ok(());
        }
        let sock = self.io.shared().trap()?;
        let err = match sock.take_error() {
            Ok(Some(e)) | Err(e) => Some(e),
            Ok(None) => match sock.connected() {
                Ok(true) => None,
                // spurious wakeup
                Ok(false) => return Ok(()),
                Err(e) => Some(e),
            },
        };

        let cs = self.connect.as_mut().trap()?;
        match err {
            None => {
                debug!(
                    "channel {}: connected to {}:{} via {:?}",
                    self.num, cs.host, cs.port, cs.attempted
                );
                self.connect = None;
                self.kind = ChanKind::Open;
                cx.tx.send(self.confirm_packet(cx.rev)?)?;
                if let Some(f) = self.open_confirm.take() {
                    f(self.num, true)
                }
            }
            Some(e) => {
                debug!("channel {}: connection to {:?} failed: {e}", self.num, cs.attempted);
                self.io.close_all(cx.reg);
                if let Some(s) = cs.connect_next() {
                    self.io = ChanIo::socket(s);
                    return Ok(());
                }
                info!("channel {}: connect to {}:{} failed: {e}", self.num, cs.host, cs.port);
                cx.tx.send(
                    packets::ChannelOpenFailure {
                        num: self.send_num()?,
                        reason: ChanFail::SSH_OPEN_CONNECT_FAILED as u32,
                        desc: e.to_string(),
                        lang: String::new(),
                    }
                    .into(),
                )?;
                if let Some(f) = self.open_confirm.take() {
                    f(self.num, false)
                }
                self.connect = None;
                self.mark_dead();
            }
        }
        Ok(())
    }

    fn post_dynamic(&mut self, cx: &mut Ctx) -> Result<()> {
        self.handle_rfd(cx)?;
        self.handle_wfd(cx)?;
        if self.kind != ChanKind::Dynamic || self.input.is_empty() {
            return Ok(());
        }

        let was_auth = self.socks5_auth_done;
        let mut r = socks::decode(&mut self.input, &mut self.output, &mut self.socks5_auth_done);
        if matches!(r, Ok(None)) && !was_auth && self.socks5_auth_done && !self.input.is_empty() {
            // request arrived along with method negotiation
            r = socks::decode(&mut self.input, &mut self.output, &mut self.socks5_auth_done);
        }

        match r {
            Ok(None) => Ok(()),
            Ok(Some(target)) => self.dynamic_open(target, cx),
            Err(e) => {
                debug!("channel {}: dynamic request failed: {e}", self.num);
                self.mark_dead();
                Ok(())
            }
        }
    }

    /// Sends the `direct-tcpip` open for a decoded SOCKS request
    fn dynamic_open(&mut self, target: FwdTarget, cx: &mut Ctx) -> Result<()> {
        let origin = self.origin.clone().unwrap_or(Origin { host: String::new(), port: 0 });
        debug!(
            "channel {}: dynamic request from {}:{} to {}:{}",
            self.num, origin.host, origin.port, target.host, target.port
        );
        let ty = ChannelOpenType::DirectTcpip(DirectTcpip {
            address: target.host.clone(),
            port: target.port as u32,
            origin: origin.host,
            origin_port: origin.port as u32,
        });
        self.kind = ChanKind::Opening;
        // the SOCKS reply, written once open
        self.local_output = self.output.len();
        self.ctype = SSH_CHANNEL_DIRECT_TCPIP;
        self.target = Some(target);
        let p = self.open_packet(ty);
        cx.tx.send(p)
    }

    /// Closes the read side after a local read error or EOF.
    ///
    /// Channels the peer knows about are closed through the protocol,
    /// others are simply killed.
    fn fail_read(&mut self, cx: &mut Ctx) -> Result<()> {
        use ChanKind::*;
        use ProtoRevision::*;
        match (self.kind, cx.rev) {
            (Open | X11Open, Current) | (Open, Legacy) => {
                self.read_failed(cx.rev, cx.reg);
                Ok(())
            }
            (X11Open | InputDraining, Legacy) => self.abort_legacy(cx),
            (Closed, _) => Ok(()),
            _ => {
                self.mark_dead();
                Ok(())
            }
        }
    }

    fn fail_write(&mut self, cx: &mut Ctx) -> Result<()> {
        use ChanKind::*;
        use ProtoRevision::*;
        match (self.kind, cx.rev) {
            (Open | X11Open, Current) => {
                self.write_failed(cx.reg);
                Ok(())
            }
            (Open | X11Open | InputDraining, Legacy) => self.abort_legacy(cx),
            (Closed, _) => Ok(()),
            // peer already closed, or never knew of the channel
            _ => {
                self.mark_dead();
                Ok(())
            }
        }
    }

    /// Drops all local state and sends a close, waiting for confirmation
    fn abort_legacy(&mut self, cx: &mut Ctx) -> Result<()> {
        debug!("channel {}: local failure, closing", self.num);
        self.input.clear();
        self.output.clear();
        if let Some(fl) = self.filter.as_mut() {
            fl.pending.clear();
        }
        self.io.close_all(cx.reg);
        self.send_close(cx.tx)?;
        self.kind = ChanKind::Closed;
        Ok(())
    }

    fn handle_rfd(&mut self, cx: &mut Ctx) -> Result<()> {
        if !self.ready.rd || !self.io.has_read() {
            return Ok(());
        }
        let mut buf = [0u8; config::READ_CHUNK];
        let n = match self.io.read(&mut buf) {
            Err(e) if transient(&e) => return Ok(()),
            Err(e) => {
                debug!("channel {}: read failed: {e}", self.num);
                0
            }
            Ok(n) => n,
        };
        if n == 0 {
            trace!("channel {}: read eof", self.num);
            return self.fail_read(cx);
        }

        let data = &buf[..n];
        let num = self.num;
        if let Some(fl) = self.filter.as_mut() {
            if let Err(e) = fl.f.input(num, data, &mut self.input) {
                debug!("channel {num}: input filter failed: {e}");
                return self.fail_read(cx);
            }
        } else {
            self.input.append(data);
        }
        Ok(())
    }

    fn handle_wfd(&mut self, cx: &mut Ctx) -> Result<()> {
        if !self.ready.wr || !self.io.has_write() {
            return Ok(());
        }
        let num = self.num;

        let mut filtered = 0;
        if let Some(fl) = self.filter.as_mut() {
            if !self.output.is_empty() {
                let r = fl.f.output(num, self.output.peek(), &mut fl.pending);
                filtered = self.output.len();
                self.output.clear();
                if let Err(e) = r {
                    debug!("channel {num}: output filter failed: {e}");
                    return self.fail_write(cx);
                }
            }
        }

        let buf = match self.filter.as_mut() {
            Some(fl) => &mut fl.pending,
            None => &mut self.output,
        };
        let mut written = 0;
        if !buf.is_empty() {
            match self.io.write(buf.peek()) {
                Err(e) if transient(&e) => (),
                Ok(0) | Err(_) => {
                    debug!("channel {num}: write failed");
                    return self.fail_write(cx);
                }
                Ok(n) => {
                    buf.consume(n);
                    written = n;
                }
            }
        }

        if self.kind == ChanKind::Open {
            let used = if self.filter.is_some() { filtered } else { written };
            self.consumed(used, cx.rev);
        }
        Ok(())
    }

    fn handle_efd(&mut self, cx: &mut Ctx) {
        if !self.ready.ext || self.efd.0.is_none() {
            return;
        }
        match self.ext_usage {
            ExtUsage::Write => {
                if self.extended.is_empty() {
                    return;
                }
                match self.efd.write(self.extended.peek()) {
                    Err(e) if transient(&e) => (),
                    Ok(0) | Err(_) => {
                        debug!("channel {}: closing write-efd", self.num);
                        self.efd.close(cx.reg);
                    }
                    Ok(n) => {
                        self.extended.consume(n);
                        self.consumed(n, cx.rev);
                    }
                }
            }
            ExtUsage::Read | ExtUsage::Ignore => {
                let mut buf = [0u8; config::READ_CHUNK];
                match self.efd.read(&mut buf) {
                    Err(e) if transient(&e) => (),
                    Ok(0) | Err(_) => {
                        debug!("channel {}: closing read-efd", self.num);
                        self.efd.close(cx.reg);
                    }
                    Ok(n) if self.ext_usage == ExtUsage::Ignore => {
                        trace!("channel {}: discarded {n} bytes efd", self.num);
                    }
                    Ok(n) => self.extended.append(&buf[..n]),
                }
            }
        }
    }

    /// Local stderr that must be sent before EOF
    fn efd_input_active(&self) -> bool {
        self.ext_usage == ExtUsage::Read && (self.efd.0.is_some() || !self.extended.is_empty())
    }

    /// Sends buffered input to the peer, as far as its window allows.
    pub(crate) fn output_poll(&mut self, rev: ProtoRevision, tx: &mut dyn Transport) -> Result<()> {
        match rev {
            ProtoRevision::Current => self.output_poll_current(tx),
            ProtoRevision::Legacy => {
                if !matches!(self.kind, ChanKind::Open | ChanKind::InputDraining) {
                    return Ok(());
                }
                let len = self.input.len().min(tx.max_payload());
                if len > 0 {
                    let data = self.input.take(len).trap()?;
                    tx.send(packets::ChannelData { num: self.send_num()?, data }.into())?;
                }
                Ok(())
            }
        }
    }

    fn output_poll_current(&mut self, tx: &mut dyn Transport) -> Result<()> {
        if self.kind != ChanKind::Open || self.flags.close_sent || self.flags.close_rcvd {
            return Ok(());
        }
        let max_payload = tx.max_payload();

        if matches!(self.istate, HalfState::Open | HalfState::WaitDrain) {
            if !self.input.is_empty() {
                let s = self.send.as_mut().trap()?;
                let len = self.input.len().min(s.window).min(s.max_packet).min(max_payload);
                if len > 0 {
                    let data = self.input.take(len).trap()?;
                    tx.send(packets::ChannelData { num: s.num, data }.into())?;
                    s.window -= len;
                }
            } else if self.istate == HalfState::WaitDrain {
                if self.efd_input_active() {
                    trace!("channel {}: ibuf_empty delayed for efd", self.num);
                } else {
                    self.ibuf_empty(tx)?;
                }
            }
        }

        if self.ext_usage == ExtUsage::Read && !self.flags.eof_sent && !self.extended.is_empty() {
            let s = self.send.as_mut().trap()?;
            let len = self.extended.len().min(s.window).min(s.max_packet).min(max_payload);
            if len > 0 {
                let data = self.extended.take(len).trap()?;
                tx.send(
                    packets::ChannelDataExt { num: s.num, code: SSH_EXTENDED_DATA_STDERR, data }
                        .into(),
                )?;
                s.window -= len;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdio::ExtFd;
    use crate::packets::*;
    use crate::sunsetlog::init_test_log;
    use crate::traffic::PacketQueue;

    fn chan(input: &[u8], window: usize, max_packet: usize) -> Channel {
        let mut c = Channel::new(
            ChanNum(1),
            ChanKind::Open,
            ChanIo::none(),
            ExtFd(None),
            1000,
            100,
            ExtUsage::Ignore,
            "t",
        );
        c.set_remote(4, window, max_packet);
        c.input.append(input);
        c
    }

    /// A local end that never becomes writable again
    #[derive(Debug)]
    struct BrokenEnd {
        register_fails: bool,
    }

    impl BrokenEnd {
        fn registration(&self) -> io::Result<()> {
            if self.register_fails {
                Err(io::ErrorKind::PermissionDenied.into())
            } else {
                Ok(())
            }
        }
    }

    impl mio::event::Source for BrokenEnd {
        fn register(&mut self, _: &Registry, _: mio::Token, _: mio::Interest) -> io::Result<()> {
            self.registration()
        }

        fn reregister(&mut self, _: &Registry, _: mio::Token, _: mio::Interest) -> io::Result<()> {
            self.registration()
        }

        fn deregister(&mut self, _: &Registry) -> io::Result<()> {
            Ok(())
        }
    }

    impl Handle for BrokenEnd {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }

        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }
    }

    fn sent_data(q: &mut PacketQueue) -> Vec<usize> {
        q.drain()
            .map(|p| match p {
                Packet::ChannelData(d) => d.data.len(),
                p => panic!("unexpected {p:?}"),
            })
            .collect()
    }

    #[test]
    fn window_conservation() {
        init_test_log();
        let mut q = PacketQueue::with_max_payload(70);
        let mut c = chan(&[0x55; 1000], 250, 100);
        for _ in 0..10 {
            c.output_poll(ProtoRevision::Current, &mut q).unwrap();
        }
        let sent = sent_data(&mut q);
        // clipped by transport payload, then by window
        assert_eq!(sent, vec![70, 70, 70, 40]);
        assert_eq!(sent.iter().sum::<usize>() + c.remote_window().unwrap(), 250);
        assert_eq!(c.input.len(), 750);

        c.add_remote_window(1000).unwrap();
        for _ in 0..20 {
            c.output_poll(ProtoRevision::Current, &mut q).unwrap();
        }
        let sent: usize = sent_data(&mut q).iter().sum();
        assert_eq!(sent, 750);
        assert_eq!(c.remote_window(), Some(250));
    }

    #[test]
    fn drained_input_sends_eof() {
        let poll = mio::Poll::new().unwrap();
        let mut q = PacketQueue::new();
        let mut c = chan(b"last", 1000, 100);
        c.read_failed(ProtoRevision::Current, poll.registry());
        c.output_poll(ProtoRevision::Current, &mut q).unwrap();
        assert_eq!(sent_data(&mut q), vec![4]);
        c.output_poll(ProtoRevision::Current, &mut q).unwrap();
        assert_eq!(q.pop(), Some(ChannelEof { num: 4 }.into()));
        assert_eq!(c.istate, HalfState::Closed);
        assert!(q.is_empty());
    }

    #[test]
    fn nothing_sent_after_close() {
        let mut q = PacketQueue::new();
        let mut c = chan(b"data", 1000, 100);
        c.flags.close_rcvd = true;
        c.output_poll(ProtoRevision::Current, &mut q).unwrap();
        assert!(q.is_empty());
    }

    #[test]
    fn stderr_needs_window() {
        let mut q = PacketQueue::new();
        let mut c = chan(b"", 0, 100);
        c.ext_usage = ExtUsage::Read;
        c.extended.append(b"oops");
        c.output_poll(ProtoRevision::Current, &mut q).unwrap();
        assert!(q.is_empty());
        c.add_remote_window(3).unwrap();
        c.output_poll(ProtoRevision::Current, &mut q).unwrap();
        assert_eq!(
            q.pop(),
            Some(
                ChannelDataExt { num: 4, code: SSH_EXTENDED_DATA_STDERR, data: b"oop".to_vec() }
                    .into()
            )
        );
    }

    #[test]
    fn legacy_ignores_window() {
        let mut q = PacketQueue::with_max_payload(300);
        let mut c = chan(&[1; 500], 0, 0);
        c.output_poll(ProtoRevision::Legacy, &mut q).unwrap();
        c.output_poll(ProtoRevision::Legacy, &mut q).unwrap();
        assert_eq!(sent_data(&mut q), vec![300, 200]);
    }

    #[test]
    fn legacy_write_error_closes() {
        init_test_log();
        let poll = mio::Poll::new().unwrap();
        let rev = ProtoRevision::Legacy;
        let mut q = PacketQueue::new();
        for kind in [ChanKind::Open, ChanKind::InputDraining] {
            let mut c = chan(b"", 0, 0);
            c.kind = kind;
            c.io = ChanIo::socket(BrokenEnd { register_fails: false });
            c.output.append(b"for the local end");
            c.ready.wr = true;
            let mut cx = Ctx { tx: &mut q, reg: poll.registry(), rev, x11: None };
            c.post_poll(&mut cx).unwrap();

            // the peer is told, the slot waits for its confirmation
            assert_eq!(c.kind, ChanKind::Closed);
            assert_eq!(q.pop(), Some(ChannelClose { num: 4 }.into()));
            assert!(q.is_empty());
            assert!(!c.is_dead(true, rev, &mut q).unwrap());
            assert_eq!(c.pending_output(), 0);
        }
    }

    #[test]
    fn write_error_closes_output_half() {
        let poll = mio::Poll::new().unwrap();
        let rev = ProtoRevision::Current;
        let mut q = PacketQueue::new();
        let mut c = chan(b"", 1000, 100);
        c.io = ChanIo::socket(BrokenEnd { register_fails: false });
        c.output.append(b"for the local end");
        c.ready.wr = true;
        let mut cx = Ctx { tx: &mut q, reg: poll.registry(), rev, x11: None };
        c.post_poll(&mut cx).unwrap();

        assert_eq!(c.kind, ChanKind::Open);
        assert_eq!(c.istate, HalfState::Open);
        assert_eq!(c.ostate, HalfState::Closed);
        assert_eq!(c.pending_output(), 0);
        assert!(!c.is_dead(true, rev, &mut q).unwrap());
        assert!(q.is_empty());
    }

    #[test]
    fn registration_failure_closes_both_halves() {
        init_test_log();
        let poll = mio::Poll::new().unwrap();
        let rev = ProtoRevision::Current;
        let mut q = PacketQueue::new();
        let mut c = chan(b"", 1000, 100);
        c.io = ChanIo::socket(BrokenEnd { register_fails: true });
        let mut cx = Ctx { tx: &mut q, reg: poll.registry(), rev, x11: None };
        c.pre_poll(&mut cx).unwrap();

        assert_eq!(c.kind, ChanKind::Open);
        assert_eq!(c.istate, HalfState::WaitDrain);
        assert_eq!(c.ostate, HalfState::Closed);
        c.output_poll(rev, &mut q).unwrap();
        assert_eq!(q.pop(), Some(ChannelEof { num: 4 }.into()));
        // closed properly rather than dropped
        assert!(!c.is_dead(true, rev, &mut q).unwrap());
        assert_eq!(q.pop(), Some(ChannelClose { num: 4 }.into()));
        c.rcvd_close(&mut q, poll.registry()).unwrap();
        assert!(c.is_dead(true, rev, &mut q).unwrap());

        // legacy revision closes at once
        let rev = ProtoRevision::Legacy;
        let mut c = chan(b"", 0, 0);
        c.io = ChanIo::socket(BrokenEnd { register_fails: true });
        let mut cx = Ctx { tx: &mut q, reg: poll.registry(), rev, x11: None };
        c.pre_poll(&mut cx).unwrap();
        assert_eq!(c.kind, ChanKind::Closed);
        assert_eq!(q.pop(), Some(ChannelClose { num: 4 }.into()));
    }

    #[test]
    fn dynamic_socks4_opens() {
        init_test_log();
        let poll = mio::Poll::new().unwrap();
        let mut q = PacketQueue::new();
        let mut c = Channel::new(
            ChanNum(3),
            ChanKind::Dynamic,
            ChanIo::none(),
            ExtFd(None),
            config::TCP_WINDOW,
            config::TCP_MAX_PACKET,
            ExtUsage::Ignore,
            "dynamic",
        );
        c.origin = Some(Origin { host: "127.0.0.1".into(), port: 5555 });
        c.input.append(&[4, 1, 0, 22, 10, 0, 0, 2, 0]);
        let rev = ProtoRevision::Current;
        let mut cx = Ctx { tx: &mut q, reg: poll.registry(), rev, x11: None };
        c.post_dynamic(&mut cx).unwrap();
        assert_eq!(c.kind, ChanKind::Opening);
        // reply waits until the channel opens
        assert_eq!(c.output.peek(), &[0, 0x5a, 0, 0, 0, 0, 0, 0]);
        assert_eq!(c.local_output, 8);
        let Some(Packet::ChannelOpen(o)) = q.pop() else { panic!("no open") };
        assert_eq!(o.num, 3);
        assert_eq!(
            o.ty,
            ChannelOpenType::DirectTcpip(DirectTcpip {
                address: "10.0.0.2".into(),
                port: 22,
                origin: "127.0.0.1".into(),
                origin_port: 5555,
            })
        );
    }

    #[test]
    fn dynamic_garbage_kills() {
        let poll = mio::Poll::new().unwrap();
        let mut q = PacketQueue::new();
        let mut c = chan(b"GET / HTTP/1.0\r\n", 0, 0);
        c.kind = ChanKind::Dynamic;
        let rev = ProtoRevision::Current;
        let mut cx = Ctx { tx: &mut q, reg: poll.registry(), rev, x11: None };
        c.post_dynamic(&mut cx).unwrap();
        assert_eq!(c.kind, ChanKind::Zombie);
        assert!(q.is_empty());
    }
}
