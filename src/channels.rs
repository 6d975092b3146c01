//! The channel table.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use mio::Registry;

use crate::channel::*;
use crate::config::{self, ProtoRevision};
use crate::error;
use crate::fdio::{ChanIo, ExtFd, Handle};
use crate::packets;
use crate::traffic::Transport;

/// All live channels, indexed by [`ChanNum`].
///
/// A freed number is reused by the next channel created, lowest first.
pub struct Channels {
    ch: Vec<Option<Channel>>,
    reg: Registry,
    rev: ProtoRevision,
}

impl Channels {
    pub(crate) fn new(reg: Registry, rev: ProtoRevision) -> Self {
        Channels { ch: Vec::new(), reg, rev }
    }

    /// Creates a channel in the lowest free slot.
    ///
    /// `window` and `max_packet` are what we advertise to the peer.
    /// With `nonblocking` set the handles are switched to non-blocking mode.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &mut self,
        kind: ChanKind,
        io: ChanIo,
        ext: Option<Box<dyn Handle>>,
        window: usize,
        max_packet: usize,
        ext_usage: ExtUsage,
        label: &str,
        nonblocking: bool,
    ) -> Result<ChanNum> {
        let efd = ExtFd::new(ext);
        if nonblocking {
            io.set_nonblocking()?;
            efd.set_nonblocking()?;
        }
        let num = self.unused_chan()?;
        let c = Channel::new(num, kind, io, efd, window, max_packet, ext_usage, label);
        debug!("channel {num}: new {label} [{kind:?}]");
        self.ch[num.0 as usize] = Some(c);
        Ok(num)
    }

    /// Returns the first free slot, growing the table if needed
    fn unused_chan(&mut self) -> Result<ChanNum> {
        if let Some(i) = self.ch.iter().position(|c| c.is_none()) {
            return Ok(ChanNum(i as u32));
        }
        let n = self.ch.len();
        if n >= config::MAX_CHANNELS {
            warn!("channel table full, {n} channels");
            return Err(Error::NoChannels);
        }
        let grow = config::CHANNELS_ALLOC_INCREMENT.min(config::MAX_CHANNELS - n);
        self.ch.resize_with(n + grow, || None);
        trace!("channel table grown to {}", self.ch.len());
        Ok(ChanNum(n as u32))
    }

    /// Returns a `Channel` for a local number, any kind.
    pub fn get_any(&self, num: ChanNum) -> Result<&Channel> {
        self.ch
            .get(num.0 as usize)
            // out of range
            .ok_or_else(|| bad_channel(num, "out of range"))?
            .as_ref()
            // unused channel
            .ok_or_else(|| bad_channel(num, "unused"))
    }

    pub fn get_any_mut(&mut self, num: ChanNum) -> Result<&mut Channel> {
        self.ch
            .get_mut(num.0 as usize)
            .ok_or_else(|| bad_channel(num, "out of range"))?
            .as_mut()
            .ok_or_else(|| bad_channel(num, "unused"))
    }

    /// Returns a `Channel` that the peer may address.
    ///
    /// Listeners and channels the peer doesn't know about yet are excluded.
    pub fn get(&self, num: ChanNum) -> Result<&Channel> {
        let c = self.get_any(num)?;
        if c.kind.is_private() {
            Err(bad_channel(num, "private"))
        } else {
            Ok(c)
        }
    }

    pub fn get_mut(&mut self, num: ChanNum) -> Result<&mut Channel> {
        let c = self.get_any_mut(num)?;
        if c.kind.is_private() {
            Err(bad_channel(num, "private"))
        } else {
            Ok(c)
        }
    }

    /// Closes all descriptors and releases the slot.
    ///
    /// Pending status callbacks are told the channel was abandoned.
    pub fn free(&mut self, num: ChanNum) -> Result<()> {
        let mut c = self
            .ch
            .get_mut(num.0 as usize)
            .and_then(Option::take)
            .ok_or_else(|| bad_channel(num, "free"))?;
        debug!("channel {num}: free: {}, nchannels {}", c.label, self.count() + 1);
        trace!("{}", c.summary().trim_end());
        c.io.close_all(&self.reg);
        c.efd.close(&self.reg);
        c.input.clear();
        c.output.clear();
        c.extended.clear();
        c.release_callbacks();
        Ok(())
    }

    /// Frees a channel if it is dead.
    ///
    /// A detach callback holds the channel until it returns [`Detach::Release`].
    /// It is invoked once each time the channel becomes dead.
    pub fn garbage_collect(&mut self, num: ChanNum, tx: &mut dyn Transport) -> Result<()> {
        let rev = self.rev;
        let c = self.get_any_mut(num)?;

        if let Some(close) = c.detach.as_ref().map(|d| d.close) {
            let dead = c.is_dead(close, rev, tx)?;
            let d = c.detach.as_mut().trap()?;
            if !dead {
                d.notified = false;
                return Ok(());
            }
            if d.notified {
                return Ok(());
            }
            debug!("channel {num}: gc: notify user");
            d.notified = true;
            match (d.f)(num) {
                Detach::Retain => return Ok(()),
                Detach::Release => {
                    debug!("channel {num}: gc: user detached");
                    c.detach = None;
                }
            }
        }

        if c.is_dead(true, rev, tx)? {
            trace!("channel {num}: garbage collecting");
            self.free(num)?;
        }
        Ok(())
    }

    pub fn garbage_collect_all(&mut self, tx: &mut dyn Transport) -> Result<()> {
        for i in 0..self.ch.len() {
            if self.ch[i].is_some() {
                self.garbage_collect(ChanNum(i as u32), tx)?;
            }
        }
        Ok(())
    }

    /// Records the peer's side of a channel the session layer accepted.
    pub fn set_remote(
        &mut self,
        num: ChanNum,
        remote_num: u32,
        window: u32,
        max_packet: u32,
    ) -> Result<()> {
        self.get_any_mut(num)?.set_remote(remote_num, window as usize, max_packet as usize);
        Ok(())
    }

    /// Attaches descriptors to a `Larval` channel, making it `Open`.
    ///
    /// The peer is sent a window adjust up to `window_max`.
    #[allow(clippy::too_many_arguments)]
    pub fn set_fds(
        &mut self,
        num: ChanNum,
        io: ChanIo,
        ext: Option<Box<dyn Handle>>,
        ext_usage: ExtUsage,
        nonblocking: bool,
        window_max: usize,
        tx: &mut dyn Transport,
    ) -> Result<()> {
        let c = self.get_any_mut(num)?;
        if c.kind != ChanKind::Larval || c.send.is_none() {
            return error::BadChannelState { num }.fail();
        }
        let efd = ExtFd::new(ext);
        if nonblocking {
            io.set_nonblocking()?;
            efd.set_nonblocking()?;
        }
        c.io = io;
        c.efd = efd;
        c.ext_usage = ext_usage;
        c.kind = ChanKind::Open;

        let adjust = window_max.saturating_sub(c.local_window);
        c.local_window = window_max;
        c.local_window_max = window_max;
        if adjust > 0 {
            if let Some(s) = &c.send {
                tx.send(packets::ChannelWindowAdjust { num: s.num, adjust: adjust as u32 }.into())?;
            }
        }
        Ok(())
    }

    /// Queues a callback for the reply to a channel request sent with want-reply.
    pub fn add_status_confirm(&mut self, num: ChanNum, f: StatusFn) -> Result<()> {
        self.get_any_mut(num)?.status.push_back(f);
        Ok(())
    }

    pub fn register_open_confirm(&mut self, num: ChanNum, f: OpenConfirmFn) -> Result<()> {
        self.get_any_mut(num)?.open_confirm = Some(f);
        Ok(())
    }

    /// Registers a detach callback, replacing any existing one.
    ///
    /// With `do_close` a close is sent to the peer once both directions
    /// finish, before the callback runs.
    pub fn register_cleanup(&mut self, num: ChanNum, f: DetachFn, do_close: bool) -> Result<()> {
        self.get_any_mut(num)?.detach =
            Some(DetachState { f, close: do_close, notified: false });
        Ok(())
    }

    pub fn cancel_cleanup(&mut self, num: ChanNum) -> Result<()> {
        self.get_any_mut(num)?.detach = None;
        Ok(())
    }

    pub fn register_filter(&mut self, num: ChanNum, f: Box<dyn ChanFilter>) -> Result<()> {
        self.get_any_mut(num)?.filter =
            Some(FilterState { f, pending: crate::buffer::Buffer::new() });
        Ok(())
    }

    /// A human readable list of open connections
    pub fn open_message_summary(&self) -> String {
        let mut s = String::from("The following connections are open:\r\n");
        for c in self.iter() {
            if c.kind.is_listener() || c.kind == ChanKind::Zombie {
                continue;
            }
            s.push_str(&c.summary());
        }
        s
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.ch.iter().flatten()
    }

    /// Number of live channels
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Size of the table including free slots
    pub(crate) fn slots(&self) -> usize {
        self.ch.len()
    }

    /// A channel along with the poll registry, for descriptor operations
    pub(crate) fn slot_mut(&mut self, i: usize) -> Option<(&mut Channel, &Registry)> {
        let c = self.ch.get_mut(i)?.as_mut()?;
        Some((c, &self.reg))
    }

    pub(crate) fn split_mut(&mut self, num: ChanNum) -> Result<(&mut Channel, &Registry)> {
        let c = self
            .ch
            .get_mut(num.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| bad_channel(num, "unused"))?;
        Ok((c, &self.reg))
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.reg
    }

    pub(crate) fn revision(&self) -> ProtoRevision {
        self.rev
    }
}

fn bad_channel(num: ChanNum, why: &str) -> Error {
    debug!("channel {num}: lookup failed, {why}");
    Error::BadChannel { num }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sunsetlog::init_test_log;
    use crate::traffic::PacketQueue;
    use std::cell::Cell;
    use std::rc::Rc;

    fn table() -> (mio::Poll, Channels) {
        let poll = mio::Poll::new().unwrap();
        let reg = poll.registry().try_clone().unwrap();
        (poll, Channels::new(reg, ProtoRevision::Current))
    }

    fn new_chan(t: &mut Channels, kind: ChanKind) -> ChanNum {
        t.create(kind, ChanIo::none(), None, 1000, 100, ExtUsage::Ignore, "t", false).unwrap()
    }

    #[test]
    fn reuse_lowest_slot() {
        init_test_log();
        let (_p, mut t) = table();
        let nums: Vec<_> = (0..12).map(|_| new_chan(&mut t, ChanKind::Open)).collect();
        assert_eq!(nums[11], ChanNum(11));
        assert_eq!(t.slots(), 20);

        t.free(ChanNum(3)).unwrap();
        t.free(ChanNum(7)).unwrap();
        assert!(t.get_any(ChanNum(3)).is_err());
        assert_eq!(new_chan(&mut t, ChanKind::Open), ChanNum(3));
        assert_eq!(new_chan(&mut t, ChanKind::Open), ChanNum(7));
        assert_eq!(new_chan(&mut t, ChanKind::Open), ChanNum(12));
        // table never shrinks
        assert_eq!(t.slots(), 20);
    }

    #[test]
    fn lookup_bounds() {
        let (_p, mut t) = table();
        assert!(matches!(t.get_any(ChanNum(0)), Err(Error::BadChannel { .. })));
        let n = new_chan(&mut t, ChanKind::Open);
        assert!(t.get(n).is_ok());
        assert!(t.get_any(ChanNum(u32::MAX)).is_err());
        assert!(t.free(ChanNum(99)).is_err());
    }

    #[test]
    fn private_hidden() {
        let (_p, mut t) = table();
        for kind in
            [ChanKind::PortListener, ChanKind::Opening, ChanKind::Connecting, ChanKind::Larval]
        {
            let n = new_chan(&mut t, kind);
            assert!(t.get_any(n).is_ok());
            assert!(t.get(n).is_err());
        }
    }

    #[test]
    fn set_fds_larval() {
        let (_p, mut t) = table();
        let mut q = PacketQueue::new();
        let n = t
            .create(ChanKind::Larval, ChanIo::none(), None, 0, 100, ExtUsage::Ignore, "s", false)
            .unwrap();
        t.set_remote(n, 5, 2000, 200).unwrap();
        t.set_fds(n, ChanIo::none(), None, ExtUsage::Write, false, 4096, &mut q).unwrap();
        assert_eq!(t.get(n).unwrap().kind(), ChanKind::Open);
        assert_eq!(q.pop(), Some(packets::ChannelWindowAdjust { num: 5, adjust: 4096 }.into()));
        // only once
        assert!(t.set_fds(n, ChanIo::none(), None, ExtUsage::Write, false, 4096, &mut q).is_err());
    }

    #[test]
    fn detach_gating() {
        init_test_log();
        let (_p, mut t) = table();
        let mut q = PacketQueue::new();
        let n = new_chan(&mut t, ChanKind::Open);
        t.set_remote(n, 8, 1000, 100).unwrap();

        let calls = Rc::new(Cell::new(0));
        let c2 = calls.clone();
        t.register_cleanup(
            n,
            Box::new(move |_| {
                c2.set(c2.get() + 1);
                if c2.get() < 2 {
                    Detach::Retain
                } else {
                    Detach::Release
                }
            }),
            false,
        )
        .unwrap();

        let set_dead = |t: &mut Channels| {
            let c = t.get_any_mut(n).unwrap();
            c.istate = HalfState::Closed;
            c.ostate = HalfState::Closed;
            c.flags.close_rcvd = true;
        };

        // alive, not notified
        t.garbage_collect(n, &mut q).unwrap();
        assert_eq!(calls.get(), 0);

        set_dead(&mut t);
        t.garbage_collect(n, &mut q).unwrap();
        t.garbage_collect(n, &mut q).unwrap();
        // once per transition
        assert_eq!(calls.get(), 1);
        assert!(t.get_any(n).is_ok());

        t.get_any_mut(n).unwrap().istate = HalfState::Open;
        t.garbage_collect(n, &mut q).unwrap();
        set_dead(&mut t);
        t.garbage_collect(n, &mut q).unwrap();
        assert_eq!(calls.get(), 2);
        // released, close sent and freed
        assert_eq!(q.pop(), Some(packets::ChannelClose { num: 8 }.into()));
        assert!(t.get_any(n).is_err());
    }

    #[test]
    fn summary_lists_open() {
        let (_p, mut t) = table();
        new_chan(&mut t, ChanKind::PortListener);
        let n = new_chan(&mut t, ChanKind::Open);
        t.get_any_mut(n).unwrap().label = "direct-tcpip: listening port 2000".into();
        let s = t.open_message_summary();
        assert!(s.contains("#1 direct-tcpip"));
        assert!(!s.contains("#0"));
    }
}
