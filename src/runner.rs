#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::io;
#[cfg(unix)]
use std::path::Path;
use std::time::Duration;

use mio::{Events, Poll};

use crate::channel::ChanNum;
use crate::channels::Channels;
use crate::config::MuxConfig;
use crate::fdio;
use crate::forward::{self, Forwarding};
use crate::handlers::Ctx;
use crate::traffic::Transport;
use crate::x11::X11Spoof;

const EVENTS_CAPACITY: usize = 256;

/// The channel layer of one SSH connection.
///
/// Owns the channel table, forwarding state and the poller for all
/// local descriptors. The session layer calls [`run_once()`](Self::run_once)
/// in its event loop and passes received messages to
/// [`dispatch()`](Self::dispatch).
///
/// A `Runner` is used from a single thread.
pub struct Runner {
    pub(crate) chans: Channels,
    pub(crate) fwd: Forwarding,
    pub(crate) x11: Option<X11Spoof>,
    pub(crate) conf: MuxConfig,
    poll: Poll,
    events: Events,
}

impl core::fmt::Debug for Runner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runner")
            .field("conf", &self.conf)
            .field("channels", &self.chans.count())
            .field("x11", &self.x11)
            .finish_non_exhaustive()
    }
}

impl Runner {
    pub fn new(conf: MuxConfig) -> Result<Self> {
        let poll = Poll::new()?;
        let reg = poll.registry().try_clone()?;
        Ok(Runner {
            chans: Channels::new(reg, conf.revision),
            fwd: Forwarding::new(),
            x11: None,
            conf,
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
        })
    }

    pub fn new_client() -> Result<Self> {
        Self::new(MuxConfig::new_client())
    }

    pub fn new_server() -> Result<Self> {
        Self::new(MuxConfig::new_server())
    }

    pub fn is_client(&self) -> bool {
        self.conf.is_client
    }

    pub fn config(&self) -> &MuxConfig {
        &self.conf
    }

    /// Runs one tick: waits up to `timeout` for local descriptors, services
    /// them and sends what the peer's windows allow.
    ///
    /// `timeout` would usually be the time until the session layer's next
    /// housekeeping. `None` waits indefinitely.
    pub fn run_once(&mut self, tx: &mut dyn Transport, timeout: Option<Duration>) -> Result<()> {
        self.prepare(tx)?;
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                trace!("poll interrupted");
                self.events.clear();
            }
            Err(e) => return Err(e.into()),
        }
        self.mark_ready();
        self.after_poll(tx)?;
        self.output_poll(tx)
    }

    fn prepare(&mut self, tx: &mut dyn Transport) -> Result<()> {
        let rev = self.chans.revision();
        for i in 0..self.chans.slots() {
            let x11 = self.x11.as_ref();
            let Some((c, reg)) = self.chans.slot_mut(i) else {
                continue;
            };
            let mut cx = Ctx { tx: &mut *tx, reg, rev, x11 };
            c.pre_poll(&mut cx)?;
        }
        Ok(())
    }

    fn mark_ready(&mut self) {
        for ev in self.events.iter() {
            let Some((num, slot)) = fdio::from_token(ev.token()) else {
                trace!("stray event {:?}", ev.token());
                continue;
            };
            if let Ok((c, _)) = self.chans.split_mut(num) {
                c.ready.add(slot, ev);
            }
        }
    }

    fn after_poll(&mut self, tx: &mut dyn Transport) -> Result<()> {
        let rev = self.chans.revision();
        for i in 0..self.chans.slots() {
            let x11 = self.x11.as_ref();
            let accepted = match self.chans.slot_mut(i) {
                Some((c, reg)) => {
                    let mut cx = Ctx { tx: &mut *tx, reg, rev, x11 };
                    c.post_poll(&mut cx)?
                }
                None => continue,
            };
            if let Some(a) = accepted {
                self.fwd.accept(&mut self.chans, &self.conf, tx, a)?;
            }
            let num = ChanNum(i as u32);
            // a single use listener is gone once accepted
            if self.chans.get_any(num).is_ok() {
                self.chans.garbage_collect(num, tx)?;
            }
        }
        Ok(())
    }

    fn output_poll(&mut self, tx: &mut dyn Transport) -> Result<()> {
        let rev = self.chans.revision();
        for i in 0..self.chans.slots() {
            if let Some((c, _)) = self.chans.slot_mut(i) {
                c.output_poll(rev, tx)?;
            }
        }
        Ok(())
    }

    pub fn channels(&self) -> &Channels {
        &self.chans
    }

    pub fn channels_mut(&mut self) -> &mut Channels {
        &mut self.chans
    }

    /// A human readable list of open connections
    pub fn open_message_summary(&self) -> String {
        self.chans.open_message_summary()
    }

    /// Listens locally, forwarding connections through the peer to `dest_host:dest_port`.
    ///
    /// An empty `dest_host` with `dest_port` 0 makes a dynamic (SOCKS) forward.
    /// Returns the listening port, which is allocated when `listen_port` is 0.
    pub fn create_local_forward(
        &mut self,
        listen_host: Option<&str>,
        listen_port: u16,
        dest_host: &str,
        dest_port: u16,
    ) -> Result<u16> {
        self.fwd.create_local_forward(
            &mut self.chans,
            &self.conf,
            listen_host,
            listen_port,
            dest_host,
            dest_port,
        )
    }

    /// Asks the peer to listen and forward connections back to `dest_host:dest_port`.
    pub fn create_remote_forward(
        &mut self,
        tx: &mut dyn Transport,
        listen_host: Option<&str>,
        listen_port: u16,
        dest_host: &str,
        dest_port: u16,
    ) -> Result<()> {
        self.fwd.create_remote_forward(tx, listen_host, listen_port, dest_host, dest_port)
    }

    pub fn cancel_remote_forward(
        &mut self,
        tx: &mut dyn Transport,
        listen_host: Option<&str>,
        listen_port: u16,
    ) -> Result<()> {
        self.fwd.cancel_remote_forward(tx, listen_host, listen_port)
    }

    pub fn add_permitted_open(&mut self, host: &str, port: u16) {
        self.fwd.add_permitted_open(host, port)
    }

    /// Returns the number of administrative entries
    pub fn add_adm_permitted_open(&mut self, host: &str, port: u16) -> usize {
        self.fwd.add_adm_permitted_open(host, port)
    }

    /// Permits peer opens to any destination, until a specific one is added.
    pub fn permit_all_opens(&mut self) {
        self.fwd.permit_all_opens()
    }

    pub fn clear_permitted_opens(&mut self) {
        self.fwd.clear_permitted_opens()
    }

    pub fn clear_adm_permitted_opens(&mut self) {
        self.fwd.clear_adm_permitted_opens()
    }

    /// Sets up X11 spoofing before requesting X11 forwarding from the peer.
    ///
    /// `real` is the local display's cookie, random data is used if
    /// it is unknown. The first call generates the fake data, later calls
    /// reuse it. The returned state gives the protocol and fake data to send
    /// in the `x11-req`.
    pub fn x11_request_spoofing(&mut self, proto: &str, real: Option<&[u8]>) -> Result<&X11Spoof> {
        if let Some(sp) = &self.x11 {
            if sp.proto() != proto {
                warn!("X11 forwarding already set up with protocol {}", sp.proto());
                return Err(Error::msg("X11 protocol mismatch"));
            }
        } else {
            let sp = match real {
                Some(r) => X11Spoof::new(proto, r)?,
                None => X11Spoof::with_random_cookie(proto)?,
            };
            debug!("X11 spoofing set up, protocol {proto}");
            self.x11 = Some(sp);
        }
        self.x11.as_ref().trap()
    }

    /// X11 connections arriving after `timeout` are refused.
    pub fn x11_set_timeout(&mut self, timeout: Duration) -> Result<()> {
        let sp = self.x11.as_mut().ok_or(Error::msg("X11 forwarding not set up"))?;
        sp.set_timeout(timeout);
        Ok(())
    }

    /// Listens for X11 clients on the first free display from `offset`,
    /// returning the display number.
    pub fn x11_create_display(
        &mut self,
        offset: u16,
        use_localhost: bool,
        single_use: bool,
    ) -> Result<u16> {
        forward::x11_create_display(&mut self.chans, &self.conf, offset, use_localhost, single_use)
    }

    /// Listens on a unix socket, forwarding agent clients to the peer.
    #[cfg(unix)]
    pub fn create_agent_listener(&mut self, path: &Path) -> Result<ChanNum> {
        forward::create_agent_listener(&mut self.chans, path)
    }
}
