//! Descriptors attached to channels, and their registration with the poller.
//!
//! A channel holds opaque handles: sockets, pipes or a terminal. Read and
//! write ends are either one shared handle (a socket) or two separate ones.
//! An end that has been closed is simply absent.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use std::io::{self, Read, Write};
use std::net::Shutdown;
#[cfg(unix)]
use std::os::fd::{AsRawFd, OwnedFd};
#[cfg(unix)]
use std::path::PathBuf;

use mio::event::Source;
use mio::{Interest, Registry, Token};

use crate::channel::ChanNum;

/// A readable and/or writable non-blocking endpoint.
///
/// Operations a handle doesn't support return [`io::ErrorKind::Unsupported`].
pub trait Handle: Source {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn shutdown(&self, _how: Shutdown) -> io::Result<()> {
        Ok(())
    }

    /// Pending socket error, eg the result of a non-blocking connect
    fn take_error(&self) -> io::Result<Option<io::Error>> {
        Ok(None)
    }

    /// Whether a non-blocking connect has completed.
    fn connected(&self) -> io::Result<bool> {
        Ok(true)
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        Ok(())
    }
}

fn not_connected(r: io::Result<()>) -> io::Result<bool> {
    match r {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
        Err(e) => Err(e),
    }
}

impl Handle for mio::net::TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        mio::net::TcpStream::shutdown(self, how)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        mio::net::TcpStream::take_error(self)
    }

    fn connected(&self) -> io::Result<bool> {
        not_connected(self.peer_addr().map(|_| ()))
    }
}

#[cfg(unix)]
impl Handle for mio::net::UnixStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        mio::net::UnixStream::shutdown(self, how)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        mio::net::UnixStream::take_error(self)
    }

    fn connected(&self) -> io::Result<bool> {
        not_connected(self.peer_addr().map(|_| ()))
    }
}

/// A plain file descriptor, such as a pipe to a child process or a terminal.
#[cfg(unix)]
#[derive(Debug)]
pub struct FdHandle {
    fd: OwnedFd,
}

#[cfg(unix)]
impl FdHandle {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }
}

#[cfg(unix)]
impl Source for FdHandle {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        mio::unix::SourceFd(&self.fd.as_raw_fd()).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        mio::unix::SourceFd(&self.fd.as_raw_fd()).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        mio::unix::SourceFd(&self.fd.as_raw_fd()).deregister(registry)
    }
}

#[cfg(unix)]
impl Handle for FdHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(nix::unistd::read(self.fd.as_raw_fd(), buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(nix::unistd::write(self.fd.as_raw_fd(), buf)?)
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        use nix::sys::socket::Shutdown as S;
        let how = match how {
            Shutdown::Read => S::Read,
            Shutdown::Write => S::Write,
            Shutdown::Both => S::Both,
        };
        match nix::sys::socket::shutdown(self.fd.as_raw_fd(), how) {
            // pipes and terminals are closed on drop instead
            Err(nix::errno::Errno::ENOTSOCK) => Ok(()),
            r => Ok(r?),
        }
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        use nix::fcntl::{fcntl, FcntlArg, OFlag};
        let fd = self.fd.as_raw_fd();
        let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
        fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
        Ok(())
    }
}

/// A listening socket owned by a listener channel
#[derive(Debug)]
pub(crate) enum Listener {
    Tcp(mio::net::TcpListener),
    #[cfg(unix)]
    Unix(mio::net::UnixListener, PathBuf),
}

/// Where an accepted connection came from
#[derive(Debug, Clone)]
pub(crate) struct Origin {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn accept(&self) -> io::Result<(Box<dyn Handle>, Origin)> {
        match self {
            Listener::Tcp(l) => {
                let (s, addr) = l.accept()?;
                let _ = s.set_nodelay(true);
                Ok((Box::new(s), Origin { host: addr.ip().to_string(), port: addr.port() }))
            }
            #[cfg(unix)]
            Listener::Unix(l, _) => {
                let (s, _) = l.accept()?;
                Ok((Box::new(s), Origin { host: "127.0.0.1".into(), port: 0 }))
            }
        }
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix(_, path) = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl Source for Listener {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self {
            Listener::Tcp(l) => l.register(registry, token, interests),
            #[cfg(unix)]
            Listener::Unix(l, _) => l.register(registry, token, interests),
        }
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self {
            Listener::Tcp(l) => l.reregister(registry, token, interests),
            #[cfg(unix)]
            Listener::Unix(l, _) => l.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Listener::Tcp(l) => l.deregister(registry),
            #[cfg(unix)]
            Listener::Unix(l, _) => l.deregister(registry),
        }
    }
}

/// Which of a channel's descriptors a poll token refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    /// The read end, a shared socket, or a listener
    Read = 0,
    Write = 1,
    Ext = 2,
}

pub(crate) fn token(num: ChanNum, slot: Slot) -> Token {
    Token(((num.0 as usize) << 2) | slot as usize)
}

pub(crate) fn from_token(t: Token) -> Option<(ChanNum, Slot)> {
    let slot = match t.0 & 3 {
        0 => Slot::Read,
        1 => Slot::Write,
        2 => Slot::Ext,
        _ => return None,
    };
    Some((ChanNum((t.0 >> 2) as u32), slot))
}

/// A source along with its registration state
pub(crate) struct Fd<S: Source + ?Sized = dyn Handle> {
    src: Box<S>,
    registered: bool,
}

impl<S: Source + ?Sized> Fd<S> {
    pub fn new(src: Box<S>) -> Self {
        Self { src, registered: false }
    }

    pub fn get(&self) -> &S {
        &self.src
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.src
    }

    /// Sets the poll interest, `None` removes the source from the poller.
    ///
    /// mio is edge triggered, reregistering each poll round re-arms
    /// readiness that wasn't fully consumed.
    pub fn set_interest(
        &mut self,
        reg: &Registry,
        token: Token,
        want: Option<Interest>,
    ) -> io::Result<()> {
        match (want, self.registered) {
            (Some(i), false) => {
                reg.register(&mut *self.src, token, i)?;
                self.registered = true;
            }
            (Some(i), true) => reg.reregister(&mut *self.src, token, i)?,
            (None, true) => {
                self.registered = false;
                reg.deregister(&mut *self.src)?;
            }
            (None, false) => (),
        }
        Ok(())
    }

    /// Removes from the poller before the source is dropped
    pub fn release(mut self, reg: &Registry) {
        if self.registered {
            if let Err(e) = reg.deregister(&mut *self.src) {
                trace!("deregister failed: {e}");
            }
        }
    }
}

fn interest(rd: bool, wr: bool) -> Option<Interest> {
    match (rd, wr) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}

enum Ends {
    None,
    /// One handle serving both directions, such as a socket.
    /// Each direction can be shut down independently.
    Shared {
        fd: Fd,
        rd: bool,
        wr: bool,
    },
    Split {
        rd: Option<Fd>,
        wr: Option<Fd>,
    },
    Listen(Fd<Listener>),
}

/// The read and write ends of a channel.
pub struct ChanIo(Ends);

impl core::fmt::Debug for ChanIo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.0 {
            Ends::None => f.write_str("None"),
            Ends::Shared { rd, wr, .. } => {
                f.debug_struct("Shared").field("rd", rd).field("wr", wr).finish()
            }
            Ends::Split { rd, wr } => f
                .debug_struct("Split")
                .field("rd", &rd.is_some())
                .field("wr", &wr.is_some())
                .finish(),
            Ends::Listen(_) => f.write_str("Listen"),
        }
    }
}

impl ChanIo {
    /// No descriptors, eg a channel waiting for [`Channels::set_fds()`](crate::Channels::set_fds)
    pub fn none() -> Self {
        Self(Ends::None)
    }

    /// A bidirectional handle used for both ends
    pub fn socket(h: impl Handle + 'static) -> Self {
        Self::socket_boxed(Box::new(h))
    }

    pub fn socket_boxed(h: Box<dyn Handle>) -> Self {
        Self(Ends::Shared { fd: Fd::new(h), rd: true, wr: true })
    }

    /// Separate handles, for example pipes to a child process.
    pub fn split(rd: Option<Box<dyn Handle>>, wr: Option<Box<dyn Handle>>) -> Self {
        Self(Ends::Split { rd: rd.map(Fd::new), wr: wr.map(Fd::new) })
    }

    pub(crate) fn listener(l: Listener) -> Self {
        Self(Ends::Listen(Fd::new(Box::new(l))))
    }

    pub fn is_none(&self) -> bool {
        matches!(self.0, Ends::None)
    }

    pub fn has_read(&self) -> bool {
        match &self.0 {
            Ends::Shared { rd, .. } => *rd,
            Ends::Split { rd, .. } => rd.is_some(),
            _ => false,
        }
    }

    pub fn has_write(&self) -> bool {
        match &self.0 {
            Ends::Shared { wr, .. } => *wr,
            Ends::Split { wr, .. } => wr.is_some(),
            _ => false,
        }
    }

    pub(crate) fn get_listener(&self) -> Option<&Listener> {
        match &self.0 {
            Ends::Listen(l) => Some(l.get()),
            _ => None,
        }
    }

    /// The shared socket, used while connecting
    pub(crate) fn shared(&self) -> Option<&dyn Handle> {
        match &self.0 {
            Ends::Shared { fd, .. } => Some(fd.get()),
            _ => None,
        }
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.0 {
            Ends::Shared { fd, rd: true, .. } => fd.get_mut().read(buf),
            Ends::Split { rd: Some(fd), .. } => fd.get_mut().read(buf),
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.0 {
            Ends::Shared { fd, wr: true, .. } => fd.get_mut().write(buf),
            Ends::Split { wr: Some(fd), .. } => fd.get_mut().write(buf),
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    pub(crate) fn set_nonblocking(&self) -> io::Result<()> {
        match &self.0 {
            Ends::Shared { fd, .. } => fd.get().set_nonblocking(),
            Ends::Split { rd, wr } => {
                if let Some(fd) = rd {
                    fd.get().set_nonblocking()?;
                }
                if let Some(fd) = wr {
                    fd.get().set_nonblocking()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Closes the read end.
    pub(crate) fn close_read(&mut self, reg: &Registry) {
        let both_closed = match &mut self.0 {
            Ends::Shared { fd, rd, wr } => {
                if *rd {
                    *rd = false;
                    if let Err(e) = fd.get().shutdown(Shutdown::Read) {
                        trace!("shutdown read: {e}");
                    }
                }
                !*wr
            }
            Ends::Split { rd, .. } => {
                if let Some(fd) = rd.take() {
                    fd.release(reg)
                }
                false
            }
            _ => false,
        };
        if both_closed {
            self.close_all(reg)
        }
    }

    /// Closes the write end.
    pub(crate) fn close_write(&mut self, reg: &Registry) {
        let both_closed = match &mut self.0 {
            Ends::Shared { fd, rd, wr } => {
                if *wr {
                    *wr = false;
                    if let Err(e) = fd.get().shutdown(Shutdown::Write) {
                        trace!("shutdown write: {e}");
                    }
                }
                !*rd
            }
            Ends::Split { wr, .. } => {
                if let Some(fd) = wr.take() {
                    fd.release(reg)
                }
                false
            }
            _ => false,
        };
        if both_closed {
            self.close_all(reg)
        }
    }

    /// Shuts down and drops everything
    pub(crate) fn close_all(&mut self, reg: &Registry) {
        match core::mem::replace(&mut self.0, Ends::None) {
            Ends::Shared { fd, .. } => {
                let _ = fd.get().shutdown(Shutdown::Both);
                fd.release(reg);
            }
            Ends::Split { rd, wr } => {
                if let Some(fd) = rd {
                    fd.release(reg)
                }
                if let Some(fd) = wr {
                    fd.release(reg)
                }
            }
            Ends::Listen(l) => l.release(reg),
            Ends::None => (),
        }
    }

    /// Registers interest for the next poll
    pub(crate) fn set_interest(
        &mut self,
        reg: &Registry,
        num: ChanNum,
        want_rd: bool,
        want_wr: bool,
    ) -> io::Result<()> {
        match &mut self.0 {
            Ends::Shared { fd, rd, wr } => {
                let i = interest(want_rd && *rd, want_wr && *wr);
                fd.set_interest(reg, token(num, Slot::Read), i)
            }
            Ends::Split { rd, wr } => {
                if let Some(fd) = rd {
                    fd.set_interest(reg, token(num, Slot::Read), interest(want_rd, false))?;
                }
                if let Some(fd) = wr {
                    fd.set_interest(reg, token(num, Slot::Write), interest(false, want_wr))?;
                }
                Ok(())
            }
            Ends::Listen(l) => {
                l.set_interest(reg, token(num, Slot::Read), interest(want_rd, false))
            }
            Ends::None => Ok(()),
        }
    }
}

/// The extended data (stderr) descriptor
pub(crate) struct ExtFd(pub Option<Fd>);

impl ExtFd {
    pub fn new(h: Option<Box<dyn Handle>>) -> Self {
        Self(h.map(Fd::new))
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.0 {
            Some(fd) => fd.get_mut().read(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.0 {
            Some(fd) => fd.get_mut().write(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    pub fn set_nonblocking(&self) -> io::Result<()> {
        match &self.0 {
            Some(fd) => fd.get().set_nonblocking(),
            None => Ok(()),
        }
    }

    pub fn set_interest(
        &mut self,
        reg: &Registry,
        num: ChanNum,
        want_rd: bool,
        want_wr: bool,
    ) -> io::Result<()> {
        match &mut self.0 {
            Some(fd) => fd.set_interest(reg, token(num, Slot::Ext), interest(want_rd, want_wr)),
            None => Ok(()),
        }
    }

    pub fn close(&mut self, reg: &Registry) {
        if let Some(fd) = self.0.take() {
            fd.release(reg)
        }
    }
}

/// Readiness reported for a channel in the current poll round
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Ready {
    pub rd: bool,
    pub wr: bool,
    pub ext: bool,
}

impl Ready {
    pub fn add(&mut self, slot: Slot, ev: &mio::event::Event) {
        let err = ev.is_error();
        match slot {
            Slot::Read => {
                self.rd |= ev.is_readable() || ev.is_read_closed() || err;
                self.wr |= ev.is_writable() || ev.is_write_closed() || err;
            }
            Slot::Write => self.wr |= ev.is_writable() || ev.is_write_closed() || err,
            Slot::Ext => self.ext = true,
        }
    }
}
