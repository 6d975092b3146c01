//! SSH channel multiplexing with flow control and port forwarding.
//!
//! Sits between an SSH session layer and local sockets or descriptors.
//! The session layer supplies a [`Transport`] for outbound messages and
//! hands received channel messages to [`Runner::dispatch()`].

#![forbid(unsafe_code)]

// avoids headscratching
#![deny(unused_must_use)]

pub mod packets;
pub mod sshnames;
pub mod config;
// exported so that some error variants can be created with .fail().
pub mod error;
pub mod prelude;

mod buffer;
mod channel;
mod channels;
mod dispatch;
mod fdio;
mod forward;
mod handlers;
mod runner;
mod socks;
mod sunsetlog;
mod test;
mod traffic;
mod x11;

// Application API
pub use error::{Error, Result};
pub use sshnames::ChanFail;
pub use config::{MuxConfig, ProtoRevision};

pub use buffer::Buffer;
pub use channel::{
    ChanFilter, ChanKind, ChanNum, Channel, ConnectState, Detach, DetachFn, ExtUsage, FwdTarget,
    HalfState, OpenConfirmFn, StatusFn, StatusReply,
};
pub use channels::Channels;
pub use fdio::{ChanIo, Handle};
#[cfg(unix)]
pub use fdio::FdHandle;
pub use forward::PermittedOpen;
pub use runner::Runner;
pub use traffic::{PacketQueue, Transport};
pub use x11::X11Spoof;
