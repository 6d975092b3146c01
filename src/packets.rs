//! Channel layer SSH messages, in decoded form.
//!
//! Wire encoding is the transport's concern. These are what the transport
//! hands to [`Runner::dispatch()`](crate::Runner::dispatch) and what the
//! channel layer asks it to send.

use core::fmt;

use crate::sshnames::*;

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOpen {
    /// sender's channel number
    pub num: u32,
    pub initial_window: u32,
    pub max_packet: u32,
    pub ty: ChannelOpenType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOpenType {
    Session,
    ForwardedTcpip(ForwardedTcpip),
    DirectTcpip(DirectTcpip),
    X11(X11),
    AuthAgent,
    Unknown(String),
}

impl ChannelOpenType {
    pub fn name(&self) -> &str {
        match self {
            Self::Session => SSH_CHANNEL_SESSION,
            Self::ForwardedTcpip(_) => SSH_CHANNEL_FORWARDED_TCPIP,
            Self::DirectTcpip(_) => SSH_CHANNEL_DIRECT_TCPIP,
            Self::X11(_) => SSH_CHANNEL_X11,
            Self::AuthAgent => SSH_CHANNEL_AUTH_AGENT,
            Self::Unknown(u) => u,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedTcpip {
    pub address: String,
    pub port: u32,
    pub origin: String,
    pub origin_port: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectTcpip {
    pub address: String,
    pub port: u32,
    pub origin: String,
    pub origin_port: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct X11 {
    pub origin: String,
    /// Omitted for peers with `Compat::x11_no_originator_port`
    pub origin_port: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOpenConfirmation {
    pub num: u32,
    pub sender_num: u32,
    /// `None` with [`ProtoRevision::Legacy`](crate::config::ProtoRevision)
    pub initial_window: Option<u32>,
    pub max_packet: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOpenFailure {
    pub num: u32,
    pub reason: u32,
    pub desc: String,
    pub lang: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelWindowAdjust {
    pub num: u32,
    pub adjust: u32,
}

#[derive(Clone, PartialEq)]
pub struct ChannelData {
    pub num: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq)]
pub struct ChannelDataExt {
    pub num: u32,
    pub code: u32,
    pub data: Vec<u8>,
}

// Data payloads are printed as lengths, they can be large
impl fmt::Debug for ChannelData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelData")
            .field("num", &self.num)
            .field("len", &self.data.len())
            .finish()
    }
}

impl fmt::Debug for ChannelDataExt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDataExt")
            .field("num", &self.num)
            .field("code", &self.code)
            .field("len", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEof {
    pub num: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelClose {
    pub num: u32,
}

/// Only used by [`ProtoRevision::Legacy`](crate::config::ProtoRevision)
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelCloseConfirmation {
    pub num: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSuccess {
    pub num: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFailure {
    pub num: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalRequest {
    pub want_reply: bool,
    pub req: GlobalRequestType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlobalRequestType {
    TcpipForward(TcpipForward),
    CancelTcpipForward(TcpipForward),
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TcpipForward {
    pub address: String,
    pub port: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestSuccess {
    /// Allocated port, for a `tcpip-forward` request with port 0
    pub port: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestFailure {}

/// Top level channel layer message
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    GlobalRequest(GlobalRequest),
    RequestSuccess(RequestSuccess),
    RequestFailure(RequestFailure),
    ChannelOpen(ChannelOpen),
    ChannelOpenConfirmation(ChannelOpenConfirmation),
    ChannelOpenFailure(ChannelOpenFailure),
    ChannelWindowAdjust(ChannelWindowAdjust),
    ChannelData(ChannelData),
    ChannelDataExt(ChannelDataExt),
    ChannelEof(ChannelEof),
    ChannelClose(ChannelClose),
    ChannelCloseConfirmation(ChannelCloseConfirmation),
    ChannelSuccess(ChannelSuccess),
    ChannelFailure(ChannelFailure),
}

macro_rules! packet_from {
    ( $( $name:ident ),* $(,)? ) => {
        $(
        impl From<$name> for Packet {
            fn from(s: $name) -> Packet {
                Packet::$name(s)
            }
        }
        )*
    }
}

packet_from!(
    GlobalRequest,
    RequestSuccess,
    RequestFailure,
    ChannelOpen,
    ChannelOpenConfirmation,
    ChannelOpenFailure,
    ChannelWindowAdjust,
    ChannelData,
    ChannelDataExt,
    ChannelEof,
    ChannelClose,
    ChannelCloseConfirmation,
    ChannelSuccess,
    ChannelFailure,
);

impl Packet {
    /// The local channel number a received message refers to.
    ///
    /// `None` for global messages, and for `ChannelOpen` where the number
    /// is the sender's.
    pub fn recipient(&self) -> Option<u32> {
        match self {
            Packet::ChannelOpenConfirmation(p) => Some(p.num),
            Packet::ChannelOpenFailure(p) => Some(p.num),
            Packet::ChannelWindowAdjust(p) => Some(p.num),
            Packet::ChannelData(p) => Some(p.num),
            Packet::ChannelDataExt(p) => Some(p.num),
            Packet::ChannelEof(p) => Some(p.num),
            Packet::ChannelClose(p) => Some(p.num),
            Packet::ChannelCloseConfirmation(p) => Some(p.num),
            Packet::ChannelSuccess(p) => Some(p.num),
            Packet::ChannelFailure(p) => Some(p.num),
            | Packet::GlobalRequest(_)
            | Packet::RequestSuccess(_)
            | Packet::RequestFailure(_)
            | Packet::ChannelOpen(_)
            => None,
        }
    }
}
