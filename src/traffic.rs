//! The seam between the channel layer and the SSH transport.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result},
    log::{debug, error, info, log, trace, warn},
};

use std::collections::VecDeque;

use crate::packets::Packet;

/// Outbound half of the SSH transport, as seen by the channel layer.
///
/// The transport delivers packets in order and reliably, and encodes
/// them on the wire. Inbound packets are passed to
/// [`Runner::dispatch()`](crate::Runner::dispatch) by the session layer.
pub trait Transport {
    /// Queues a packet for sending.
    fn send(&mut self, p: Packet) -> Result<()>;

    /// Tears down the connection after a fatal protocol violation.
    fn disconnect(&mut self, reason: &str);

    /// Largest channel data payload the transport can carry in one packet,
    /// independent of channel flow control.
    fn max_payload(&self) -> usize {
        crate::config::DEFAULT_MAX_PACKET
    }
}

/// An in-memory [`Transport`] that queues sent packets.
///
/// Useful for embedding where the application drains packets itself,
/// and for tests.
#[derive(Debug, Default)]
pub struct PacketQueue {
    out: VecDeque<Packet>,
    max_payload: Option<usize>,
    disconnected: Option<String>,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits the payload size reported by [`Transport::max_payload()`]
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload: Some(max_payload), ..Default::default() }
    }

    pub fn pop(&mut self) -> Option<Packet> {
        self.out.pop_front()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Packet> + '_ {
        self.out.drain(..)
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// The reason given to [`Transport::disconnect()`], if called.
    pub fn disconnected(&self) -> Option<&str> {
        self.disconnected.as_deref()
    }
}

impl Transport for PacketQueue {
    fn send(&mut self, p: Packet) -> Result<()> {
        if self.disconnected.is_some() {
            return Err(Error::msg("Transport is disconnected"));
        }
        trace!("send {p:?}");
        self.out.push_back(p);
        Ok(())
    }

    fn disconnect(&mut self, reason: &str) {
        warn!("Disconnecting: {reason}");
        self.disconnected = Some(reason.into());
    }

    fn max_payload(&self) -> usize {
        self.max_payload.unwrap_or(crate::config::DEFAULT_MAX_PACKET)
    }
}
