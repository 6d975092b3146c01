//! X11 authentication spoofing.
//!
//! The peer is given random fake authentication data. X11 clients connecting
//! over a forwarded channel present it, and we substitute the real data
//! before anything reaches the local X server.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::time::{Duration, Instant};

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::buffer::Buffer;
use crate::config::X11_FAKE_DATA_LEN;

/// Saved authentication for X11 forwarding, created on the first request.
pub struct X11Spoof {
    proto: String,
    real: Zeroizing<Vec<u8>>,
    fake: Vec<u8>,
    refuse_after: Option<Instant>,
}

impl core::fmt::Debug for X11Spoof {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("X11Spoof").field("proto", &self.proto).finish_non_exhaustive()
    }
}

impl X11Spoof {
    /// `real` is the cookie for the local display, such as from `xauth`.
    /// Fake data of the same length is generated.
    pub fn new(proto: &str, real: &[u8]) -> Result<Self> {
        let mut fake = vec![0u8; real.len()];
        fill_random(&mut fake)?;
        Ok(Self {
            proto: proto.into(),
            real: Zeroizing::new(real.to_vec()),
            fake,
            refuse_after: None,
        })
    }

    /// For when the local display's cookie isn't known. Connections
    /// will reach the X server with random data that it won't accept.
    pub fn with_random_cookie(proto: &str) -> Result<Self> {
        let mut real = Zeroizing::new(vec![0u8; X11_FAKE_DATA_LEN]);
        fill_random(&mut real)?;
        Self::new(proto, &real)
    }

    /// Authentication protocol name, eg `MIT-MAGIC-COOKIE-1`
    pub fn proto(&self) -> &str {
        &self.proto
    }

    pub fn fake_data(&self) -> &[u8] {
        &self.fake
    }

    /// Fake data in the hex form sent in an `x11-req` channel request
    pub fn fake_data_hex(&self) -> String {
        self.fake.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// New X11 connections are refused once `timeout` has elapsed.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.refuse_after = Some(Instant::now() + timeout)
    }
}

fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf).map_err(|_| Error::msg("RNG failed"))
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum X11Check {
    NeedMore,
    /// Real authentication data has been substituted
    Accept,
    Reject,
}

fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

/// Checks the X11 connection setup at the start of `output`.
///
/// On success the fake data in the buffer is replaced with the real data.
pub(crate) fn check_auth(spoof: Option<&X11Spoof>, output: &mut Buffer) -> X11Check {
    let Some(sp) = spoof else {
        debug!("X11 connection without forwarding set up");
        return X11Check::Reject;
    };

    if sp.refuse_after.is_some_and(|t| Instant::now() >= t) {
        info!("Rejected X11 connection after timeout expired");
        return X11Check::Reject;
    }

    let b = output.peek_mut();
    if b.len() < 12 {
        return X11Check::NeedMore;
    }
    let (proto_len, data_len) = match b[0] {
        0x42 => (u16::from_be_bytes([b[6], b[7]]), u16::from_be_bytes([b[8], b[9]])),
        0x6c => (u16::from_le_bytes([b[6], b[7]]), u16::from_le_bytes([b[8], b[9]])),
        o => {
            debug!("Initial X11 packet contains bad byte order byte: 0x{o:x}");
            return X11Check::Reject;
        }
    };
    let (proto_len, data_len) = (proto_len as usize, data_len as usize);
    let data_off = 12 + pad4(proto_len);
    if b.len() < data_off + pad4(data_len) {
        return X11Check::NeedMore;
    }

    if &b[12..12 + proto_len] != sp.proto.as_bytes() {
        debug!("X11 connection uses different authentication protocol");
        return X11Check::Reject;
    }
    let data = &mut b[data_off..data_off + data_len];
    if data_len != sp.fake.len() || !bool::from(data.ct_eq(&sp.fake)) {
        debug!("X11 auth data does not match fake data");
        return X11Check::Reject;
    }
    if sp.fake.len() != sp.real.len() {
        error!("X11 fake data length {} != real data length {}", sp.fake.len(), sp.real.len());
        return X11Check::Reject;
    }
    data.copy_from_slice(&sp.real);
    X11Check::Accept
}
