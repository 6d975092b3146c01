//! SOCKS4, SOCKS4A and SOCKS5 request sniffing for dynamic forwarding.
//!
//! Only CONNECT is supported, and SOCKS5 without authentication.
//! Decoders take a channel's buffered input and append replies to its
//! output. They return `Ok(None)` when more data is needed.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::net::{Ipv4Addr, Ipv6Addr};

use pretty_hex::PrettyHex;

use crate::buffer::Buffer;
use crate::channel::FwdTarget;
use crate::config::SOCKS4_MAX_FIELD;

const SOCKS4_HEADER: usize = 8;
const SOCKS_CONNECT: u8 = 1;
const SOCKS4_GRANTED: u8 = 0x5a;

const SOCKS5_NOAUTH: u8 = 0;
const SOCKS5_IPV4: u8 = 1;
const SOCKS5_DOMAIN: u8 = 3;
const SOCKS5_IPV6: u8 = 4;

/// Decodes a SOCKS request at the start of `input`.
///
/// `auth_done` tracks SOCKS5 method negotiation across calls.
pub(crate) fn decode(
    input: &mut Buffer,
    output: &mut Buffer,
    auth_done: &mut bool,
) -> Result<Option<FwdTarget>> {
    // version, and for SOCKS5 nmethods plus one method
    if input.len() < 3 {
        return Ok(None);
    }
    trace!("socks request {:?}", input.peek().hex_dump());
    match input.peek()[0] {
        4 => decode_socks4(input, output),
        5 => decode_socks5(input, output, auth_done),
        v => {
            debug!("unknown socks version {v}");
            Err(Error::msg("Unknown SOCKS version"))
        }
    }
}

/// Length of a NUL terminated field, excluding the NUL.
fn nul_field(data: &[u8]) -> Result<Option<usize>> {
    let limit = data.len().min(SOCKS4_MAX_FIELD);
    match data[..limit].iter().position(|&b| b == 0) {
        Some(l) => Ok(Some(l)),
        None if data.len() >= SOCKS4_MAX_FIELD => {
            debug!("socks4 field too long");
            Err(Error::msg("SOCKS4 field too long"))
        }
        None => Ok(None),
    }
}

fn decode_socks4(input: &mut Buffer, output: &mut Buffer) -> Result<Option<FwdTarget>> {
    let p = input.peek();
    if p.len() < SOCKS4_HEADER {
        return Ok(None);
    }
    let command = p[1];
    let port = u16::from_be_bytes([p[2], p[3]]);
    let addr = [p[4], p[5], p[6], p[7]];
    // 0.0.0.x with nonzero x means a hostname follows the user
    let socks4a = addr[..3] == [0, 0, 0] && addr[3] != 0;

    let mut off = SOCKS4_HEADER;
    let Some(ulen) = nul_field(&p[off..])? else {
        return Ok(None);
    };
    off += ulen + 1;

    let host = if socks4a {
        let Some(hlen) = nul_field(&p[off..])? else {
            return Ok(None);
        };
        let h = core::str::from_utf8(&p[off..off + hlen])
            .map_err(|_| Error::msg("Bad SOCKS4A hostname"))?
            .to_string();
        off += hlen + 1;
        h
    } else {
        Ipv4Addr::from(addr).to_string()
    };

    if command != SOCKS_CONNECT {
        debug!("socks4 cannot handle command {command}");
        return Err(Error::msg("Unsupported SOCKS4 command"));
    }
    input.consume(off);
    debug!("socks4 connect to {host}:{port}");

    output.append(&[0, SOCKS4_GRANTED, 0, 0, 0, 0, 0, 0]);
    Ok(Some(FwdTarget { host, port }))
}

fn decode_socks5(
    input: &mut Buffer,
    output: &mut Buffer,
    auth_done: &mut bool,
) -> Result<Option<FwdTarget>> {
    let p = input.peek();

    if !*auth_done {
        let nmethods = p[1] as usize;
        if p.len() < nmethods + 2 {
            return Ok(None);
        }
        if !p[2..2 + nmethods].contains(&SOCKS5_NOAUTH) {
            debug!("socks5 auth method not supported");
            return Err(Error::msg("No acceptable SOCKS5 method"));
        }
        input.consume(nmethods + 2);
        output.append(&[5, SOCKS5_NOAUTH]);
        *auth_done = true;
        trace!("socks5 auth done");
        return Ok(None);
    }

    // version, command, reserved, address type, first address byte
    if p.len() < 5 {
        return Ok(None);
    }
    if p[0] != 5 || p[1] != SOCKS_CONNECT || p[2] != 0 {
        debug!("socks5 bad request {:02x} {:02x} {:02x}", p[0], p[1], p[2]);
        return Err(Error::msg("Unsupported SOCKS5 request"));
    }
    let (prefix, addrlen) = match p[3] {
        SOCKS5_IPV4 => (0, 4),
        SOCKS5_DOMAIN => (1, p[4] as usize),
        SOCKS5_IPV6 => (0, 16),
        t => {
            debug!("socks5 bad address type {t}");
            return Err(Error::msg("Bad SOCKS5 address type"));
        }
    };
    let start = 4 + prefix;
    let need = start + addrlen + 2;
    if p.len() < need {
        return Ok(None);
    }
    let a = &p[start..start + addrlen];
    let host = match p[3] {
        SOCKS5_IPV4 => Ipv4Addr::from(<[u8; 4]>::try_from(a).trap()?).to_string(),
        SOCKS5_IPV6 => Ipv6Addr::from(<[u8; 16]>::try_from(a).trap()?).to_string(),
        _ => core::str::from_utf8(a)
            .map_err(|_| Error::msg("Bad SOCKS5 hostname"))?
            .to_string(),
    };
    let port = u16::from_be_bytes([p[need - 2], p[need - 1]]);
    input.consume(need);
    debug!("socks5 connect to {host}:{port}");

    // succeeded, bound to 0.0.0.0:0
    output.append(&[5, 0, 0, SOCKS5_IPV4, 0, 0, 0, 0, 0, 0]);
    Ok(Some(FwdTarget { host, port }))
}
