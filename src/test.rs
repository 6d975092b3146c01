// Scenario tests driving a Runner over loopback sockets, with a
// PacketQueue standing in for the peer.

#[cfg(test)]
mod tests {
    #[allow(unused_imports)]
    use log::{debug, trace};

    use std::io::{ErrorKind, Read, Write};
    use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
    use std::time::Duration;

    use crate::config::{MuxConfig, ProtoRevision};
    use crate::forward::{self, DispatchOpenError};
    use crate::packets::*;
    use crate::sshnames::*;
    use crate::sunsetlog::init_test_log;
    use crate::{ChanKind, ChanNum, PacketQueue, Runner};

    const TICK: Option<Duration> = Some(Duration::from_millis(10));
    const MAX_TICKS: usize = 300;

    /// Runs until the peer is sent a matching packet, dropping others
    fn tick_until(
        r: &mut Runner,
        q: &mut PacketQueue,
        mut f: impl FnMut(&Packet) -> bool,
    ) -> Packet {
        for _ in 0..MAX_TICKS {
            r.run_once(q, TICK).unwrap();
            while let Some(p) = q.pop() {
                if f(&p) {
                    return p;
                }
                trace!("skipping {p:?}");
            }
        }
        panic!("no matching packet sent");
    }

    /// Collects `len` bytes of channel data sent to the peer's channel `num`
    fn data_to_peer(r: &mut Runner, q: &mut PacketQueue, num: u32, len: usize) -> Vec<u8> {
        let mut got = Vec::new();
        for _ in 0..MAX_TICKS {
            r.run_once(q, TICK).unwrap();
            while let Some(p) = q.pop() {
                match p {
                    Packet::ChannelData(d) if d.num == num => got.extend_from_slice(&d.data),
                    p => trace!("skipping {p:?}"),
                }
            }
            if got.len() >= len {
                return got;
            }
        }
        panic!("only got {} of {len} bytes", got.len());
    }

    /// Reads from a local socket until `len` bytes or EOF
    fn read_local(r: &mut Runner, q: &mut PacketQueue, s: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut got = Vec::new();
        let mut buf = [0u8; 1024];
        for _ in 0..MAX_TICKS {
            r.run_once(q, TICK).unwrap();
            match s.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => got.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => (),
                Err(e) if e.kind() == ErrorKind::ConnectionReset => break,
                Err(e) => panic!("read failed: {e}"),
            }
            if got.len() >= len {
                break;
            }
        }
        got
    }

    fn connect_local(port: u16) -> TcpStream {
        let s = TcpStream::connect(("127.0.0.1", port)).unwrap();
        s.set_nonblocking(true).unwrap();
        s
    }

    fn closed_port() -> SocketAddr {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap()
    }

    fn confirm(num: u32, sender_num: u32, rev: ProtoRevision) -> Packet {
        let (initial_window, max_packet) = match rev {
            ProtoRevision::Current => (Some(64 * 1024), Some(16 * 1024)),
            ProtoRevision::Legacy => (None, None),
        };
        ChannelOpenConfirmation { num, sender_num, initial_window, max_packet }.into()
    }

    fn listeners(r: &Runner) -> usize {
        r.channels().iter().filter(|c| c.kind().is_listener()).count()
    }

    #[test]
    fn local_forward_end_to_end() {
        init_test_log();
        let mut q = PacketQueue::new();
        let mut r = Runner::new_client().unwrap();
        let port = r.create_local_forward(Some("127.0.0.1"), 0, "dest.example", 80).unwrap();

        let mut app = connect_local(port);
        let app_port = app.local_addr().unwrap().port();
        let Packet::ChannelOpen(open) =
            tick_until(&mut r, &mut q, |p| matches!(p, Packet::ChannelOpen(_)))
        else {
            unreachable!()
        };
        assert_eq!(
            open.ty,
            ChannelOpenType::DirectTcpip(DirectTcpip {
                address: "dest.example".into(),
                port: 80,
                origin: "127.0.0.1".into(),
                origin_port: app_port as u32,
            })
        );
        // not addressable until confirmed
        assert!(r.channels().get(ChanNum(open.num)).is_err());

        r.dispatch(confirm(open.num, 100, ProtoRevision::Current), &mut q).unwrap();
        assert_eq!(r.channels().get(ChanNum(open.num)).unwrap().kind(), ChanKind::Open);

        r.dispatch(ChannelData { num: open.num, data: b"hello from peer".to_vec() }.into(), &mut q)
            .unwrap();
        assert_eq!(read_local(&mut r, &mut q, &mut app, 15), b"hello from peer");

        app.write_all(b"hello from app").unwrap();
        assert_eq!(data_to_peer(&mut r, &mut q, 100, 14), b"hello from app");

        // local eof reaches the peer
        app.shutdown(Shutdown::Write).unwrap();
        tick_until(&mut r, &mut q, |p| *p == ChannelEof { num: 100 }.into());

        // peer closes, the local socket sees eof and the channel is freed
        r.dispatch(ChannelClose { num: open.num }.into(), &mut q).unwrap();
        tick_until(&mut r, &mut q, |p| *p == ChannelClose { num: 100 }.into());
        assert!(read_local(&mut r, &mut q, &mut app, 1).is_empty());
        assert_eq!(r.channels().count(), 1);
        assert_eq!(listeners(&r), 1);
    }

    #[test]
    fn server_direct_open() {
        init_test_log();
        let mut q = PacketQueue::new();
        let mut r = Runner::new_server().unwrap();
        let dest = TcpListener::bind("127.0.0.1:0").unwrap();
        let dport = dest.local_addr().unwrap().port();
        r.add_permitted_open("127.0.0.1", dport);

        let open = |num, port| -> Packet {
            ChannelOpen {
                num,
                initial_window: 8000,
                max_packet: 1000,
                ty: ChannelOpenType::DirectTcpip(DirectTcpip {
                    address: "127.0.0.1".into(),
                    port,
                    origin: "192.0.2.1".into(),
                    origin_port: 40000,
                }),
            }
            .into()
        };

        // a different port is refused
        r.dispatch(open(6, dport as u32 + 1), &mut q).unwrap();
        assert!(matches!(q.pop(), Some(Packet::ChannelOpenFailure(f))
            if f.num == 6 && f.reason == ChanFail::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED as u32));

        r.dispatch(open(7, dport as u32), &mut q).unwrap();
        let Packet::ChannelOpenConfirmation(c) =
            tick_until(&mut r, &mut q, |p| matches!(p, Packet::ChannelOpenConfirmation(_)))
        else {
            unreachable!()
        };
        assert_eq!(c.num, 7);
        let num = c.sender_num;

        let (mut s, _) = dest.accept().unwrap();
        s.set_nonblocking(true).unwrap();
        s.write_all(b"banner").unwrap();
        assert_eq!(data_to_peer(&mut r, &mut q, 7, 6), b"banner");

        // admin restriction now excludes it
        r.add_adm_permitted_open("192.0.2.50", 0);
        r.dispatch(open(8, dport as u32), &mut q).unwrap();
        assert!(matches!(q.pop(), Some(Packet::ChannelOpenFailure(f)) if f.num == 8));
        assert!(r.channels().get(ChanNum(num)).is_ok());
    }

    #[test]
    fn multi_address_fallback() {
        init_test_log();
        let mut q = PacketQueue::new();
        let mut r = Runner::new_server().unwrap();
        let dest = TcpListener::bind("127.0.0.1:0").unwrap();
        let addrs = vec![closed_port(), closed_port(), dest.local_addr().unwrap()];

        let chans = r.channels_mut();
        let num = forward::connect_addrs(chans, "multi", 22, addrs, SSH_CHANNEL_DIRECT_TCPIP, "m")
            .unwrap();
        r.channels_mut().set_remote(num, 5, 1000, 100).unwrap();
        let p = tick_until(&mut r, &mut q, |p| matches!(p, Packet::ChannelOpenConfirmation(_)));
        assert_eq!(
            p,
            ChannelOpenConfirmation {
                num: 5,
                sender_num: num.0,
                initial_window: Some(crate::config::TCP_WINDOW as u32),
                max_packet: Some(crate::config::TCP_MAX_PACKET as u32),
            }
            .into()
        );
        dest.accept().unwrap();
    }

    #[test]
    fn multi_address_exhausted() {
        init_test_log();
        let mut q = PacketQueue::new();
        let mut r = Runner::new_server().unwrap();
        let addrs = vec![closed_port(), closed_port()];

        let chans = r.channels_mut();
        match forward::connect_addrs(chans, "gone", 22, addrs, SSH_CHANNEL_DIRECT_TCPIP, "g") {
            // refused immediately
            Err(DispatchOpenError::Failure(f)) => assert_eq!(f, ChanFail::SSH_OPEN_CONNECT_FAILED),
            Err(e) => panic!("{e:?}"),
            Ok(num) => {
                r.channels_mut().set_remote(num, 5, 1000, 100).unwrap();
                let p = tick_until(&mut r, &mut q, |p| matches!(p, Packet::ChannelOpenFailure(_)));
                assert!(matches!(p, Packet::ChannelOpenFailure(f)
                    if f.num == 5 && f.reason == ChanFail::SSH_OPEN_CONNECT_FAILED as u32));
            }
        }
        assert_eq!(r.channels().count(), 0);
    }

    #[test]
    fn legacy_half_close() {
        init_test_log();
        let mut q = PacketQueue::new();
        let conf = MuxConfig { revision: ProtoRevision::Legacy, ..MuxConfig::new_client() };
        let mut r = Runner::new(conf).unwrap();
        let port = r.create_local_forward(Some("127.0.0.1"), 0, "dest", 1).unwrap();

        // local side finishes first
        let mut app = connect_local(port);
        let Packet::ChannelOpen(open) =
            tick_until(&mut r, &mut q, |p| matches!(p, Packet::ChannelOpen(_)))
        else {
            unreachable!()
        };
        r.dispatch(confirm(open.num, 200, ProtoRevision::Legacy), &mut q).unwrap();
        app.write_all(b"last words").unwrap();
        app.shutdown(Shutdown::Write).unwrap();
        let mut data = Vec::new();
        tick_until(&mut r, &mut q, |p| match p {
            Packet::ChannelData(d) if d.num == 200 => {
                data.extend_from_slice(&d.data);
                false
            }
            p => *p == ChannelClose { num: 200 }.into(),
        });
        assert_eq!(data, b"last words");
        assert_eq!(r.channels().get(ChanNum(open.num)).unwrap().kind(), ChanKind::Closed);
        // no eof messages in this revision
        assert!(r.dispatch(ChannelEof { num: open.num }.into(), &mut q).is_err());
        r.dispatch(ChannelCloseConfirmation { num: open.num }.into(), &mut q).unwrap();
        assert_eq!(r.channels().count(), 1);

        // peer finishes first, pending output is still written
        let conf = MuxConfig { revision: ProtoRevision::Legacy, ..MuxConfig::new_client() };
        let mut r = Runner::new(conf).unwrap();
        let mut q = PacketQueue::new();
        let port = r.create_local_forward(Some("127.0.0.1"), 0, "dest", 1).unwrap();
        let mut app = connect_local(port);
        let Packet::ChannelOpen(open) =
            tick_until(&mut r, &mut q, |p| matches!(p, Packet::ChannelOpen(_)))
        else {
            unreachable!()
        };
        r.dispatch(confirm(open.num, 201, ProtoRevision::Legacy), &mut q).unwrap();
        r.dispatch(ChannelData { num: open.num, data: b"bye".to_vec() }.into(), &mut q).unwrap();
        r.dispatch(ChannelClose { num: open.num }.into(), &mut q).unwrap();
        assert_eq!(q.pop(), Some(ChannelCloseConfirmation { num: 201 }.into()));
        assert_eq!(read_local(&mut r, &mut q, &mut app, 100), b"bye");
        assert_eq!(r.channels().count(), 1);
    }

    #[test]
    fn remote_forward_server() {
        init_test_log();
        let mut q = PacketQueue::new();
        let mut r = Runner::new_server().unwrap();
        let req = |req| -> Packet { GlobalRequest { want_reply: true, req }.into() };

        r.dispatch(
            req(GlobalRequestType::TcpipForward(TcpipForward {
                address: "localhost".into(),
                port: 0,
            })),
            &mut q,
        )
        .unwrap();
        let Some(Packet::RequestSuccess(RequestSuccess { port: Some(port) })) = q.pop() else {
            panic!("no allocated port");
        };
        assert!(listeners(&r) >= 1);

        let app = connect_local(port as u16);
        let app_port = app.local_addr().unwrap().port();
        let Packet::ChannelOpen(open) =
            tick_until(&mut r, &mut q, |p| matches!(p, Packet::ChannelOpen(_)))
        else {
            unreachable!()
        };
        assert_eq!(
            open.ty,
            ChannelOpenType::ForwardedTcpip(ForwardedTcpip {
                address: "localhost".into(),
                port,
                origin: "127.0.0.1".into(),
                origin_port: app_port as u32,
            })
        );

        r.dispatch(
            req(GlobalRequestType::CancelTcpipForward(TcpipForward {
                address: "localhost".into(),
                port,
            })),
            &mut q,
        )
        .unwrap();
        assert_eq!(q.pop(), Some(RequestSuccess { port: None }.into()));
        assert_eq!(listeners(&r), 0);
        // the accepted connection is unaffected
        assert_eq!(r.channels().count(), 1);

        r.dispatch(
            req(GlobalRequestType::CancelTcpipForward(TcpipForward {
                address: "localhost".into(),
                port,
            })),
            &mut q,
        )
        .unwrap();
        assert_eq!(q.pop(), Some(RequestFailure {}.into()));
    }

    #[test]
    fn remote_forward_client() {
        init_test_log();
        let mut q = PacketQueue::new();
        let mut r = Runner::new_client().unwrap();
        let dest = TcpListener::bind("127.0.0.1:0").unwrap();
        let dport = dest.local_addr().unwrap().port();

        r.create_remote_forward(&mut q, None, 0, "127.0.0.1", dport).unwrap();
        r.create_remote_forward(&mut q, None, 2222, "127.0.0.1", 1).unwrap();
        assert_eq!(q.len(), 2);
        q.drain().for_each(drop);

        r.dispatch(RequestSuccess { port: Some(5000) }.into(), &mut q).unwrap();
        r.dispatch(RequestFailure {}.into(), &mut q).unwrap();

        let open = |num, port| -> Packet {
            ChannelOpen {
                num,
                initial_window: 8000,
                max_packet: 1000,
                ty: ChannelOpenType::ForwardedTcpip(ForwardedTcpip {
                    address: "localhost".into(),
                    port,
                    origin: "192.0.2.9".into(),
                    origin_port: 1234,
                }),
            }
            .into()
        };

        // the failed forward was never recorded
        r.dispatch(open(3, 2222), &mut q).unwrap();
        assert!(matches!(q.pop(), Some(Packet::ChannelOpenFailure(f)) if f.num == 3));

        r.dispatch(open(4, 5000), &mut q).unwrap();
        let p = tick_until(&mut r, &mut q, |p| matches!(p, Packet::ChannelOpenConfirmation(_)));
        assert!(matches!(p, Packet::ChannelOpenConfirmation(c) if c.num == 4));
        dest.accept().unwrap();
    }

    #[test]
    fn dynamic_forward() {
        init_test_log();
        let mut q = PacketQueue::new();
        let mut r = Runner::new_client().unwrap();
        let port = r.create_local_forward(Some("127.0.0.1"), 0, "", 0).unwrap();

        let mut app = connect_local(port);
        // socks4 connect to 10.1.2.3:8080, user "me"
        app.write_all(&[4, 1, 0x1f, 0x90, 10, 1, 2, 3, b'm', b'e', 0]).unwrap();
        let Packet::ChannelOpen(open) =
            tick_until(&mut r, &mut q, |p| matches!(p, Packet::ChannelOpen(_)))
        else {
            unreachable!()
        };
        assert!(matches!(&open.ty, ChannelOpenType::DirectTcpip(t)
            if t.address == "10.1.2.3" && t.port == 8080));

        // the reply is written once the peer confirms
        r.dispatch(confirm(open.num, 300, ProtoRevision::Current), &mut q).unwrap();
        assert_eq!(read_local(&mut r, &mut q, &mut app, 8), [0, 0x5a, 0, 0, 0, 0, 0, 0]);
        app.write_all(b"GET /").unwrap();
        assert_eq!(data_to_peer(&mut r, &mut q, 300, 5), b"GET /");
    }

    #[test]
    fn dynamic_forward_garbage() {
        init_test_log();
        let mut q = PacketQueue::new();
        let mut r = Runner::new_client().unwrap();
        let port = r.create_local_forward(Some("127.0.0.1"), 0, "", 0).unwrap();

        let mut app = connect_local(port);
        app.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        // connection is dropped without any open
        assert!(read_local(&mut r, &mut q, &mut app, 1).is_empty());
        assert!(q.is_empty());
        assert_eq!(r.channels().count(), 1);
    }

    #[test]
    fn dynamic_forward_window() {
        init_test_log();
        let mut q = PacketQueue::new();
        let mut r = Runner::new_client().unwrap();
        let port = r.create_local_forward(Some("127.0.0.1"), 0, "", 0).unwrap();

        let mut app = connect_local(port);
        app.write_all(&[4, 1, 0, 80, 10, 1, 2, 3, 0]).unwrap();
        let Packet::ChannelOpen(open) =
            tick_until(&mut r, &mut q, |p| matches!(p, Packet::ChannelOpen(_)))
        else {
            unreachable!()
        };
        r.dispatch(confirm(open.num, 301, ProtoRevision::Current), &mut q).unwrap();
        assert_eq!(read_local(&mut r, &mut q, &mut app, 8).len(), 8);
        q.drain().for_each(drop);

        let chunk = crate::config::TCP_MAX_PACKET;
        let mut sent = 0;
        for len in [chunk, chunk, chunk, chunk, 4] {
            let data = vec![0x33; len];
            r.dispatch(ChannelData { num: open.num, data }.into(), &mut q).unwrap();
            sent += len;
        }

        let mut got = 0;
        let mut buf = vec![0u8; 64 * 1024];
        for _ in 0..MAX_TICKS {
            r.run_once(&mut q, TICK).unwrap();
            match app.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => (),
                Err(e) => panic!("read failed: {e}"),
            }
            if got >= sent {
                break;
            }
        }
        assert_eq!(got, sent);
        r.run_once(&mut q, TICK).unwrap();

        // only the peer's bytes are granted back, never the socks reply
        let adjusted: usize = q
            .drain()
            .map(|p| match p {
                Packet::ChannelWindowAdjust(a) if a.num == 301 => a.adjust as usize,
                _ => 0,
            })
            .sum();
        assert!(adjusted > 0);
        let c = r.channels().get(ChanNum(open.num)).unwrap();
        assert_eq!(adjusted + c.local_consumed, sent);
        assert!(c.local_window <= c.local_window_max);
    }

    #[cfg(unix)]
    mod x11 {
        use super::*;
        use std::os::unix::net::UnixStream;

        use crate::{ChanIo, ExtUsage};

        const PROTO: &str = "MIT-MAGIC-COOKIE-1";

        /// A little endian connection setup carrying `cookie`
        fn setup(cookie: &[u8]) -> Vec<u8> {
            let mut p = vec![0x6c, 0, 11, 0, 0, 0];
            p.extend_from_slice(&(PROTO.len() as u16).to_le_bytes());
            p.extend_from_slice(&(cookie.len() as u16).to_le_bytes());
            p.extend_from_slice(&[0, 0]);
            p.extend_from_slice(PROTO.as_bytes());
            // padded to 4
            p.resize(12 + 20, 0);
            p.extend_from_slice(cookie);
            p
        }

        /// Sets up spoofing, returns a cookie that doesn't match
        fn wrong_cookie(r: &mut Runner) -> Vec<u8> {
            let sp = r.x11_request_spoofing(PROTO, Some(&[7u8; 16][..])).unwrap();
            sp.fake_data().iter().map(|b| !b).collect()
        }

        /// An X11 channel from the peer (number 9), connected to a local server end
        fn x11_channel(r: &mut Runner) -> (ChanNum, UnixStream) {
            let (local, server) = UnixStream::pair().unwrap();
            server.set_nonblocking(true).unwrap();
            local.set_nonblocking(true).unwrap();
            let io = ChanIo::socket(mio::net::UnixStream::from_std(local));
            let chans = r.channels_mut();
            let kind = ChanKind::X11Open;
            let num = chans
                .create(kind, io, None, 64 * 1024, 16 * 1024, ExtUsage::Ignore, "x11", false)
                .unwrap();
            chans.set_remote(num, 9, 64 * 1024, 16 * 1024).unwrap();
            (num, server)
        }

        /// Nothing was forwarded to the server, and its end is closed
        fn server_saw_nothing(server: &mut UnixStream) {
            let mut buf = [0u8; 64];
            assert_eq!(server.read(&mut buf).unwrap(), 0);
        }

        #[test]
        fn wrong_cookie_killed() {
            init_test_log();
            let mut q = PacketQueue::new();
            let mut r = Runner::new_client().unwrap();
            let cookie = wrong_cookie(&mut r);
            let (num, mut server) = x11_channel(&mut r);

            r.dispatch(ChannelData { num: num.0, data: setup(&cookie) }.into(), &mut q).unwrap();
            r.run_once(&mut q, TICK).unwrap();
            assert_eq!(q.pop(), Some(ChannelEof { num: 9 }.into()));
            assert_eq!(q.pop(), Some(ChannelClose { num: 9 }.into()));
            assert!(q.is_empty());
            server_saw_nothing(&mut server);

            r.dispatch(ChannelClose { num: num.0 }.into(), &mut q).unwrap();
            r.run_once(&mut q, TICK).unwrap();
            assert_eq!(r.channels().count(), 0);
        }

        #[test]
        fn wrong_cookie_killed_legacy() {
            init_test_log();
            let mut q = PacketQueue::new();
            let conf = MuxConfig { revision: ProtoRevision::Legacy, ..MuxConfig::new_client() };
            let mut r = Runner::new(conf).unwrap();
            let cookie = wrong_cookie(&mut r);
            let (num, mut server) = x11_channel(&mut r);

            r.dispatch(ChannelData { num: num.0, data: setup(&cookie) }.into(), &mut q).unwrap();
            r.run_once(&mut q, TICK).unwrap();
            assert_eq!(q.pop(), Some(ChannelClose { num: 9 }.into()));
            assert!(q.is_empty());
            server_saw_nothing(&mut server);
            assert_eq!(r.channels().get(num).unwrap().kind(), ChanKind::Closed);

            r.dispatch(ChannelCloseConfirmation { num: num.0 }.into(), &mut q).unwrap();
            assert_eq!(r.channels().count(), 0);
        }

        #[test]
        fn peer_closes_before_setup() {
            init_test_log();
            let mut q = PacketQueue::new();
            let mut r = Runner::new_client().unwrap();
            let cookie = wrong_cookie(&mut r);
            let (num, mut server) = x11_channel(&mut r);

            // incomplete, waits for more
            let partial = setup(&cookie)[..20].to_vec();
            r.dispatch(ChannelData { num: num.0, data: partial }.into(), &mut q).unwrap();
            r.run_once(&mut q, TICK).unwrap();
            assert!(q.is_empty());
            assert_eq!(r.channels().count(), 1);

            r.dispatch(ChannelClose { num: num.0 }.into(), &mut q).unwrap();
            r.run_once(&mut q, TICK).unwrap();
            assert_eq!(q.pop(), Some(ChannelClose { num: 9 }.into()));
            assert_eq!(r.channels().count(), 0);
            server_saw_nothing(&mut server);

            // legacy revision
            let mut q = PacketQueue::new();
            let conf = MuxConfig { revision: ProtoRevision::Legacy, ..MuxConfig::new_client() };
            let mut r = Runner::new(conf).unwrap();
            let cookie = wrong_cookie(&mut r);
            let (num, mut server) = x11_channel(&mut r);
            let partial = setup(&cookie)[..20].to_vec();
            r.dispatch(ChannelData { num: num.0, data: partial }.into(), &mut q).unwrap();
            r.dispatch(ChannelClose { num: num.0 }.into(), &mut q).unwrap();
            assert_eq!(q.pop(), Some(ChannelCloseConfirmation { num: 9 }.into()));
            r.run_once(&mut q, TICK).unwrap();
            assert_eq!(r.channels().count(), 0);
            server_saw_nothing(&mut server);
        }
    }
}
