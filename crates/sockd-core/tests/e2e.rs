//! End-to-end scenarios driven through the public `Daemon` API rather
//! than the lower-level `handle_connection`/`handle_datagram` functions
//! `tcp.rs`/`udp.rs` already exercise in their own unit tests. This is the
//! "does the whole thing actually come up and relay traffic" check.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sockd_core::blacklist::NoopBlacklist;
use sockd_core::stats::NoopStats;
use sockd_core::{Daemon, DaemonConfig};
use sockd_crypto::aead::Direction;
use sockd_crypto::{derive_key, AeadSession, KEY_SIZE};
use sockd_proto::{DestinationAddress, FrameReader};

const PASSWORD: &str = "abcdefg";

fn free_tcp_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn free_udp_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn spawn_tcp_echo() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 1024];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
    addr
}

/// S1: a client that writes a salt, a framed destination header for a
/// loopback echo server, and a framed chunk, gets the same bytes back.
#[test]
fn s1_tcp_happy_path_round_trips_bytes() {
    let port = free_tcp_port();
    let echo_addr = spawn_tcp_echo();

    let config = DaemonConfig {
        address: "127.0.0.1".into(),
        password: PASSWORD.into(),
        tcp_ports: vec![port],
        udp_ports: vec![],
        per_ip_limit: 1000,
        log_level: "info".into(),
    };
    let daemon = Arc::new(Daemon::new(config, Arc::new(NoopBlacklist), Arc::new(NoopStats), sockd_core::logging::discard_logger()));
    daemon.initialise().unwrap();
    let daemon_run = Arc::clone(&daemon);
    thread::spawn(move || daemon_run.start_and_block());
    thread::sleep(Duration::from_millis(200));

    let key = derive_key(PASSWORD.as_bytes());
    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();

    let (salt, mut write_session) = sockd_proto::frame::new_session(&key, Direction::Write);
    client.write_all(&salt).unwrap();

    let header = DestinationAddress::from_socket_addr(echo_addr).unwrap().encode_to_vec();
    seal_and_write(&mut client, &mut write_session, &header);
    seal_and_write(&mut client, &mut write_session, b"hello");

    let mut server_salt = [0u8; KEY_SIZE];
    client.read_exact(&mut server_salt).unwrap();
    let read_session = AeadSession::new(&key, &server_salt, Direction::Read).unwrap();
    let mut reader = FrameReader::new(client, read_session);

    let frame = reader.read_frame().unwrap();
    assert_eq!(frame, b"hello");

    daemon.stop();
}

/// S4: a valid sealed header targeting a reserved address must close
/// without a dial attempt or a noise burst, quickly.
#[test]
fn s4_reserved_destination_closes_without_noise() {
    let port = free_tcp_port();

    let config = DaemonConfig {
        address: "127.0.0.1".into(),
        password: PASSWORD.into(),
        tcp_ports: vec![port],
        udp_ports: vec![],
        per_ip_limit: 1000,
        log_level: "info".into(),
    };
    let daemon = Arc::new(Daemon::new(config, Arc::new(NoopBlacklist), Arc::new(NoopStats), sockd_core::logging::discard_logger()));
    daemon.initialise().unwrap();
    let daemon_run = Arc::clone(&daemon);
    thread::spawn(move || daemon_run.start_and_block());
    thread::sleep(Duration::from_millis(200));

    let key = derive_key(PASSWORD.as_bytes());
    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();

    let (salt, mut write_session) = sockd_proto::frame::new_session(&key, Direction::Write);
    client.write_all(&salt).unwrap();

    let header = DestinationAddress::new(sockd_proto::Host::Ip("10.0.0.1".parse().unwrap()), 80)
        .unwrap()
        .encode_to_vec();
    seal_and_write(&mut client, &mut write_session, &header);

    client.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
    let mut buf = [0u8; 16];
    let result = client.read(&mut buf);
    assert!(matches!(result, Ok(0) | Err(_)));

    daemon.stop();
}

/// S6: with PerIPLimit = 10, only ~10 connections from one client can
/// complete the salt handshake within an interval; the rest are closed
/// immediately without a server salt ever arriving.
#[test]
fn s6_rate_limit_admits_only_the_configured_number() {
    let port = free_tcp_port();

    let config = DaemonConfig {
        address: "127.0.0.1".into(),
        password: PASSWORD.into(),
        tcp_ports: vec![port],
        udp_ports: vec![],
        per_ip_limit: 10,
        log_level: "info".into(),
    };
    let daemon = Arc::new(Daemon::new(config, Arc::new(NoopBlacklist), Arc::new(NoopStats), sockd_core::logging::discard_logger()));
    daemon.initialise().unwrap();
    let daemon_run = Arc::clone(&daemon);
    thread::spawn(move || daemon_run.start_and_block());
    thread::sleep(Duration::from_millis(200));

    let mut admitted = 0;
    for _ in 0..50 {
        let mut client = match TcpStream::connect(("127.0.0.1", port)) {
            Ok(c) => c,
            Err(_) => continue,
        };
        client.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        // A rejected connection is closed immediately with nothing
        // written to it; an admitted one is held open waiting for our
        // salt, so a read attempt here will time out (WouldBlock)
        // rather than observing EOF.
        let mut buf = [0u8; 1];
        match client.read(&mut buf) {
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                admitted += 1;
            }
            _ => {}
        }
    }

    assert!(admitted <= 10, "expected at most 10 admissions, got {admitted}");
    assert!(admitted > 0, "expected at least one admission, got {admitted}");

    daemon.stop();
}

/// S3: a salted+sealed datagram addressed to a loopback UDP echo server
/// must come back wrapped in a fresh salt, with the source-address
/// header of the echo server prefixed to the echoed payload.
#[test]
fn s3_udp_happy_path_round_trips_a_datagram() {
    let port = free_udp_port();

    let echo_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let echo_addr = echo_socket.local_addr().unwrap();
    thread::spawn(move || {
        let mut buf = [0u8; 1024];
        loop {
            match echo_socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if echo_socket.send_to(&buf[..n], from).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let config = DaemonConfig {
        address: "127.0.0.1".into(),
        password: PASSWORD.into(),
        tcp_ports: vec![free_tcp_port()],
        udp_ports: vec![port],
        per_ip_limit: 1000,
        log_level: "info".into(),
    };
    let daemon = Arc::new(Daemon::new(config, Arc::new(NoopBlacklist), Arc::new(NoopStats), sockd_core::logging::discard_logger()));
    daemon.initialise().unwrap();
    let daemon_run = Arc::clone(&daemon);
    thread::spawn(move || daemon_run.start_and_block());
    thread::sleep(Duration::from_millis(200));

    let key = derive_key(PASSWORD.as_bytes());
    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let header = DestinationAddress::from_socket_addr(echo_addr).unwrap().encode_to_vec();
    let mut plaintext = header;
    plaintext.extend_from_slice(b"ping");
    let sealed = sockd_proto::datagram::seal_datagram(&key, &plaintext).unwrap();
    client.send_to(&sealed, ("127.0.0.1", port)).unwrap();

    let mut buf = [0u8; 1024];
    let (n, _) = client.recv_from(&mut buf).unwrap();
    let reply = sockd_proto::datagram::open_datagram(&key, &buf[..n]).unwrap();

    let mut cursor = std::io::Cursor::new(reply.as_slice());
    let source = DestinationAddress::decode(&mut cursor).unwrap();
    assert_eq!(source.port, echo_addr.port());
    assert_eq!(&reply[cursor.position() as usize..], b"ping");

    daemon.stop();
}

fn seal_and_write(stream: &mut TcpStream, session: &mut AeadSession, chunk: &[u8]) {
    let mut sealed_len = (chunk.len() as u16).to_be_bytes().to_vec();
    session.seal(&mut sealed_len).unwrap();
    let mut sealed_payload = chunk.to_vec();
    session.seal(&mut sealed_payload).unwrap();
    stream.write_all(&sealed_len).unwrap();
    stream.write_all(&sealed_payload).unwrap();
}
