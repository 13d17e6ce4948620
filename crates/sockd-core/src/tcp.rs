//! The TCP sub-daemon: accept loop, per-IP admission,
//! encrypted framing handshake, destination dial and bidirectional piping.
//!
//! One blocking accept thread plus one thread pair per connection.
//! Per-connection TCP tweaks (Nagle, keepalive, linger) go through
//! `socket2` for the options `std::net::TcpStream` doesn't expose
//! directly.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sockd_crypto::aead::Direction;
use sockd_crypto::KEY_SIZE;
use sockd_proto::{DestinationAddress, FrameReader, FrameWriter, Host};

use crate::blacklist::SharedBlacklist;
use crate::error::{SockError, SockResult};
use crate::logging::Logger;
use crate::noise;
use crate::ratelimit::RateLimiter;
use crate::reserved;
use crate::stats::SharedStats;

/// Per-operation I/O deadline applied throughout the relay.
pub const IO_TIMEOUT: Duration = Duration::from_secs(900);
/// Buffer size and per-read cap for the pipe loops.
pub const MAX_PACKET_SIZE: usize = 9038;

const TCP_KEEPALIVE: Duration = Duration::from_secs(60);
const TCP_LINGER: Duration = Duration::from_secs(5);

/// One TCP listener and everything it needs to service connections on its
/// own accept thread.
pub struct TcpSubDaemon {
    address: String,
    port: u16,
    derived_key: [u8; KEY_SIZE],
    per_ip_limit: u32,
    blacklist: SharedBlacklist,
    stats: SharedStats,
    lockdown: Arc<AtomicBool>,
    log: Logger,
}

impl TcpSubDaemon {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        address: String,
        port: u16,
        derived_key: [u8; KEY_SIZE],
        per_ip_limit: u32,
        blacklist: SharedBlacklist,
        stats: SharedStats,
        lockdown: Arc<AtomicBool>,
        log: Logger,
    ) -> TcpSubDaemon {
        TcpSubDaemon {
            address,
            port,
            derived_key,
            per_ip_limit,
            blacklist,
            stats,
            lockdown,
            log: log.new(slog::o!("port" => port, "proto" => "tcp")),
        }
    }

    /// Binds the listener and runs the accept loop until `Stop` closes it
    /// or the lockdown flag is raised. Returns `SockError::LockedDown` in
    /// the latter case; a bind failure surfaces as `SockError::BindFailed`.
    pub fn run(&self) -> SockResult<()> {
        let listener =
            TcpListener::bind((self.address.as_str(), self.port)).map_err(SockError::BindFailed)?;

        slog::info!(self.log, "tcp sub-daemon listening");

        let rate_limiter = Arc::new(RateLimiter::new(1, self.per_ip_limit, self.log.clone()));

        for incoming in listener.incoming() {
            if self.lockdown.load(Ordering::Relaxed) {
                slog::info!(self.log, "tcp sub-daemon entering lockdown, refusing new work");
                return Err(SockError::LockedDown);
            }

            let stream = match incoming {
                Ok(stream) => stream,
                Err(err) => {
                    slog::warn!(self.log, "accept failed"; "error" => %err);
                    continue;
                }
            };

            let peer = match stream.peer_addr() {
                Ok(peer) => peer,
                Err(_) => continue,
            };

            if !rate_limiter.admit(&peer.ip().to_string()) {
                drop(stream);
                continue;
            }

            let derived_key = self.derived_key;
            let blacklist = Arc::clone(&self.blacklist);
            let stats = Arc::clone(&self.stats);
            let lockdown = Arc::clone(&self.lockdown);
            let log = self.log.new(slog::o!("peer" => peer.to_string()));

            thread::spawn(move || {
                handle_connection(stream, peer, &derived_key, &blacklist, &stats, &lockdown, &log);
            });
        }

        Ok(())
    }
}

/// Outcome of the handshake phase (salt exchange + destination header
/// parse): whether a failure should trigger the noise response.
enum Establish {
    Noise,
    Silent,
}

fn configure_tcp_socket(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let sock = socket2::SockRef::from(stream);
    sock.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(TCP_KEEPALIVE))?;
    sock.set_linger(Some(TCP_LINGER))?;
    Ok(())
}

fn handle_connection(
    mut client: TcpStream,
    peer: SocketAddr,
    derived_key: &[u8; KEY_SIZE],
    blacklist: &SharedBlacklist,
    stats: &SharedStats,
    lockdown: &Arc<AtomicBool>,
    log: &Logger,
) {
    let start = Instant::now();

    if let Err(err) = configure_tcp_socket(&client) {
        slog::warn!(log, "failed to configure client socket"; "error" => %err);
        return;
    }
    let _ = client.set_read_timeout(Some(IO_TIMEOUT));

    let (mut client_reader, client_writer) = match establish(&client, derived_key) {
        Ok(parts) => parts,
        Err(Establish::Noise) => {
            noise::write_tcp_noise(&mut client);
            return;
        }
        Err(Establish::Silent) => return,
    };

    let dest_addr = match DestinationAddress::decode(&mut client_reader) {
        Ok(addr) => addr,
        Err(_) => {
            noise::write_tcp_noise(&mut client);
            return;
        }
    };

    let resolved = match resolve_destination(&dest_addr.host, dest_addr.port) {
        Ok(addr) => addr,
        Err(err) => {
            slog::info!(log, "failed to resolve destination"; "error" => %err);
            return;
        }
    };

    if let IpAddr::V4(v4) = resolved.ip() {
        if reserved::is_reserved(v4) {
            slog::info!(log, "refused reserved destination"; "destination" => %resolved);
            return;
        }
    }

    if blacklist.is_in_blacklist(&dest_addr.host.to_string()) || blacklist.is_in_blacklist(&resolved.ip().to_string()) {
        slog::info!(log, "refused blacklisted destination"; "destination" => %dest_addr.host);
        return;
    }

    let mut dest = match TcpStream::connect_timeout(&resolved, IO_TIMEOUT) {
        Ok(dest) => dest,
        Err(err) => {
            slog::info!(log, "failed to dial destination"; "destination" => %resolved, "error" => %err);
            return;
        }
    };
    if let Err(err) = configure_tcp_socket(&dest) {
        slog::warn!(log, "failed to configure destination socket"; "error" => %err);
        return;
    }

    slog::debug!(log, "relay established"; "destination" => %resolved);

    let upstream_client_handle = match client.try_clone() {
        Ok(handle) => handle,
        Err(_) => return,
    };
    let dest_for_upstream = match dest.try_clone() {
        Ok(d) => d,
        Err(_) => return,
    };
    let downstream_client_handle = match client.try_clone() {
        Ok(handle) => handle,
        Err(_) => return,
    };
    let dest_for_downstream = match dest.try_clone() {
        Ok(d) => d,
        Err(_) => return,
    };
    let lockdown_upstream = Arc::clone(lockdown);
    let lockdown_downstream = Arc::clone(lockdown);

    let upstream = thread::spawn(move || {
        pipe_client_to_dest(client_reader, dest_for_upstream, upstream_client_handle, &lockdown_upstream);
    });

    pipe_dest_to_client(dest_for_downstream, client_writer, downstream_client_handle, &lockdown_downstream);

    let _ = client.shutdown(Shutdown::Both);
    let _ = dest.shutdown(Shutdown::Both);
    let _ = upstream.join();

    stats.trigger(start.elapsed().as_nanos() as f64);
    slog::debug!(log, "relay finished"; "peer" => %peer);
}

/// Reads the client's 32-byte salt, constructs the read session, writes a
/// fresh server salt and constructs the write session. Any I/O or HKDF failure is reported as `Establish::Noise`,
/// since a probe that never got this far still sees noise, not a clean close.
fn establish(client: &TcpStream, derived_key: &[u8; KEY_SIZE]) -> Result<(FrameReader<TcpStream>, FrameWriter<TcpStream>), Establish> {
    let mut salt_io = client.try_clone().map_err(|_| Establish::Silent)?;

    let mut client_salt = [0u8; KEY_SIZE];
    salt_io.read_exact(&mut client_salt).map_err(|_| Establish::Silent)?;

    let read_session =
        sockd_crypto::AeadSession::new(derived_key, &client_salt, Direction::Read).map_err(|_| Establish::Noise)?;

    let (server_salt, write_session) = sockd_proto::frame::new_session(derived_key, Direction::Write);
    salt_io.write_all(&server_salt).map_err(|_| Establish::Silent)?;

    let reader_stream = client.try_clone().map_err(|_| Establish::Silent)?;
    let writer_stream = client.try_clone().map_err(|_| Establish::Silent)?;

    Ok((
        FrameReader::new(reader_stream, read_session),
        FrameWriter::new(writer_stream, write_session),
    ))
}

fn resolve_destination(host: &Host, port: u16) -> io::Result<SocketAddr> {
    match host {
        Host::Ip(ip) => Ok(SocketAddr::new(*ip, port)),
        Host::Name(name) => (name.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses returned for name")),
    }
}

/// Client → destination direction: decrypts frames off `client_reader`,
/// writes plaintext to `dest`. `writeNoiseOnEOF = true`:
/// on a clean end of stream (the client closed normally, not an error) a
/// noise burst is written back to the client before the destination
/// write-half is closed, so a passive observer on the client side cannot
/// tell a graceful proxy shutdown from a probe rejection.
fn pipe_client_to_dest(
    mut client_reader: FrameReader<TcpStream>,
    mut dest: TcpStream,
    mut client_timeout_handle: TcpStream,
    lockdown: &AtomicBool,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    loop {
        if lockdown.load(Ordering::Relaxed) {
            break;
        }
        let _ = client_timeout_handle.set_read_timeout(Some(IO_TIMEOUT));
        let _ = dest.set_write_timeout(Some(IO_TIMEOUT));

        match client_reader.read(&mut buf) {
            Ok(0) => {
                noise::write_tcp_noise(&mut client_timeout_handle);
                break;
            }
            Ok(n) => {
                if dest.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    let _ = dest.shutdown(Shutdown::Write);
}

/// Destination → client direction: reads plaintext off `dest`, encrypts
/// frames onto `client_writer`. `writeNoiseOnEOF = false`: a clean EOF from
/// the destination simply ends the pipe.
fn pipe_dest_to_client(
    mut dest: TcpStream,
    mut client_writer: FrameWriter<TcpStream>,
    mut client_timeout_handle: TcpStream,
    lockdown: &AtomicBool,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    loop {
        if lockdown.load(Ordering::Relaxed) {
            break;
        }
        let _ = dest.set_read_timeout(Some(IO_TIMEOUT));
        let _ = client_timeout_handle.set_write_timeout(Some(IO_TIMEOUT));

        match dest.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if client_writer.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::{NoopBlacklist, StaticBlacklist};
    use crate::logging::discard_logger;
    use crate::stats::NoopStats;
    use sockd_crypto::derive_key;
    use std::net::TcpListener as StdTcpListener;

    fn spawn_echo_server() -> SocketAddr {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
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

    #[test]
    fn happy_path_relays_bytes_end_to_end() {
        let echo_addr = spawn_echo_server();
        let key = derive_key(b"abcdefg");

        let sub = TcpSubDaemon::new(
            "127.0.0.1".into(),
            0,
            key,
            1000,
            Arc::new(NoopBlacklist),
            Arc::new(NoopStats),
            Arc::new(AtomicBool::new(false)),
            discard_logger(),
        );

        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let local_addr = listener.local_addr().unwrap();
        let lockdown = Arc::clone(&sub.lockdown);
        let blacklist = Arc::clone(&sub.blacklist);
        let stats = Arc::clone(&sub.stats);
        let log = sub.log.clone();

        thread::spawn(move || {
            if let Ok((stream, peer)) = listener.accept() {
                handle_connection(stream, peer, &key, &blacklist, &stats, &lockdown, &log);
            }
        });

        let mut client = TcpStream::connect(local_addr).unwrap();

        let (salt, mut write_session) = sockd_proto::frame::new_session(&key, Direction::Write);
        client.write_all(&salt).unwrap();

        let header = DestinationAddress::from_socket_addr(echo_addr).unwrap().encode_to_vec();
        let mut sealed_len = (header.len() as u16).to_be_bytes().to_vec();
        write_session.seal(&mut sealed_len).unwrap();
        let mut sealed_payload = header.clone();
        write_session.seal(&mut sealed_payload).unwrap();
        client.write_all(&sealed_len).unwrap();
        client.write_all(&sealed_payload).unwrap();

        let mut sealed_len = (5u16).to_be_bytes().to_vec();
        write_session.seal(&mut sealed_len).unwrap();
        let mut sealed_payload = b"hello".to_vec();
        write_session.seal(&mut sealed_payload).unwrap();
        client.write_all(&sealed_len).unwrap();
        client.write_all(&sealed_payload).unwrap();

        let mut server_salt = [0u8; KEY_SIZE];
        client.read_exact(&mut server_salt).unwrap();
        let read_session = sockd_crypto::AeadSession::new(&key, &server_salt, Direction::Read).unwrap();

        let mut reader = FrameReader::new(client, read_session);
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame, b"hello");
    }

    #[test]
    fn reserved_destination_is_refused_without_noise() {
        let key = derive_key(b"abcdefg");
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let local_addr = listener.local_addr().unwrap();
        let lockdown = Arc::new(AtomicBool::new(false));
        let blacklist: SharedBlacklist = Arc::new(NoopBlacklist);
        let stats: SharedStats = Arc::new(NoopStats);
        let log = discard_logger();

        thread::spawn(move || {
            if let Ok((stream, peer)) = listener.accept() {
                handle_connection(stream, peer, &key, &blacklist, &stats, &lockdown, &log);
            }
        });

        let mut client = TcpStream::connect(local_addr).unwrap();
        let (salt, mut write_session) = sockd_proto::frame::new_session(&key, Direction::Write);
        client.write_all(&salt).unwrap();

        let header = DestinationAddress::new(Host::Ip("10.0.0.1".parse().unwrap()), 80)
            .unwrap()
            .encode_to_vec();
        let mut sealed_len = (header.len() as u16).to_be_bytes().to_vec();
        write_session.seal(&mut sealed_len).unwrap();
        let mut sealed_payload = header;
        write_session.seal(&mut sealed_payload).unwrap();
        client.write_all(&sealed_len).unwrap();
        client.write_all(&sealed_payload).unwrap();

        client.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let mut buf = [0u8; 16];
        let result = client.read(&mut buf);
        assert!(matches!(result, Ok(0) | Err(_)), "connection should close without noise");
    }

    #[test]
    fn parse_failure_triggers_noise() {
        let key = derive_key(b"abcdefg");
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let local_addr = listener.local_addr().unwrap();
        let lockdown = Arc::new(AtomicBool::new(false));
        let blacklist: SharedBlacklist = Arc::new(NoopBlacklist);
        let stats: SharedStats = Arc::new(NoopStats);
        let log = discard_logger();

        thread::spawn(move || {
            if let Ok((stream, peer)) = listener.accept() {
                handle_connection(stream, peer, &key, &blacklist, &stats, &lockdown, &log);
            }
        });

        let mut client = TcpStream::connect(local_addr).unwrap();
        client.write_all(&[0u8; 1000]).unwrap();

        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut total = 0;
        let mut buf = [0u8; 4096];
        loop {
            match client.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(_) => break,
            }
        }
        assert!(total >= 200, "expected at least 200 bytes of noise, got {total}");
    }

    #[test]
    fn blacklisted_name_is_refused_without_noise() {
        let key = derive_key(b"abcdefg");
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let local_addr = listener.local_addr().unwrap();
        let lockdown = Arc::new(AtomicBool::new(false));
        let blacklist: SharedBlacklist = Arc::new(StaticBlacklist::new(["evil.example".to_string()]));
        let stats: SharedStats = Arc::new(NoopStats);
        let log = discard_logger();

        thread::spawn(move || {
            if let Ok((stream, peer)) = listener.accept() {
                handle_connection(stream, peer, &key, &blacklist, &stats, &lockdown, &log);
            }
        });

        let mut client = TcpStream::connect(local_addr).unwrap();
        let (salt, mut write_session) = sockd_proto::frame::new_session(&key, Direction::Write);
        client.write_all(&salt).unwrap();

        let header = DestinationAddress::new(Host::Name("evil.example".into()), 443)
            .unwrap()
            .encode_to_vec();
        let mut sealed_len = (header.len() as u16).to_be_bytes().to_vec();
        write_session.seal(&mut sealed_len).unwrap();
        let mut sealed_payload = header;
        write_session.seal(&mut sealed_payload).unwrap();
        client.write_all(&sealed_len).unwrap();
        client.write_all(&sealed_payload).unwrap();

        client.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let mut buf = [0u8; 16];
        let result = client.read(&mut buf);
        assert!(matches!(result, Ok(0) | Err(_)), "connection should close without noise");
    }
}
