//! The UDP sub-daemon: recv loop, per-datagram AEAD, and the
//! association table that multiplexes many destinations behind one client
//! `ip:port`.
//!
//! One blocking recv thread, same shape as the TCP accept thread in
//! `tcp.rs`, plus one reply-loop thread per association. The association
//! table is an `RwLock`-guarded map: reads dominate (every inbound packet
//! looks one up), writes only happen on create/delete.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use sockd_crypto::KEY_SIZE;
use sockd_proto::{DestinationAddress, Host};

use crate::blacklist::SharedBlacklist;
use crate::error::{SockError, SockResult};
use crate::logging::Logger;
use crate::noise;
use crate::ratelimit::RateLimiter;
use crate::reserved;
use crate::tcp::{IO_TIMEOUT, MAX_PACKET_SIZE};

struct Association {
    socket: UdpSocket,
}

type Associations = Arc<RwLock<HashMap<SocketAddr, Arc<Association>>>>;

/// One UDP socket and everything it needs to service datagrams on its own
/// recv thread.
pub struct UdpSubDaemon {
    address: String,
    port: u16,
    derived_key: [u8; KEY_SIZE],
    per_ip_limit: u32,
    blacklist: SharedBlacklist,
    lockdown: Arc<AtomicBool>,
    log: Logger,
}

impl UdpSubDaemon {
    pub fn new(
        address: String,
        port: u16,
        derived_key: [u8; KEY_SIZE],
        per_ip_limit: u32,
        blacklist: SharedBlacklist,
        lockdown: Arc<AtomicBool>,
        log: Logger,
    ) -> UdpSubDaemon {
        UdpSubDaemon {
            address,
            port,
            derived_key,
            per_ip_limit,
            blacklist,
            lockdown,
            log: log.new(slog::o!("port" => port, "proto" => "udp")),
        }
    }

    /// Binds the socket and runs the recv loop until the lockdown flag is
    /// raised, returning `SockError::LockedDown` at that point. A bind
    /// failure surfaces as `SockError::BindFailed`.
    pub fn run(&self) -> SockResult<()> {
        let socket = UdpSocket::bind((self.address.as_str(), self.port)).map_err(SockError::BindFailed)?;

        slog::info!(self.log, "udp sub-daemon listening");

        let rate_limiter = RateLimiter::new(1, self.per_ip_limit, self.log.clone());
        let associations: Associations = Arc::new(RwLock::new(HashMap::new()));
        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        loop {
            if self.lockdown.load(Ordering::Relaxed) {
                slog::info!(self.log, "udp sub-daemon entering lockdown, refusing new work");
                return Err(SockError::LockedDown);
            }

            let (n, peer) = match socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(err) => {
                    slog::warn!(self.log, "recv failed"; "error" => %err);
                    continue;
                }
            };

            if !rate_limiter.admit(&peer.ip().to_string()) {
                continue;
            }

            handle_datagram(
                &socket,
                &buf[..n],
                peer,
                &self.derived_key,
                &self.blacklist,
                &associations,
                &self.lockdown,
                &self.log,
            );
        }
    }
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

#[allow(clippy::too_many_arguments)]
fn handle_datagram(
    main_socket: &UdpSocket,
    packet: &[u8],
    peer: SocketAddr,
    derived_key: &[u8; KEY_SIZE],
    blacklist: &SharedBlacklist,
    associations: &Associations,
    lockdown: &Arc<AtomicBool>,
    log: &Logger,
) {
    let plaintext = match sockd_proto::datagram::open_datagram(derived_key, packet) {
        Ok(p) => p,
        Err(_) => {
            noise::write_udp_noise(main_socket, peer);
            return;
        }
    };

    let mut cursor = io::Cursor::new(plaintext.as_slice());
    let dest_addr = match DestinationAddress::decode(&mut cursor) {
        Ok(addr) => addr,
        Err(_) => {
            noise::write_udp_noise(main_socket, peer);
            return;
        }
    };
    let payload = &plaintext[cursor.position() as usize..];

    let resolved = match resolve_destination(&dest_addr.host, dest_addr.port) {
        Ok(addr) => addr,
        Err(err) => {
            slog::info!(log, "failed to resolve udp destination"; "error" => %err);
            return;
        }
    };

    if let IpAddr::V4(v4) = resolved.ip() {
        if reserved::is_reserved(v4) {
            slog::info!(log, "refused reserved udp destination"; "destination" => %resolved);
            return;
        }
    }

    if blacklist.is_in_blacklist(&dest_addr.host.to_string()) || blacklist.is_in_blacklist(&resolved.ip().to_string()) {
        slog::info!(log, "refused blacklisted udp destination"; "destination" => %dest_addr.host);
        return;
    }

    let association = match get_or_create_association(main_socket, peer, *derived_key, associations, lockdown, log) {
        Some(assoc) => assoc,
        None => return,
    };

    if let Err(err) = association.socket.send_to(payload, resolved) {
        slog::info!(log, "failed to forward udp payload"; "destination" => %resolved, "error" => %err);
    }
}

fn get_or_create_association(
    main_socket: &UdpSocket,
    peer: SocketAddr,
    derived_key: [u8; KEY_SIZE],
    associations: &Associations,
    lockdown: &Arc<AtomicBool>,
    log: &Logger,
) -> Option<Arc<Association>> {
    if let Some(assoc) = associations
        .read()
        .expect("udp association table lock poisoned")
        .get(&peer)
    {
        return Some(Arc::clone(assoc));
    }

    let bind_addr = match peer {
        SocketAddr::V4(_) => "0.0.0.0:0",
        SocketAddr::V6(_) => "[::]:0",
    };
    let outbound = match UdpSocket::bind(bind_addr) {
        Ok(socket) => socket,
        Err(err) => {
            slog::warn!(log, "failed to allocate outbound udp association socket"; "error" => %err);
            return None;
        }
    };
    if let Err(err) = outbound.set_read_timeout(Some(IO_TIMEOUT)) {
        slog::warn!(log, "failed to set association read timeout"; "error" => %err);
        return None;
    }

    let reply_socket = match outbound.try_clone() {
        Ok(socket) => socket,
        Err(err) => {
            slog::warn!(log, "failed to clone association socket"; "error" => %err);
            return None;
        }
    };
    let reply_main_socket = match main_socket.try_clone() {
        Ok(socket) => socket,
        Err(err) => {
            slog::warn!(log, "failed to clone main udp socket"; "error" => %err);
            return None;
        }
    };

    let assoc = Arc::new(Association { socket: outbound });
    associations
        .write()
        .expect("udp association table lock poisoned")
        .insert(peer, Arc::clone(&assoc));

    let associations_for_thread = Arc::clone(associations);
    let lockdown_for_thread = Arc::clone(lockdown);
    let log_for_thread = log.new(slog::o!("association" => peer.to_string()));

    thread::spawn(move || {
        run_association_reply_loop(
            reply_socket,
            reply_main_socket,
            peer,
            derived_key,
            associations_for_thread,
            lockdown_for_thread,
            log_for_thread,
        );
    });

    Some(assoc)
}

/// Reads replies off `socket` (the association's outbound socket, bound to
/// an ephemeral local port) and relays them back to `peer` through
/// `main_socket`, each prefixed with a re-encoded source-address header
/// describing the remote that answered and sealed under a fresh random
/// salt. Any read or write error on the outbound socket, including the
/// `IOTimeout` read deadline expiring, ends the association.
fn run_association_reply_loop(
    socket: UdpSocket,
    main_socket: UdpSocket,
    peer: SocketAddr,
    derived_key: [u8; KEY_SIZE],
    associations: Associations,
    lockdown: Arc<AtomicBool>,
    log: Logger,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        if lockdown.load(Ordering::Relaxed) {
            break;
        }

        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(err) => {
                if err.kind() != io::ErrorKind::WouldBlock && err.kind() != io::ErrorKind::TimedOut {
                    slog::info!(log, "udp association recv failed"; "error" => %err);
                }
                break;
            }
        };

        let header = match DestinationAddress::from_socket_addr(from) {
            Ok(addr) => addr.encode_to_vec(),
            Err(err) => {
                slog::warn!(log, "failed to re-encode udp reply source"; "error" => %err);
                continue;
            }
        };

        let mut reply = header;
        reply.extend_from_slice(&buf[..n]);

        match sockd_proto::datagram::seal_datagram(&derived_key, &reply) {
            Ok(sealed) => {
                if let Err(err) = main_socket.send_to(&sealed, peer) {
                    slog::info!(log, "failed to write udp reply to client"; "error" => %err);
                    break;
                }
            }
            Err(err) => slog::warn!(log, "failed to seal udp reply"; "error" => %err),
        }
    }

    associations
        .write()
        .expect("udp association table lock poisoned")
        .remove(&peer);
    slog::debug!(log, "udp association closed");
}
