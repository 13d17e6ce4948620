//! The noise writer: anti-probing random-byte writeback on
//! authentication/parse failure.
//!
//! Small, `#[inline]`-annotated free functions operating on a generic
//! `Write`, filling a caller-sized buffer from `rand`'s CSPRNG.

use std::io::{self, Write};
use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

/// Per-write deadline for the TCP noise response.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(6);

fn is_benign_write_error(err: &io::Error) -> bool {
    let msg = err.to_string();
    msg.contains("closed") || msg.contains("broken")
}

/// Writes 1–3 chunks of 210–550 random bytes to `stream`, sleeping
/// 890–2330ms between chunks, honoring a 6s per-write deadline via the
/// caller-set socket timeout. Swallows write errors whose message
/// mentions "closed"/"broken"; returns on the first other I/O error.
///
/// `stream` must already have its write timeout set to `WRITE_DEADLINE`
/// (or shorter) by the caller, since plain `io::Write` has no deadline of
/// its own; `TcpStream::set_write_timeout` is how `tcp.rs` arranges this.
pub fn write_tcp_noise<W: Write>(stream: &mut W) -> usize {
    let mut rng = rand::thread_rng();
    let chunk_count = rng.gen_range(1..=3);
    let mut written = 0;

    for i in 0..chunk_count {
        let size = rng.gen_range(210..=550);
        let mut buf = vec![0u8; size];
        rng.fill(buf.as_mut_slice());

        match stream.write_all(&buf) {
            Ok(()) => written += size,
            Err(err) if is_benign_write_error(&err) => return written,
            Err(_) => return written,
        }

        if i + 1 < chunk_count {
            let jitter_ms = rng.gen_range(890..=2330);
            thread::sleep(Duration::from_millis(jitter_ms));
        }
    }

    written
}

/// Writes a single small noise datagram back to `client` via `socket`.
/// Chunk size is 4-650 bytes.
pub fn write_udp_noise(socket: &UdpSocket, client: std::net::SocketAddr) {
    let mut rng = rand::thread_rng();
    let size = rng.gen_range(4..=650);
    let mut buf = vec![0u8; size];
    rng.fill(buf.as_mut_slice());
    let _ = socket.send_to(&buf, client);
}

/// Runs `write_tcp_noise` and reports how long it took, for callers that
/// want to enforce a deadline explicitly rather than relying on the
/// stream's own write timeout.
pub fn write_tcp_noise_timed<W: Write>(stream: &mut W) -> (usize, Duration) {
    let start = Instant::now();
    let written = write_tcp_noise(stream);
    (written, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_at_least_the_minimum_single_chunk() {
        let mut buf = Vec::new();
        let written = write_tcp_noise(&mut buf);
        assert!(written >= 210);
        assert_eq!(buf.len(), written);
    }

    #[test]
    fn udp_noise_is_small() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target_addr = target.local_addr().unwrap();

        write_udp_noise(&socket, target_addr);

        let mut buf = [0u8; 1024];
        target.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        let (n, _) = target.recv_from(&mut buf).unwrap();
        assert!((4..=650).contains(&n));
    }
}
