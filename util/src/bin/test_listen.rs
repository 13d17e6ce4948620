//! Hand-rolled smoke-test client for a running `sockd` instance.
//!
//! Connects out, performs the salt exchange and one framed write by hand,
//! and prints whatever comes back, letting an operator eyeball a real
//! deployment's happy path (bytes echoed back) or parse-failure path
//! (noise) from the command line without standing up a full client
//! implementation.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use clap::Parser;

use sockd_crypto::aead::Direction;
use sockd_crypto::{derive_key, KEY_SIZE};
use sockd_proto::{DestinationAddress, FrameReader, Host};

/// Connects to a running sockd, sends one framed request, and prints the
/// response (or the noise burst, if the request was rejected).
#[derive(Parser, Debug)]
#[command(name = "test_listen", version, about)]
struct Cli {
    /// `host:port` of the running sockd instance.
    server: String,

    /// Shared password configured on the server.
    password: String,

    /// Destination host to request sockd relay to.
    dest_host: String,

    /// Destination port to request sockd relay to.
    dest_port: u16,

    /// Payload to send once the destination header has been written.
    #[arg(default_value = "hello")]
    payload: String,

    /// Send `payload.len()` garbage bytes instead of a valid handshake,
    /// to exercise the parse-failure / noise path.
    #[arg(long)]
    garbage: bool,
}

fn main() {
    let cli = Cli::parse();
    let derived_key = derive_key(cli.password.as_bytes());

    let mut stream = TcpStream::connect(&cli.server).expect("failed to connect to sockd");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("failed to set read timeout");

    if cli.garbage {
        let junk = vec![0u8; cli.payload.len().max(64)];
        stream.write_all(&junk).expect("failed to write garbage");
        print_response(&mut stream);
        return;
    }

    let (salt, mut write_session) = sockd_proto::frame::new_session(&derived_key, Direction::Write);
    stream.write_all(&salt).expect("failed to write client salt");

    let host = cli
        .dest_host
        .parse()
        .map(Host::Ip)
        .unwrap_or(Host::Name(cli.dest_host.clone()));
    let header = DestinationAddress::new(host, cli.dest_port)
        .expect("destination port must be non-zero")
        .encode_to_vec();

    write_frame(&mut stream, &mut write_session, &header);
    write_frame(&mut stream, &mut write_session, cli.payload.as_bytes());

    let mut server_salt = [0u8; KEY_SIZE];
    match stream.read_exact(&mut server_salt) {
        Ok(()) => {}
        Err(err) => {
            println!("connection closed before a server salt arrived: {err}");
            return;
        }
    }

    let read_session = sockd_crypto::AeadSession::new(&derived_key, &server_salt, Direction::Read)
        .expect("HKDF expand cannot fail for a fixed-size key");
    let mut reader = FrameReader::new(stream, read_session);

    match reader.read_frame() {
        Ok(frame) => println!("received {} bytes: {:?}", frame.len(), String::from_utf8_lossy(&frame)),
        Err(err) => println!("failed to read a response frame: {err}"),
    }
}

fn write_frame(stream: &mut TcpStream, session: &mut sockd_crypto::AeadSession, chunk: &[u8]) {
    let mut sealed_len = (chunk.len() as u16).to_be_bytes().to_vec();
    session.seal(&mut sealed_len).expect("sealing a frame length cannot fail");
    let mut sealed_payload = chunk.to_vec();
    session.seal(&mut sealed_payload).expect("sealing a frame payload cannot fail");
    stream.write_all(&sealed_len).expect("failed writing frame length");
    stream.write_all(&sealed_payload).expect("failed writing frame payload");
}

fn print_response(stream: &mut TcpStream) {
    let mut total = 0usize;
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(_) => break,
        }
    }
    println!("received {total} bytes before the connection closed (noise burst, if any)");
}
