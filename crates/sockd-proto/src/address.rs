//! The SOCKS5-like destination header: `type || address || port`.
//!
//! Byteorder-driven fixed-layout parsing of a small header, dispatched on
//! a leading type tag the way a frame codec dispatches on a tag byte.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Maximum length of a `Name` hostname.
pub const MAX_NAME_LEN: usize = 253;
/// Maximum size of an encoded header: tag(1) + name-len(1) + name(253) + port(2).
pub const MAX_HEADER_SIZE: usize = 1 + 1 + MAX_NAME_LEN + 2;

#[derive(Debug, thiserror::Error)]
pub enum AddressCodecError {
    #[error("unknown address type tag {0:#x}")]
    UnknownType(u8),
    #[error("destination port is zero")]
    ZeroPort,
    #[error("hostname contains a NUL byte")]
    NulInName,
    #[error("hostname length {0} exceeds {MAX_NAME_LEN}")]
    NameTooLong(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Host {
    Ip(std::net::IpAddr),
    Name(String),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(ip) => write!(f, "{ip}"),
            Host::Name(name) => write!(f, "{name}"),
        }
    }
}

/// A fully decoded destination: host (literal IP or name) plus a
/// non-zero 16-bit port.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DestinationAddress {
    pub host: Host,
    pub port: u16,
}

impl DestinationAddress {
    #[inline]
    pub fn new(host: Host, port: u16) -> Result<DestinationAddress, AddressCodecError> {
        if port == 0 {
            return Err(AddressCodecError::ZeroPort);
        }
        Ok(DestinationAddress { host, port })
    }

    #[inline]
    pub fn from_socket_addr(addr: SocketAddr) -> Result<DestinationAddress, AddressCodecError> {
        DestinationAddress::new(Host::Ip(addr.ip()), addr.port())
    }

    /// Encodes the header into `out`, returning the number of bytes
    /// written (`1 + addr_len + 2`).
    pub fn encode<W: Write>(&self, mut out: W) -> Result<usize, AddressCodecError> {
        let written = match &self.host {
            Host::Ip(std::net::IpAddr::V4(v4)) => {
                out.write_u8(0x01)?;
                out.write_all(&v4.octets())?;
                1 + 4
            }
            Host::Ip(std::net::IpAddr::V6(v6)) => {
                out.write_u8(0x04)?;
                out.write_all(&v6.octets())?;
                1 + 16
            }
            Host::Name(name) => {
                if name.len() > MAX_NAME_LEN {
                    return Err(AddressCodecError::NameTooLong(name.len()));
                }
                if name.bytes().any(|b| b == 0) {
                    return Err(AddressCodecError::NulInName);
                }
                out.write_u8(0x03)?;
                out.write_u8(name.len() as u8)?;
                out.write_all(name.as_bytes())?;
                1 + 1 + name.len()
            }
        };
        out.write_u16::<BigEndian>(self.port)?;
        Ok(written + 2)
    }

    /// Encodes into a freshly allocated buffer.
    #[inline]
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_HEADER_SIZE);
        self.encode(&mut buf).expect("writing to a Vec cannot fail");
        buf
    }

    /// Decodes a header from `input`. Rejects unknown type tags, zero
    /// ports, NUL bytes in a name, and names over `MAX_NAME_LEN`.
    pub fn decode<R: Read>(mut input: R) -> Result<DestinationAddress, AddressCodecError> {
        let tag = input.read_u8()?;
        let host = match tag {
            0x01 => {
                let mut octets = [0u8; 4];
                input.read_exact(&mut octets)?;
                Host::Ip(Ipv4Addr::from(octets).into())
            }
            0x04 => {
                let mut octets = [0u8; 16];
                input.read_exact(&mut octets)?;
                Host::Ip(Ipv6Addr::from(octets).into())
            }
            0x03 => {
                let len = input.read_u8()? as usize;
                if len > MAX_NAME_LEN {
                    return Err(AddressCodecError::NameTooLong(len));
                }
                let mut bytes = vec![0u8; len];
                input.read_exact(&mut bytes)?;
                if bytes.iter().any(|&b| b == 0) {
                    return Err(AddressCodecError::NulInName);
                }
                let name = String::from_utf8(bytes).map_err(|_| AddressCodecError::NulInName)?;
                Host::Name(name)
            }
            other => return Err(AddressCodecError::UnknownType(other)),
        };

        let port = input.read_u16::<BigEndian>()?;
        if port == 0 {
            return Err(AddressCodecError::ZeroPort);
        }

        Ok(DestinationAddress { host, port })
    }
}
