//! The destination address codec and the encrypted framing primitives
//! that sit directly on top of a raw TCP/UDP socket.

pub mod address;
pub mod datagram;
pub mod frame;

pub use address::{AddressCodecError, DestinationAddress, Host};
pub use frame::{FrameError, FrameReader, FrameWriter};
