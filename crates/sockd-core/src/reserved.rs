//! The static IPv4 reserved-address filter.
//!
//! IPv4-only, by design; no IPv6 special-use ranges are covered here.

use std::net::Ipv4Addr;

/// `(network, prefix_len)` pairs for the reserved CIDR list.
const RESERVED_CIDRS: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 0, 0, 0), 24),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(198, 18, 0, 0), 15),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
    (Ipv4Addr::new(240, 0, 0, 0), 4),
];

/// Returns true if `addr` falls inside any reserved CIDR.
#[inline]
pub fn is_reserved(addr: Ipv4Addr) -> bool {
    let bits = u32::from(addr);
    RESERVED_CIDRS.iter().any(|&(network, prefix_len)| {
        let mask = if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - prefix_len)
        };
        (bits & mask) == (u32::from(network) & mask)
    })
}
