/// Admin gating: constant-time key comparison and private-range checks

use std::net::IpAddr;

/// Length-insensitive, content-constant-time comparison. The accumulated
/// difference is folded over every byte of the longer input so timing does
/// not leak a prefix match.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut diff = (a.len() ^ b.len()) as u8;
    let max = a.len().max(b.len());
    for i in 0..max {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

/// Loopback plus RFC 1918 ranges: 127/8, 10/8, 172.16/12, 192.168/16.
pub fn is_private_addr(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_loopback()
                || octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() {
                return true;
            }
            // IPv4-mapped addresses re-check as their v4 form.
            match v6.to_ipv4_mapped() {
                Some(v4) => is_private_addr(&IpAddr::V4(v4)),
                None => false,
            }
        }
    }
}
