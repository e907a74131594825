//! Selection of the local IPv4 address a server advertises.
//!
//! Addresses are ranked by prefix: a `192.168.` address beats a `10.`
//! address beats a `172.` address. An address outside every preferred range
//! (a VPN or virtual adapter, say) is never advertised; failing to advertise
//! is better than advertising an address peers cannot reach.

use std::net::{IpAddr, Ipv4Addr};

/// Advertisement address prefixes, highest priority first.
pub const PREFERRED_PREFIXES: [&str; 3] = ["192.168.", "10.", "172."];

/// Picks the best local IPv4 address to advertise from `candidates`.
///
/// Loopback and IPv6 candidates are ignored. Returns the first candidate
/// matching the highest-priority prefix that has any match, or `None` when
/// no candidate matches a preferred prefix. Pure function, no I/O.
#[must_use]
pub fn select_address(candidates: &[IpAddr]) -> Option<Ipv4Addr> {
    let addresses = candidates
        .iter()
        .filter_map(|addr| match addr {
            IpAddr::V4(ip) if !ip.is_loopback() => Some(*ip),
            _ => None,
        })
        .collect::<Vec<_>>();

    PREFERRED_PREFIXES.iter().find_map(|prefix| {
        addresses
            .iter()
            .find(|ip| ip.to_string().starts_with(prefix))
            .copied()
    })
}

/// All local interface addresses, in enumeration order.
///
/// # Errors
///
/// * If the local network interfaces cannot be enumerated
pub fn local_candidates() -> Result<Vec<IpAddr>, local_ip_address::Error> {
    Ok(local_ip_address::list_afinet_netifas()?
        .into_iter()
        .map(|(_, addr)| addr)
        .collect())
}
