use anyhow::{anyhow, Result};
use if_addrs::get_if_addrs;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

/// Interface name prefixes that indicate a tunnel rather than a real LAN
/// link. if-addrs does not expose the operational status of an interface,
/// so name and address filtering stand in for the up/tunnel checks.
const TUNNEL_PREFIXES: &[&str] = &["tun", "tap", "utun", "wg", "ppp", "ipsec"];

/// One enumerated interface address, before filtering.
#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    ip: IpAddr,
}

fn is_tunnel(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    TUNNEL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

fn is_loopback_name(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == "lo" || name.starts_with("lo0")
}

/// Keep only addresses a headset on the same LAN could actually reach:
/// IPv4, not loopback, not on a tunnel interface, deduplicated in
/// enumeration order.
fn filter_usable(candidates: Vec<Candidate>) -> Vec<Ipv4Addr> {
    let mut seen = HashSet::new();
    let mut usable = Vec::new();

    for candidate in candidates {
        if is_loopback_name(&candidate.name) || is_tunnel(&candidate.name) {
            debug!("Skipping interface {}: loopback or tunnel", candidate.name);
            continue;
        }

        let ip = match candidate.ip {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => continue,
        };
        if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
            continue;
        }

        if seen.insert(ip) {
            debug!("Usable address on {}: {}", candidate.name, ip);
            usable.push(ip);
        }
    }

    usable
}

/// Enumerate the local IPv4 addresses usable for sharing.
///
/// An empty result is not an error here; the caller treats it as a hard
/// precondition failure with its own user-facing message.
pub fn discover_share_addresses() -> Result<Vec<Ipv4Addr>> {
    let interfaces = get_if_addrs()
        .map_err(|err| anyhow!("Failed to enumerate network interfaces: {}", err))?;

    let candidates = interfaces
        .into_iter()
        .map(|interface| Candidate {
            ip: interface.ip(),
            name: interface.name,
        })
        .collect();

    let usable = filter_usable(candidates);
    if usable.is_empty() {
        warn!("No usable network addresses found!");
    } else {
        info!(
            "Discovered {} usable address(es): {:?}",
            usable.len(),
            usable
        );
    }

    Ok(usable)
}
