//! Decides whether a request may be served without authentication.
//!
//! Without credentials configured, only clients on loopback, private,
//! link-local or carrier-grade NAT networks are served. A proxied request is
//! only as trustworthy as every hop in its `X-Forwarded-For` chain.

use std::net::{IpAddr, Ipv4Addr};

use axum::http::HeaderMap;
use thiserror::Error;

use crate::config::Config;

pub const FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// A public address reached the server while authentication is off.
    #[error("external access from {0} without authentication configured")]
    ExternalAccess(String),
    #[error("error parsing remote address ({address}): {reason}")]
    MalformedAddress { address: String, reason: &'static str },
}

fn malformed(address: &str, reason: &'static str) -> AccessError {
    AccessError::MalformedAddress { address: address.to_string(), reason }
}

/// Parses an IP, accepting a trailing IPv6 zone such as `fe80::1%eth0`.
fn parse_ip(s: &str) -> Option<IpAddr> {
    let s = s.trim();
    let s = s.split_once('%').map_or(s, |(ip, _zone)| ip);
    s.parse().ok()
}

/// Splits `host:port` / `[v6]:port` and parses the host.
pub fn parse_remote_addr(addr: &str) -> Result<IpAddr, AccessError> {
    let host = if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| malformed(addr, "missing ']' in address"))?;
        if !tail.starts_with(':') {
            return Err(malformed(addr, "missing port in address"));
        }
        host
    } else {
        let (host, _port) = addr.rsplit_once(':').ok_or_else(|| malformed(addr, "missing port in address"))?;
        if host.contains(':') {
            return Err(malformed(addr, "too many colons in address"));
        }
        host
    };
    parse_ip(host).ok_or_else(|| malformed(addr, "invalid IP address"))
}

fn is_local_v4(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    // 100.64.0.0/10
    let cgnat = a == 100 && (b & 0xc0) == 0x40;
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || cgnat
}

/// Loopback, RFC1918, link-local, unique-local (fc00::/7) or CGNAT.
pub fn is_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_local_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_local_v4(v4),
            None => {
                let first = v6.segments()[0];
                v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
            }
        },
    }
}

fn require_local(ip: IpAddr) -> Result<(), AccessError> {
    if is_local_ip(ip) {
        Ok(())
    } else {
        Err(AccessError::ExternalAccess(ip.to_string()))
    }
}

/// All `X-Forwarded-For` hops, left-most (originating client) first.
fn forwarded_chain(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_hop(hop: &str) -> Result<IpAddr, AccessError> {
    parse_ip(hop).ok_or_else(|| malformed(hop, "invalid IP address in proxy chain"))
}

pub fn check_allow_public_without_auth(
    config: &Config,
    headers: &HeaderMap,
    remote_addr: &str,
) -> Result<(), AccessError> {
    if config.has_credentials() || config.dangerous_allow_public_without_auth() {
        return Ok(());
    }

    // every hop has to be on the local network, the direct peer included
    require_local(parse_remote_addr(remote_addr)?)?;
    for hop in &forwarded_chain(headers) {
        require_local(parse_hop(hop)?)?;
    }
    Ok(())
}

/// Reports a previously recorded tripwire. Never sets one; recording is done
/// by the request middleware on the first rejected external request.
pub fn check_external_access_tripwire(config: &Config) -> Result<(), AccessError> {
    if config.has_credentials() || config.dangerous_allow_public_without_auth() {
        return Ok(());
    }
    match config.tripwire() {
        Some(address) => Err(AccessError::ExternalAccess(address)),
        None => Ok(()),
    }
}

pub fn log_external_access_error(err: &AccessError) {
    tracing::error!(
        "Mediathek has been accessed from the internet ({}) without authentication. \
         Anyone can browse your library and files. Requests from public addresses are \
         being refused. Configure a username and password, then clear \
         security_tripwire_accessed_from_public_internet in the config file to silence this warning.",
        err
    );
}
