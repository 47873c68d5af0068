//! Internal-network caller checks.
//!
//! Observability paths (e.g. /metrics) are open to private-network callers
//! only. The transport-level peer address is authoritative; a forwarded
//! header may narrow the decision but can never widen it, so header
//! spoofing from outside cannot grant access.

use std::net::IpAddr;

use axum::http::HeaderMap;

/// RFC1918 ranges plus loopback. IPv6 is accepted for loopback and
/// v4-mapped private addresses only.
pub fn is_internal_addr(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => {
            if v6.is_loopback() {
                return true;
            }
            match v6.to_ipv4_mapped() {
                Some(v4) => v4.is_private() || v4.is_loopback(),
                None => false,
            }
        }
    }
}

/// True when the transport peer is internal and any forwarded-for chain
/// agrees. The header is only consulted to *deny* (a proxied external
/// caller), never to allow.
pub fn is_internal_caller(peer: IpAddr, headers: &HeaderMap) -> bool {
    if !is_internal_addr(peer) {
        return false;
    }
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(origin) = first.trim().parse::<IpAddr>() {
                return is_internal_addr(origin);
            }
        }
    }
    true
}
