//! Client IP resolution behind proxies and CDNs.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

/// Single-value headers checked in order before the multi-value ones.
const DIRECT_HEADERS: [&str; 3] = ["cf-connecting-ip", "true-client-ip", "x-real-ip"];

/// Resolve the originating client IP.
///
/// Precedence: `CF-Connecting-IP`, `True-Client-IP`, `X-Real-IP`, first hop of
/// `X-Forwarded-For`, `X-Cluster-Client-IP`, `X-Forwarded: for=`, `Forwarded: for=`,
/// then the connection's peer address. Candidates that do not parse as an IP
/// fall through to the next source.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    DIRECT_HEADERS
        .iter()
        .find_map(|name| header(headers, name).and_then(parse_ip))
        .or_else(|| {
            header(headers, "x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .and_then(parse_ip)
        })
        .or_else(|| header(headers, "x-cluster-client-ip").and_then(parse_ip))
        .or_else(|| header(headers, "x-forwarded").and_then(x_forwarded_for))
        .or_else(|| header(headers, "forwarded").and_then(forwarded_for))
        .or_else(|| peer.map(|addr| addr.ip()))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse().ok()
}

/// `X-Forwarded: for=192.0.2.60;proto=http`; only a leading `for=` counts.
fn x_forwarded_for(value: &str) -> Option<IpAddr> {
    value
        .strip_prefix("for=")
        .and_then(|rest| rest.split(';').next())
        .and_then(parse_ip)
}

/// RFC 7239 `Forwarded: for="192.0.2.60";proto=http`.
fn forwarded_for(value: &str) -> Option<IpAddr> {
    value
        .split(';')
        .map(str::trim)
        .filter_map(|part| part.strip_prefix("for="))
        .find_map(|ip| parse_ip(ip.trim_matches('"')))
}
