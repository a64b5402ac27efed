//! Client identification: turns a request into a bucket key.
//!
//! Key = BLAKE3("{ip}-{path}"), hex encoded. One bucket per client per
//! route, fixed length regardless of input.

use std::net::SocketAddr;

use axum::http::HeaderMap;

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Best guess at the client's address: first X-Forwarded-For hop, then
/// X-Real-IP, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real = headers
        .get(REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real {
        return ip.to_string();
    }

    peer.map(|p| p.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn client_key(ip: &str, path: &str) -> String {
    let data = format!("{ip}-{path}");
    hex::encode(blake3::hash(data.as_bytes()).as_bytes())
}
