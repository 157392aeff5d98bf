//! Client identity extraction
//!
//! One [`IdentitySource`] is configured per server and used for both the
//! access-list checks and the rate limiting, so a client is always known by
//! the same identifier.

use anyhow::{Result, anyhow};
use axum::http::HeaderMap;
use std::fmt;
use std::net::SocketAddr;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Where the client identifier of a request comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdentitySource {
    /// The IP address of the connection peer
    #[default]
    PeerIp,
    /// The peer address including its port
    PeerAddr,
    /// The first entry of `X-Forwarded-For`, falling back to the peer IP
    ForwardedFor,
    /// `X-Real-IP`, falling back to the peer IP
    RealIp,
}

impl IdentitySource {
    /// Identify a raw connection; header-based sources fall back to the peer IP
    pub fn identify_peer(self, peer: SocketAddr) -> String {
        match self {
            IdentitySource::PeerAddr => peer.to_string(),
            _ => peer.ip().to_string(),
        }
    }

    /// Identify an HTTP request
    pub fn identify_request(self, headers: &HeaderMap, peer: SocketAddr) -> String {
        let header = match self {
            IdentitySource::ForwardedFor => first_header_entry(headers, X_FORWARDED_FOR),
            IdentitySource::RealIp => first_header_entry(headers, X_REAL_IP),
            IdentitySource::PeerIp | IdentitySource::PeerAddr => None,
        };
        header.unwrap_or_else(|| self.identify_peer(peer))
    }
}

fn first_header_entry(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

impl std::str::FromStr for IdentitySource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "peer-ip" => Ok(IdentitySource::PeerIp),
            "peer-addr" => Ok(IdentitySource::PeerAddr),
            "forwarded-for" => Ok(IdentitySource::ForwardedFor),
            "real-ip" => Ok(IdentitySource::RealIp),
            _ => Err(anyhow!(
                "Invalid identity source: {}. Valid options are: peer-ip, peer-addr, forwarded-for, real-ip",
                s
            )),
        }
    }
}

impl fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IdentitySource::PeerIp => "peer-ip",
            IdentitySource::PeerAddr => "peer-addr",
            IdentitySource::ForwardedFor => "forwarded-for",
            IdentitySource::RealIp => "real-ip",
        })
    }
}
