//! Client identification for per-client admission control.
//!
//! A client is keyed by the IP address of the connected peer, with the port
//! stripped so that several connections from one host share a key. The key is
//! only ever used to partition rate limits; it is never an authorization
//! signal.
//!
//! # Reverse Proxies
//!
//! Behind a load balancer every request arrives from the proxy's address. When
//! the peer is inside one of the configured `TRUSTED_PROXIES` ranges, the first
//! entry of `X-Forwarded-For` is used instead. From any other peer the header
//! is ignored, so a client cannot pick its own rate-limit key by sending it.
//!
//! Requests served without connection info (e.g. a router driven directly in
//! tests) all share the [`UNKNOWN_CLIENT`] key.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Key shared by every request whose peer address cannot be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Rate-limit partition key for one client host.
///
/// Inserted into request extensions by the rate limit layer so later layers
/// reuse the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn unknown() -> Self {
        Self(UNKNOWN_CLIENT.to_string())
    }

    pub fn from_ip(ip: IpAddr) -> Self {
        Self(ip.to_canonical().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_CLIENT
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse `"10.0.0.0/8"`, `"::1/128"` or a bare address (implicit /32 or /128).
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (ip, prefix) = match cidr.split_once('/') {
            Some((ip, prefix)) => (ip, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = ip.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok()?,
            None => max_prefix,
        };
        if prefix_len > max_prefix {
            return None;
        }

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix_len)).unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Peers whose `X-Forwarded-For` header is honoured.
///
/// Empty by default: no peer is trusted and the header is always ignored.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges configured");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.ranges.iter().any(|range| range.contains(&ip))
    }
}

// =============================================================================
// Key Extraction
// =============================================================================

/// Derive the rate-limit key for `req`.
pub fn client_key<B>(req: &Request<B>, trusted_proxies: &TrustedProxyConfig) -> ClientKey {
    let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<SocketAddr>>() else {
        return ClientKey::unknown();
    };

    let peer_ip = peer.ip();
    if trusted_proxies.is_trusted(&peer_ip) {
        if let Some(forwarded) = forwarded_client(req) {
            return ClientKey::from_ip(forwarded);
        }
        debug!(peer = %peer_ip, "Trusted proxy sent no usable X-Forwarded-For");
    }

    ClientKey::from_ip(peer_ip)
}

/// First `X-Forwarded-For` entry as an address, with any port removed.
fn forwarded_client<B>(req: &Request<B>) -> Option<IpAddr> {
    let value = req.headers().get("x-forwarded-for")?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    strip_port(first)
}

/// Accepts `1.2.3.4`, `1.2.3.4:80`, `::1` and `[::1]:80`.
fn strip_port(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    host.parse::<SocketAddr>().ok().map(|addr| addr.ip())
}
