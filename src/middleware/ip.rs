//! Client IP resolution shared by the rate limiter, the threat guard and the
//! audit context.
//!
//! # Resolution Order
//!
//! 1. First entry of `X-Forwarded-For`
//! 2. `X-Real-IP`
//! 3. The socket peer address (`ConnectInfo<SocketAddr>`)
//! 4. [`UNKNOWN_IP`]
//!
//! # Security Warning: IP Spoofing Risk
//!
//! Forwarded headers are client-controlled. Without `TRUSTED_PROXIES` they are
//! taken at face value, so anyone reaching the service directly can rotate
//! spoofed addresses to dodge per-IP limits. When `TRUSTED_PROXIES` is set and
//! the peer address is known, forwarded headers are only honoured if the peer
//! falls inside one of the configured CIDR ranges; otherwise the peer address
//! itself is used.
//!
//! ```nginx
//! # nginx: overwrite, never append, the client address
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};
use tracing::{debug, warn};

/// Fallback when no client IP can be determined.
///
/// All such requests share one rate-limit bucket.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// A bare address is treated as a /32 (or /128). Returns `None` if the
    /// format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();

        let Some((addr, prefix)) = cidr.split_once('/') else {
            let ip: IpAddr = cidr.parse().ok()?;
            return Some(Self {
                network: ip,
                prefix_len: max_prefix(&ip),
            });
        };

        let ip: IpAddr = addr.parse().ok()?;
        let prefix_len: u8 = prefix.parse().ok()?;

        if prefix_len > max_prefix(&ip) {
            return None;
        }

        Some(Self {
            network: ip,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

fn max_prefix(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Reverse proxies whose forwarded headers are believed.
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
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self { ranges }
    }

    /// Whether any ranges are configured.
    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// `true` if `ip` matches a configured range, or if none are configured.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Socket peer address recorded by `into_make_service_with_connect_info`.
pub fn peer_ip(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Borrowed address from the forwarding headers, if any.
#[inline]
fn forwarded_ip(headers: &HeaderMap) -> Option<&str> {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next()
        && !first.trim().is_empty()
    {
        return Some(first.trim());
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return Some(value.trim());
    }

    None
}

/// Resolve the client address for a request.
///
/// Returns `Cow::Borrowed(UNKNOWN_IP)` when nothing identifies the client.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted: &TrustedProxyConfig,
) -> Cow<'static, str> {
    if trusted.is_enabled()
        && let Some(peer) = peer
        && !trusted.is_trusted(&peer)
    {
        if forwarded_ip(headers).is_some() {
            debug!(
                peer = %peer,
                "Ignoring forwarded headers from untrusted peer"
            );
        }
        return Cow::Owned(peer.to_string());
    }

    match (forwarded_ip(headers), peer) {
        (Some(ip), _) => Cow::Owned(ip.to_string()),
        (None, Some(peer)) => Cow::Owned(peer.to_string()),
        (None, None) => Cow::Borrowed(UNKNOWN_IP),
    }
}
