//! Client identity extraction.
//!
//! The identity is the string a request is bucketed under. It comes from the
//! transport peer address, or from the first `X-Forwarded-For` hop when an
//! intermediary is explicitly trusted to set that header.

use std::fmt;
use std::net::IpAddr;

/// Header carrying the original client address through proxies.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// A per-request client identity.
///
/// Never persisted; only used as the suffix of a counter key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Create an identity from a raw string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The shared bucket used when no address could be determined.
    pub fn unidentified() -> Self {
        Self(String::new())
    }

    /// Create an identity from a peer IP address.
    ///
    /// IPv4-mapped IPv6 addresses collapse to their IPv4 form so a dual-stack
    /// listener does not split one client across two buckets.
    pub fn from_ip(ip: IpAddr) -> Self {
        Self(ip.to_canonical().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the shared unidentified bucket.
    pub fn is_unidentified(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClientIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the identity for a request.
///
/// With `trust_proxy` unset the forwarded header is ignored entirely, so a
/// client cannot pick its own bucket by forging it. This never fails: a
/// request with no usable address lands in the unidentified bucket.
pub fn extract_identity(
    remote_addr: Option<IpAddr>,
    forwarded_for: Option<&str>,
    trust_proxy: bool,
) -> ClientIdentity {
    if trust_proxy {
        if let Some(client) = forwarded_for.and_then(first_forwarded_hop) {
            return ClientIdentity::new(client);
        }
    }

    remote_addr
        .map(ClientIdentity::from_ip)
        .unwrap_or_else(ClientIdentity::unidentified)
}

/// First comma-separated token of a forwarding header, trimmed.
fn first_forwarded_hop(header: &str) -> Option<&str> {
    header
        .split(',')
        .next()
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
}
