//! Webhook destination validation for SSRF protection.

use ipnet::IpNet;
use std::collections::HashSet;
use std::net::IpAddr;
use url::{Host, Url};

use crate::error::{SecurityError, SecurityResult};

/// Hostname suffixes that only resolve inside private networks.
const BLOCKED_SUFFIXES: [&str; 3] = [".local", ".internal", ".localhost"];

/// IP ranges a webhook may never target.
const BLOCKED_RANGES: [&str; 23] = [
    "0.0.0.0/8",          // "this" network / unspecified
    "10.0.0.0/8",         // Private
    "100.64.0.0/10",      // Carrier-grade NAT
    "127.0.0.0/8",        // Loopback
    "169.254.0.0/16",     // Link-local / cloud metadata
    "172.16.0.0/12",      // Private
    "192.0.0.0/24",       // IETF protocol assignments
    "192.0.2.0/24",       // Documentation
    "192.168.0.0/16",     // Private
    "198.18.0.0/15",      // Benchmarking
    "198.51.100.0/24",    // Documentation
    "203.0.113.0/24",     // Documentation
    "224.0.0.0/4",        // Multicast
    "240.0.0.0/4",        // Reserved
    "255.255.255.255/32", // Broadcast
    "::/8",               // IPv6 reserved: unspecified, loopback, IPv4-compatible
    "64:ff9b::/96",       // NAT64
    "100::/64",           // IPv6 discard-only
    "fc00::/7",           // IPv6 private
    "fe80::/10",          // IPv6 link-local
    "fec0::/10",          // IPv6 site-local (deprecated)
    "ff00::/8",           // IPv6 multicast
    "2001:db8::/32",      // IPv6 documentation
];

/// Decides whether a webhook URL may be dispatched to.
///
/// Rejects:
/// - Non-HTTP(S) schemes (file://, ftp://, gopher://)
/// - `localhost` and hosts under `.local`, `.internal`, `.localhost`
/// - Literal IPs in loopback, private, link-local, reserved or multicast ranges
///
/// Hostnames are judged by name only; no DNS lookup is performed.
#[derive(Debug, Clone)]
pub struct WebhookPolicy {
    /// Allowed URL schemes
    allowed_schemes: HashSet<String>,

    /// Blocked hostnames (exact match, lowercase)
    blocked_hosts: HashSet<String>,

    /// Blocked CIDR ranges
    blocked_cidrs: Vec<IpNet>,

    /// Hosts that bypass every other check
    allowed_hosts: HashSet<String>,
}

impl Default for WebhookPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookPolicy {
    /// Create a policy with the default security rules.
    pub fn new() -> Self {
        Self {
            allowed_schemes: ["http", "https"].into_iter().map(String::from).collect(),
            blocked_hosts: ["localhost", "metadata.google.internal", "instance-data"]
                .into_iter()
                .map(String::from)
                .collect(),
            blocked_cidrs: BLOCKED_RANGES
                .iter()
                .filter_map(|cidr| cidr.parse().ok())
                .collect(),
            allowed_hosts: HashSet::new(),
        }
    }

    /// Add an allowed host (bypasses validation).
    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.insert(host.into().to_ascii_lowercase());
        self
    }

    /// Block an additional host.
    pub fn block_host(mut self, host: impl Into<String>) -> Self {
        self.blocked_hosts.insert(host.into().to_ascii_lowercase());
        self
    }

    /// Block an additional CIDR range.
    pub fn block_cidr(mut self, cidr: IpNet) -> Self {
        self.blocked_cidrs.push(cidr);
        self
    }

    /// Validate a webhook URL, returning the parsed URL when it may be used.
    pub fn validate(&self, url: &str) -> SecurityResult<Url> {
        let parsed = Url::parse(url)?;

        if !self.allowed_schemes.contains(parsed.scheme()) {
            return Err(SecurityError::DisallowedScheme(parsed.scheme().to_string()));
        }

        let host = parsed.host().ok_or(SecurityError::NoHost)?;
        let host_str = parsed.host_str().ok_or(SecurityError::NoHost)?;
        let host_lower = host_str.trim_end_matches('.').to_ascii_lowercase();

        if self.allowed_hosts.contains(&host_lower) {
            return Ok(parsed);
        }

        match host {
            Host::Ipv4(ip) => self.check_ip(IpAddr::V4(ip))?,
            Host::Ipv6(ip) => match ip.to_ipv4_mapped() {
                Some(mapped) => self.check_ip(IpAddr::V4(mapped))?,
                None => self.check_ip(IpAddr::V6(ip))?,
            },
            Host::Domain(_) => self.check_name(&host_lower)?,
        }

        Ok(parsed)
    }

    /// Convenience wrapper returning only the verdict.
    pub fn is_allowed(&self, url: &str) -> bool {
        self.validate(url).is_ok()
    }

    fn check_name(&self, host: &str) -> SecurityResult<()> {
        if self.blocked_hosts.contains(host)
            || BLOCKED_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
        {
            return Err(SecurityError::BlockedHost(host.to_string()));
        }
        Ok(())
    }

    fn check_ip(&self, ip: IpAddr) -> SecurityResult<()> {
        if self.blocked_cidrs.iter().any(|cidr| cidr.contains(&ip)) {
            return Err(SecurityError::BlockedCidr(ip.to_string()));
        }
        Ok(())
    }
}
