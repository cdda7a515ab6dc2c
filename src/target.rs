//! # Target Resolution
//!
//! Turns a user-supplied identifier into a canonical [`Target`]. Resolution is
//! purely syntactic: the input is trimmed, lower-cased, stripped of an
//! `http(s)://` prefix, path and port, and checked to be a plausible domain
//! name or an IP literal. Discovering addresses and subdomains is module work.
//!
//! ## Example
//!
//! ```rust
//! use reconmap::target::{resolve, TargetKind};
//!
//! let target = resolve("  HTTPS://WWW.Example.COM:8443/login ")?;
//! assert_eq!(target.canonical(), "www.example.com");
//! assert_eq!(target.kind(), TargetKind::Domain);
//! assert!(target.ip_addresses().is_empty());
//! # Ok::<(), reconmap::error::ReconError>(())
//! ```

use crate::error::{ReconError, Result};
use crate::validation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Syntactic class of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Domain,
    Ipv4,
    Ipv6,
}

/// Canonical subject of a scan
///
/// Read-only once resolved; the orchestrator shares it between module tasks
/// behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    canonical: String,
    kind: TargetKind,
    #[serde(default)]
    ip_addresses: BTreeSet<IpAddr>,
    #[serde(default)]
    subdomains: BTreeSet<String>,
}

/// Facts about the target reported by a module outside its opaque payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discoveries {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ip_addresses: BTreeSet<IpAddr>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub subdomains: BTreeSet<String>,
}

impl Discoveries {
    pub fn is_empty(&self) -> bool {
        self.ip_addresses.is_empty() && self.subdomains.is_empty()
    }
}

impl Target {
    fn new(canonical: String, kind: TargetKind) -> Self {
        Self {
            canonical,
            kind,
            ip_addresses: BTreeSet::new(),
            subdomains: BTreeSet::new(),
        }
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn is_ip(&self) -> bool {
        matches!(self.kind, TargetKind::Ipv4 | TargetKind::Ipv6)
    }

    pub fn ip_addresses(&self) -> &BTreeSet<IpAddr> {
        &self.ip_addresses
    }

    pub fn subdomains(&self) -> &BTreeSet<String> {
        &self.subdomains
    }

    /// Folds module discoveries into this target.
    ///
    /// Only used on the aggregator's copy; the scan-time target stays frozen.
    /// Subdomain names are lower-cased and the target's own name is ignored.
    pub fn merge_discoveries(&mut self, discoveries: &Discoveries) {
        self.ip_addresses
            .extend(discoveries.ip_addresses.iter().copied());
        for name in &discoveries.subdomains {
            let name = name.trim().trim_end_matches('.').to_ascii_lowercase();
            if !name.is_empty() && name != self.canonical {
                self.subdomains.insert(name);
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Resolve a raw identifier into a canonical [`Target`]
///
/// Fails with [`ReconError::InvalidTarget`] on empty input, malformed syntax,
/// embedded credentials or a scheme other than `http`/`https`.
pub fn resolve(raw: &str) -> Result<Target> {
    let input = raw.trim().to_lowercase();
    if input.is_empty() {
        return Err(ReconError::invalid_target(raw, "target is empty"));
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(target_from_ip(ip));
    }

    let rest = strip_scheme(&input).map_err(|reason| ReconError::invalid_target(raw, reason))?;
    let authority = match rest.find(|c: char| matches!(c, '/' | '?' | '#')) {
        Some(end) => &rest[..end],
        None => rest,
    };

    if authority.is_empty() {
        return Err(ReconError::invalid_target(raw, "no host present"));
    }
    if authority.contains('@') {
        return Err(ReconError::invalid_target(raw, "credentials are not allowed in targets"));
    }

    let host = extract_host(authority).map_err(|reason| ReconError::invalid_target(raw, reason))?;
    if let Some(ip) = host {
        return Ok(target_from_ip(ip));
    }

    let host = strip_port(authority).map_err(|reason| ReconError::invalid_target(raw, reason))?;
    let host = host.strip_suffix('.').unwrap_or(host);

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(target_from_ip(ip));
    }

    validation::validate_domain(host).map_err(|reason| ReconError::invalid_target(raw, reason))?;
    Ok(Target::new(host.to_string(), TargetKind::Domain))
}

fn target_from_ip(ip: IpAddr) -> Target {
    let kind = match ip {
        IpAddr::V4(_) => TargetKind::Ipv4,
        IpAddr::V6(_) => TargetKind::Ipv6,
    };
    Target::new(ip.to_string(), kind)
}

/// Removes an allowed `scheme://` prefix and rejects every other scheme
fn strip_scheme(input: &str) -> std::result::Result<&str, String> {
    if let Some(idx) = input.find("://") {
        let scheme = &input[..idx];
        if ALLOWED_SCHEMES.contains(&scheme) {
            return Ok(&input[idx + 3..]);
        }
        return Err(format!("scheme '{}' is not allowed", scheme));
    }

    // `javascript:...`, `mailto:...` and friends
    if let Some((prefix, _)) = input.split_once(':') {
        if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(format!("scheme '{}' is not allowed", prefix));
        }
    }

    Ok(input)
}

/// Handles the bracketed IPv6 forms `[v6]` and `[v6]:port`
fn extract_host(authority: &str) -> std::result::Result<Option<IpAddr>, String> {
    let Some(inner) = authority.strip_prefix('[') else {
        return Ok(None);
    };
    let (addr, after) = inner
        .split_once(']')
        .ok_or_else(|| "unterminated IPv6 literal".to_string())?;
    let addr = addr
        .parse::<Ipv6Addr>()
        .map_err(|_| format!("'{}' is not a valid IPv6 address", addr))?;
    if !after.is_empty() {
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| "unexpected characters after IPv6 literal".to_string())?;
        parse_port(port)?;
    }
    Ok(Some(IpAddr::V6(addr)))
}

fn strip_port(authority: &str) -> std::result::Result<&str, String> {
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            parse_port(port)?;
            Ok(host)
        }
        Some(_) => Err("malformed host".to_string()),
        None => Ok(authority),
    }
}

fn parse_port(port: &str) -> std::result::Result<u16, String> {
    port.parse::<u16>()
        .map_err(|_| format!("'{}' is not a valid port", port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_domain_normalizes() {
        let target = resolve("  Example.COM ").unwrap();
        assert_eq!(target.canonical(), "example.com");
        assert_eq!(target.kind(), TargetKind::Domain);
        assert!(target.ip_addresses().is_empty());
        assert!(target.subdomains().is_empty());
    }

    #[test]
    fn test_resolve_strips_url_parts() {
        assert_eq!(resolve("https://example.com/a/b?c=d#e").unwrap().canonical(), "example.com");
        assert_eq!(resolve("http://api.example.com:8080").unwrap().canonical(), "api.example.com");
        assert_eq!(resolve("example.com:443").unwrap().canonical(), "example.com");
        assert_eq!(resolve("example.com.").unwrap().canonical(), "example.com");
    }

    #[test]
    fn test_resolve_ip_literals() {
        let v4 = resolve("192.168.1.10").unwrap();
        assert_eq!(v4.kind(), TargetKind::Ipv4);
        assert!(v4.is_ip());

        let v6 = resolve("2001:DB8:0:0::1").unwrap();
        assert_eq!(v6.kind(), TargetKind::Ipv6);
        assert_eq!(v6.canonical(), "2001:db8::1");

        assert_eq!(resolve("[::1]:8080").unwrap().canonical(), "::1");
        assert_eq!(resolve("http://10.0.0.1:80/").unwrap().canonical(), "10.0.0.1");
        assert_eq!(resolve("abcd::1").unwrap().kind(), TargetKind::Ipv6);
    }

    #[test]
    fn test_resolve_rejects_bad_input() {
        assert!(resolve("").is_err());
        assert!(resolve("   ").is_err());
        assert!(resolve("ftp://example.com").is_err());
        assert!(resolve("javascript:alert(1)").is_err());
        assert!(resolve("file:///etc/passwd").is_err());
        assert!(resolve("user:pw@example.com").is_err());
        assert!(resolve("http://user@example.com").is_err());
        assert!(resolve("invalid..hostname").is_err());
        assert!(resolve("exa mple.com").is_err());
        assert!(resolve("example.com:99999").is_err());
        assert!(resolve("[::1").is_err());
        assert!(resolve("https://").is_err());
        assert!(resolve("256.256.256.256").is_err());
    }

    #[test]
    fn test_resolve_error_variant() {
        match resolve("ftp://example.com") {
            Err(ReconError::InvalidTarget { input, reason }) => {
                assert_eq!(input, "ftp://example.com");
                assert!(reason.contains("ftp"));
            }
            other => panic!("expected InvalidTarget, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_is_idempotent() {
        for raw in [
            "Example.com",
            "https://WWW.example.org/path",
            "10.1.2.3",
            "[2001:db8::1]:443",
            "xn--bcher-kva.example.",
        ] {
            let first = resolve(raw).unwrap();
            let second = resolve(first.canonical()).unwrap();
            assert_eq!(first, second, "resolving {} twice diverged", raw);
        }
    }

    #[test]
    fn test_merge_discoveries() {
        let mut target = resolve("example.com").unwrap();
        let mut found = Discoveries::default();
        found.ip_addresses.insert("93.184.216.34".parse().unwrap());
        found.subdomains.insert("WWW.example.com.".to_string());
        found.subdomains.insert("example.com".to_string());

        target.merge_discoveries(&found);
        assert_eq!(target.ip_addresses().len(), 1);
        assert_eq!(
            target.subdomains().iter().collect::<Vec<_>>(),
            vec!["www.example.com"]
        );
    }
}
