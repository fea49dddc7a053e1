use crate::error::StreamgateError;
use hickory_resolver::{Resolver, config::ResolverConfig, name_server::TokioConnectionProvider};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;
use url::{Host, Url};

/// Async DNS resolver used to check hostnames before fetching them.
pub type DnsResolver = Resolver<TokioConnectionProvider>;

pub fn build_resolver() -> DnsResolver {
    Resolver::builder_with_config(ResolverConfig::default(), TokioConnectionProvider::default())
        .build()
}

/// Parse the media proxy's `url` parameter into an absolute target URL.
///
/// Accepts only `http://` and `https://` URLs with a host. When
/// `allow_private` is false, IP-literal hosts in loopback/private/link-local
/// ranges are rejected here; hostnames are checked later by
/// [`ensure_public_host`].
///
/// # Errors
/// Returns [`StreamgateError::InvalidTarget`] for:
/// - Invalid or relative URLs
/// - Non-HTTP(S) schemes
/// - Blocked IPv4/IPv6 literals (only when `allow_private` is false)
pub fn parse_target_url(raw: &str, allow_private: bool) -> Result<Url, StreamgateError> {
    let parsed = Url::parse(raw)
        .map_err(|_| StreamgateError::InvalidTarget(format!("Invalid URL: {raw}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(StreamgateError::InvalidTarget(format!(
                "Scheme '{scheme}' not allowed; only http/https permitted"
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| StreamgateError::InvalidTarget(format!("No host in URL: {raw}")))?;

    if !allow_private {
        match host {
            Host::Ipv4(ip) if is_blocked_ipv4(ip) => {
                return Err(StreamgateError::InvalidTarget(format!(
                    "Private or reserved IPv4 address not allowed: {ip}"
                )));
            }
            Host::Ipv6(ip) if is_blocked_ipv6(ip) => {
                return Err(StreamgateError::InvalidTarget(format!(
                    "Private or reserved IPv6 address not allowed: {ip}"
                )));
            }
            _ => {}
        }
    }

    Ok(parsed)
}

/// Resolve a hostname target and reject it if any address is private.
///
/// Resolution failures are not treated as rejections: the upstream fetch
/// will fail on its own and surface as an upstream error.
pub async fn ensure_public_host(resolver: &DnsResolver, url: &Url) -> Result<(), StreamgateError> {
    let Some(Host::Domain(domain)) = url.host() else {
        return Ok(());
    };

    let lookup = match resolver.lookup_ip(domain).await {
        Ok(lookup) => lookup,
        Err(e) => {
            debug!("DNS lookup for {} failed, deferring to fetch: {}", domain, e);
            return Ok(());
        }
    };

    if let Some(ip) = lookup.iter().find(|ip| is_blocked_ip(*ip)) {
        return Err(StreamgateError::InvalidTarget(format!(
            "Host {domain} resolves to private or reserved address {ip}"
        )));
    }

    Ok(())
}

fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => is_blocked_ipv6(v6),
    }
}

/// Returns `true` for IPv4 addresses in private or reserved ranges.
///
/// Blocked ranges:
/// - `0.0.0.0/8`      "this" network (RFC 1122)
/// - `10.0.0.0/8`     RFC 1918 private
/// - `127.0.0.0/8`    loopback
/// - `169.254.0.0/16` link-local / cloud-metadata (AWS, GCP, Azure)
/// - `172.16.0.0/12`  RFC 1918 private
/// - `192.168.0.0/16` RFC 1918 private
fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    let (a, b) = (octets[0], octets[1]);

    a == 0                               // 0.0.0.0/8
        || a == 10                       // 10.0.0.0/8
        || a == 127                      // 127.0.0.0/8 loopback
        || (a == 169 && b == 254)        // 169.254.0.0/16 link-local
        || (a == 172 && (16..=31).contains(&b)) // 172.16.0.0/12
        || (a == 192 && b == 168) // 192.168.0.0/16
}

/// Returns `true` for IPv6 addresses in private or reserved ranges.
///
/// Blocked ranges:
/// - `::/128`      unspecified
/// - `::1/128`     loopback
/// - `fe80::/10`   link-local
/// - `fc00::/7`    unique-local (ULA)
/// - `::ffff:0:0/96` when the embedded IPv4 address is blocked
fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    let s = ip.segments();

    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(v4);
    }

    ip.is_unspecified()
        || ip.is_loopback()                  // ::1
        || (s[0] & 0xffc0) == 0xfe80    // fe80::/10 link-local
        || (s[0] & 0xfe00) == 0xfc00 // fc00::/7 unique-local
}
