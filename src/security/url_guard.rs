//! SSRF protection — validates outbound fetch URLs against private/internal
//! hosts and IP ranges before the page fetcher touches the network.

use std::net::IpAddr;

/// Hostname fragments that are never fetched, regardless of DNS resolution.
const BLOCKED_HOST_PATTERNS: &[&str] = &["localhost", "internal", "intranet", "corp"];

/// Hostname suffixes reserved for private naming.
const BLOCKED_HOST_SUFFIXES: &[&str] = &[".local", ".localhost", ".internal"];

/// Check whether an IP address is private, loopback, link-local, or metadata.
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.octets() == [169, 254, 169, 254]
        }
        IpAddr::V6(v6) => {
            let segs = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                || (segs[0] & 0xfe00) == 0xfc00 // unique-local fc00::/7
                || (segs[0] & 0xffc0) == 0xfe80 // link-local fe80::/10
                || v6.to_ipv4_mapped().is_some_and(|v4| {
                    v4.is_loopback()
                        || v4.is_private()
                        || v4.is_link_local()
                        || v4.is_unspecified()
                        || v4.is_broadcast()
                        || v4.octets() == [169, 254, 169, 254]
                })
        }
    }
}

/// Check whether a hostname string is a private/internal host.
pub fn is_private_host(host: &str) -> bool {
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let lowered = bare.to_ascii_lowercase();

    if BLOCKED_HOST_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
    {
        return true;
    }
    if BLOCKED_HOST_SUFFIXES
        .iter()
        .any(|suffix| lowered.ends_with(suffix))
    {
        return true;
    }
    if let Ok(ip) = lowered.parse::<IpAddr>() {
        return is_private_ip(&ip);
    }
    false
}

/// Validate a URL for outbound fetching: http/https only, no private hosts,
/// and no DNS resolution into private address space.
pub async fn validate_fetch_url(url_str: &str) -> anyhow::Result<url::Url> {
    let parsed = url::Url::parse(url_str).map_err(|e| anyhow::anyhow!("invalid URL: {e}"))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("only http and https URLs are allowed");
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("URL has no host"))?;
    if is_private_host(host) {
        anyhow::bail!("blocked host '{host}'");
    }

    let port = parsed.port_or_known_default().unwrap_or(443);
    let addr_str = format!("{host}:{port}");
    if let Ok(addrs) = tokio::net::lookup_host(&addr_str).await {
        for addr in addrs {
            if is_private_ip(&addr.ip()) {
                anyhow::bail!(
                    "host '{host}' resolves to private address {}",
                    addr.ip()
                );
            }
        }
    }
    Ok(parsed)
}
