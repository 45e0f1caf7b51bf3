//! Rate limit key derivation.
//!
//! A key is `{policy_prefix}:{identity}`. The identity is an authenticated
//! principal when the call site opts into per-user limiting, otherwise the
//! client IP from the proxy header chain. Requests that cannot be attributed
//! share the [`UNKNOWN_CLIENT`] bucket so they never bypass limits.
//!
//! Everything here is a pure function of the request headers.

use http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

/// Identity used when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Proxy header carrying the client chain, client first.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Single-address header set by some reverse proxies.
pub const X_REAL_IP: &str = "x-real-ip";

/// Extract the client IP from proxy headers.
///
/// Uses the first entry of `X-Forwarded-For`, then `X-Real-IP`. Values that
/// do not parse as an IP address (or `ip:port`) are skipped.
pub fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .and_then(parse_ip)
        .or_else(|| {
            headers
                .get(X_REAL_IP)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_ip)
        })
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

/// Resolve the identity a request is counted under.
pub fn client_identity(headers: &HeaderMap, identity_override: Option<&str>) -> String {
    if let Some(principal) = identity_override.map(str::trim).filter(|p| !p.is_empty()) {
        return principal.to_string();
    }
    client_ip(headers)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Build the counter key for a request under a policy prefix.
///
/// # Example
/// ```
/// use http::HeaderMap;
/// use http_throttle::derive_key;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
///
/// assert_eq!(derive_key(&headers, "api", None), "api:203.0.113.7");
/// assert_eq!(derive_key(&headers, "api", Some("user-42")), "api:user-42");
/// assert_eq!(derive_key(&HeaderMap::new(), "api", None), "api:unknown");
/// ```
pub fn derive_key(headers: &HeaderMap, prefix: &str, identity_override: Option<&str>) -> String {
    format!("{}:{}", prefix, client_identity(headers, identity_override))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_first_forwarded_entry_wins() {
        let h = headers(&[
            (X_FORWARDED_FOR, " 198.51.100.4 , 10.0.0.2, 10.0.0.3"),
            (X_REAL_IP, "10.9.9.9"),
        ]);
        assert_eq!(derive_key(&h, "edge", None), "edge:198.51.100.4");
    }

    #[test]
    fn test_falls_back_to_real_ip() {
        let h = headers(&[(X_REAL_IP, "192.0.2.10")]);
        assert_eq!(derive_key(&h, "edge", None), "edge:192.0.2.10");
    }

    #[test]
    fn test_malformed_forwarded_falls_back() {
        let h = headers(&[(X_FORWARDED_FOR, "not-an-ip"), (X_REAL_IP, "192.0.2.10")]);
        assert_eq!(derive_key(&h, "edge", None), "edge:192.0.2.10");

        let h = headers(&[(X_FORWARDED_FOR, ", 10.0.0.1")]);
        assert_eq!(derive_key(&h, "edge", None), "edge:unknown");
    }

    #[test]
    fn test_missing_headers_share_unknown_bucket() {
        assert_eq!(derive_key(&HeaderMap::new(), "upload", None), "upload:unknown");
    }

    #[test]
    fn test_socket_address_and_ipv6() {
        let h = headers(&[(X_FORWARDED_FOR, "203.0.113.9:51234")]);
        assert_eq!(derive_key(&h, "api", None), "api:203.0.113.9");

        let h = headers(&[(X_FORWARDED_FOR, "2001:db8::1")]);
        assert_eq!(derive_key(&h, "api", None), "api:2001:db8::1");

        let h = headers(&[(X_FORWARDED_FOR, "[2001:db8::2]:443")]);
        assert_eq!(derive_key(&h, "api", None), "api:2001:db8::2");
    }

    #[test]
    fn test_identity_override() {
        let h = headers(&[(X_FORWARDED_FOR, "198.51.100.4")]);
        assert_eq!(derive_key(&h, "api", Some("user-1")), "api:user-1");
        // Blank override is ignored
        assert_eq!(derive_key(&h, "api", Some("  ")), "api:198.51.100.4");
    }

    #[test]
    fn test_prefix_isolates_policies() {
        let h = headers(&[(X_FORWARDED_FOR, "198.51.100.4")]);
        assert_ne!(derive_key(&h, "edge", None), derive_key(&h, "upload", None));
    }
}
