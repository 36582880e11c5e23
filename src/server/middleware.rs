//! Client address and scheme recovery
//!
//! Forwarded headers are only trusted when the immediate peer is a loopback
//! or private address; anything else could spoof an arbitrary origin. The
//! recovered address and scheme ride on the request as an extension.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

/// How many hops of an `X-Forwarded-For` chain are walked
const FORWARD_LIMIT: usize = 5;

/// Per-request client attributes recovered from the connection and, for
/// private peers, the reverse-proxy headers
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Originating client address
    pub ip: IpAddr,

    /// Scheme claimed by `X-Forwarded-Proto`, when trusted and present
    pub scheme: Option<String>,
}

/// Middleware attaching [`ClientInfo`] to every request
pub async fn real_ip(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let info = client_info(peer.ip(), request.headers());
    request.extensions_mut().insert(info);

    next.run(request).await
}

fn client_info(peer: IpAddr, headers: &HeaderMap) -> ClientInfo {
    if !is_private_or_loopback(peer) {
        return ClientInfo {
            ip: peer,
            scheme: None,
        };
    }

    let ip = forwarded_ip(headers).unwrap_or(peer);

    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    ClientInfo { ip, scheme }
}

/// Recover the client address from `X-Real-IP`, falling back to the
/// `X-Forwarded-For` chain walked at most [`FORWARD_LIMIT`] hops from its end
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return real_ip.trim().parse().ok();
    }

    let chain = headers.get("x-forwarded-for")?.to_str().ok()?;
    let hops: Vec<&str> = chain.split(',').map(str::trim).collect();

    let index = hops.len().saturating_sub(FORWARD_LIMIT);
    hops.get(index)?.parse().ok()
}

/// Loopback and RFC1918 / unique-local addresses
pub fn is_private_or_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_public_peer_ignores_headers() {
        let info = client_info(
            "93.184.216.34".parse().unwrap(),
            &headers(&[("x-real-ip", "8.8.8.8"), ("x-forwarded-proto", "https")]),
        );

        assert_eq!(info.ip, "93.184.216.34".parse::<IpAddr>().unwrap());
        assert!(info.scheme.is_none());
    }

    #[test]
    fn test_private_peer_takes_x_real_ip() {
        let info = client_info(
            "10.0.0.1".parse().unwrap(),
            &headers(&[("x-real-ip", "8.8.8.8")]),
        );

        assert_eq!(info.ip, "8.8.8.8".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_loopback_peer_takes_forwarded_proto() {
        let info = client_info(
            "127.0.0.1".parse().unwrap(),
            &headers(&[("x-real-ip", "8.8.8.8"), ("x-forwarded-proto", "https")]),
        );

        assert_eq!(info.scheme.as_deref(), Some("https"));
    }

    #[test]
    fn test_forwarded_chain_short() {
        let info = client_info(
            "127.0.0.1".parse().unwrap(),
            &headers(&[("x-forwarded-for", "8.8.8.8, 10.0.0.2")]),
        );

        // Fewer hops than the limit: the first element is the client
        assert_eq!(info.ip, "8.8.8.8".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_forwarded_chain_capped_at_limit() {
        let chain = "1.1.1.1, 2.2.2.2, 3.3.3.3, 4.4.4.4, 5.5.5.5, 6.6.6.6, 7.7.7.7";
        let info = client_info(
            "127.0.0.1".parse().unwrap(),
            &headers(&[("x-forwarded-for", chain)]),
        );

        // Seven hops, limit five: the fifth from the end wins
        assert_eq!(info.ip, "3.3.3.3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_unparseable_forwarded_falls_back_to_peer() {
        let info = client_info(
            "192.168.1.10".parse().unwrap(),
            &headers(&[("x-forwarded-for", "not-an-address")]),
        );

        assert_eq!(info.ip, "192.168.1.10".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_is_private_or_loopback() {
        assert!(is_private_or_loopback("127.0.0.1".parse().unwrap()));
        assert!(is_private_or_loopback("10.1.2.3".parse().unwrap()));
        assert!(is_private_or_loopback("192.168.0.1".parse().unwrap()));
        assert!(is_private_or_loopback("::1".parse().unwrap()));
        assert!(is_private_or_loopback("fd00::1".parse().unwrap()));

        assert!(!is_private_or_loopback("8.8.8.8".parse().unwrap()));
        assert!(!is_private_or_loopback("2001:4860:4860::8888".parse().unwrap()));
    }
}
