use hyper::HeaderMap;
use hyper::header::{HeaderName, HeaderValue};

/// Headers that must not be forwarded past a proxy hop. `Connection` may
/// name additional per-hop headers of its own; those are folded in by the
/// caller before removal.
const HOP_BY_HOP: [&str; 7] = ["connection", "keep-alive", "proxy-authenticate", "proxy-authorization", "te", "trailer", "transfer-encoding"];

pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap, is_upgrade: bool) {
    let mut extra = Vec::new();
    if !is_upgrade {
        if let Some(connection) = headers.get(hyper::header::CONNECTION) {
            if let Ok(value) = connection.to_str() {
                extra.extend(value.split(',').map(|t| t.trim().to_ascii_lowercase()).filter(|t| !t.is_empty()));
            }
        }
    }

    for name in HOP_BY_HOP.iter().map(|s| s.to_string()).chain(extra) {
        headers.remove(name.as_str());
    }

    if is_upgrade {
        // Upgrade itself and the Connection: Upgrade token must survive so the
        // bridged connection can complete its handshake.
        headers.remove("keep-alive");
        headers.remove("proxy-authenticate");
        headers.remove("proxy-authorization");
        headers.remove("te");
        headers.remove("trailer");
    }
}

/// Appends `remote_ip` to `X-Forwarded-For` and sets `X-Forwarded-Host`/
/// `X-Forwarded-Proto` from the inbound request.
pub fn add_forwarded_headers(headers: &mut HeaderMap, remote_ip: &str, host: &str, scheme: &str) {
    let xff_value = match headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{}, {}", existing, remote_ip),
        None => remote_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&xff_value) {
        headers.insert(HeaderName::from_static("x-forwarded-for"), value);
    }
    if let Ok(value) = HeaderValue::from_str(host) {
        headers.insert(HeaderName::from_static("x-forwarded-host"), value);
    }
    if let Ok(value) = HeaderValue::from_str(scheme) {
        headers.insert(HeaderName::from_static("x-forwarded-proto"), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_connection_and_the_headers_it_names() {
        let mut headers = HeaderMap::new();
        headers.insert(hyper::header::CONNECTION, HeaderValue::from_static("keep-alive, x-custom-hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-custom-hop", HeaderValue::from_static("drop-me"));
        headers.insert("x-keep-me", HeaderValue::from_static("yes"));

        strip_hop_by_hop_headers(&mut headers, false);

        assert!(!headers.contains_key(hyper::header::CONNECTION));
        assert!(!headers.contains_key("keep-alive"));
        assert!(!headers.contains_key("x-custom-hop"));
        assert!(headers.contains_key("x-keep-me"));
    }

    #[test]
    fn appends_to_existing_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        add_forwarded_headers(&mut headers, "10.0.0.2", "example.test", "http");

        assert_eq!(headers.get("x-forwarded-for").unwrap().to_str().unwrap(), "10.0.0.1, 10.0.0.2");
        assert_eq!(headers.get("x-forwarded-host").unwrap().to_str().unwrap(), "example.test");
        assert_eq!(headers.get("x-forwarded-proto").unwrap().to_str().unwrap(), "http");
    }
}
