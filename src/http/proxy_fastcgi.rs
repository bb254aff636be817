use std::collections::HashMap;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::HeaderName;
use hyper::{HeaderMap, Request, Response, StatusCode, Version};

use crate::fastcgi::client::FastCgiResponse;
use crate::http::body::{RespBody, full};
use crate::logging::syslog::{error, trace, warn};
use crate::registry::worker::Worker;

/// §4.L. `worker` must carry a started pool (`worker.kind == FastcgiPool`);
/// the router is responsible for that dispatch.
pub async fn proxy(req: Request<Incoming>, worker: &Worker, remote_addr: &str) -> Response<RespBody> {
    let Some(pool) = worker.pool.as_ref() else {
        error(format!("worker '{}': fastcgi proxy invoked without a pool", worker.name));
        return status_response(StatusCode::INTERNAL_SERVER_ERROR);
    };

    let method = req.method().as_str().to_string();
    let version = req.version();
    let uri = req.uri().clone();
    let headers = req.headers().clone();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error(format!("worker '{}': failed reading request body: {}", worker.name, e));
            return status_response(StatusCode::BAD_REQUEST);
        }
    };

    let document_root = worker.root.join("public");
    let script_path = compute_script_path(&worker.route, uri.path());
    let script_filename = join_document_root(&document_root, &script_path);
    let script_name = if script_path.starts_with('/') { script_path.clone() } else { format!("/{}", script_path) };

    let (remote_addr_ip, remote_port) = split_host_port(remote_addr);
    let (server_name, server_port) = server_name_and_port(&headers);

    let mut params = HashMap::new();
    params.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    params.insert("SERVER_SOFTWARE".to_string(), "TQServer".to_string());
    params.insert("SERVER_PROTOCOL".to_string(), http_version_string(version).to_string());
    params.insert("SERVER_NAME".to_string(), server_name);
    params.insert("SERVER_PORT".to_string(), server_port);
    params.insert("REQUEST_METHOD".to_string(), method);
    params.insert("REQUEST_URI".to_string(), uri.to_string());
    params.insert("SCRIPT_FILENAME".to_string(), script_filename);
    params.insert("SCRIPT_NAME".to_string(), script_name);
    params.insert("DOCUMENT_ROOT".to_string(), document_root.to_string_lossy().into_owned());
    params.insert("DOCUMENT_URI".to_string(), script_path);
    params.insert("QUERY_STRING".to_string(), uri.query().unwrap_or("").to_string());
    params.insert("REMOTE_ADDR".to_string(), remote_addr_ip);
    params.insert("REMOTE_PORT".to_string(), remote_port);
    params.insert("REDIRECT_STATUS".to_string(), "200".to_string());

    if let Some(content_type) = headers.get(hyper::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        params.insert("CONTENT_TYPE".to_string(), content_type.to_string());
    }
    if let Some(content_length) = headers.get(hyper::header::CONTENT_LENGTH).and_then(|v| v.to_str().ok()) {
        params.insert("CONTENT_LENGTH".to_string(), content_length.to_string());
    } else if !body.is_empty() {
        params.insert("CONTENT_LENGTH".to_string(), body.len().to_string());
    }

    for (name, value) in headers.iter() {
        let Ok(value) = value.to_str() else { continue };
        let cgi_name = format!("HTTP_{}", name.as_str().to_ascii_uppercase().replace('-', "_"));
        params.insert(cgi_name, value.to_string());
    }

    trace(format!("worker '{}': dispatching fastcgi request for {}", worker.name, script_name));

    let response = match pool.dispatch(1, &params, &body).await {
        Ok(response) => response,
        Err(e) => {
            error(format!("worker '{}': fastcgi dispatch failed: {}", worker.name, e));
            return status_response(StatusCode::BAD_GATEWAY);
        }
    };

    if !response.stderr.is_empty() {
        warn(format!("worker '{}': fastcgi stderr: {}", worker.name, String::from_utf8_lossy(&response.stderr)));
    }

    let served = worker.increment_requests_served();
    trace(format!("worker '{}': served {} requests total", worker.name, served));

    build_http_response(response)
}

/// `/blog` with route `/blog` → empty → `index.php`; `/blog/post` → `/post`,
/// which doesn't end in `.php` → `/post/index.php`.
fn compute_script_path(route: &str, path: &str) -> String {
    let stripped = if route == "/" {
        path.to_string()
    } else {
        path.strip_prefix(route).map(|s| s.to_string()).unwrap_or_else(|| path.to_string())
    };

    if stripped.is_empty() || stripped == "/" {
        format!("{}index.php", stripped)
    } else if stripped.ends_with(".php") {
        stripped
    } else {
        format!("{}/index.php", stripped)
    }
}

fn join_document_root(document_root: &std::path::Path, script_path: &str) -> String {
    format!("{}{}", document_root.to_string_lossy(), script_path)
}

fn http_version_string(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

fn split_host_port(addr: &str) -> (String, String) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.to_string()),
        None => (addr.to_string(), String::new()),
    }
}

fn server_name_and_port(headers: &HeaderMap) -> (String, String) {
    let host = headers.get(hyper::header::HOST).and_then(|v| v.to_str().ok()).unwrap_or("");
    match host.rsplit_once(':') {
        Some((name, port)) => (name.to_string(), port.to_string()),
        None => (host.to_string(), "80".to_string()),
    }
}

/// Splits a raw FastCGI Stdout stream into CGI response headers and body at
/// the first blank line. `Status: NNN <reason>` sets the HTTP status; every
/// other header line is forwarded as-is.
fn build_http_response(response: FastCgiResponse) -> Response<RespBody> {
    let (header_block, body) = match split_cgi_headers(&response.stdout) {
        Some(split) => split,
        None => (&response.stdout[..0], &response.stdout[..]),
    };

    let mut status = StatusCode::OK;
    let mut builder = Response::builder();

    for line in header_block.split(|&b| b == b'\n') {
        let line = trim_cr(line);
        if line.is_empty() {
            continue;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else { continue };
        let (name, value) = line.split_at(colon);
        let value = &value[1..];
        let name = String::from_utf8_lossy(name).trim().to_string();
        let value = String::from_utf8_lossy(value).trim().to_string();

        if name.eq_ignore_ascii_case("status") {
            if let Some(code) = value.split_whitespace().next().and_then(|s| s.parse::<u16>().ok()) {
                status = StatusCode::from_u16(code).unwrap_or(StatusCode::OK);
            }
            continue;
        }

        if let (Ok(header_name), Ok(header_value)) = (HeaderName::from_bytes(name.as_bytes()), hyper::header::HeaderValue::from_str(&value)) {
            builder = builder.header(header_name, header_value);
        }
    }

    builder.status(status).body(full(body.to_vec())).unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR))
}

fn split_cgi_headers(stdout: &[u8]) -> Option<(&[u8], &[u8])> {
    let needle = b"\r\n\r\n";
    if let Some(pos) = find_subslice(stdout, needle) {
        return Some((&stdout[..pos], &stdout[pos + needle.len()..]));
    }
    let needle = b"\n\n";
    find_subslice(stdout, needle).map(|pos| (&stdout[..pos], &stdout[pos + needle.len()..]))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn trim_cr(line: &[u8]) -> &[u8] {
    if line.last() == Some(&b'\r') { &line[..line.len() - 1] } else { line }
}

fn status_response(status: StatusCode) -> Response<RespBody> {
    Response::builder().status(status).body(full("")).expect("static status response is always well-formed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_path_appends_index_php_for_bare_route_hit() {
        assert_eq!(compute_script_path("/blog", "/blog"), "index.php");
        assert_eq!(compute_script_path("/blog", "/blog/"), "/index.php");
    }

    #[test]
    fn script_path_appends_index_php_under_a_subdirectory() {
        assert_eq!(compute_script_path("/blog", "/blog/archive"), "/archive/index.php");
    }

    #[test]
    fn script_path_leaves_a_php_file_untouched() {
        assert_eq!(compute_script_path("/blog", "/blog/post.php"), "/post.php");
    }

    #[test]
    fn parses_status_header_and_splits_body_at_blank_line() {
        let response = FastCgiResponse { app_status: 0, stdout: b"Status: 404 Not Found\r\nX-Custom: yes\r\n\r\nnope".to_vec(), stderr: Vec::new() };
        let http_response = build_http_response(response);
        assert_eq!(http_response.status(), StatusCode::NOT_FOUND);
        assert_eq!(http_response.headers().get("x-custom").unwrap(), "yes");
    }

    #[test]
    fn defaults_to_200_when_no_status_header_is_present() {
        let response = FastCgiResponse { app_status: 0, stdout: b"Content-Type: text/html\r\n\r\n<html></html>".to_vec(), stderr: Vec::new() };
        let http_response = build_http_response(response);
        assert_eq!(http_response.status(), StatusCode::OK);
    }
}
