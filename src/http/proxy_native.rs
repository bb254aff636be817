use std::sync::OnceLock;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::core::operation_mode::OperationMode;
use crate::http::body::{RespBody, full};
use crate::http::build_error_page;
use crate::http::forwarded::{add_forwarded_headers, strip_hop_by_hop_headers};
use crate::logging::syslog::{error, trace};
use crate::registry::worker::{Worker, WorkerKind};

type ProxyClient = Client<HttpConnector, Incoming>;

static CLIENT: OnceLock<ProxyClient> = OnceLock::new();

fn client() -> &'static ProxyClient {
    CLIENT.get_or_init(|| Client::builder(TokioExecutor::new()).build(HttpConnector::new()))
}

/// §4.K. `worker` must already be the longest-prefix match for this
/// request's path (the Router's job, not this function's).
pub async fn proxy(mut req: Request<Incoming>, worker: &Worker, remote_ip: &str, mode: OperationMode) -> Response<RespBody> {
    if mode.is_dev() {
        if let Some(error_text) = worker.build_error() {
            return build_error_page::render(&worker.name, &error_text);
        }
    }

    if !worker.is_healthy() {
        return status_response(StatusCode::SERVICE_UNAVAILABLE);
    }

    let Some(port) = worker.port() else {
        return status_response(StatusCode::SERVICE_UNAVAILABLE);
    };

    let host_header = req.headers().get(hyper::header::HOST).and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
    let is_upgrade = req.headers().get(hyper::header::UPGRADE).is_some();

    let stripped_path = strip_route(&worker.route, req.uri().path());
    let path_and_query = match req.uri().query() {
        Some(query) => format!("{}?{}", stripped_path, query),
        None => stripped_path,
    };

    let upstream_uri: hyper::Uri = match format!("http://127.0.0.1:{}{}", port, path_and_query).parse() {
        Ok(uri) => uri,
        Err(e) => {
            error(format!("worker '{}': failed building upstream uri: {}", worker.name, e));
            return status_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    strip_hop_by_hop_headers(req.headers_mut(), is_upgrade);
    add_forwarded_headers(req.headers_mut(), remote_ip, &host_header, "http");
    if !host_header.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&host_header) {
            req.headers_mut().insert(hyper::header::HOST, value);
        }
    }

    *req.uri_mut() = upstream_uri.clone();

    trace(format!("worker '{}': proxying {} {}", worker.name, req.method(), upstream_uri));

    match client().request(req).await {
        Ok(mut resp) => {
            let served = worker.increment_requests_served();
            trace(format!("worker '{}': served {} requests total", worker.name, served));

            let upgraded = resp.status() == StatusCode::SWITCHING_PROTOCOLS;
            strip_hop_by_hop_headers(resp.headers_mut(), upgraded);
            if mode.is_dev() {
                insert_debug_headers(resp.headers_mut(), worker, port);
            }
            resp.map(|body| body.boxed())
        }
        Err(e) => {
            error(format!("worker '{}': upstream request failed: {}", worker.name, e));
            status_response(StatusCode::BAD_GATEWAY)
        }
    }
}

/// `/api/users` with route `/api` → `/users`; a fully-stripped path becomes
/// `/`. Assumes `path` already matched `route` (the Registry's job).
fn strip_route(route: &str, path: &str) -> String {
    if route == "/" {
        return path.to_string();
    }
    match path.strip_prefix(route) {
        Some(rest) if rest.is_empty() => "/".to_string(),
        Some(rest) => rest.to_string(),
        None => path.to_string(),
    }
}

fn insert_debug_headers(headers: &mut HeaderMap, worker: &Worker, port: u16) {
    let kind = match worker.kind {
        WorkerKind::Native => "native",
        WorkerKind::FastcgiPool => "fastcgi-pool",
    };
    if let Ok(value) = HeaderValue::from_str(&worker.name) {
        headers.insert("x-tqworker-name", value);
    }
    headers.insert("x-tqworker-type", HeaderValue::from_static(kind));
    if let Ok(value) = HeaderValue::from_str(&worker.route) {
        headers.insert("x-tqworker-route", value);
    }
    if let Ok(value) = HeaderValue::from_str(&port.to_string()) {
        headers.insert("x-tqworker-port", value);
    }
}

fn status_response(status: StatusCode) -> Response<RespBody> {
    Response::builder().status(status).body(full("")).expect("static status response is always well-formed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_route_handles_root_prefix_and_full_strip() {
        assert_eq!(strip_route("/", "/anything"), "/anything");
        assert_eq!(strip_route("/api", "/api/users"), "/users");
        assert_eq!(strip_route("/api", "/api"), "/");
    }

    #[test]
    fn a_freshly_discovered_worker_starts_unhealthy() {
        // `hyper::body::Incoming` can only be constructed by hyper's own
        // server connection driver, so `proxy()` itself is exercised by the
        // router's end-to-end test against a real listener instead; this
        // checks the precondition it relies on before ever dialing upstream.
        use crate::configuration::worker_config::WorkerConfig;
        use std::collections::HashMap;
        use std::path::PathBuf;

        let config = WorkerConfig {
            name: "blog".to_string(),
            path: "/blog".to_string(),
            r#type: "native".to_string(),
            enabled: true,
            runtime: HashMap::new(),
            timeouts: Default::default(),
            max_requests: 0,
            pool: Default::default(),
            fastcgi: Default::default(),
        };
        let worker = Worker::new(PathBuf::from("/tmp"), config);
        assert!(!worker.is_healthy());
    }
}
