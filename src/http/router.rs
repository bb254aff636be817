use std::path::PathBuf;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};

use crate::core::operation_mode::OperationMode;
use crate::http::body::{RespBody, full};
use crate::http::static_files;
use crate::http::{proxy_fastcgi, proxy_native};
use crate::registry::registry::Registry;
use crate::registry::worker::WorkerKind;
use crate::reload::broadcaster::Broadcaster;

/// Everything a request needs that isn't in the `Request` itself: where
/// workers live, what mode we're in, and the dev-only reload channel.
pub struct ServerState {
    pub registry: Arc<Registry>,
    pub server_root: PathBuf,
    pub mode: OperationMode,
    pub reload: Arc<Broadcaster>,
    pub shutting_down: Arc<std::sync::atomic::AtomicBool>,
}

/// §4.J dispatch order: reload upgrade (dev only) → longest-prefix worker
/// match or 404 → `<worker_root>/public/<path>` → `<server_root>/public/<path>`
/// → worker proxy (native or fastcgi, by `worker.kind`).
pub async fn route(req: Request<Incoming>, state: Arc<ServerState>, remote_addr: String) -> Response<RespBody> {
    if state.shutting_down.load(std::sync::atomic::Ordering::Relaxed) {
        return status_response(StatusCode::SERVICE_UNAVAILABLE);
    }

    if state.mode.is_dev() && Broadcaster::is_reload_request(&req) {
        return match state.reload.upgrade(req) {
            Ok(response) => response,
            Err(_) => status_response(StatusCode::BAD_REQUEST),
        };
    }

    let path = req.uri().path().to_string();
    let if_modified_since = req.headers().get(hyper::header::IF_MODIFIED_SINCE).and_then(|v| v.to_str().ok()).map(|s| s.to_string());

    let Some(worker) = state.registry.lookup(&path) else {
        return not_found();
    };

    let worker_public = static_files::public_dir(&worker.root);
    if let Some(response) = static_files::try_serve(&worker_public, &path, if_modified_since.as_deref()).await {
        return response;
    }

    let server_public = static_files::public_dir(&state.server_root);
    if let Some(response) = static_files::try_serve(&server_public, &path, if_modified_since.as_deref()).await {
        return response;
    }

    match worker.kind {
        WorkerKind::Native => proxy_native::proxy(req, &worker, &remote_addr, state.mode).await,
        WorkerKind::FastcgiPool => proxy_fastcgi::proxy(req, &worker, &remote_addr).await,
    }
}

fn not_found() -> Response<RespBody> {
    Response::builder().status(StatusCode::NOT_FOUND).body(full("404 not found")).expect("static not-found response is always well-formed")
}

fn status_response(status: StatusCode) -> Response<RespBody> {
    Response::builder().status(status).body(full("")).expect("static status response is always well-formed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::worker_config::WorkerConfig;
    use crate::registry::worker::Worker;
    use std::collections::HashMap;

    fn make_state(mode: OperationMode) -> Arc<ServerState> {
        Arc::new(ServerState {
            registry: Arc::new(Registry::new()),
            server_root: PathBuf::from("/tmp/tqserver-router-test"),
            mode,
            reload: Broadcaster::new(),
            shutting_down: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        })
    }

    fn make_worker(name: &str, route: &str) -> Arc<crate::registry::worker::Worker> {
        let config = WorkerConfig {
            name: name.to_string(),
            path: route.to_string(),
            r#type: "native".to_string(),
            enabled: true,
            runtime: HashMap::new(),
            timeouts: Default::default(),
            max_requests: 0,
            pool: Default::default(),
            fastcgi: Default::default(),
        };
        Arc::new(Worker::new(PathBuf::from("/tmp/tqserver-router-test-worker"), config))
    }

    #[test]
    fn shutting_down_flag_defaults_to_false() {
        let state = make_state(OperationMode::Prod);
        assert!(!state.shutting_down.load(std::sync::atomic::Ordering::Relaxed));
    }

    #[test]
    fn unmatched_path_returns_404_worker_lookup() {
        let state = make_state(OperationMode::Prod);
        state.registry.put(make_worker("root", "/home"));
        assert!(state.registry.lookup("/elsewhere").is_none());
    }
}
